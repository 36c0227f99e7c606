//! In-memory module and instance-health tables.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use control_plane_sdk::{HealthStatus, RegisteredModule};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthRecord {
    pub last_seen: Instant,
    pub status: HealthStatus,
}

impl HealthRecord {
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > window
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModuleEntry {
    address: String,
    serving: bool,
}

/// What a sweep pruned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    /// (module, instance address) pairs dropped as offline or not serving.
    pub removed_instances: Vec<(String, String)>,
    /// Modules left with no instance at all.
    pub removed_modules: Vec<String>,
    /// Whether the module snapshot visible to watchers changed.
    pub changed: bool,
}

/// Module name -> entry, plus module name -> instance address -> health.
///
/// A module stays listed only while at least one of its instances has a
/// health record that the sweep has not expired.
#[derive(Debug, Default)]
pub struct RegistryTable {
    modules: BTreeMap<String, ModuleEntry>,
    health: HashMap<String, HashMap<String, HealthRecord>>,
}

impl RegistryTable {
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    #[must_use]
    pub fn address_of(&self, name: &str) -> Option<String> {
        self.modules.get(name).map(|m| m.address.clone())
    }

    /// Inserts or refreshes a module and its instance. Returns whether the
    /// module snapshot changed.
    pub fn upsert(&mut self, name: &str, address: &str, status: HealthStatus, now: Instant) -> bool {
        self.health.entry(name.to_owned()).or_default().insert(
            address.to_owned(),
            HealthRecord {
                last_seen: now,
                status,
            },
        );
        let serving = self.any_serving(name);

        let entry = ModuleEntry {
            address: address.to_owned(),
            serving,
        };
        match self.modules.insert(name.to_owned(), entry.clone()) {
            Some(previous) => previous != entry,
            None => true,
        }
    }

    /// Refreshes an instance's health. Returns `None` for unknown modules,
    /// otherwise whether the module snapshot changed.
    pub fn record_health(
        &mut self,
        name: &str,
        address: &str,
        status: HealthStatus,
        now: Instant,
    ) -> Option<bool> {
        if !self.modules.contains_key(name) {
            return None;
        }
        self.health.entry(name.to_owned()).or_default().insert(
            address.to_owned(),
            HealthRecord {
                last_seen: now,
                status,
            },
        );
        let serving = self.any_serving(name);
        let entry = self.modules.get_mut(name)?;
        let changed = entry.serving != serving;
        entry.serving = serving;
        Some(changed)
    }

    /// Drops instances that went quiet for longer than `window` or report
    /// anything but serving, then drops modules left without instances.
    pub fn sweep(&mut self, now: Instant, window: Duration) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for (module, instances) in &mut self.health {
            instances.retain(|address, record| {
                let keep = !record.is_stale(now, window) && record.status.is_serving();
                if !keep {
                    outcome
                        .removed_instances
                        .push((module.clone(), address.clone()));
                }
                keep
            });
        }
        self.health.retain(|_, instances| !instances.is_empty());

        let health = &self.health;
        let mut removed_modules = Vec::new();
        for (name, entry) in &mut self.modules {
            let Some(instances) = health.get(name) else {
                removed_modules.push(name.clone());
                continue;
            };
            if !instances.contains_key(&entry.address) {
                // The registered address went away; fall back to a live one.
                if let Some(address) = instances.keys().min() {
                    entry.address.clone_from(address);
                    outcome.changed = true;
                }
            }
            if !entry.serving {
                entry.serving = true;
                outcome.changed = true;
            }
        }
        for name in &removed_modules {
            self.modules.remove(name);
        }
        outcome.changed |= !removed_modules.is_empty();
        outcome.removed_modules = removed_modules;
        outcome.removed_instances.sort();
        outcome
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<RegisteredModule> {
        self.modules
            .iter()
            .map(|(name, entry)| RegisteredModule {
                name: name.clone(),
                address: entry.address.clone(),
                serving: entry.serving,
            })
            .collect()
    }

    #[must_use]
    pub fn instance(&self, name: &str, address: &str) -> Option<HealthRecord> {
        self.health.get(name)?.get(address).copied()
    }

    fn any_serving(&self, name: &str) -> bool {
        self.health
            .get(name)
            .is_some_and(|instances| instances.values().any(|r| r.status.is_serving()))
    }
}
