//! Live admin route table served by the HTTP surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use control_plane_sdk::{PathDefinition, RouteAction};
use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::admin::RouteMounter;
use crate::domain::error::DomainError;

/// Where a mounted admin route leads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTarget {
    pub module_name: String,
    pub module_url: String,
    /// Path as the module registered it.
    pub path: String,
    /// Path under the admin prefix, in router syntax.
    pub mounted_path: String,
    pub action: RouteAction,
    pub grpc_function_name: String,
    pub return_type: String,
    pub middlewares: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A request matched against the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRoute {
    pub target: RouteTarget,
    pub params: BTreeMap<String, String>,
}

type Methods = BTreeMap<RouteAction, RouteTarget>;
type EntryKey = (String, RouteAction);

/// Route table under `<prefix>/<module>/<path>`.
///
/// Writers rebuild a `matchit` router from the entry map and swap it in;
/// readers resolve against the current snapshot without locking.
pub struct LiveRouteTable {
    prefix: String,
    entries: Mutex<BTreeMap<EntryKey, RouteTarget>>,
    snapshot: ArcSwap<matchit::Router<Methods>>,
}

impl LiveRouteTable {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_owned(),
            entries: Mutex::new(BTreeMap::new()),
            snapshot: ArcSwap::from_pointee(matchit::Router::new()),
        }
    }

    /// Full router path of a module route: `:id` and `*rest` segments
    /// become `{id}` and `{*rest}`.
    #[must_use]
    pub fn mounted_path(&self, module_name: &str, path: &str) -> String {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| {
                if let Some(name) = segment.strip_prefix(':') {
                    format!("{{{name}}}")
                } else if let Some(name) = segment.strip_prefix('*') {
                    let name = if name.is_empty() { "rest" } else { name };
                    format!("{{*{name}}}")
                } else {
                    segment.to_owned()
                }
            })
            .collect();

        let mut full = format!("{}/{module_name}", self.prefix);
        for segment in segments {
            full.push('/');
            full.push_str(&segment);
        }
        full
    }

    #[must_use]
    pub fn resolve(&self, action: RouteAction, path: &str) -> Option<ResolvedRoute> {
        let router = self.snapshot.load();
        let matched = router.at(path).ok()?;
        let target = matched.value.get(&action)?.clone();
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some(ResolvedRoute { target, params })
    }

    /// Actions mounted on whatever `path` matches; empty if nothing does.
    #[must_use]
    pub fn allowed_actions(&self, path: &str) -> Vec<RouteAction> {
        self.snapshot
            .load()
            .at(path)
            .map(|m| m.value.keys().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn list(&self) -> Vec<RouteTarget> {
        self.entries.lock().values().cloned().collect()
    }

    fn rebuild(entries: &BTreeMap<EntryKey, RouteTarget>) -> Result<matchit::Router<Methods>, String> {
        let mut grouped: BTreeMap<&str, Methods> = BTreeMap::new();
        for ((path, action), target) in entries {
            grouped
                .entry(path.as_str())
                .or_default()
                .insert(*action, target.clone());
        }

        let mut router = matchit::Router::new();
        for (path, methods) in grouped {
            router
                .insert(path, methods)
                .map_err(|e| format!("{path}: {e}"))?;
        }
        Ok(router)
    }

    fn swap_in(&self, entries: &BTreeMap<EntryKey, RouteTarget>) -> Result<(), String> {
        let router = Self::rebuild(entries)?;
        self.snapshot.store(Arc::new(router));
        Ok(())
    }
}

impl RouteMounter for LiveRouteTable {
    fn mount(
        &self,
        module_name: &str,
        module_url: &str,
        route: &PathDefinition,
    ) -> Result<(), DomainError> {
        let mounted_path = self.mounted_path(module_name, &route.options.path);
        let key = (mounted_path.clone(), route.options.action);
        let target = RouteTarget {
            module_name: module_name.to_owned(),
            module_url: module_url.to_owned(),
            path: route.options.path.clone(),
            mounted_path: mounted_path.clone(),
            action: route.options.action,
            grpc_function_name: route.grpc_function_name.clone(),
            return_type: route.return_type.clone(),
            middlewares: route.options.middlewares.clone(),
            description: route.options.description.clone(),
        };

        let mut entries = self.entries.lock();
        let previous = entries.insert(key.clone(), target);
        if let Err(reason) = self.swap_in(&entries) {
            match previous {
                Some(previous) => entries.insert(key, previous),
                None => entries.remove(&key),
            };
            return Err(DomainError::RouteMount {
                path: mounted_path,
                reason,
            });
        }
        tracing::debug!(path = %mounted_path, action = %route.options.action, "route mounted");
        Ok(())
    }

    fn unmount(&self, module_name: &str, path: &str, action: RouteAction) -> bool {
        let key = (self.mounted_path(module_name, path), action);
        let mut entries = self.entries.lock();
        if entries.remove(&key).is_none() {
            return false;
        }
        if let Err(reason) = self.swap_in(&entries) {
            tracing::warn!(path = %key.0, reason = %reason, "router rebuild failed after unmount");
        }
        true
    }

    fn set_middlewares(
        &self,
        module_name: &str,
        path: &str,
        action: RouteAction,
        middlewares: &[String],
    ) -> Result<(), DomainError> {
        let mounted_path = self.mounted_path(module_name, path);
        let mut entries = self.entries.lock();
        let target = entries
            .get_mut(&(mounted_path.clone(), action))
            .ok_or_else(|| DomainError::RouteNotFound {
                path: path.to_owned(),
                action: action.to_string(),
            })?;
        target.middlewares = middlewares.to_vec();
        self.swap_in(&entries)
            .map_err(|reason| DomainError::RouteMount {
                path: mounted_path,
                reason,
            })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use control_plane_sdk::RouteOptions;

    fn route(path: &str, action: RouteAction) -> PathDefinition {
        PathDefinition::new(RouteOptions::new(path, action), "CreateRoom")
    }

    #[test]
    fn module_paths_are_namespaced_and_converted() {
        let table = LiveRouteTable::new("/admin/");
        assert_eq!(table.mounted_path("chat", "/rooms"), "/admin/chat/rooms");
        assert_eq!(
            table.mounted_path("chat", "rooms/:id/messages"),
            "/admin/chat/rooms/{id}/messages"
        );
        assert_eq!(table.mounted_path("files", "/blob/*"), "/admin/files/blob/{*rest}");
        assert_eq!(table.mounted_path("chat", "/"), "/admin/chat");
    }

    #[test]
    fn resolves_by_path_and_action_with_params() {
        let table = LiveRouteTable::new("/admin");
        table
            .mount("chat", "10.0.0.5:5000", &route("/rooms/:id", RouteAction::Get))
            .unwrap();
        table
            .mount("chat", "10.0.0.5:5000", &route("/rooms/:id", RouteAction::Delete))
            .unwrap();

        let resolved = table.resolve(RouteAction::Get, "/admin/chat/rooms/42").unwrap();
        assert_eq!(resolved.target.module_url, "10.0.0.5:5000");
        assert_eq!(resolved.params["id"], "42");
        assert!(table.resolve(RouteAction::Post, "/admin/chat/rooms/42").is_none());
        assert_eq!(
            table.allowed_actions("/admin/chat/rooms/42"),
            vec![RouteAction::Get, RouteAction::Delete]
        );
        assert!(table.allowed_actions("/admin/auth").is_empty());
    }

    #[test]
    fn conflicting_mount_is_rejected_and_rolled_back() {
        let table = LiveRouteTable::new("/admin");
        table
            .mount("chat", "h:1", &route("/rooms/:id", RouteAction::Get))
            .unwrap();
        let err = table
            .mount("chat", "h:1", &route("/rooms/:name", RouteAction::Post))
            .unwrap_err();
        assert!(matches!(err, DomainError::RouteMount { .. }));
        assert_eq!(table.list().len(), 1);
        assert!(table.resolve(RouteAction::Get, "/admin/chat/rooms/1").is_some());
    }

    #[test]
    fn middlewares_and_unmount_take_effect() {
        let table = LiveRouteTable::new("/admin");
        table
            .mount("chat", "h:1", &route("/rooms", RouteAction::Post))
            .unwrap();
        table
            .set_middlewares("chat", "/rooms", RouteAction::Post, &["auth".to_owned()])
            .unwrap();
        let resolved = table.resolve(RouteAction::Post, "/admin/chat/rooms").unwrap();
        assert_eq!(resolved.target.middlewares, vec!["auth".to_owned()]);

        assert!(table.unmount("chat", "/rooms", RouteAction::Post));
        assert!(!table.unmount("chat", "/rooms", RouteAction::Post));
        assert!(table.resolve(RouteAction::Post, "/admin/chat/rooms").is_none());
        assert!(matches!(
            table.set_middlewares("chat", "/rooms", RouteAction::Post, &[]),
            Err(DomainError::RouteNotFound { .. })
        ));
    }
}
