//! In-process "serving-modules-update" channel.
//!
//! Feeds local watchers such as the `WatchModules` stream. Cross-instance
//! propagation goes through the state store bus instead; the two are kept
//! apart even though they carry similar payloads.

use std::sync::Arc;

use control_plane_sdk::RegisteredModule;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Full module snapshot emitted on every registry change.
pub type ModuleSnapshot = Arc<[RegisteredModule]>;

#[derive(Clone)]
pub struct ModuleEvents {
    tx: broadcast::Sender<ModuleSnapshot>,
}

impl Default for ModuleEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Emits a serving-modules-update. Having no watchers is fine.
    pub fn emit(&self, snapshot: ModuleSnapshot) {
        let watchers = self.tx.send(snapshot).unwrap_or(0);
        tracing::debug!(watchers, "serving-modules-update emitted");
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleSnapshot> {
        self.tx.subscribe()
    }
}
