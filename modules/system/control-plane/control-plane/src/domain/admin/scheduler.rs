use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs at most one deferred task, `delay` after the latest `schedule`.
///
/// Scheduling again while a task is still waiting cancels it and restarts
/// the delay. A task whose delay elapsed runs to completion.
pub struct Debouncer {
    delay: Duration,
    root: CancellationToken,
    slot: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Debouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            root: CancellationToken::new(),
            slot: Mutex::new(None),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.root.is_cancelled() {
            return;
        }
        let token = self.root.child_token();
        let waiting = token.clone();
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = waiting.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            task.await;
        });

        if let Some((previous, _)) = self.slot.lock().replace((token, handle)) {
            previous.cancel();
        }
    }

    /// Drops the waiting task, if any.
    pub fn cancel(&self) {
        if let Some((token, _)) = self.slot.lock().take() {
            token.cancel();
        }
    }

    /// Cancels the waiting task and refuses new ones.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.cancel();
    }

    /// Whether a task is waiting or running.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }
}
