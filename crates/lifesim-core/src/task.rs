use std::future::Future;

use futures_util::FutureExt;
use tokio::task::{JoinError, JoinHandle};

/// A background computation polled from a frame loop without blocking.
///
/// The result is handed out exactly once; after that the task reads as idle.
pub struct PendingTask<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T> Default for PendingTask<T> {
    fn default() -> Self {
        Self { handle: None }
    }
}

impl<T: Send + 'static> PendingTask<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(future)),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Take the result if the task has finished.
    pub fn poll(&mut self) -> Option<Result<T, JoinError>> {
        let handle = self.handle.as_mut()?;
        if !handle.is_finished() {
            return None;
        }
        let result = handle.now_or_never()?;
        self.handle = None;
        Some(result)
    }

    /// Drop interest in the result. The task keeps running but its output is discarded.
    pub fn detach(&mut self) {
        self.handle = None;
    }
}
