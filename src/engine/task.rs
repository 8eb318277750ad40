// SPDX-License-Identifier: GPL-3.0-only

//! Completion tokens
//!
//! A [`Task`] is the awaitable side of a [`CompletionSource`]. The source
//! resolves it at most once; later attempts are ignored. Dropping the source
//! without resolving resolves the task as cancelled.

use crate::errors::{EngineError, EngineResult};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Cloneable handle to the outcome of an engine operation
#[derive(Clone)]
pub struct Task {
    inner: Shared<BoxFuture<'static, EngineResult<()>>>,
}

impl Task {
    /// Task driven by an arbitrary future
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = EngineResult<()>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// Task that is already resolved
    pub fn ready(result: EngineResult<()>) -> Self {
        Self::from_future(futures::future::ready(result))
    }

    /// Outcome if already resolved, without waiting
    pub fn peek(&self) -> Option<EngineResult<()>> {
        self.inner.clone().now_or_never()
    }

    pub fn is_completed(&self) -> bool {
        self.peek().is_some()
    }
}

impl Future for Task {
    type Output = EngineResult<()>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Producer side of a [`Task`]
#[derive(Clone)]
pub struct CompletionSource {
    sender: Arc<Mutex<Option<oneshot::Sender<EngineResult<()>>>>>,
}

impl CompletionSource {
    pub fn new() -> (Self, Task) {
        let (tx, rx) = oneshot::channel();
        let task = Task::from_future(async move { rx.await.unwrap_or(Err(EngineError::Cancelled)) });
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            task,
        )
    }

    /// Resolve the task; returns false if it was already resolved
    pub fn try_set(&self, result: EngineResult<()>) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                // Nobody awaiting is fine
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_set(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_completion_wins() {
        let (source, task) = CompletionSource::new();
        assert!(source.try_set(Ok(())));
        assert!(!source.try_set(Err(EngineError::Cancelled)));
        assert!(source.is_set());
        assert_eq!(task.await, Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_source_cancels() {
        let (source, task) = CompletionSource::new();
        drop(source);
        assert_eq!(task.await, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_clones_share_outcome() {
        let (source, task) = CompletionSource::new();
        let other = task.clone();
        source.try_set(Err(EngineError::Precondition("mode".into())));
        assert!(task.await.is_err());
        assert!(other.await.is_err());
    }

    #[test]
    fn test_ready() {
        let task = Task::ready(Ok(()));
        assert!(task.is_completed());
        assert_eq!(task.peek(), Some(Ok(())));
    }
}
