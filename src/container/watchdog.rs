// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Advisory timeouts for long-running external operations.
//!
//! A container build can take minutes. The caller waiting on it may give
//! up early, but the work itself keeps going on its own task so a later
//! observer can still collect the result.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BerthError, BerthResult};

/// Outcome of waiting on a watched task.
#[derive(Debug)]
pub enum Watched<T> {
    /// The task finished within the limit.
    Finished(T),
    /// The limit passed; the task is still running.
    Pending(JoinHandle<T>),
}

/// Spawn `future` and wait for it for at most `limit`.
pub async fn watch<F>(limit: Duration, future: F) -> BerthResult<Watched<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut handle = tokio::spawn(future);
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(value)) => Ok(Watched::Finished(value)),
        Ok(Err(join_err)) => Err(BerthError::provisioning(
            "task",
            format!("background task failed: {join_err}"),
        )),
        Err(_) => {
            debug!(limit_secs = limit.as_secs(), "Watchdog limit reached");
            Ok(Watched::Pending(handle))
        }
    }
}

/// Like [`watch`], but a missed deadline is a [`BerthError::Timeout`].
///
/// The spawned task is detached, not aborted.
pub async fn with_watchdog<F>(operation: &str, limit: Duration, future: F) -> BerthResult<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match watch(limit, future).await? {
        Watched::Finished(value) => Ok(value),
        Watched::Pending(_detached) => Err(BerthError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_finishes_within_limit() {
        let value = with_watchdog("quick", Duration::from_secs(5), async { 7 })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_timeout_does_not_cancel_work() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);

        let err = with_watchdog("slow", Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BerthError::Timeout { .. }));
        assert!(!done.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(done.load(Ordering::SeqCst), "task keeps running after timeout");
    }

    #[tokio::test]
    async fn test_pending_handle_can_be_awaited() {
        let outcome = watch(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            "done"
        })
        .await
        .unwrap();

        match outcome {
            Watched::Pending(handle) => assert_eq!(handle.await.unwrap(), "done"),
            Watched::Finished(_) => panic!("expected pending"),
        }
    }
}
