//! Bounded, retry-once execution of local disk operations.
//!
//! Blocking file work runs on the blocking pool under a timeout. A transient
//! failure is retried exactly once after the configured backoff; anything
//! else surfaces immediately. Interrupted, would-block and timed-out I/O
//! count as transient.

use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::warn;

use crate::config::IoConfig;
use crate::domain::{PipelineError, Result};

enum Attempt<T> {
    Finished(Result<T>),
    /// Still running on the blocking pool; the handle is the only way to
    /// learn how it ended.
    TimedOut(JoinHandle<Result<T>>),
}

fn joined<T>(op: &str, outcome: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    outcome.unwrap_or_else(|join| {
        Err(PipelineError::Io(std::io::Error::other(format!(
            "{op}: blocking task failed: {join}"
        ))))
    })
}

fn timed_out(op: &str, cfg: &IoConfig) -> PipelineError {
    PipelineError::Timeout {
        op: op.to_string(),
        timeout_ms: cfg.timeout_ms,
    }
}

async fn attempt_blocking<T, F>(op: &str, cfg: &IoConfig, f: F) -> Attempt<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(Duration::from_millis(cfg.timeout_ms), &mut handle).await {
        Ok(outcome) => Attempt::Finished(joined(op, outcome)),
        Err(_) => Attempt::TimedOut(handle),
    }
}

/// Run blocking `f` with the disk I/O policy.
///
/// A retry never runs alongside an earlier attempt. When the first attempt
/// times out it gets one more timeout period to finish; its own result is
/// then used to decide on the retry. If it is still running after that, the
/// timeout is returned and no retry is started.
pub async fn with_retry<T, F>(op: &str, cfg: &IoConfig, f: F) -> Result<T>
where
    T: Send + 'static,
    F: Fn() -> Result<T> + Clone + Send + 'static,
{
    let first = match attempt_blocking(op, cfg, f.clone()).await {
        Attempt::Finished(result) => result,
        Attempt::TimedOut(handle) => {
            match tokio::time::timeout(Duration::from_millis(cfg.timeout_ms), handle).await {
                Ok(outcome) => {
                    warn!(op = %op, timeout_ms = cfg.timeout_ms, "disk operation finished after its timeout");
                    joined(op, outcome)
                }
                Err(_) => {
                    warn!(op = %op, timeout_ms = cfg.timeout_ms, "disk operation still running, not retrying");
                    return Err(timed_out(op, cfg));
                }
            }
        }
    };
    match first {
        Err(e) if e.is_transient() => {
            warn!(op = %op, error = %e, "transient disk failure, retrying once");
            tokio::time::sleep(Duration::from_millis(cfg.retry_backoff_ms)).await;
            match attempt_blocking(op, cfg, f).await {
                Attempt::Finished(result) => result,
                Attempt::TimedOut(_) => Err(timed_out(op, cfg)),
            }
        }
        other => other,
    }
}

/// Async counterpart of [`with_retry`] for store calls that are already
/// futures (ledger appends, blob reads).
pub async fn retry_async<T, F, Fut>(op: &str, cfg: &IoConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let timeout = Duration::from_millis(cfg.timeout_ms);
    let mut retried = false;
    loop {
        let outcome = match tokio::time::timeout(timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(op, cfg)),
        };
        match outcome {
            Err(e) if e.is_transient() && !retried => {
                warn!(op = %op, error = %e, "transient store failure, retrying once");
                retried = true;
                tokio::time::sleep(Duration::from_millis(cfg.retry_backoff_ms)).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast() -> IoConfig {
        IoConfig {
            timeout_ms: 50,
            retry_backoff_ms: 1,
        }
    }

    fn failing_until(
        calls: Arc<AtomicUsize>,
        failures: usize,
        kind: std::io::ErrorKind,
    ) -> impl Fn() -> Result<&'static str> + Clone + Send + 'static {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(PipelineError::Io(std::io::Error::from(kind)))
            } else {
                Ok("done")
            }
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = failing_until(calls.clone(), 1, std::io::ErrorKind::Interrupted);
        assert_eq!(with_retry("write", &fast(), f).await.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_transient_failure_surfaces() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = failing_until(calls.clone(), 5, std::io::ErrorKind::Interrupted);
        let err = with_retry("write", &fast(), f).await.unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = failing_until(calls.clone(), 5, std::io::ErrorKind::NotFound);
        assert!(with_retry("read", &fast(), f).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_operation_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let slow = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            Ok::<(), PipelineError>(())
        };
        let err = with_retry("fsync", &fast(), slow).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { timeout_ms: 50, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn patient() -> IoConfig {
        IoConfig {
            timeout_ms: 100,
            retry_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn late_success_is_kept_without_a_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let late = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(150));
            Ok::<_, PipelineError>("published")
        };
        assert_eq!(with_retry("publish", &patient(), late).await.unwrap(), "published");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_waits_for_the_timed_out_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let (c, r, o) = (calls.clone(), running.clone(), overlap.clone());
        let f = move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            if r.fetch_add(1, Ordering::SeqCst) > 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            let result = if n == 0 {
                std::thread::sleep(Duration::from_millis(150));
                Err(PipelineError::Io(std::io::Error::from(
                    std::io::ErrorKind::Interrupted,
                )))
            } else {
                Ok("second")
            };
            r.fetch_sub(1, Ordering::SeqCst);
            result
        };
        assert_eq!(with_retry("publish", &patient(), f).await.unwrap(), "second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_retry_follows_the_same_policy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = retry_async("append", &fast(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PipelineError::Io(std::io::Error::from(
                        std::io::ErrorKind::WouldBlock,
                    )))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
