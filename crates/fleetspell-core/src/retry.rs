// Retrying connector: bounded retry around a single dial attempt.

use std::future::Future;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ControllerIdentity, RetryPolicy};
use crate::error::CoreError;

/// Call `dial` until it succeeds, a non-transient error occurs, or the
/// policy's attempt/time bound is hit.
///
/// Only [`CoreError::is_transient`] errors are retried. Exhaustion yields
/// [`CoreError::ConnectionExhausted`] carrying the last transient error.
///
/// No attempt is started once the next wait would reach the deadline, so a
/// 5 s timeout with a 1 s wait dials 5 times rather than 6.
pub async fn dial_with_retry<T, F, Fut>(
    identity: &ControllerIdentity,
    policy: &RetryPolicy,
    mut dial: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let started = Instant::now();
    let deadline = policy.deadline().map(|timeout| started + timeout);
    let wait = policy.wait();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, dial())
                .await
                .unwrap_or_else(|_| {
                    Err(CoreError::Unreachable {
                        endpoint: identity.name.clone(),
                        reason: "dial timed out".into(),
                    })
                }),
            None => dial().await,
        };

        let err = match outcome {
            Ok(handle) => {
                debug!(controller = %identity.name, attempts, "connected");
                return Ok(handle);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        let out_of_attempts = policy.max_attempts().is_some_and(|max| attempts >= max);
        let out_of_time = deadline.is_some_and(|deadline| Instant::now() + wait >= deadline);
        if out_of_attempts || out_of_time {
            warn!(
                controller = %identity.name,
                attempts,
                error = %err,
                "giving up on controller"
            );
            return Err(CoreError::ConnectionExhausted {
                uuid: identity.uuid.to_string(),
                name: identity.name.clone(),
                attempts,
                elapsed: started.elapsed(),
                last_error: Box::new(err),
            });
        }

        debug!(
            controller = %identity.name,
            attempts,
            error = %err,
            wait_ms = wait.as_millis(),
            "controller unreachable, retrying"
        );
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    fn identity() -> ControllerIdentity {
        ControllerIdentity {
            uuid: Uuid::nil(),
            name: "prod".into(),
            customer: "acme".into(),
        }
    }

    fn unreachable() -> CoreError {
        CoreError::Unreachable {
            endpoint: "localhost:17100".into(),
            reason: "connection refused".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_bound_dials_exactly_that_often() {
        let dials = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempt: Some(3),
            wait: Some(Duration::from_secs(1)),
            timeout: None,
        };

        let result: Result<(), _> = dial_with_retry(&identity(), &policy, || {
            dials.fetch_add(1, Ordering::SeqCst);
            async { Err(unreachable()) }
        })
        .await;

        assert_eq!(dials.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            CoreError::ConnectionExhausted {
                attempts,
                name,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(name, "prod");
                assert!(last_error.is_transient());
            }
            other => panic!("expected ConnectionExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let dials = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempt: Some(5),
            ..RetryPolicy::default()
        };

        let result: Result<(), _> = dial_with_retry(&identity(), &policy, || {
            dials.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CoreError::AuthenticationFailed {
                    message: "bad password".into(),
                })
            }
        })
        .await;

        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(CoreError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let dials = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempt: Some(5),
            ..RetryPolicy::default()
        };

        let handle = dial_with_retry(&identity(), &policy, || {
            let n = dials.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(unreachable()) } else { Ok("handle") } }
        })
        .await
        .unwrap();

        assert_eq!(handle, "handle");
        assert_eq!(dials.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_elapsed_time() {
        let dials = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempt: None,
            wait: Some(Duration::from_secs(1)),
            timeout: Some(Duration::from_secs(5)),
        };

        let started = Instant::now();
        let result: Result<(), _> = dial_with_retry(&identity(), &policy, || {
            dials.fetch_add(1, Ordering::SeqCst);
            async { Err(unreachable()) }
        })
        .await;

        assert!(matches!(result, Err(CoreError::ConnectionExhausted { .. })));
        assert_eq!(dials.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn default_policy_never_retries_forever() {
        let dials = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = dial_with_retry(&identity(), &RetryPolicy::default(), || {
            dials.fetch_add(1, Ordering::SeqCst);
            async { Err(unreachable()) }
        })
        .await;

        assert!(matches!(result, Err(CoreError::ConnectionExhausted { .. })));
        assert_eq!(dials.load(Ordering::SeqCst), 40);
        assert!(started.elapsed() <= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_dial_is_cut_off_by_timeout() {
        let policy = RetryPolicy {
            attempt: Some(1),
            wait: None,
            timeout: Some(Duration::from_secs(2)),
        };

        let result: Result<(), _> =
            dial_with_retry(&identity(), &policy, std::future::pending).await;

        match result.unwrap_err() {
            CoreError::ConnectionExhausted { last_error, .. } => {
                assert!(last_error.is_transient());
            }
            other => panic!("expected ConnectionExhausted, got {other:?}"),
        }
    }
}
