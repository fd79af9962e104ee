//! Transport-agnostic retry with exponential backoff and full jitter.

use crate::config::RetryConfig;
use crate::error::{Error, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Message fragments that mark an error as transient when the transport
/// exposes no structured status. Checked last, after sentinel identity and
/// gRPC codes.
pub const TRANSIENT_KEYWORDS: [&str; 9] = [
    "timeout",
    "connection refused",
    "connection reset",
    "temporary failure",
    "unavailable",
    "deadline exceeded",
    "resource exhausted",
    "too many requests",
    "rate limit",
];

/// Runs `operation` under `config`, re-invoking it after transient failures.
///
/// Without a config, or with `enabled = false`, the operation runs exactly
/// once. Otherwise it runs up to `max_retries + 1` times; the last observed
/// error is always returned. `cancel` aborts a pending backoff wait and
/// prevents further attempts, but never interrupts an attempt in flight.
pub async fn with_retry<T, F, Fut>(
    config: Option<&RetryConfig>,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let config = match config {
        Some(config) if config.enabled => config,
        _ => return operation().await,
    };

    let max_retries = config.max_retries;
    let initial = config.effective_initial_backoff();
    let max = config.effective_max_backoff();
    let retryable = config.effective_retryable_errors();

    let mut last_err: Option<Error> = None;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(last_err.unwrap_or(Error::Cancelled));
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_retries || !is_retryable(&err, retryable) {
            return Err(err);
        }

        let delay = calculate_backoff(attempt, initial, max);
        warn!(
            attempt = attempt + 1,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        last_err = Some(err);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(last_err.unwrap_or(Error::Cancelled));
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

/// Whether `err` should trigger another attempt.
pub fn is_retryable(err: &Error, retryable: &[ErrorKind]) -> bool {
    if retryable.iter().any(|kind| err.is(*kind)) {
        return true;
    }

    if matches!(
        err.grpc_code(),
        Some(
            tonic::Code::Unavailable
                | tonic::Code::DeadlineExceeded
                | tonic::Code::ResourceExhausted
                | tonic::Code::Aborted
        )
    ) {
        return true;
    }

    // Messages of these kinds embed caller input (keys, policy IDs), so a
    // keyword match says nothing about the failure itself.
    if err.kind().map_or(false, is_permanent) {
        return false;
    }

    let message = error_chain_message(err).to_lowercase();
    TRANSIENT_KEYWORDS
        .iter()
        .any(|keyword| message.contains(keyword))
}

/// `min(initial * 2^attempt, max)`, saturating.
pub fn backoff_ceiling(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    initial.checked_mul(factor).unwrap_or(max).min(max)
}

/// Full jitter: a uniform fraction of the exponential ceiling.
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    backoff_ceiling(attempt, initial, max).mul_f64(rand::random::<f64>())
}

/// Kinds that repeat identically on every attempt.
fn is_permanent(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ObjectNotFound
            | ErrorKind::PolicyNotFound
            | ErrorKind::NotSupported
            | ErrorKind::InvalidKey
            | ErrorKind::InvalidData
            | ErrorKind::InvalidPolicyId
            | ErrorKind::InvalidPolicy
            | ErrorKind::InvalidMetadata
            | ErrorKind::InvalidConfig
            | ErrorKind::InvalidProtocol
    )
}

fn error_chain_message(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Operation;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig::enabled()
            .with_max_retries(max_retries)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_disabled_runs_once() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<()> = with_retry(Some(&config), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Sentinel(ErrorKind::ConnectionFailed)) }
        })
        .await;

        assert!(result.unwrap_err().is(ErrorKind::ConnectionFailed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_absent_config_runs_once() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(None, &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Sentinel(ErrorKind::Timeout)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let config = fast_retry(5);

        let result = with_retry(Some(&config), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Sentinel(ErrorKind::TemporaryFailure))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_runs_once() {
        let calls = AtomicU32::new(0);
        let config = fast_retry(5);

        let result: Result<()> = with_retry(Some(&config), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::object_not_found("missing.txt")) }
        })
        .await;

        assert!(result.unwrap_err().is(ErrorKind::ObjectNotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let config = fast_retry(3);

        let result: Result<()> = with_retry(Some(&config), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(Error::detailed(
                    ErrorKind::ConnectionFailed,
                    format!("attempt {}", n),
                ))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.unwrap_err().to_string(), "connection failed: attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let calls = AtomicU32::new(0);
        let config = fast_retry(0);

        let result: Result<()> = with_retry(Some(&config), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Sentinel(ErrorKind::Timeout)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> = with_retry(Some(&fast_retry(3)), &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_returns_last_error() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let config = RetryConfig::enabled()
            .with_max_retries(5)
            .with_backoff(Duration::from_secs(3600), Duration::from_secs(3600));

        let result: Result<()> = with_retry(Some(&config), &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            token.cancel();
            async { Err(Error::Sentinel(ErrorKind::Timeout)) }
        })
        .await;

        assert!(result.unwrap_err().is(ErrorKind::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_classification() {
        let defaults = RetryConfig::enabled();
        let defaults = defaults.effective_retryable_errors();

        assert!(is_retryable(&Error::Sentinel(ErrorKind::ConnectionFailed), defaults));
        assert!(is_retryable(
            &Error::grpc(Operation::Put, tonic::Status::aborted("conflict")),
            defaults
        ));
        assert!(is_retryable(
            &Error::grpc(Operation::Put, tonic::Status::resource_exhausted("quota")),
            defaults
        ));
        assert!(is_retryable(
            &Error::operation_failed(Operation::Put, "429 Too Many Requests"),
            defaults
        ));
        assert!(!is_retryable(
            &Error::grpc(Operation::Put, tonic::Status::invalid_argument("bad key")),
            defaults
        ));
        assert!(!is_retryable(&Error::Sentinel(ErrorKind::InvalidKey), defaults));
        assert!(!is_retryable(
            &Error::not_supported(crate::Protocol::Rest, Operation::Archive),
            defaults
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_with_keyword_in_key_runs_once() {
        let calls = AtomicU32::new(0);
        let config = fast_retry(3);

        let result: Result<()> = with_retry(Some(&config), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::object_not_found("reports/timeout.log")) }
        })
        .await;

        assert!(result.unwrap_err().is(ErrorKind::ObjectNotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keyword_fallback_skips_permanent_kinds() {
        let defaults = RetryConfig::enabled();
        let defaults = defaults.effective_retryable_errors();

        assert!(!is_retryable(&Error::object_not_found("unavailable-items.csv"), defaults));
        assert!(!is_retryable(
            &Error::detailed(ErrorKind::PolicyNotFound, "rate limit policy"),
            defaults
        ));
        assert!(!is_retryable(
            &Error::detailed(ErrorKind::InvalidData, "connection reset mid-document"),
            defaults
        ));
        // Unclassified failures still go through the keyword match.
        assert!(is_retryable(
            &Error::operation_failed(Operation::Get, "get failed with status 503 Service Unavailable"),
            defaults
        ));
    }

    #[test]
    fn test_custom_retryable_set_replaces_defaults() {
        let config = RetryConfig::enabled().with_retryable_errors([ErrorKind::InvalidData]);
        let kinds = config.effective_retryable_errors();

        assert!(is_retryable(&Error::Sentinel(ErrorKind::InvalidData), kinds));
        assert!(!is_retryable(&Error::Sentinel(ErrorKind::ConnectionFailed), kinds));
        // keyword fallback still applies
        assert!(is_retryable(&Error::Sentinel(ErrorKind::Timeout), kinds));
    }

    #[test]
    fn test_backoff_ceiling() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_secs(5);

        assert_eq!(backoff_ceiling(0, initial, max), Duration::from_millis(100));
        assert_eq!(backoff_ceiling(3, initial, max), Duration::from_millis(800));
        assert_eq!(backoff_ceiling(6, initial, max), max);
        assert_eq!(backoff_ceiling(64, initial, max), max);
    }

    #[test]
    fn test_backoff_is_jittered_and_bounded() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_secs(5);

        let samples: Vec<Duration> = (0..64).map(|_| calculate_backoff(3, initial, max)).collect();

        assert!(samples.iter().all(|d| *d <= Duration::from_millis(800)));
        assert!(samples.iter().any(|d| *d != samples[0]));
    }
}
