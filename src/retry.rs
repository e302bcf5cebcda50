//! Retry classification and exponential backoff.
//!
//! Only failures that are known to be transient are retried. Mutating administrative calls are not
//! routed through here at all; they are sent exactly once.

use crate::tracing_shim::debug;
use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng as _};
use std::future::Future;
use std::time::Duration;
use tonic::{Code, Status};

/// Messages attached to `INTERNAL` errors that indicate the connection, not the request, failed.
const RETRYABLE_INTERNAL_MESSAGES: [&str; 4] = [
    "stream terminated by rst_stream",
    "rst_stream",
    "rst stream",
    "received unexpected eos on data frame from server",
];

/// How aggressively to retry transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// The upper bound of the first pause.
    pub initial: Duration,
    /// The largest upper bound any pause may have.
    pub max: Duration,
    /// How much the upper bound grows after each pause.
    pub multiplier: f64,
    /// The total number of attempts, including the first. A value of `1` disables retries.
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    #[inline]
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            multiplier: 1.2,
            max_attempts: 10,
        }
    }
}

impl RetrySettings {
    /// Settings that never retry.
    #[inline]
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// A fresh backoff sequence following these settings.
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            current: self.initial,
            max: self.max,
            multiplier: self.multiplier.max(1.0),
            rng: SmallRng::from_entropy(),
        }
    }
}

/// A sequence of randomized, growing pauses.
///
/// Each pause is drawn uniformly from `[0, bound]`, after which the bound is multiplied and capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    rng: SmallRng,
}

impl Backoff {
    /// The next pause to wait for before retrying.
    pub fn next_pause(&mut self) -> Duration {
        let bound = u64::try_from(self.current.as_nanos()).unwrap_or(u64::MAX);
        let pause = Duration::from_nanos(self.rng.gen_range(0..=bound));
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        pause
    }

    /// The current upper bound on pauses.
    #[must_use]
    pub const fn bound(&self) -> Duration {
        self.current
    }
}

/// Whether a failed call is worth sending again.
#[must_use]
pub fn is_retryable(status: &Status) -> bool {
    match status.code() {
        Code::DeadlineExceeded | Code::Unavailable | Code::Aborted => true,
        Code::Internal => {
            let message = status.message().to_lowercase();
            RETRYABLE_INTERNAL_MESSAGES
                .iter()
                .any(|needle| message.contains(needle))
        }
        _ => false,
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// `op` is invoked once per attempt and must build a fresh request each time.
pub async fn invoke<T, F, Fut>(settings: &RetrySettings, mut op: F) -> Result<T, Status>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut backoff = settings.backoff();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(status) if attempt < settings.max_attempts && is_retryable(&status) => {
                let pause = backoff.next_pause();
                debug!(
                    attempt,
                    code = ?status.code(),
                    pause_ms = pause.as_millis() as u64,
                    "retrying transient failure"
                );
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
            Err(status) => return Err(status),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetrySettings {
        RetrySettings {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(2),
            multiplier: 2.0,
            max_attempts: 4,
        }
    }

    #[test]
    fn test_retryable_codes() {
        assert!(is_retryable(&Status::unavailable("down")));
        assert!(is_retryable(&Status::deadline_exceeded("slow")));
        assert!(is_retryable(&Status::aborted("conflict")));
        assert!(!is_retryable(&Status::not_found("missing")));
        assert!(!is_retryable(&Status::internal("boom")));
        assert!(is_retryable(&Status::internal(
            "stream terminated by RST_STREAM with error code: INTERNAL_ERROR"
        )));
        assert!(is_retryable(&Status::internal(
            "Received unexpected EOS on DATA frame from server"
        )));
    }

    #[test]
    fn test_backoff_is_bounded() {
        let settings = RetrySettings::default();
        let mut backoff = settings.backoff();
        let mut bound = settings.initial;
        for _ in 0..50 {
            let pause = backoff.next_pause();
            assert!(pause <= bound);
            bound = bound.mul_f64(settings.multiplier).min(settings.max);
        }
        assert_eq!(backoff.bound(), settings.max);
    }

    #[test]
    fn test_backoff_includes_both_ends() {
        let settings = RetrySettings {
            initial: Duration::from_nanos(1),
            max: Duration::from_nanos(1),
            ..fast()
        };
        let mut backoff = settings.backoff();
        let pauses: Vec<_> = (0..200).map(|_| backoff.next_pause()).collect();
        assert!(pauses.contains(&Duration::ZERO));
        assert!(pauses.contains(&Duration::from_nanos(1)));

        let mut immediate = RetrySettings {
            initial: Duration::ZERO,
            ..fast()
        }
        .backoff();
        assert_eq!(immediate.next_pause(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_invoke_retries_transient() -> Result<(), Box<dyn std::error::Error>> {
        let calls = AtomicU32::new(0);
        let value = invoke(&fast(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Status::unavailable("try again"))
            } else {
                Ok(7)
            }
        })
        .await?;
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_invoke_gives_up() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = invoke(&fast(), || async {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            Err(Status::unavailable("still down"))
        })
        .await;
        assert_eq!(res.map_err(|s| s.code()), Err(Code::Unavailable));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let calls = AtomicU32::new(0);
        let res: Result<(), _> = invoke(&fast(), || async {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            Err(Status::permission_denied("no"))
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
