//! Bounded retry loop for request/response exchanges.

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Bookkeeping of one retried exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExchangeReport {
    /// Attempts made, including the first
    pub attempts: u32,
    /// Whether an attempt succeeded
    pub succeeded: bool,
    /// Description of the most recent failure, if any
    pub last_error: Option<String>,
}

/// Run `attempt` until it succeeds, at most `retries + 1` times.
///
/// `attempt` receives the zero-based attempt number. On exhaustion the error
/// of the final attempt is returned.
pub fn run_with_retries<T, E, F>(retries: u32, mut attempt: F) -> (Result<T, E>, ExchangeReport)
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = retries.saturating_add(1);
    let mut report = ExchangeReport::default();

    loop {
        let number = report.attempts;
        report.attempts += 1;

        match attempt(number) {
            Ok(value) => {
                report.succeeded = true;
                return (Ok(value), report);
            }
            Err(err) => {
                report.last_error = Some(err.to_string());
                if report.attempts >= max_attempts {
                    warn!("Giving up after {} attempts: {}", report.attempts, err);
                    return (Err(err), report);
                }
                debug!(
                    "Attempt {}/{} failed: {}",
                    report.attempts, max_attempts, err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_retries_is_one_attempt() {
        let mut calls = 0;
        let (result, report) = run_with_retries(0, |_| {
            calls += 1;
            Err::<(), _>("timeout")
        });
        assert_eq!(result, Err("timeout"));
        assert_eq!(calls, 1);
        assert_eq!(report.attempts, 1);
        assert!(!report.succeeded);
    }

    #[test]
    fn test_exhaustion_after_k_plus_one() {
        let mut seen = Vec::new();
        let (result, report) = run_with_retries(3, |n| {
            seen.push(n);
            Err::<(), _>(format!("fail {}", n))
        });
        assert_eq!(result, Err("fail 3".to_string()));
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(report.last_error.as_deref(), Some("fail 3"));
    }

    #[test]
    fn test_first_success_stops() {
        let mut calls = 0;
        let (result, report) = run_with_retries(5, |n| {
            calls += 1;
            if n < 2 {
                Err("dropped")
            } else {
                Ok(n * 10)
            }
        });
        assert_eq!(result, Ok(20));
        assert_eq!(calls, 3);
        assert_eq!(
            report,
            ExchangeReport {
                attempts: 3,
                succeeded: true,
                last_error: Some("dropped".to_string()),
            }
        );
    }
}
