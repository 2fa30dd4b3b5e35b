//! Bounded retry with backoff, session recovery and cooperative cancellation.
//!
//! Each logical operation (navigate, wait-for-element, extract-table) runs
//! through its own [`RetryController::run`], walking the states
//! `Idle → Attempting → {Succeeded | RetryScheduled → Attempting | Exhausted | Cancelled}`.
//! Cancellation is polled on every entry into `Attempting`; in-flight calls
//! are never interrupted.

use super::{CancellationToken, StatusSink};
use crate::config::RetryConfig;
use crate::error::{ExtractError, Result};
use crate::utils::preview;
use std::time::Duration;
use tokio_retry::strategy::jitter;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Added once per previous failure: attempt n waits `delay + (n-1) * step`.
    pub delay_step: Duration,
    /// Extra wait when the attempt failed because nothing was found.
    pub not_found_extra: Duration,
    /// Upper bound of a random extra wait.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            delay_step: Duration::ZERO,
            not_found_extra: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: Duration::from_millis(cfg.delay_ms),
            delay_step: Duration::from_millis(cfg.delay_step_ms),
            not_found_extra: Duration::ZERO,
            jitter: Duration::from_millis(cfg.jitter_ms),
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_not_found_extra(mut self, extra: Duration) -> Self {
        self.not_found_extra = extra;
        self
    }

    /// Wait before the attempt that follows failure number `failed` (1-based).
    pub fn delay_after(&self, failed: u32, error: &ExtractError) -> Duration {
        let base = self.delay + self.delay_step * failed.saturating_sub(1);

        let extra = match error {
            ExtractError::NotFound(_) => self.not_found_extra,
            _ => Duration::ZERO,
        };

        let noise = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            jitter(self.jitter)
        };

        base + extra + noise
    }
}

/// States of one retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Attempting(u32),
    RetryScheduled { after: u32, delay: Duration },
}

#[derive(Debug, PartialEq)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { error: ExtractError, attempts: u32 },
    Cancelled { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

pub struct RetryController<'a> {
    policy: RetryPolicy,
    cancel: &'a CancellationToken,
    status: &'a dyn StatusSink,
}

impl<'a> RetryController<'a> {
    pub fn new(policy: RetryPolicy, cancel: &'a CancellationToken, status: &'a dyn StatusSink) -> Self {
        Self {
            policy,
            cancel,
            status,
        }
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts or
    /// the token is cancelled. `recover` is invoked before retrying after a
    /// transport failure; if it fails the operation is exhausted.
    pub async fn run<T>(
        &self,
        label: &str,
        percent: Option<u8>,
        mut op: impl AsyncFnMut(u32) -> Result<T>,
        mut recover: impl AsyncFnMut() -> Result<()>,
    ) -> RetryOutcome<T> {
        let max = self.policy.max_attempts.max(1);
        let mut state = AttemptState::Idle;

        loop {
            state = match state {
                AttemptState::Idle | AttemptState::RetryScheduled { .. } => {
                    let done = match state {
                        AttemptState::RetryScheduled { after, delay } => {
                            debug!("{}: attempt {} after waiting {:?}", label, after + 1, delay);
                            after
                        }
                        _ => 0,
                    };
                    if self.cancel.is_cancelled() {
                        debug!("{}: cancelled before attempt {}", label, done + 1);
                        return RetryOutcome::Cancelled { attempts: done };
                    }
                    AttemptState::Attempting(done + 1)
                }

                AttemptState::Attempting(n) => match op(n).await {
                    Ok(value) => {
                        debug!("{}: succeeded on attempt {}/{}", label, n, max);
                        return RetryOutcome::Succeeded { value, attempts: n };
                    }
                    Err(ExtractError::Cancelled) => {
                        return RetryOutcome::Cancelled { attempts: n };
                    }
                    Err(error) if error.is_transient() && n < max => {
                        self.status.report(
                            &format!(
                                "Tentativa {} falhou para {}, tentando novamente... ({})",
                                n,
                                label,
                                preview(&error.to_string(), 50)
                            ),
                            percent,
                        );

                        if error.is_transport() {
                            self.status.report("Tentando reinicializar o navegador...", percent);
                            if let Err(recovery) = recover().await {
                                warn!("{}: session recreation failed: {}", label, recovery);
                                return RetryOutcome::Exhausted {
                                    error: recovery,
                                    attempts: n,
                                };
                            }
                        }

                        let delay = self.policy.delay_after(n, &error);
                        debug!("{}: attempt {} failed ({}), retrying in {:?}", label, n, error, delay);
                        tokio::time::sleep(delay).await;
                        AttemptState::RetryScheduled { after: n, delay }
                    }
                    Err(error) => {
                        warn!("{}: giving up after {} attempt(s): {}", label, n, error);
                        return RetryOutcome::Exhausted { error, attempts: n };
                    }
                },
            };
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::status::RecordingStatus;
    use tokio::time::Instant;

    fn timeout() -> ExtractError {
        ExtractError::Timeout("body".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts_with_delays() {
        let cancel = CancellationToken::new();
        let status = RecordingStatus::new();
        let ctl = RetryController::new(RetryPolicy::default(), &cancel, &status);

        let mut calls = 0u32;
        let started = Instant::now();
        let outcome = ctl
            .run(
                "PETR4",
                None,
                async |_| {
                    calls += 1;
                    Err::<(), _>(timeout())
                },
                async || Ok(()),
            )
            .await;

        assert_eq!(calls, 3);
        assert_eq!(outcome, RetryOutcome::Exhausted { error: timeout(), attempts: 3 });
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(status.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt_never_calls_op() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = RecordingStatus::new();
        let ctl = RetryController::new(RetryPolicy::immediate(3), &cancel, &status);

        let mut calls = 0u32;
        let outcome = ctl
            .run(
                "carteira",
                None,
                async |_| {
                    calls += 1;
                    Ok(1)
                },
                async || Ok(()),
            )
            .await;

        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 0 });
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_cancel_between_attempts_stops_the_loop() {
        let cancel = CancellationToken::new();
        let status = RecordingStatus::new();
        let ctl = RetryController::new(RetryPolicy::immediate(3), &cancel, &status);

        let outcome = ctl
            .run(
                "VALE3",
                None,
                async |_| {
                    cancel.cancel();
                    Err::<(), _>(timeout())
                },
                async || Ok(()),
            )
            .await;

        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 1 });
    }

    #[tokio::test]
    async fn test_transport_failure_recovers_then_succeeds() {
        let cancel = CancellationToken::new();
        let status = RecordingStatus::new();
        let ctl = RetryController::new(RetryPolicy::immediate(3), &cancel, &status);

        let mut recoveries = 0;
        let outcome = ctl
            .run(
                "carteira",
                Some(75),
                async |n| {
                    if n == 1 {
                        Err(ExtractError::Transport("chrome not reachable".into()))
                    } else {
                        Ok("rows")
                    }
                },
                async || {
                    recoveries += 1;
                    Ok(())
                },
            )
            .await;

        assert_eq!(outcome, RetryOutcome::Succeeded { value: "rows", attempts: 2 });
        assert_eq!(recoveries, 1);
        assert!(status.contains("reinicializar"));
    }

    #[tokio::test]
    async fn test_failed_recovery_exhausts_the_operation() {
        let cancel = CancellationToken::new();
        let status = RecordingStatus::new();
        let ctl = RetryController::new(RetryPolicy::immediate(3), &cancel, &status);

        let outcome = ctl
            .run(
                "carteira",
                None,
                async |_| Err::<(), _>(ExtractError::Transport("session deleted".into())),
                async || Err(ExtractError::Transport("relaunch failed".into())),
            )
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                error: ExtractError::Transport("relaunch failed".into()),
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let cancel = CancellationToken::new();
        let status = RecordingStatus::new();
        let ctl = RetryController::new(RetryPolicy::immediate(3), &cancel, &status);

        let mut calls = 0;
        let outcome = ctl
            .run(
                "coluna",
                None,
                async |_| {
                    calls += 1;
                    Err::<(), _>(ExtractError::MalformedSelector("tr:nth-child(".into()))
                },
                async || Ok(()),
            )
            .await;

        assert_eq!(calls, 1);
        assert_eq!(outcome.attempts(), 1);
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy {
            delay_step: Duration::from_millis(500),
            ..RetryPolicy::default()
        }
        .with_not_found_extra(Duration::from_secs(1));

        assert_eq!(policy.delay_after(1, &timeout()), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2, &timeout()), Duration::from_millis(2500));
        assert_eq!(policy.delay_after(3, &timeout()), Duration::from_secs(3));
        assert_eq!(policy.delay_after(0, &timeout()), Duration::from_secs(2));
        assert_eq!(
            policy.delay_after(1, &ExtractError::NotFound("table".into())),
            Duration::from_secs(3)
        );
    }
}
