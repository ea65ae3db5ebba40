//! Retrying harness for scanners.
//!
//! ```text
//! Idle -> Running -> Succeeded
//!                 -> Exhausted   (transient failures, max_retries + 1 attempts)
//!                 -> Failed      (permanent failure, no retry)
//!                 -> Cancelled   (token cancelled)
//! ```
//!
//! Attempts run one at a time. Between attempts the supervisor sleeps
//! according to its [`BackoffPolicy`]; both the attempt and the sleep are
//! abandoned as soon as the cancellation token fires.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use super::backoff::BackoffPolicy;
use super::{ScanContext, ScanError, ScanReport, Scanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub max_retries: u32,
    /// Passed to the scanner as the most items it may send per upload.
    pub buffer_size: usize,
    pub backoff: BackoffPolicy,
}

impl SupervisorConfig {
    pub fn new(max_retries: u32, buffer_size: usize) -> Self {
        Self {
            max_retries,
            buffer_size,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running { attempt: u32 },
    Succeeded,
    Exhausted,
    Failed,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("scanner {scanner} failed: {source}")]
    Permanent {
        scanner: &'static str,
        attempts: u32,
        #[source]
        source: ScanError,
    },

    #[error("scanner {scanner} gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        scanner: &'static str,
        attempts: u32,
        #[source]
        last: ScanError,
    },

    #[error("scanner {scanner} cancelled after {attempts} attempt(s)")]
    Cancelled {
        scanner: &'static str,
        attempts: u32,
    },

    #[error("invalid supervisor configuration: {0}")]
    InvalidConfig(String),
}

impl SupervisorError {
    /// Attempts made before the run ended.
    pub fn attempts(&self) -> u32 {
        match self {
            SupervisorError::Permanent { attempts, .. }
            | SupervisorError::RetryExhausted { attempts, .. }
            | SupervisorError::Cancelled { attempts, .. } => *attempts,
            SupervisorError::InvalidConfig(_) => 0,
        }
    }
}

/// Drives one scanner with bounded retries.
#[derive(Debug)]
pub struct Supervisor<S> {
    scanner: S,
    config: SupervisorConfig,
    state: SupervisorState,
    attempts: u32,
}

impl<S: Scanner> Supervisor<S> {
    pub fn new(scanner: S, config: SupervisorConfig) -> Self {
        Self {
            scanner,
            config,
            state: SupervisorState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[cfg(test)]
    fn scanner(&self) -> &S {
        &self.scanner
    }

    #[cfg(test)]
    fn into_scanner(self) -> S {
        self.scanner
    }

    /// Run the scanner until it succeeds, fails permanently, runs out of
    /// retries, or `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<ScanReport, SupervisorError> {
        if self.config.buffer_size == 0 {
            return Err(SupervisorError::InvalidConfig(
                "buffer size must be greater than zero".to_string(),
            ));
        }

        let scanner = self.scanner.name();
        let max_attempts = self.config.max_retries.saturating_add(1);
        self.attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(scanner));
            }

            self.attempts += 1;
            let attempt = self.attempts;
            self.state = SupervisorState::Running { attempt };

            let ctx = ScanContext {
                cancel: cancel.clone(),
                buffer_size: self.config.buffer_size,
                attempt,
            };
            let span = info_span!("scan", scanner, attempt);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ScanError::Cancelled),
                result = self.scanner.scan(&ctx).instrument(span) => result,
            };

            match outcome {
                Ok(report) => {
                    self.state = SupervisorState::Succeeded;
                    info!(scanner, attempts = attempt, "Scan succeeded");
                    return Ok(report);
                }
                Err(ScanError::Cancelled) => return Err(self.cancelled(scanner)),
                Err(e) if e.is_transient() => {
                    if attempt >= max_attempts {
                        self.state = SupervisorState::Exhausted;
                        warn!(scanner, attempts = attempt, "Giving up: {}", e);
                        return Err(SupervisorError::RetryExhausted {
                            scanner,
                            attempts: attempt,
                            last: e,
                        });
                    }

                    let delay = self.config.backoff.delay(attempt);
                    warn!(
                        scanner,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Scan attempt failed: {}",
                        e
                    );
                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(self.cancelled(scanner)),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Err(e) => {
                    self.state = SupervisorState::Failed;
                    warn!(scanner, attempts = attempt, "Scan failed permanently: {}", e);
                    return Err(SupervisorError::Permanent {
                        scanner,
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    fn cancelled(&mut self, scanner: &'static str) -> SupervisorError {
        self.state = SupervisorState::Cancelled;
        info!(scanner, attempts = self.attempts, "Scan cancelled");
        SupervisorError::Cancelled {
            scanner,
            attempts: self.attempts,
        }
    }
}

/// Run `scanner` under a supervisor with the default backoff.
pub async fn start<S: Scanner>(
    cancel: CancellationToken,
    scanner: S,
    max_retries: u32,
    buffer_size: usize,
) -> Result<ScanReport, SupervisorError> {
    let mut supervisor = Supervisor::new(scanner, SupervisorConfig::new(max_retries, buffer_size));
    supervisor.run(&cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Step {
        Succeed,
        Transient,
        Permanent,
        Hang,
    }

    /// Scanner that plays back a script, repeating the last step forever.
    struct ScriptedScanner {
        script: VecDeque<Step>,
        calls: u32,
        buffer_sizes: Vec<usize>,
    }

    impl ScriptedScanner {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
                buffer_sizes: Vec::new(),
            }
        }
    }

    impl Scanner for ScriptedScanner {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn scan(&mut self, ctx: &ScanContext) -> Result<ScanReport, ScanError> {
            self.calls += 1;
            assert_eq!(ctx.attempt, self.calls);
            self.buffer_sizes.push(ctx.buffer_size);

            let step = if self.script.len() > 1 {
                self.script.pop_front()
            } else {
                self.script.front().copied()
            };
            match step {
                Some(Step::Succeed) | None => Ok(ScanReport {
                    uploaded: self.calls as usize,
                    ..ScanReport::default()
                }),
                Some(Step::Transient) => Err(ScanError::Transient("connection refused".to_string())),
                Some(Step::Permanent) => Err(ScanError::Permanent("audit plan not found".to_string())),
                Some(Step::Hang) => std::future::pending().await,
            }
        }
    }

    fn supervisor(script: Vec<Step>, max_retries: u32) -> Supervisor<ScriptedScanner> {
        Supervisor::new(
            ScriptedScanner::new(script),
            SupervisorConfig::new(max_retries, 16).with_backoff(BackoffPolicy::immediate()),
        )
    }

    #[tokio::test]
    async fn test_always_transient_makes_max_retries_plus_one_attempts() {
        let mut supervisor = supervisor(vec![Step::Transient], 3);

        let err = supervisor.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SupervisorError::RetryExhausted { attempts: 4, .. }));
        assert_eq!(supervisor.scanner().calls, 4);
        assert_eq!(supervisor.state(), SupervisorState::Exhausted);
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let mut supervisor = supervisor(vec![Step::Transient], 0);

        let err = supervisor.run(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.attempts(), 1);
        assert_eq!(supervisor.scanner().calls, 1);
    }

    #[tokio::test]
    async fn test_success_on_attempt_k() {
        let mut supervisor = supervisor(vec![Step::Transient, Step::Transient, Step::Succeed], 5);

        let report = supervisor.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.uploaded, 3);
        assert_eq!(supervisor.attempts(), 3);
        assert_eq!(supervisor.state(), SupervisorState::Succeeded);
    }

    #[tokio::test]
    async fn test_success_on_last_allowed_attempt() {
        let mut supervisor = supervisor(vec![Step::Transient, Step::Transient, Step::Succeed], 2);

        assert!(supervisor.run(&CancellationToken::new()).await.is_ok());
        assert_eq!(supervisor.attempts(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut supervisor = supervisor(vec![Step::Permanent], 30);

        let err = supervisor.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            SupervisorError::Permanent {
                attempts: 1,
                source: ScanError::Permanent(_),
                ..
            }
        ));
        assert_eq!(supervisor.scanner().calls, 1);
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_mid_attempt() {
        let mut supervisor = supervisor(vec![Step::Hang], 30);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = supervisor.run(&cancel).await.unwrap_err();

        assert!(matches!(err, SupervisorError::Cancelled { attempts: 1, .. }));
        assert_eq!(supervisor.scanner().calls, 1);
        assert_eq!(supervisor.state(), SupervisorState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_is_not_exhaustion() {
        let mut supervisor = Supervisor::new(
            ScriptedScanner::new(vec![Step::Transient]),
            SupervisorConfig::new(30, 16)
                .with_backoff(BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(60))),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), supervisor.run(&cancel))
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, SupervisorError::Cancelled { attempts: 1, .. }));
        assert_eq!(supervisor.scanner().calls, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempt() {
        let mut supervisor = supervisor(vec![Step::Succeed], 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = supervisor.run(&cancel).await.unwrap_err();

        assert_eq!(err.attempts(), 0);
        assert_eq!(supervisor.scanner().calls, 0);
    }

    #[tokio::test]
    async fn test_buffer_size_passed_through() {
        let mut supervisor = supervisor(vec![Step::Transient, Step::Succeed], 3);

        supervisor.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(supervisor.into_scanner().buffer_sizes, vec![16, 16]);
    }

    #[tokio::test]
    async fn test_zero_buffer_size_rejected() {
        let err = start(
            CancellationToken::new(),
            ScriptedScanner::new(vec![Step::Succeed]),
            3,
            0,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SupervisorError::InvalidConfig(_)));
    }
}
