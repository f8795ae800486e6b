//! Blocking poll loops as an explicit state machine.
//!
//! Both waits in the system (the async document-analysis job and the
//! knowledge-base rebuild) run through [`Poller`]. Time is read and spent
//! through the [`Clock`] trait so tests drive the loop with a
//! [`ManualClock`] instead of sleeping.
//!
//! ```text
//! Submitted ──check──▶ InProgress ──check──▶ Succeeded
//!                         │  ▲                Failed
//!                         └──┘ sleep          TimedOut (error)
//! ```

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::error::ReconError;

/// Source of time for poll loops.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Clock whose `sleep` advances virtual time instantly.
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Virtual time spent sleeping so far.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }

    /// Every sleep requested, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// State of a polled remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PollState::Succeeded | PollState::Failed | PollState::TimedOut
        )
    }
}

/// Interval between checks and the optional wall-clock budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }
}

/// Terminal result of a poll loop. Failure is data here; callers decide
/// whether it is fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Succeeded(T),
    Failed(T),
}

impl<T> PollOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            PollOutcome::Succeeded(t) | PollOutcome::Failed(t) => t,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Succeeded(_))
    }
}

/// Drives a check until it reports a terminal state or the budget runs out.
pub struct Poller<'a> {
    clock: &'a dyn Clock,
    config: PollConfig,
    operation: &'static str,
    state: PollState,
    attempts: u32,
}

impl<'a> Poller<'a> {
    pub fn new(clock: &'a dyn Clock, config: PollConfig, operation: &'static str) -> Self {
        Self {
            clock,
            config,
            operation,
            state: PollState::Submitted,
            attempts: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Check, then sleep `interval`, until the check reports `Succeeded` or
    /// `Failed`. Check errors end the loop immediately and are returned as
    /// [`ReconError::Service`]. Exceeding the timeout yields
    /// [`ReconError::Timeout`].
    pub async fn run<T, F, Fut>(&mut self, mut check: F) -> Result<PollOutcome<T>, ReconError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<(PollState, T)>>,
    {
        let started = self.clock.now();
        self.state = PollState::Submitted;

        loop {
            let (observed, payload) = check().await?;
            self.attempts += 1;

            match observed {
                PollState::Succeeded => {
                    self.state = PollState::Succeeded;
                    return Ok(PollOutcome::Succeeded(payload));
                }
                PollState::Failed => {
                    self.state = PollState::Failed;
                    return Ok(PollOutcome::Failed(payload));
                }
                _ => self.state = PollState::InProgress,
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if let Some(limit) = self.config.timeout {
                if elapsed > limit {
                    self.state = PollState::TimedOut;
                    return Err(ReconError::Timeout {
                        operation: self.operation,
                        elapsed,
                        attempts: self.attempts,
                    });
                }
            }

            debug!(
                operation = self.operation,
                attempt = self.attempts,
                elapsed_secs = elapsed.as_secs(),
                "still in progress"
            );
            self.clock.sleep(self.config.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn scripted(states: Vec<PollState>) -> Mutex<VecDeque<PollState>> {
        Mutex::new(states.into_iter().collect())
    }

    #[tokio::test]
    async fn succeeds_after_in_progress_polls() {
        let clock = ManualClock::new();
        let script = scripted(vec![
            PollState::InProgress,
            PollState::InProgress,
            PollState::Succeeded,
        ]);
        let mut poller = Poller::new(
            &clock,
            PollConfig::new(Duration::from_secs(15), Some(Duration::from_secs(600))),
            "test",
        );

        let outcome = poller
            .run(|| {
                let next = script.lock().unwrap().pop_front().unwrap();
                async move { Ok::<_, anyhow::Error>((next, "payload")) }
            })
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Succeeded("payload"));
        assert_eq!(poller.state(), PollState::Succeeded);
        assert_eq!(poller.attempts(), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(15); 2]);
    }

    #[tokio::test]
    async fn failure_is_returned_without_retrying() {
        let clock = ManualClock::new();
        let mut poller = Poller::new(
            &clock,
            PollConfig::new(Duration::from_secs(5), None),
            "test",
        );

        let outcome = poller
            .run(|| async { Ok::<_, anyhow::Error>((PollState::Failed, 7)) })
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Failed(7));
        assert_eq!(poller.attempts(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn exceeding_budget_is_a_timeout_error() {
        let clock = ManualClock::new();
        let mut poller = Poller::new(
            &clock,
            PollConfig::new(Duration::from_secs(10), Some(Duration::from_secs(25))),
            "knowledge base build",
        );

        let err = poller
            .run(|| async { Ok::<_, anyhow::Error>((PollState::InProgress, ())) })
            .await
            .unwrap_err();

        match err {
            ReconError::Timeout {
                operation,
                elapsed,
                attempts,
            } => {
                assert_eq!(operation, "knowledge base build");
                assert_eq!(elapsed, Duration::from_secs(30));
                assert_eq!(attempts, 4);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(poller.state(), PollState::TimedOut);
    }

    #[tokio::test]
    async fn check_error_propagates() {
        let clock = ManualClock::new();
        let mut poller = Poller::new(
            &clock,
            PollConfig::new(Duration::from_secs(1), None),
            "test",
        );

        let err = poller
            .run(|| async { Err::<(PollState, ()), _>(anyhow::anyhow!("connection reset")) })
            .await
            .unwrap_err();

        assert!(matches!(err, ReconError::Service(_)));
        assert_eq!(err.to_string(), "connection reset");
    }
}
