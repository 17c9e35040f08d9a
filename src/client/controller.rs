//! Idle test controller
//!
//! Drives one test run end to end:
//!
//! ```text
//! Idle -> Connecting -> Idling -> Probing -> AwaitingEcho -> Succeeded
//!             |            |                      |
//!             +------------+----------------------+--> Failed
//! ```
//!
//! Any non-terminal state moves to `Cancelled` when the cancellation token
//! fires. Terminal states are final; a new test needs a new run and channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connector::Connector;
use super::observer::TestObserver;
use super::progress::{remaining_secs, Progress};
use crate::config::ProbeSettings;
use crate::error::{Result, TesterError};
use crate::logger::log;
use crate::transport::{message_kind, Channel, Message};

/// State of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Idle,
    Connecting,
    Idling,
    Probing,
    AwaitingEcho,
    Succeeded,
    Failed,
    Cancelled,
}

impl TestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TestState::Succeeded | TestState::Failed | TestState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestState::Idle => "idle",
            TestState::Connecting => "connecting",
            TestState::Idling => "idling",
            TestState::Probing => "probing",
            TestState::AwaitingEcho => "awaiting_echo",
            TestState::Succeeded => "succeeded",
            TestState::Failed => "failed",
            TestState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Succeeded,
    /// Failure detail, as reported to the observer
    Failed(String),
    Cancelled,
}

/// One execution of the idle-then-probe test
#[derive(Debug)]
pub struct TestRun {
    duration: Duration,
    started_at: Instant,
    finished_at: Option<Instant>,
    state: TestState,
    outcome: Outcome,
    probes_sent: u32,
}

impl TestRun {
    /// Validate the duration, record the start time and enter `Connecting`.
    ///
    /// A zero duration is rejected before anything is allocated.
    pub fn begin(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(TesterError::Validation(
                "idle duration must be positive".to_string(),
            ));
        }
        let mut run = Self {
            duration,
            started_at: Instant::now(),
            finished_at: None,
            state: TestState::Idle,
            outcome: Outcome::Pending,
            probes_sent: 0,
        };
        run.advance(TestState::Connecting);
        Ok(run)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn state(&self) -> TestState {
        self.state
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn probes_sent(&self) -> u32 {
        self.probes_sent
    }

    /// Time since `begin`, frozen once the run is finished
    pub fn elapsed(&self) -> Duration {
        let until = self.finished_at.unwrap_or_else(Instant::now);
        until.saturating_duration_since(self.started_at)
    }

    /// Move to a non-terminal state. Refused once the run is finished.
    fn advance(&mut self, next: TestState) -> bool {
        if self.state.is_terminal() || next.is_terminal() {
            return false;
        }
        log::transition(self.state.as_str(), next.as_str());
        self.state = next;
        true
    }

    /// Finalize the run. Only the first call has any effect.
    pub fn finish(&mut self, outcome: Outcome) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let next = match outcome {
            Outcome::Pending => return false,
            Outcome::Succeeded => TestState::Succeeded,
            Outcome::Failed(_) => TestState::Failed,
            Outcome::Cancelled => TestState::Cancelled,
        };
        log::transition(self.state.as_str(), next.as_str());
        self.state = next;
        self.outcome = outcome;
        self.finished_at = Some(Instant::now());
        true
    }

    /// Account for the probe. At most one per run, and only while `Probing`.
    fn record_probe(&mut self) -> bool {
        if self.state != TestState::Probing || self.probes_sent > 0 {
            return false;
        }
        self.probes_sent += 1;
        true
    }

    fn report(&self) -> TestReport {
        TestReport {
            state: self.state,
            outcome: self.outcome.clone(),
            probes_sent: self.probes_sent,
            elapsed: self.elapsed(),
        }
    }
}

/// Summary of a finished test run
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub state: TestState,
    pub outcome: Outcome,
    pub probes_sent: u32,
    pub elapsed: Duration,
}

impl TestReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

enum IdleEvent {
    Cancelled,
    Dropped(TesterError),
    Unsolicited(Message),
    Elapsed,
    Tick,
}

enum EchoEvent {
    Cancelled,
    Reply(Result<Message>),
}

/// Orchestrates test runs against one endpoint
pub struct IdleTestController<C: Connector> {
    connector: C,
    observer: Arc<dyn TestObserver>,
    settings: ProbeSettings,
}

impl<C: Connector> IdleTestController<C> {
    pub fn new(connector: C, observer: Arc<dyn TestObserver>, settings: ProbeSettings) -> Self {
        Self {
            connector,
            observer,
            settings,
        }
    }

    /// Run one test with the given idle duration.
    ///
    /// Returns `Err` only for an invalid duration, in which case nothing was
    /// opened. Every other outcome, including failures, is in the report.
    pub async fn run(&self, duration: Duration, cancel: &CancellationToken) -> Result<TestReport> {
        let mut run = TestRun::begin(duration)?;
        log::info!(duration = ?duration, "Starting idle test");

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.connector.connect() => Some(result),
        };

        let mut channel = match connected {
            None => {
                self.finish_cancelled(&mut run, None).await;
                return Ok(run.report());
            }
            Some(Err(e)) => {
                self.finish_failed(&mut run, None, &e).await;
                return Ok(run.report());
            }
            Some(Ok(channel)) => channel,
        };

        run.advance(TestState::Idling);
        if !self.idle(&mut run, &mut channel, cancel).await {
            return Ok(run.report());
        }

        run.advance(TestState::Probing);
        let probe = Message::text(self.settings.probe_payload.clone());
        // Counted before sending: a failed send still used up the run's probe
        run.record_probe();
        if let Err(e) = channel.send(probe.clone()).await {
            self.finish_failed(&mut run, Some(&mut channel), &e).await;
            return Ok(run.report());
        }
        log::debug!(elapsed = ?run.elapsed(), "Probe sent");
        run.advance(TestState::AwaitingEcho);

        self.await_echo(&mut run, &mut channel, &probe, cancel).await;
        Ok(run.report())
    }

    /// Hold the channel idle until the duration has elapsed. Returns `false`
    /// when the run was finalized while idling.
    async fn idle(
        &self,
        run: &mut TestRun,
        channel: &mut C::Channel,
        cancel: &CancellationToken,
    ) -> bool {
        let duration = run.duration();
        let tick = self.settings.tick;

        let idle_deadline = tokio::time::sleep_until(run.started_at() + duration);
        tokio::pin!(idle_deadline);

        let mut ticker = tokio::time::interval_at(run.started_at() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => IdleEvent::Cancelled,
                result = channel.recv() => match result {
                    Ok(message) => IdleEvent::Unsolicited(message),
                    Err(e) => IdleEvent::Dropped(e),
                },
                _ = &mut idle_deadline => IdleEvent::Elapsed,
                _ = ticker.tick() => IdleEvent::Tick,
            };

            match event {
                IdleEvent::Cancelled => {
                    self.finish_cancelled(run, Some(&mut *channel)).await;
                    return false;
                }
                IdleEvent::Dropped(e) => {
                    self.finish_failed(run, Some(&mut *channel), &e).await;
                    return false;
                }
                IdleEvent::Unsolicited(message) => {
                    log::debug!(
                        kind = message_kind(&message),
                        "Ignoring unsolicited message while idling"
                    );
                }
                IdleEvent::Elapsed => return true,
                IdleEvent::Tick => {
                    let elapsed = run.elapsed();
                    if elapsed >= duration {
                        return true;
                    }
                    // Under half a second left: nothing meaningful to show
                    if remaining_secs(elapsed, duration) == 0 {
                        continue;
                    }
                    let progress = Progress::new(elapsed, duration);
                    self.observer
                        .on_progress(&progress.remaining_label, progress.percent);
                }
            }
        }
    }

    async fn await_echo(
        &self,
        run: &mut TestRun,
        channel: &mut C::Channel,
        probe: &Message,
        cancel: &CancellationToken,
    ) {
        let echo_timeout = self.settings.echo_timeout;
        let reply = async {
            match echo_timeout {
                Some(limit) => tokio::time::timeout(limit, channel.recv())
                    .await
                    .unwrap_or_else(|_| Err(TesterError::EchoTimeout(limit))),
                None => channel.recv().await,
            }
        };

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => EchoEvent::Cancelled,
            reply = reply => EchoEvent::Reply(reply),
        };

        match event {
            EchoEvent::Cancelled => self.finish_cancelled(run, Some(&mut *channel)).await,
            EchoEvent::Reply(Ok(message)) if &message == probe => {
                if run.finish(Outcome::Succeeded) {
                    channel.close().await;
                    log::info!(elapsed = ?run.elapsed(), "Echo received");
                    self.observer.on_success();
                }
            }
            EchoEvent::Reply(Ok(message)) => {
                let err = TesterError::EchoMismatch(format!(
                    "expected {} bytes of {}, got {} bytes of {}",
                    probe.len(),
                    message_kind(probe),
                    message.len(),
                    message_kind(&message)
                ));
                self.finish_failed(run, Some(&mut *channel), &err).await;
            }
            EchoEvent::Reply(Err(e)) => self.finish_failed(run, Some(&mut *channel), &e).await,
        }
    }

    async fn finish_failed(
        &self,
        run: &mut TestRun,
        channel: Option<&mut C::Channel>,
        err: &TesterError,
    ) {
        let detail = err.to_string();
        let from = run.state();
        if run.finish(Outcome::Failed(detail.clone())) {
            if let Some(channel) = channel {
                channel.close().await;
            }
            log::warn!(state = %from, elapsed = ?run.elapsed(), error = %detail, "Test failed");
            self.observer.on_failure(&detail);
        }
    }

    async fn finish_cancelled(&self, run: &mut TestRun, channel: Option<&mut C::Channel>) {
        if run.finish(Outcome::Cancelled) {
            if let Some(channel) = channel {
                channel.close().await;
            }
            self.observer.on_cancelled();
        }
    }
}
