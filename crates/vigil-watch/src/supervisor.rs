//! Connection supervisor.
//!
//! Owns the lifecycle of exactly one logical subscription to the upstream
//! feed: connect, pump events, classify faults, and schedule reconnects
//! through the backoff policies. The supervisor runs as a single task, so at
//! most one connect attempt and one retry timer can exist at any moment;
//! fault signals arriving while a retry is already pending are swallowed.
//!
//! Lifecycle and payload events reach the orchestrator in order over one
//! channel ([`FeedEvent`]); `Disconnected` is always delivered before the
//! next retry is scheduled, so the consumer can drop its connection-scoped
//! context while the dead handle is still fresh.
//!
//! Failures are classified by error text: authentication rejections get a
//! fixed long cooldown, everything else gets capped jittered exponential
//! backoff. The supervisor never gives up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;

use crate::backoff::{BackoffPolicy, JitterSource};
use crate::source::{FeedConnector, FeedStream};
use crate::watchdog::Watchdog;

/// Connection lifecycle states. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Substrings that classify an error as an authentication rejection.
///
/// Case-insensitive and best-effort: the upstream exposes no structured
/// error code, so text matching is all there is. A false negative falls back
/// to normal backoff; a false positive merely over-cooldowns.
const AUTH_ERROR_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication",
    "login",
    "401",
    "forbidden",
];

/// Whether an error message looks like an upstream authentication rejection.
pub fn is_auth_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    AUTH_ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Events delivered to the orchestrator, in arrival order.
#[derive(Debug)]
pub enum FeedEvent {
    /// A new live subscription is up. `epoch` identifies it for fault
    /// reports; it increments on every reconnect.
    Connected { epoch: u64 },
    /// One raw inbound payload from the live subscription.
    Payload(Value),
    /// The previous subscription is no longer usable.
    Disconnected,
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Backoff policy for transient failures.
    pub backoff: BackoffPolicy,

    /// Fixed cooldown when a failure classifies as an auth rejection.
    pub auth_cooldown: Duration,

    /// Deadline on the collaborator's connect call.
    pub connect_timeout: Duration,

    /// Interval between staleness checks.
    pub watchdog_interval: Duration,

    /// Feed age past which the watchdog warns.
    pub staleness_threshold: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            auth_cooldown: Duration::from_secs(15 * 60),
            connect_timeout: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(60),
            staleness_threshold: Duration::from_secs(10 * 60),
        }
    }
}

/// Point-in-time view of the supervisor, for tests and the status endpoint.
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    pub attempts: u32,
    pub epoch: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_retry_delay: Option<Duration>,
}

#[derive(Debug)]
struct StatusFields {
    state: ConnectionState,
    attempts: u32,
    epoch: u64,
    last_event_monotonic: Option<Instant>,
    last_event_at: Option<DateTime<Utc>>,
    last_retry_delay: Option<Duration>,
    stopped: bool,
}

struct Shared {
    fields: Mutex<StatusFields>,
    stop: Notify,
}

enum Command {
    Fault { epoch: u64, reason: String },
}

/// Cheap cloneable handle for reading supervisor state, reporting faults,
/// and requesting a stop.
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.fields.lock().state
    }

    /// When the last inbound event was seen, if any.
    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.shared.fields.lock().last_event_at
    }

    /// Snapshot of the supervisor's observable state.
    pub fn status(&self) -> SupervisorStatus {
        let fields = self.shared.fields.lock();
        SupervisorStatus {
            state: fields.state,
            attempts: fields.attempts,
            epoch: fields.epoch,
            last_event_at: fields.last_event_at,
            last_retry_delay: fields.last_retry_delay,
        }
    }

    /// Report an asynchronous fault on the live subscription identified by
    /// `epoch`. Signals for a stale epoch, or arriving while a reconnect is
    /// already pending, are swallowed. No-op after stop.
    pub fn report_fault(&self, epoch: u64, reason: impl Into<String>) {
        let _ = self.commands.try_send(Command::Fault {
            epoch,
            reason: reason.into(),
        });
    }

    /// Request a graceful stop. Idempotent; repeated calls are no-ops.
    pub fn stop(&self) {
        let first = {
            let mut fields = self.shared.fields.lock();
            !std::mem::replace(&mut fields.stopped, true)
        };
        if first {
            self.shared.stop.notify_one();
        }
    }
}

enum ConnectOutcome {
    Connected(Box<dyn FeedStream>),
    Failed(String),
    Stopped,
}

enum PumpOutcome {
    Fault(String),
    Stopped,
}

enum PumpStep {
    Payload(Value),
    StreamEnd(String),
    Fault { epoch: u64, reason: String },
    Stop,
    WatchdogTick,
}

/// Supervisor for the single upstream feed connection.
pub struct Supervisor {
    config: SupervisorConfig,
    connector: Arc<dyn FeedConnector>,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<FeedEvent>,
    jitter: Box<dyn JitterSource>,
    watchdog: Watchdog,
}

impl Supervisor {
    /// Build a supervisor around a connector.
    ///
    /// Returns the supervisor (to be driven with [`run`]), a handle for
    /// faults/stop/status, and the ordered feed-event receiver for the
    /// orchestrator.
    ///
    /// [`run`]: Supervisor::run
    pub fn new(
        config: SupervisorConfig,
        connector: Arc<dyn FeedConnector>,
        jitter: Box<dyn JitterSource>,
    ) -> (Self, SupervisorHandle, mpsc::Receiver<FeedEvent>) {
        let (fault_tx, fault_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(256);

        let shared = Arc::new(Shared {
            fields: Mutex::new(StatusFields {
                state: ConnectionState::Connecting,
                attempts: 0,
                epoch: 0,
                last_event_monotonic: None,
                last_event_at: None,
                last_retry_delay: None,
                stopped: false,
            }),
            stop: Notify::new(),
        });

        let handle = SupervisorHandle {
            shared: Arc::clone(&shared),
            commands: fault_tx,
        };

        let watchdog = Watchdog::new(config.staleness_threshold);
        let supervisor = Self {
            config,
            connector,
            shared,
            commands: fault_rx,
            events: event_tx,
            jitter,
            watchdog,
        };

        (supervisor, handle, event_rx)
    }

    /// Drive the connection state machine until stopped.
    ///
    /// Dropping every [`SupervisorHandle`] also stops the supervisor; there
    /// would be no way to reach it afterwards.
    pub async fn run(mut self) {
        let mut check = tokio::time::interval(self.config.watchdog_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.is_stopped() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            match self.try_connect().await {
                ConnectOutcome::Connected(stream) => {
                    let epoch = self.on_connected();
                    tracing::info!(epoch, "feed connected");
                    metrics::counter!("feed_connects_total").increment(1);
                    if self
                        .events
                        .send(FeedEvent::Connected { epoch })
                        .await
                        .is_err()
                    {
                        break;
                    }

                    let outcome = self.pump(stream, epoch, &mut check).await;
                    metrics::gauge!("feed_connected").set(0.0);
                    match outcome {
                        PumpOutcome::Stopped => break,
                        PumpOutcome::Fault(reason) => {
                            tracing::warn!("feed connection lost: {}", reason);
                            metrics::counter!("feed_disconnects_total").increment(1);
                            self.set_state(ConnectionState::Reconnecting);
                            if self.events.send(FeedEvent::Disconnected).await.is_err() {
                                break;
                            }
                            let delay = self.next_delay(&reason);
                            if !self.wait_retry(delay).await {
                                break;
                            }
                        }
                    }
                }
                ConnectOutcome::Failed(reason) => {
                    tracing::warn!("feed connect failed: {}", reason);
                    self.set_state(ConnectionState::Reconnecting);
                    let delay = self.next_delay(&reason);
                    if !self.wait_retry(delay).await {
                        break;
                    }
                }
                ConnectOutcome::Stopped => break,
            }
        }

        self.set_state(ConnectionState::Stopped);
        metrics::gauge!("feed_connected").set(0.0);
        tracing::info!("supervisor stopped");
    }

    /// One connect attempt, bounded by the configured deadline.
    async fn try_connect(&mut self) -> ConnectOutcome {
        let connector = Arc::clone(&self.connector);
        let deadline = self.config.connect_timeout;
        let connect = tokio::time::timeout(deadline, connector.connect());
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok(stream)) => ConnectOutcome::Connected(stream),
                        Ok(Err(e)) => ConnectOutcome::Failed(e.to_string()),
                        Err(_) => ConnectOutcome::Failed(format!(
                            "connect timed out after {:?}",
                            deadline
                        )),
                    };
                }
                cmd = self.commands.recv() => match cmd {
                    // No live connection to fault; swallow.
                    Some(Command::Fault { .. }) => continue,
                    None => return ConnectOutcome::Stopped,
                },
                _ = self.shared.stop.notified() => return ConnectOutcome::Stopped,
            }
        }
    }

    /// Forward payloads from the live stream until it faults or we stop.
    async fn pump(
        &mut self,
        mut stream: Box<dyn FeedStream>,
        epoch: u64,
        check: &mut tokio::time::Interval,
    ) -> PumpOutcome {
        loop {
            let step = tokio::select! {
                next = stream.next_event() => match next {
                    Ok(Some(payload)) => PumpStep::Payload(payload),
                    Ok(None) => PumpStep::StreamEnd("stream closed by upstream".to_string()),
                    Err(e) => PumpStep::StreamEnd(e.to_string()),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Fault { epoch, reason }) => PumpStep::Fault { epoch, reason },
                    None => PumpStep::Stop,
                },
                _ = self.shared.stop.notified() => PumpStep::Stop,
                _ = check.tick() => PumpStep::WatchdogTick,
            };

            match step {
                PumpStep::Payload(payload) => {
                    self.mark_event();
                    metrics::counter!("feed_events_total").increment(1);
                    if self.events.send(FeedEvent::Payload(payload)).await.is_err() {
                        stream.shutdown().await;
                        return PumpOutcome::Stopped;
                    }
                }
                PumpStep::StreamEnd(reason) => {
                    stream.shutdown().await;
                    return PumpOutcome::Fault(reason);
                }
                PumpStep::Fault {
                    epoch: fault_epoch,
                    reason,
                } => {
                    if fault_epoch != epoch {
                        tracing::debug!(
                            fault_epoch,
                            epoch,
                            "ignoring fault signal for stale connection"
                        );
                        continue;
                    }
                    stream.shutdown().await;
                    return PumpOutcome::Fault(reason);
                }
                PumpStep::Stop => {
                    // Detach before close: shutdown removes event delivery
                    // so teardown cannot raise a re-entrant fault.
                    stream.shutdown().await;
                    return PumpOutcome::Stopped;
                }
                PumpStep::WatchdogTick => self.check_staleness(),
            }
        }
    }

    /// Sleep through the backoff window. Fault signals arriving mid-window
    /// are swallowed: a retry is already pending. Returns false on stop.
    async fn wait_retry(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Fault { epoch, .. }) => {
                        tracing::debug!(epoch, "fault signal while reconnect pending; ignored");
                    }
                    None => return false,
                },
                _ = self.shared.stop.notified() => return false,
            }
        }
    }

    /// Classify a failure and pick the retry delay.
    fn next_delay(&mut self, reason: &str) -> Duration {
        let auth = is_auth_failure(reason);
        let jitter = self.jitter.unit();

        let (delay, attempts) = {
            let mut fields = self.shared.fields.lock();
            let delay = if auth {
                self.config.auth_cooldown
            } else {
                self.config.backoff.delay(fields.attempts, jitter)
            };
            fields.attempts += 1;
            fields.last_retry_delay = Some(delay);
            (delay, fields.attempts)
        };

        if auth {
            metrics::counter!("feed_connect_failures_total", "class" => "auth").increment(1);
            tracing::error!(
                delay_secs = delay.as_secs(),
                "authentication rejected by upstream, cooling down: {}",
                reason
            );
        } else {
            metrics::counter!("feed_connect_failures_total", "class" => "transient").increment(1);
            tracing::info!(
                attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
        }

        delay
    }

    /// Field writes happen before the `Connected` send so status readers
    /// never observe a connected event ahead of the state it implies.
    fn on_connected(&self) -> u64 {
        let mut fields = self.shared.fields.lock();
        fields.state = ConnectionState::Connected;
        fields.attempts = 0;
        fields.epoch += 1;
        metrics::gauge!("feed_connected").set(1.0);
        fields.epoch
    }

    fn mark_event(&self) {
        let mut fields = self.shared.fields.lock();
        fields.last_event_monotonic = Some(Instant::now());
        fields.last_event_at = Some(Utc::now());
    }

    fn check_staleness(&self) {
        let last = self.shared.fields.lock().last_event_monotonic;
        if let Some(age) = self.watchdog.observe(last) {
            tracing::warn!(
                age_secs = age.as_secs(),
                "feed quiet past staleness threshold"
            );
            metrics::counter!("feed_staleness_warnings_total").increment(1);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut fields = self.shared.fields.lock();
        if fields.state != state {
            tracing::debug!(from = %fields.state, to = %state, "connection state changed");
            fields.state = state;
        }
    }

    fn is_stopped(&self) -> bool {
        self.shared.fields.lock().stopped
    }
}
