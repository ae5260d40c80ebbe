//! Stream connection lifecycle.
//!
//! [`ConnectionManager`] is a synchronous state machine: transport events go
//! in, [`Command`]s come out. [`spawn_connection`] drives it against a
//! [`Transport`], owning the live transport handle and the retry timer.
//!
//! Every transport is opened under a generation number. Events carry the
//! generation they were produced under and anything not matching the
//! current one is dropped, so a superseded socket can never move the state.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep};
use tracing::{debug, info, warn};

use crate::metrics::prometheus;

/// How long a closing transport gets to say goodbye before it is aborted.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a transport can report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    /// Protocol or I/O fault. A `Closed` is expected to follow.
    Error(String),
    Closed,
}

pub type TaggedEvent = (u64, TransportEvent);

/// What the driver must do after a state machine step.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect { generation: u64 },
    ScheduleRetry { generation: u64, delay: Duration },
    Deliver(String),
    CloseTransport,
}

/// `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(10_000),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    backoff: Backoff,
    retry_count: u32,
    generation: u64,
    retry_pending: bool,
    stopped: bool,
}

impl ConnectionManager {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Idle,
            backoff,
            retry_count: 0,
            generation: 0,
            retry_pending: false,
            stopped: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// No-op while an attempt is live or a retry is already scheduled.
    pub fn start(&mut self) -> Option<Command> {
        if self.stopped
            || self.retry_pending
            || matches!(self.state, ConnectionState::Connecting | ConnectionState::Open)
        {
            return None;
        }
        Some(self.begin_attempt())
    }

    /// Terminal. Bumps the generation so late events and timers are inert.
    pub fn stop(&mut self) -> Option<Command> {
        if self.stopped {
            return None;
        }
        let had_transport = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Error
        );
        self.stopped = true;
        self.retry_pending = false;
        self.generation += 1;
        self.state = ConnectionState::Closed;
        had_transport.then_some(Command::CloseTransport)
    }

    pub fn on_event(&mut self, generation: u64, event: TransportEvent) -> Option<Command> {
        if self.stopped || generation != self.generation {
            debug!(generation, current = self.generation, "ignoring stale transport event");
            return None;
        }
        match event {
            TransportEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Open;
                    self.retry_count = 0;
                }
                None
            }
            TransportEvent::Frame(text) => {
                (self.state == ConnectionState::Open).then_some(Command::Deliver(text))
            }
            TransportEvent::Error(_) => {
                if self.state != ConnectionState::Closed {
                    self.state = ConnectionState::Error;
                }
                None
            }
            TransportEvent::Closed => {
                if self.state == ConnectionState::Closed {
                    return None;
                }
                self.state = ConnectionState::Closed;
                self.retry_pending = true;
                Some(Command::ScheduleRetry {
                    generation: self.generation,
                    delay: self.backoff.delay(self.retry_count),
                })
            }
        }
    }

    /// The retry timer scheduled under `generation` has fired.
    pub fn on_retry_elapsed(&mut self, generation: u64) -> Option<Command> {
        if self.stopped || !self.retry_pending || generation != self.generation {
            return None;
        }
        self.retry_pending = false;
        self.retry_count = self.retry_count.saturating_add(1);
        Some(self.begin_attempt())
    }

    fn begin_attempt(&mut self) -> Command {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        Command::Connect {
            generation: self.generation,
        }
    }
}

/// A live transport owned by the driver.
pub struct TransportHandle {
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    pub fn new(close_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            close_tx: Some(close_tx),
            task,
        }
    }

    /// Ask the transport to close and wait briefly for it to finish.
    pub async fn close(mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(CLOSE_GRACE, &mut self.task).await.is_err() {
            self.task.abort();
        }
    }
}

/// Something that can open the stream. Implementations report progress by
/// sending [`TaggedEvent`]s stamped with the generation they were given.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, generation: u64, events: mpsc::UnboundedSender<TaggedEvent>) -> TransportHandle;
}

/// Owner-side handle of a running connection driver.
pub struct ConnectionHandle {
    status: watch::Receiver<ConnectionState>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Stop for good: cancels any pending retry and closes the transport.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "connection driver panicked");
        }
    }
}

/// Start the connection driver. Frames from the open transport are
/// forwarded to `frames` in arrival order.
pub fn spawn_connection<T: Transport>(
    transport: T,
    backoff: Backoff,
    frames: mpsc::Sender<String>,
) -> ConnectionHandle {
    let (status_tx, status_rx) = watch::channel(ConnectionState::Idle);
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(run_connection(transport, backoff, frames, status_tx, stop_rx));
    ConnectionHandle {
        status: status_rx,
        stop_tx,
        task,
    }
}

async fn run_connection<T: Transport>(
    transport: T,
    backoff: Backoff,
    frames: mpsc::Sender<String>,
    status: watch::Sender<ConnectionState>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut manager = ConnectionManager::new(backoff);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TaggedEvent>();
    let mut live: Option<TransportHandle> = None;
    let mut retry_timer: Option<Pin<Box<Sleep>>> = None;
    let mut retry_generation = 0;

    let mut next = manager.start();

    loop {
        if let Some(command) = next.take() {
            match command {
                Command::Connect { generation } => {
                    if let Some(old) = live.take() {
                        old.close().await;
                    }
                    info!(generation, retry = manager.retry_count(), "connecting");
                    live = Some(transport.open(generation, event_tx.clone()));
                }
                Command::ScheduleRetry { generation, delay } => {
                    if let Some(old) = live.take() {
                        old.close().await;
                    }
                    warn!(delay_ms = delay.as_millis() as u64, "stream closed, scheduling reconnect");
                    prometheus::record_reconnect(delay);
                    retry_generation = generation;
                    retry_timer = Some(Box::pin(sleep(delay)));
                }
                Command::Deliver(text) => {
                    // a backed-up consumer must not hold off a stop request
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => {
                            debug!("stop requested while frame consumer was full");
                            next = manager.stop();
                            retry_timer = None;
                            continue;
                        }
                        sent = frames.send(text) => {
                            if sent.is_err() {
                                warn!("frame consumer gone, stopping connection");
                                next = manager.stop();
                                continue;
                            }
                        }
                    }
                }
                Command::CloseTransport => {
                    if let Some(old) = live.take() {
                        old.close().await;
                    }
                }
            }
        }

        let state = manager.state();
        status.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!(from = %current, to = %state, "connection state");
            prometheus::record_connection_state(state);
            *current = state;
            true
        });

        if manager.is_stopped() {
            break;
        }

        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                next = manager.stop();
                retry_timer = None;
            }
            Some((generation, event)) = event_rx.recv() => {
                next = manager.on_event(generation, event);
            }
            _ = async {
                if let Some(timer) = retry_timer.as_mut() {
                    timer.as_mut().await;
                }
            }, if retry_timer.is_some() => {
                retry_timer = None;
                next = manager.on_retry_elapsed(retry_generation);
            }
        }
    }

    if let Some(old) = live.take() {
        old.close().await;
    }
    info!("connection stopped");
}
