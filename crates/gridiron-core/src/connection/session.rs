// Live session: the task that owns the stream, the store and the animation
// scheduler.
//
// Everything that mutates state runs inside one `select!` loop, one branch at
// a time, so a frame's dispatch (store mutation plus subscriber callbacks)
// always completes before the next frame is read. The only work that leaves
// the loop is the snapshot fetch, whose result comes back over a channel
// tagged with an epoch.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::machine::{Action, Backoff, ConnectionEvent, ConnectionMachine, ConnectionState};
use super::transport::{Connector, Frame, Transport, TransportError};
use crate::animation::AnimationScheduler;
use crate::config::{Config, ConfigError};
use crate::dispatch;
use crate::game::{GameState, GameStore};
use crate::protocol;
use crate::resync::{GameStatus, ResyncError, SnapshotSource};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How long `shutdown` waits for the session task before aborting it.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long teardown waits for the transport's close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Configuration and public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Time between PING frames.
    pub interval: Duration,
    /// Inbound silence after which the stream counts as failed.
    pub stale_after: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub stream_url: String,
    pub backoff: Backoff,
    pub heartbeat: Option<HeartbeatPolicy>,
    pub animation_window: Duration,
}

impl SessionConfig {
    /// Default backoff and animation window, heartbeat disabled.
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            backoff: Backoff::default(),
            heartbeat: None,
            animation_window: crate::animation::DEFAULT_WINDOW,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let endpoints = config.endpoints()?;
        Ok(Self {
            stream_url: endpoints.stream_url,
            backoff: Backoff::new(config.reconnect_base(), config.reconnect_max()),
            heartbeat: config
                .heartbeat()
                .map(|(interval, stale_after)| HeartbeatPolicy {
                    interval,
                    stale_after,
                }),
            animation_window: config.animation_window(),
        })
    }
}

/// Lifecycle notifications, delivered in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connection(ConnectionState),
    /// A status snapshot was requested for the stream that just opened.
    /// Always precedes the matching `Connection(Open)`.
    ResyncRequested,
    ReconnectScheduled { attempt: u32, delay: Duration },
    Animating(bool),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("live session has ended")]
    Ended,
}

enum Command {
    Send { kind: String, payload: Value },
    Reset,
    Teardown,
}

type ConnectFuture = BoxFuture<'static, Result<Box<dyn Transport>, TransportError>>;
type SnapshotResult = (u64, Result<GameStatus, ResyncError>);

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running live session.
///
/// Dropping the handle aborts the session task; call [`LiveSession::shutdown`]
/// for an orderly teardown that also returns the final store.
pub struct LiveSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<GameStore>>,
    shutdown_timeout: Duration,
}

impl LiveSession {
    /// Spawn the session task and start connecting immediately.
    ///
    /// The store (with any subscribers already registered) moves into the
    /// task. Must be called from within a tokio runtime.
    pub fn start(
        store: GameStore,
        connector: Arc<dyn Connector>,
        snapshots: Arc<dyn SnapshotSource>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine: ConnectionMachine::new(config.backoff.clone()),
            animation: AnimationScheduler::new(config.animation_window),
            config,
            connector,
            snapshots,
            store,
            events: event_tx,
            transport: None,
            connecting: None,
            retry_at: None,
            heartbeat: None,
            last_inbound: Instant::now(),
            snapshot_epoch: 0,
            snapshot_baseline: None,
            snapshot_task: None,
            snapshot_tx,
        };
        let task = tokio::spawn(driver.run(cmd_rx, snapshot_rx));

        let session = Self {
            cmd_tx,
            task: Some(task),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        };
        (session, event_rx)
    }

    /// Send `{type, payload}` to the server. Best-effort: if the stream is
    /// not open when the session gets to it, the frame is dropped with a
    /// warning, never queued.
    pub fn send_message(&self, kind: impl Into<String>, payload: Value) -> Result<(), SessionError> {
        self.command(Command::Send {
            kind: kind.into(),
            payload,
        })
    }

    /// Reset the store for a new game.
    pub fn reset_game(&self) -> Result<(), SessionError> {
        self.command(Command::Reset)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Tear the session down and hand back the store.
    ///
    /// Returns `None` if the task had to be aborted or already panicked.
    pub async fn shutdown(mut self) -> Option<GameStore> {
        let _ = self.cmd_tx.send(Command::Teardown);
        let mut task = self.task.take()?;
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(store)) => Some(store),
            Ok(Err(e)) => {
                warn!("Session task terminated abnormally: {e}");
                None
            }
            Err(_) => {
                warn!("Session task did not exit within {:?}; aborting", self.shutdown_timeout);
                task.abort();
                None
            }
        }
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.cmd_tx.send(command).map_err(|_| SessionError::Ended)
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

struct Driver {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    snapshots: Arc<dyn SnapshotSource>,
    store: GameStore,
    machine: ConnectionMachine,
    animation: AnimationScheduler,
    events: mpsc::UnboundedSender<SessionEvent>,
    transport: Option<Box<dyn Transport>>,
    connecting: Option<ConnectFuture>,
    retry_at: Option<Instant>,
    heartbeat: Option<Interval>,
    last_inbound: Instant,
    /// Bumped on every snapshot request and at teardown. Results tagged with
    /// an older epoch are discarded.
    snapshot_epoch: u64,
    /// Game state when the pending snapshot was requested.
    snapshot_baseline: Option<GameState>,
    snapshot_task: Option<JoinHandle<()>>,
    snapshot_tx: mpsc::UnboundedSender<SnapshotResult>,
}

impl Driver {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut snapshot_rx: mpsc::UnboundedReceiver<SnapshotResult>,
    ) -> GameStore {
        info!("Live session started for {}", self.config.stream_url);
        self.emit(SessionEvent::Connection(self.machine.state()));
        self.apply(ConnectionEvent::ConnectRequested).await;

        while self.machine.state() != ConnectionState::Closed {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send { kind, payload }) => self.send_outbound(&kind, &payload).await,
                    Some(Command::Reset) => self.reset_game(),
                    Some(Command::Teardown) | None => {
                        self.apply(ConnectionEvent::TeardownRequested).await;
                    }
                },

                result = poll_connect(&mut self.connecting), if self.connecting.is_some() => {
                    self.connecting = None;
                    match result {
                        Ok(transport) => self.on_transport_opened(transport).await,
                        Err(e) => {
                            warn!("Connection attempt failed: {e}");
                            self.apply(ConnectionEvent::TransportFailed).await;
                        }
                    }
                }

                frame = poll_recv(&mut self.transport), if self.transport.is_some() => match frame {
                    Some(Ok(frame)) => self.on_frame(&frame),
                    Some(Err(e)) => {
                        warn!("Stream error: {e}");
                        self.discard_transport();
                        self.apply(ConnectionEvent::TransportFailed).await;
                    }
                    None => {
                        info!("Stream closed by server");
                        self.discard_transport();
                        self.apply(ConnectionEvent::TransportFailed).await;
                    }
                },

                _ = sleep_until_opt(self.retry_at), if self.retry_at.is_some() => {
                    self.retry_at = None;
                    self.apply(ConnectionEvent::RetryElapsed).await;
                }

                Some((epoch, result)) = snapshot_rx.recv() => self.on_snapshot(epoch, result),

                _ = poll_tick(&mut self.heartbeat), if self.heartbeat.is_some() => {
                    self.on_heartbeat().await;
                }

                changed = self.animation.advance(), if self.animation.is_pending() => {
                    if let Some(animating) = changed {
                        self.emit(SessionEvent::Animating(animating));
                    }
                }
            }
        }

        info!("Live session closed");
        self.store
    }

    /// Feed one event through the machine, run its actions, then publish the
    /// state change. Actions run first so a snapshot is always requested
    /// before `Open` is published.
    async fn apply(&mut self, event: ConnectionEvent) {
        let before = self.machine.state();
        for action in self.machine.handle(event) {
            self.perform(action).await;
        }
        let after = self.machine.state();
        if after != before {
            info!("Connection {before:?} -> {after:?}");
            if after == ConnectionState::Closed {
                self.finish();
            }
            self.emit(SessionEvent::Connection(after));
        }
    }

    async fn perform(&mut self, action: Action) {
        match action {
            Action::OpenTransport => {
                let connector = Arc::clone(&self.connector);
                let url = self.config.stream_url.clone();
                self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
            }
            Action::RequestSnapshot => self.request_snapshot(),
            Action::ScheduleRetry { attempt, delay } => {
                info!("Reconnect attempt {attempt} in {delay:?}");
                self.retry_at = Some(Instant::now() + delay);
                self.emit(SessionEvent::ReconnectScheduled { attempt, delay });
            }
            Action::CancelRetry => {
                self.retry_at = None;
                self.connecting = None;
            }
            Action::CloseTransport => self.close_transport().await,
        }
    }

    async fn on_transport_opened(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
        self.last_inbound = Instant::now();
        self.heartbeat = self.config.heartbeat.map(|policy| {
            let mut interval =
                tokio::time::interval_at(Instant::now() + policy.interval, policy.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        self.apply(ConnectionEvent::TransportOpened).await;
    }

    fn on_frame(&mut self, frame: &Frame) {
        self.last_inbound = Instant::now();
        let outcome = dispatch::dispatch(&mut self.store, frame.as_bytes());
        debug!(?outcome, "Frame dispatched");
        self.animation.observe(self.store.play_count());
    }

    fn reset_game(&mut self) {
        info!("Resetting game state");
        self.store.reset();
        if let Some(baseline) = self.snapshot_baseline.as_mut() {
            *baseline = self.store.game().clone();
        }
        if let Some(animating) = self.animation.reset() {
            self.emit(SessionEvent::Animating(animating));
        }
    }

    fn request_snapshot(&mut self) {
        self.snapshot_epoch += 1;
        let epoch = self.snapshot_epoch;
        if let Some(previous) = self.snapshot_task.take() {
            previous.abort();
        }
        self.snapshot_baseline = Some(self.store.game().clone());

        let source = Arc::clone(&self.snapshots);
        let tx = self.snapshot_tx.clone();
        self.snapshot_task = Some(tokio::spawn(async move {
            let result = source.fetch_snapshot().await;
            let _ = tx.send((epoch, result));
        }));
        debug!("Requested status snapshot (epoch {epoch})");
        self.emit(SessionEvent::ResyncRequested);
    }

    fn on_snapshot(&mut self, epoch: u64, result: Result<GameStatus, ResyncError>) {
        if epoch != self.snapshot_epoch {
            debug!(
                "Discarding snapshot from epoch {epoch} (current {})",
                self.snapshot_epoch
            );
            return;
        }
        self.snapshot_task = None;
        let baseline = self.snapshot_baseline.take();
        match result {
            Ok(status) => {
                info!(
                    "Resynced: Q{} {} {}-{}",
                    status.current_quarter, status.time_left, status.home_score, status.away_score
                );
                let patch = match baseline {
                    Some(baseline) => status.reconcile(&baseline, self.store.game()),
                    None => status.to_patch(),
                };
                if patch != status.to_patch() {
                    debug!("Snapshot is behind the stream; applying {patch:?}");
                }
                self.store.update_game_state(patch);
            }
            Err(e) => warn!("Resync failed, waiting for the next reconnect: {e}"),
        }
    }

    async fn on_heartbeat(&mut self) {
        let Some(policy) = self.config.heartbeat else {
            return;
        };
        let silent_for = self.last_inbound.elapsed();
        if silent_for > policy.stale_after {
            warn!("No frame received for {silent_for:?}, treating stream as dead");
            self.close_transport().await;
            self.apply(ConnectionEvent::TransportFailed).await;
            return;
        }
        self.send_outbound(protocol::PING, &Value::Object(Default::default()))
            .await;
    }

    async fn send_outbound(&mut self, kind: &str, payload: &Value) {
        if self.machine.state() != ConnectionState::Open {
            warn!("Dropping outbound {kind}: stream is {:?}", self.machine.state());
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            warn!("Dropping outbound {kind}: no transport");
            return;
        };
        let text = match protocol::encode(kind, payload) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode outbound {kind}: {e}");
                return;
            }
        };
        let sent = transport.send(text).await;
        if let Err(e) = sent {
            warn!("Send failed: {e}");
            self.discard_transport();
            self.apply(ConnectionEvent::TransportFailed).await;
        }
    }

    fn discard_transport(&mut self) {
        self.transport = None;
        self.heartbeat = None;
    }

    async fn close_transport(&mut self) {
        self.heartbeat = None;
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error closing transport: {e}"),
            Err(_) => warn!("Transport close timed out"),
        }
    }

    /// Cancel everything that could still touch state after `Closed`.
    fn finish(&mut self) {
        if let Some(task) = self.snapshot_task.take() {
            task.abort();
        }
        self.snapshot_epoch += 1;
        self.snapshot_baseline = None;
        self.animation.teardown();
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

async fn poll_connect(
    connecting: &mut Option<ConnectFuture>,
) -> Result<Box<dyn Transport>, TransportError> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn poll_recv(
    transport: &mut Option<Box<dyn Transport>>,
) -> Option<Result<Frame, TransportError>> {
    match transport {
        Some(t) => t.recv().await,
        None => std::future::pending().await,
    }
}

async fn poll_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
