//! Connection lifecycle around the ingestion pipeline.
//!
//! A `Supervisor` spawns one ingestion task per run. The task owns the
//! `Pipeline` exclusively and hands it back through its `JoinHandle`, so gate
//! and tracker state survive restarts. Stop and restart requests travel over
//! `watch` channels and are honoured at every suspension point: connect, next
//! frame and the backoff sleep.

use crate::error::{ConnectionError, SupervisorError};
use crate::transport::{validate_endpoint, Connection, Connector};
use chrono::Utc;
use gln_core::{
    ActivityIndicator, Decision, FrameOutcome, Notification, NotificationSink, Pipeline,
    PipelineSnapshot, PolicyConfig, RawFrame, SettingsProvider, UserFilterConfig,
    DEFAULT_MAX_FRAME_BYTES,
};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_NOTIFY_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Stopped,
}

impl SupervisorState {
    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Streaming => "streaming",
            SupervisorState::Backoff => "backoff",
            SupervisorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Fixed delay between a connection failure and the next attempt.
    pub backoff: Duration,
    /// How often the liveness indicator is re-evaluated while streaming.
    pub sweep_interval: Duration,
    pub notify_queue: usize,
    pub max_frame_bytes: usize,
    pub policy: PolicyConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            notify_queue: DEFAULT_NOTIFY_QUEUE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            policy: PolicyConfig::default(),
        }
    }
}

/// Terminal stop request, usable from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl DispatchCounters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Fire-and-forget hand-off from the ingestion task to the notification sink.
///
/// The queue is bounded; when it is full the notification is dropped instead
/// of stalling ingestion.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
    counters: Arc<DispatchCounters>,
}

impl NotificationDispatcher {
    /// Creates the queue without a worker. `spawn_worker` drains the receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Self {
            tx,
            counters: Arc::new(DispatchCounters::default()),
        };
        (dispatcher, rx)
    }

    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (dispatcher, rx) = Self::channel(capacity);
        let worker = dispatcher.spawn_worker(rx, sink);
        (dispatcher, worker)
    }

    pub fn spawn_worker(
        &self,
        rx: mpsc::Receiver<Notification>,
        sink: Arc<dyn NotificationSink>,
    ) -> JoinHandle<()> {
        tokio::spawn(deliver_loop(rx, sink, Arc::clone(&self.counters)))
    }

    /// Queues a notification. Returns false when it was dropped.
    pub fn dispatch(&self, notification: Notification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(notification)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = "notification_dropped",
                    reason = "queue_full",
                    title = %notification.title
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(notification)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = "notification_dropped",
                    reason = "dispatcher_closed",
                    title = %notification.title
                );
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

async fn deliver_loop(
    mut rx: mpsc::Receiver<Notification>,
    sink: Arc<dyn NotificationSink>,
    counters: Arc<DispatchCounters>,
) {
    while let Some(notification) = rx.recv().await {
        let title = notification.title.clone();
        let sink = Arc::clone(&sink);
        match tokio::task::spawn_blocking(move || sink.send(&notification)).await {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(event = "notification_delivered", title = %title);
            }
            Ok(Err(err)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(event = "notification_failed", title = %title, error = %err);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(event = "notification_task_failed", title = %title, error = %err);
            }
        }
    }
    debug!(event = "notification_dispatcher_closed");
}

struct RunHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<Pipeline>,
}

pub struct Supervisor<C: Connector> {
    connector: Arc<C>,
    settings: Arc<dyn SettingsProvider>,
    sink: Arc<dyn NotificationSink>,
    indicator: Arc<dyn ActivityIndicator>,
    config: SupervisorConfig,
    stop_tx: Arc<watch::Sender<bool>>,
    state_tx: Arc<watch::Sender<SupervisorState>>,
    snapshot_tx: Arc<watch::Sender<PipelineSnapshot>>,
    dispatcher: Option<NotificationDispatcher>,
    dispatch_rx: Option<mpsc::Receiver<Notification>>,
    dispatch_worker: Option<JoinHandle<()>>,
    dispatch_counters: Arc<DispatchCounters>,
    run: Option<RunHandle>,
    parked: Option<Pipeline>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: C,
        settings: Arc<dyn SettingsProvider>,
        sink: Arc<dyn NotificationSink>,
        indicator: Arc<dyn ActivityIndicator>,
        config: SupervisorConfig,
    ) -> Self {
        let pipeline = fresh_pipeline(&config);
        let (stop_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(SupervisorState::Idle);
        let (snapshot_tx, _) = watch::channel(pipeline.snapshot(Utc::now()));
        let (dispatcher, dispatch_rx) = NotificationDispatcher::channel(config.notify_queue);
        let dispatch_counters = Arc::clone(&dispatcher.counters);
        Self {
            connector: Arc::new(connector),
            settings,
            sink,
            indicator,
            config,
            stop_tx: Arc::new(stop_tx),
            state_tx: Arc::new(state_tx),
            snapshot_tx: Arc::new(snapshot_tx),
            dispatcher: Some(dispatcher),
            dispatch_rx: Some(dispatch_rx),
            dispatch_worker: None,
            dispatch_counters,
            run: None,
            parked: Some(pipeline),
        }
    }

    /// Starts streaming, or restarts it when a run is already in progress.
    ///
    /// The endpoint is validated up front; a bad one is returned to the caller
    /// and leaves any current run untouched.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if *self.stop_tx.borrow() {
            return Err(SupervisorError::Stopped);
        }
        let endpoint = validate_endpoint(&self.settings.endpoint())?;
        let Some(dispatcher) = self.dispatcher.clone() else {
            return Err(SupervisorError::Stopped);
        };
        if let Some(rx) = self.dispatch_rx.take() {
            self.dispatch_worker = Some(dispatcher.spawn_worker(rx, Arc::clone(&self.sink)));
        }

        let restarting = self.run.is_some();
        let pipeline = self.take_pipeline().await;
        if restarting {
            info!(event = "supervisor_restart", endpoint = %endpoint);
        } else {
            info!(event = "supervisor_start", endpoint = %endpoint);
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let halt = HaltSignal {
            stop: self.stop_tx.subscribe(),
            cancel: cancel_rx,
        };
        let run = RunLoop {
            connector: Arc::clone(&self.connector),
            settings: Arc::clone(&self.settings),
            indicator: Arc::clone(&self.indicator),
            dispatcher,
            config: self.config,
            state_tx: Arc::clone(&self.state_tx),
            snapshot_tx: Arc::clone(&self.snapshot_tx),
        };
        let task = tokio::spawn(run.run(pipeline, halt));
        self.run = Some(RunHandle { cancel_tx, task });
        Ok(())
    }

    /// Terminal stop: cancels the in-flight connect or receive, waits for the
    /// ingestion task and drains queued notifications.
    pub async fn stop(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(run) = self.run.take() {
            self.parked = join_run(run.task).await;
        }
        self.dispatcher = None;
        self.dispatch_rx = None;
        if let Some(worker) = self.dispatch_worker.take() {
            if let Err(err) = worker.await {
                warn!(event = "notification_dispatcher_join_failed", error = %err);
            }
        }
        publish_state(&self.state_tx, SupervisorState::Stopped);
    }

    /// Resolves once the supervisor reaches `Stopped`, through `stop` or a
    /// `StopHandle`.
    pub async fn stopped(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == SupervisorState::Stopped).await;
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatch_counters.snapshot()
    }

    async fn take_pipeline(&mut self) -> Pipeline {
        if let Some(run) = self.run.take() {
            run.cancel_tx.send_replace(true);
            if let Some(pipeline) = join_run(run.task).await {
                return pipeline;
            }
        }
        self.parked
            .take()
            .unwrap_or_else(|| fresh_pipeline(&self.config))
    }
}

fn fresh_pipeline(config: &SupervisorConfig) -> Pipeline {
    Pipeline::new(config.policy).with_max_frame_bytes(config.max_frame_bytes)
}

async fn join_run(task: JoinHandle<Pipeline>) -> Option<Pipeline> {
    match task.await {
        Ok(pipeline) => Some(pipeline),
        Err(err) => {
            warn!(event = "supervisor_run_join_failed", error = %err);
            None
        }
    }
}

fn publish_state(state_tx: &watch::Sender<SupervisorState>, state: SupervisorState) {
    let previous = state_tx.send_replace(state);
    if previous != state {
        debug!(event = "supervisor_state", from = %previous, to = %state);
    }
}

struct HaltSignal {
    stop: watch::Receiver<bool>,
    cancel: watch::Receiver<bool>,
}

impl HaltSignal {
    fn is_set(&self) -> bool {
        *self.stop.borrow() || *self.cancel.borrow()
    }

    fn is_stop(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves on stop, on cancel, or when the owning supervisor is dropped.
    async fn wait(&mut self) {
        tokio::select! {
            _ = flag_raised(&mut self.stop) => {}
            _ = flag_raised(&mut self.cancel) => {}
        }
    }
}

async fn flag_raised(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|flag| *flag).await;
}

enum SessionEnd {
    Halted,
    Failed,
}

struct RunLoop<C: Connector> {
    connector: Arc<C>,
    settings: Arc<dyn SettingsProvider>,
    indicator: Arc<dyn ActivityIndicator>,
    dispatcher: NotificationDispatcher,
    config: SupervisorConfig,
    state_tx: Arc<watch::Sender<SupervisorState>>,
    snapshot_tx: Arc<watch::Sender<PipelineSnapshot>>,
}

impl<C: Connector> RunLoop<C> {
    async fn run(self, mut pipeline: Pipeline, mut halt: HaltSignal) -> Pipeline {
        let mut attempt = 0u64;
        while !halt.is_set() {
            if attempt > 0 {
                pipeline.note_reconnect();
            }
            attempt += 1;
            publish_state(&self.state_tx, SupervisorState::Connecting);

            // Settings are polled on every attempt, never subscribed to.
            let filters = self.settings.filters();
            let end = match validate_endpoint(&self.settings.endpoint()) {
                Ok(endpoint) => {
                    self.session(&endpoint, &filters, &mut pipeline, &mut halt)
                        .await
                }
                Err(err) => {
                    warn!(event = "supervisor_endpoint_invalid", error = %err);
                    SessionEnd::Failed
                }
            };
            if matches!(end, SessionEnd::Halted) {
                break;
            }

            publish_state(&self.state_tx, SupervisorState::Backoff);
            self.sweep(&mut pipeline);
            info!(
                event = "supervisor_backoff",
                delay_ms = self.config.backoff.as_millis() as u64,
                attempt
            );
            tokio::select! {
                _ = halt.wait() => break,
                _ = tokio::time::sleep(self.config.backoff) => {}
            }
        }

        if halt.is_stop() {
            publish_state(&self.state_tx, SupervisorState::Stopped);
            info!(event = "supervisor_stopped", stats = ?pipeline.stats());
        } else {
            debug!(event = "supervisor_run_cancelled");
        }
        self.publish_snapshot(&pipeline);
        pipeline
    }

    async fn session(
        &self,
        endpoint: &Url,
        filters: &UserFilterConfig,
        pipeline: &mut Pipeline,
        halt: &mut HaltSignal,
    ) -> SessionEnd {
        let opened = tokio::select! {
            _ = halt.wait() => return SessionEnd::Halted,
            opened = self.connector.open(endpoint) => opened,
        };
        let mut connection = match opened {
            Ok(connection) => connection,
            Err(err) => {
                log_connection_error(&err);
                return SessionEnd::Failed;
            }
        };
        publish_state(&self.state_tx, SupervisorState::Streaming);
        info!(event = "supervisor_streaming", endpoint = %endpoint);

        let mut sweep = tokio::time::interval_at(
            Instant::now() + self.config.sweep_interval,
            self.config.sweep_interval,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = halt.wait() => {
                    connection.close().await;
                    return SessionEnd::Halted;
                }
                frame = connection.next_frame() => match frame {
                    Ok(frame) => self.handle_frame(&frame, filters, pipeline),
                    Err(err) => {
                        log_connection_error(&err);
                        connection.close().await;
                        return SessionEnd::Failed;
                    }
                },
                _ = sweep.tick() => self.sweep(pipeline),
            }
        }
    }

    fn handle_frame(&self, frame: &RawFrame, filters: &UserFilterConfig, pipeline: &mut Pipeline) {
        match pipeline.process_frame(frame, filters, Utc::now()) {
            Ok(outcome) => self.apply_outcome(outcome),
            Err(err) => {
                warn!(
                    event = "frame_decode_error",
                    error = %err,
                    decode_errors = pipeline.stats().decode_errors
                );
            }
        }
        self.publish_snapshot(pipeline);
    }

    fn apply_outcome(&self, outcome: FrameOutcome) {
        match outcome.verdict.decision {
            Decision::Accept => {}
            Decision::Replay => {
                debug!(
                    event = "gate_replay",
                    seq = outcome.seq,
                    epoch = outcome.epoch,
                    applied = outcome.applied
                );
            }
            Decision::Stale => {
                debug!(event = "gate_stale", seq = outcome.seq, epoch = outcome.epoch);
            }
        }
        if let Some(active) = outcome.indicator {
            self.set_indicator(active);
        }
        if let Some(reason) = outcome.suppressed {
            debug!(
                event = "notification_suppressed",
                reason = %reason,
                seq = outcome.seq,
                epoch = outcome.epoch
            );
        }
        if let Some(notification) = outcome.notification {
            info!(
                event = "notification_emit",
                title = %notification.title,
                pipeline_id = notification.metadata.pipeline_id
            );
            self.dispatcher.dispatch(notification);
        }
    }

    fn sweep(&self, pipeline: &mut Pipeline) {
        if let Some(active) = pipeline.sweep(Utc::now()) {
            self.set_indicator(active);
            self.publish_snapshot(pipeline);
        }
    }

    fn set_indicator(&self, active: bool) {
        info!(event = "indicator_changed", active);
        self.indicator.set_active(active);
    }

    fn publish_snapshot(&self, pipeline: &Pipeline) {
        self.snapshot_tx.send_replace(pipeline.snapshot(Utc::now()));
    }
}

fn log_connection_error(err: &ConnectionError) {
    if err.is_benign() {
        debug!(event = "connection_closed", error = %err);
    } else {
        warn!(event = "connection_error", error = %err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gln_core::{NotificationMetadata, NotifySinkError};
    use std::sync::Mutex;

    fn notification(title: &str) -> Notification {
        Notification {
            title: title.to_string(),
            body: "body".to_string(),
            metadata: NotificationMetadata {
                project_url: "https://gitlab.example.com/acme/api".to_string(),
                pipeline_id: 7,
            },
            sound: true,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        titles: Mutex<Vec<String>>,
        fail: bool,
    }

    impl NotificationSink for RecordingSink {
        fn send(&self, notification: &Notification) -> Result<(), NotifySinkError> {
            if self.fail {
                return Err(NotifySinkError::Unavailable("no session bus".to_string()));
            }
            self.titles
                .lock()
                .expect("titles lock")
                .push(notification.title.clone());
            Ok(())
        }
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (dispatcher, _rx) = NotificationDispatcher::channel(1);
        assert!(dispatcher.dispatch(notification("first")));
        assert!(!dispatcher.dispatch(notification("second")));
        assert!(!dispatcher.dispatch(notification("third")));
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                delivered: 0,
                failed: 0,
                dropped: 2
            }
        );
    }

    #[tokio::test]
    async fn worker_delivers_in_order_and_exits_when_senders_drop() {
        let sink = Arc::new(RecordingSink::default());
        let (dispatcher, worker) = NotificationDispatcher::spawn(sink.clone(), 8);
        for title in ["a", "b", "c"] {
            assert!(dispatcher.dispatch(notification(title)));
        }
        let counters = Arc::clone(&dispatcher.counters);
        drop(dispatcher);
        worker.await.expect("worker join");

        assert_eq!(
            *sink.titles.lock().expect("titles lock"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(counters.snapshot().delivered, 3);
    }

    #[tokio::test]
    async fn sink_failures_are_counted_not_propagated() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let (dispatcher, worker) = NotificationDispatcher::spawn(sink, 4);
        dispatcher.dispatch(notification("broken"));
        let counters = Arc::clone(&dispatcher.counters);
        drop(dispatcher);
        worker.await.expect("worker join");
        assert_eq!(counters.snapshot().failed, 1);
        assert_eq!(counters.snapshot().delivered, 0);
    }

    #[test]
    fn stop_handle_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<StopHandle>();

        let (tx, rx) = watch::channel(false);
        let handle = StopHandle { tx: Arc::new(tx) };
        let remote = handle.clone();
        std::thread::spawn(move || remote.stop())
            .join()
            .expect("stop thread");
        assert!(handle.is_stopped());
        assert!(*rx.borrow());
    }

    #[test]
    fn default_config_backs_off_one_second() {
        let config = SupervisorConfig::default();
        assert_eq!(config.backoff, Duration::from_secs(1));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.notify_queue, 64);
    }
}
