use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::api::ExamApi;
use crate::client::capabilities::Capabilities;
use crate::client::clock::Clock;
use crate::client::error::{ClientError, ClientResult};
use crate::client::heartbeat::{ConnectivityListener, DeviceProbe, DeviceSnapshot, HeartbeatChannel};
use crate::client::monitor::{IntegrityMonitor, MonitorHandle, MonitorHooks};
use crate::client::queue::{DurableQueue, FileQueue, MemoryQueue};
use crate::client::sync::{SyncReconciler, SyncReport};
use crate::config::ClientConfig;
use crate::dto::session_dto::SubmitResponse;
use crate::models::answer::{AnswerValue, LocalAnswerRecord};
use crate::models::offline_period::OfflinePeriod;
use crate::models::security_event::SecurityEvent;
use crate::models::strictness::StrictnessPolicy;
use crate::utils::proof_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    Manual,
    StrikeLimit,
    TimeExpired,
}

impl SubmitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitTrigger::Manual => "manual",
            SubmitTrigger::StrikeLimit => "strike_limit",
            SubmitTrigger::TimeExpired => "time_expired",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SubmissionReceipt {
    Accepted(SubmitResponse),
    /// The server was unreachable. The token attests to the local answers and the
    /// submission is retried on the next reconnect.
    OfflineProof(String),
}

#[derive(Clone)]
pub struct ClientQueues {
    pub answers: Arc<dyn DurableQueue<LocalAnswerRecord>>,
    pub events: Arc<dyn DurableQueue<SecurityEvent>>,
    pub offline_periods: Arc<dyn DurableQueue<OfflinePeriod>>,
}

impl ClientQueues {
    pub fn in_memory() -> Self {
        Self {
            answers: Arc::new(MemoryQueue::<LocalAnswerRecord>::new()),
            events: Arc::new(MemoryQueue::<SecurityEvent>::new()),
            offline_periods: Arc::new(MemoryQueue::<OfflinePeriod>::new()),
        }
    }

    /// One journal per stream, scoped to the session so reloads resume the same queues.
    pub async fn open_files(dir: impl AsRef<Path>, session_id: Uuid) -> ClientResult<Self> {
        let dir = dir.as_ref().join(session_id.to_string());
        Ok(Self {
            answers: Arc::new(FileQueue::<LocalAnswerRecord>::open(dir.join("answers.json")).await?),
            events: Arc::new(FileQueue::<SecurityEvent>::open(dir.join("events.json")).await?),
            offline_periods: Arc::new(
                FileQueue::<OfflinePeriod>::open(dir.join("offline_periods.json")).await?,
            ),
        })
    }

    pub async fn from_config(config: &ClientConfig, session_id: Uuid) -> ClientResult<Self> {
        match &config.queue_dir {
            Some(dir) => Self::open_files(dir, session_id).await,
            None => Ok(Self::in_memory()),
        }
    }
}

/// Everything the in-tab core does for one exam session.
pub struct ExamClient {
    session_id: Uuid,
    device_fingerprint: String,
    clock: Arc<dyn Clock>,
    api: Arc<dyn ExamApi>,
    queues: ClientQueues,
    reconciler: SyncReconciler,
    monitor: Arc<IntegrityMonitor>,
    heartbeat: Arc<HeartbeatChannel>,
    presubmit_sync_timeout: Duration,
    submitting: AtomicBool,
    submitted: AtomicBool,
    pending_submission: Mutex<Option<SubmitTrigger>>,
    /// Monitor events in dispatch order, waiting to be written to the event queue.
    pending_events: Mutex<VecDeque<SecurityEvent>>,
    event_commit: tokio::sync::Mutex<()>,
    open_period: tokio::sync::Mutex<Option<OfflinePeriod>>,
    monitor_handle: Mutex<Option<MonitorHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[allow(clippy::too_many_arguments)]
impl ExamClient {
    pub fn new(
        session_id: Uuid,
        device_fingerprint: impl Into<String>,
        policy: StrictnessPolicy,
        api: Arc<dyn ExamApi>,
        clock: Arc<dyn Clock>,
        capabilities: Capabilities,
        queues: ClientQueues,
        config: &ClientConfig,
    ) -> Arc<Self> {
        let device_fingerprint = device_fingerprint.into();
        Arc::new_cyclic(|weak: &Weak<ExamClient>| {
            let hooks = Arc::new(ClientHooks {
                client: weak.clone(),
            });

            let monitor = Arc::new(IntegrityMonitor::new(
                session_id,
                policy,
                clock.clone(),
                capabilities,
                hooks.clone(),
            ));

            let probe_target = weak.clone();
            let device: DeviceProbe = Arc::new(move || {
                probe_target
                    .upgrade()
                    .map(|client| client.device_snapshot())
                    .unwrap_or_default()
            });
            let heartbeat = Arc::new(HeartbeatChannel::new(
                session_id,
                api.clone(),
                clock.clone(),
                device,
                hooks,
                config.heartbeat_interval,
            ));

            let reconciler = SyncReconciler::new(
                session_id,
                api.clone(),
                queues.answers.clone(),
                queues.events.clone(),
                queues.offline_periods.clone(),
            );

            ExamClient {
                session_id,
                device_fingerprint,
                clock,
                api,
                queues,
                reconciler,
                monitor,
                heartbeat,
                presubmit_sync_timeout: config.presubmit_sync_timeout,
                submitting: AtomicBool::new(false),
                submitted: AtomicBool::new(false),
                pending_submission: Mutex::new(None),
                pending_events: Mutex::new(VecDeque::new()),
                event_commit: tokio::sync::Mutex::new(()),
                open_period: tokio::sync::Mutex::new(None),
                monitor_handle: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn monitor(&self) -> &Arc<IntegrityMonitor> {
        &self.monitor
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatChannel> {
        &self.heartbeat
    }

    pub fn queues(&self) -> &ClientQueues {
        &self.queues
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn pending_submission(&self) -> Option<SubmitTrigger> {
        *lock(&self.pending_submission)
    }

    /// Starts the monitor and the heartbeat loop. Must be called inside a Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let handle = self.monitor.start();
        if let Some(previous) = lock(&self.monitor_handle).replace(handle) {
            previous.stop();
        }
        lock(&self.tasks).push(self.heartbeat.clone().start());
        tracing::info!(session_id = %self.session_id, "Exam client started");
    }

    pub fn device_snapshot(&self) -> DeviceSnapshot {
        let snapshot = self.monitor.snapshot();
        DeviceSnapshot {
            is_focused: snapshot.is_focused,
            is_fullscreen: snapshot.is_fullscreen,
            battery_level: self.monitor.battery_level(),
        }
    }

    /// Durably records the answer, then mirrors it to the server in the background.
    pub async fn save_answer(self: &Arc<Self>, question_id: i32, value: AnswerValue) -> ClientResult<()> {
        if self.is_submitted() {
            return Err(ClientError::Conflict("Exam already submitted".to_string()));
        }

        let record = LocalAnswerRecord::new(question_id, value, self.clock.now());
        self.queues.answers.put(record).await?;

        if self.heartbeat.is_online() {
            let client = self.clone();
            self.spawn(async move {
                client.sync_quietly().await;
            });
        }
        Ok(())
    }

    pub async fn sync_now(&self) -> ClientResult<SyncReport> {
        self.reconciler.drain().await
    }

    pub async fn submit(&self, trigger: SubmitTrigger) -> ClientResult<SubmissionReceipt> {
        if self.is_submitted() {
            return Err(ClientError::Conflict("Exam already submitted".to_string()));
        }
        if self
            .submitting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::SubmissionInFlight);
        }

        let result = self.submit_once(trigger).await;
        self.submitting.store(false, Ordering::SeqCst);
        result
    }

    async fn submit_once(&self, trigger: SubmitTrigger) -> ClientResult<SubmissionReceipt> {
        // Strikes that triggered an auto-submit must reach the queue before it drains.
        self.commit_pending_events().await;

        match tokio::time::timeout(self.presubmit_sync_timeout, self.reconciler.drain()).await {
            Ok(Ok(report)) => {
                tracing::debug!(session_id = %self.session_id, synced = report.total(), "Pre-submit sync finished");
            }
            Ok(Err(e)) => {
                tracing::debug!(session_id = %self.session_id, error = %e, "Pre-submit sync incomplete");
            }
            Err(_) => {
                tracing::debug!(session_id = %self.session_id, "Pre-submit sync timed out");
            }
        }

        match self.api.submit(self.session_id, &self.device_fingerprint).await {
            Ok(response) => {
                self.finish_submission();
                tracing::info!(
                    session_id = %self.session_id,
                    trigger = trigger.as_str(),
                    status = %response.status,
                    "Exam submitted"
                );
                Ok(SubmissionReceipt::Accepted(response))
            }
            Err(ClientError::Conflict(message)) => {
                self.finish_submission();
                tracing::warn!(session_id = %self.session_id, "Server already finalized the session: {}", message);
                Err(ClientError::Conflict(message))
            }
            Err(e) if e.is_retryable() => {
                let answers = self.queues.answers.list_all().await?;
                let token = proof_token::issue(
                    self.session_id,
                    &self.device_fingerprint,
                    self.clock.now(),
                    &answers,
                )?;
                *lock(&self.pending_submission) = Some(trigger);
                tracing::warn!(
                    session_id = %self.session_id,
                    trigger = trigger.as_str(),
                    error = %e,
                    "Submission deferred until reconnect, issued offline proof"
                );
                Ok(SubmissionReceipt::OfflineProof(token))
            }
            Err(e) => Err(e),
        }
    }

    fn finish_submission(&self) {
        self.submitted.store(true, Ordering::SeqCst);
        lock(&self.pending_submission).take();
    }

    /// Submits with `TimeExpired` once `after` has elapsed.
    pub fn arm_deadline(self: &Arc<Self>, after: Duration) {
        let client = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(client) = client.upgrade() {
                if !client.is_submitted() {
                    client.submit_logged(SubmitTrigger::TimeExpired).await;
                }
            }
        });
        lock(&self.tasks).push(task);
    }

    /// Stops detectors and background loops. Queued data stays on disk.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.monitor_handle).take() {
            handle.stop();
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        tracing::info!(session_id = %self.session_id, "Exam client stopped");
    }

    async fn submit_logged(&self, trigger: SubmitTrigger) {
        if let Err(e) = self.submit(trigger).await {
            tracing::warn!(session_id = %self.session_id, trigger = trigger.as_str(), error = %e, "Automatic submission failed");
        }
    }

    async fn sync_quietly(&self) {
        if let Err(e) = self.reconciler.drain().await {
            tracing::debug!(session_id = %self.session_id, error = %e, "Background sync failed");
        }
    }

    fn buffer_event(&self, event: SecurityEvent) {
        lock(&self.pending_events).push_back(event);
    }

    /// Writes buffered monitor events to the event queue in the order they were raised.
    async fn commit_pending_events(&self) -> usize {
        let _commit = self.event_commit.lock().await;
        let mut committed = 0;
        loop {
            let next = lock(&self.pending_events).pop_front();
            let Some(event) = next else {
                return committed;
            };
            self.record_local_event(event).await;
            committed += 1;
        }
    }

    async fn record_local_event(&self, event: SecurityEvent) {
        {
            let mut open = self.open_period.lock().await;
            if let Some(period) = open.as_mut() {
                period.events.push(event.key());
                if let Err(e) = self.queues.offline_periods.put(period.clone()).await {
                    tracing::warn!(session_id = %self.session_id, error = %e, "Failed to persist offline period");
                }
            }
        }

        if let Err(e) = self.queues.events.append(event).await {
            tracing::error!(session_id = %self.session_id, error = %e, "Failed to queue security event");
        }
    }

    async fn went_offline(&self, at: DateTime<Utc>) {
        let mut open = self.open_period.lock().await;
        if open.is_some() {
            return;
        }
        let period = OfflinePeriod::open(self.session_id, at);
        if let Err(e) = self.queues.offline_periods.put(period.clone()).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to persist offline period");
        }
        *open = Some(period);
    }

    async fn came_online(&self, at: DateTime<Utc>) {
        let closed = {
            let mut open = self.open_period.lock().await;
            open.take().map(|mut period| {
                period.close(at);
                period
            })
        };
        if let Some(period) = closed {
            if let Err(e) = self.queues.offline_periods.put(period).await {
                tracing::warn!(session_id = %self.session_id, error = %e, "Failed to persist offline period");
            }
        }

        self.sync_quietly().await;

        let pending = self.pending_submission();
        if let Some(trigger) = pending {
            tracing::info!(session_id = %self.session_id, trigger = trigger.as_str(), "Retrying deferred submission");
            self.submit_logged(trigger).await;
        }
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(fut);
            }
            Err(_) => {
                tracing::debug!(session_id = %self.session_id, "No runtime, background work skipped");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

struct ClientHooks {
    client: Weak<ExamClient>,
}

impl MonitorHooks for ClientHooks {
    fn security_event(&self, event: SecurityEvent) {
        if let Some(client) = self.client.upgrade() {
            client.buffer_event(event);
            let target = client.clone();
            client.spawn(async move {
                if target.commit_pending_events().await > 0 && target.heartbeat.is_online() {
                    target.sync_quietly().await;
                }
            });
        }
    }

    fn strike(&self, strikes: u32, max_strikes: u32) {
        if let Some(client) = self.client.upgrade() {
            tracing::warn!(session_id = %client.session_id, strikes, max_strikes, "Strike recorded");
        }
    }

    fn auto_submit(&self) {
        if let Some(client) = self.client.upgrade() {
            let target = client.clone();
            client.spawn(async move {
                target.submit_logged(SubmitTrigger::StrikeLimit).await;
            });
        }
    }

    fn connectivity_hint(&self, _online: bool) {
        if let Some(client) = self.client.upgrade() {
            let target = client.clone();
            client.spawn(async move {
                target.heartbeat.beat().await;
            });
        }
    }
}

impl ConnectivityListener for ClientHooks {
    fn on_disconnect(&self, at: DateTime<Utc>) {
        if let Some(client) = self.client.upgrade() {
            let target = client.clone();
            client.spawn(async move {
                target.went_offline(at).await;
            });
        }
    }

    fn on_reconnect(&self, at: DateTime<Utc>) {
        if let Some(client) = self.client.upgrade() {
            let target = client.clone();
            client.spawn(async move {
                target.came_online(at).await;
            });
        }
    }
}
