use std::sync::Arc;

use uuid::Uuid;

use crate::client::api::ExamApi;
use crate::client::error::ClientResult;
use crate::client::queue::{DurableQueue, QueueEntry};
use crate::models::answer::LocalAnswerRecord;
use crate::models::offline_period::OfflinePeriod;
use crate::models::security_event::{SecurityEvent, SecurityEventKind};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub answers: usize,
    pub events: usize,
    pub offline_periods: usize,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.answers + self.events + self.offline_periods
    }
}

/// Mirrors the durable queues to the server with at-least-once delivery.
/// Server-side upserts and event keys make re-delivery harmless.
pub struct SyncReconciler {
    session_id: Uuid,
    api: Arc<dyn ExamApi>,
    answers: Arc<dyn DurableQueue<LocalAnswerRecord>>,
    events: Arc<dyn DurableQueue<SecurityEvent>>,
    offline_periods: Arc<dyn DurableQueue<OfflinePeriod>>,
    gate: tokio::sync::Mutex<()>,
}

impl SyncReconciler {
    pub fn new(
        session_id: Uuid,
        api: Arc<dyn ExamApi>,
        answers: Arc<dyn DurableQueue<LocalAnswerRecord>>,
        events: Arc<dyn DurableQueue<SecurityEvent>>,
        offline_periods: Arc<dyn DurableQueue<OfflinePeriod>>,
    ) -> Self {
        Self {
            session_id,
            api,
            answers,
            events,
            offline_periods,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Pushes every unsynced item. Stops at the first `Unavailable` and returns it;
    /// whatever was not acknowledged stays queued for the next drain.
    pub async fn drain(&self) -> ClientResult<SyncReport> {
        let _serialized = self.gate.lock().await;
        let mut report = SyncReport::default();

        for entry in self.answers.list_unsynced().await? {
            let sent = self
                .api
                .upsert_answer(self.session_id, &entry.item)
                .await;
            if self.settle(&*self.answers, &entry, sent.map(|_| ()), "answer").await? {
                report.answers += 1;
            }
        }

        for entry in self.events.list_unsynced().await? {
            let sent = self.api.record_event(&entry.item).await;
            if self.settle(&*self.events, &entry, sent.map(|_| ()), "security event").await? {
                report.events += 1;
            }
        }

        for entry in self.offline_periods.list_unsynced().await? {
            let Some(duration) = entry.item.duration_seconds() else {
                continue;
            };
            let event = SecurityEvent::new(
                self.session_id,
                SecurityEventKind::NetworkDisconnect,
                Some(duration),
                entry.item.started_at,
            );
            let sent = self.api.record_event(&event).await;
            if self
                .settle(&*self.offline_periods, &entry, sent.map(|_| ()), "offline period")
                .await?
            {
                report.offline_periods += 1;
            }
        }

        if report.total() > 0 {
            tracing::info!(
                session_id = %self.session_id,
                answers = report.answers,
                events = report.events,
                offline_periods = report.offline_periods,
                "Local queue drained"
            );
        }
        Ok(report)
    }

    /// Ok(true) when acknowledged and marked, Ok(false) when rejected for good.
    async fn settle<T: crate::client::queue::QueueItem>(
        &self,
        queue: &dyn DurableQueue<T>,
        entry: &QueueEntry<T>,
        sent: ClientResult<()>,
        what: &str,
    ) -> ClientResult<bool> {
        match sent {
            Ok(()) => {
                queue.mark_synced(&[entry.receipt()]).await?;
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!(session_id = %self.session_id, error = %e, "Sync interrupted");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Server rejected {}, keeping it queued", what);
                Ok(false)
            }
        }
    }
}
