use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::answer::{AnswerValue, StoredAnswer};
use crate::models::exam_session::{ExamSession, HeartbeatUpdate, SessionFinalization};
use crate::models::question::QuestionKey;
use crate::models::quiz::QuizSettings;
use crate::models::security_event::SecurityEvent;

/// Server-held state for exam sessions.
///
/// Implementations must make `finalize_session` a single conditional write: it only
/// succeeds while the session is still `in_progress` with no completion time, which is
/// what makes concurrent submissions for one session safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with `Conflict` when the (quiz, student) pair already has an open session.
    async fn create_session(&self, session: ExamSession) -> Result<ExamSession>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<ExamSession>>;

    async fn quiz_settings(&self, quiz_id: Uuid) -> Result<Option<QuizSettings>>;

    async fn question_keys(&self, quiz_id: Uuid) -> Result<Vec<QuestionKey>>;

    /// Returns false when the session does not exist.
    async fn record_heartbeat(&self, session_id: Uuid, update: HeartbeatUpdate) -> Result<bool>;

    /// Insert-only. Returns false when an event with the same key already exists.
    /// Strike kinds bump the session's strike count on first insert.
    async fn insert_security_event(&self, event: SecurityEvent) -> Result<bool>;

    async fn count_security_events(&self, session_id: Uuid) -> Result<i64>;

    /// Idempotent per (session, question); the latest write replaces the value.
    async fn upsert_answer(
        &self,
        session_id: Uuid,
        question_id: i32,
        value: AnswerValue,
        answered_at: DateTime<Utc>,
    ) -> Result<StoredAnswer>;

    async fn list_answers(&self, session_id: Uuid) -> Result<Vec<StoredAnswer>>;

    /// Returns false when the session was no longer open at the time of the write.
    async fn finalize_session(
        &self,
        session_id: Uuid,
        finalization: SessionFinalization,
    ) -> Result<bool>;

    /// Returns false when the session was no longer open.
    async fn terminate_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool>;
}
