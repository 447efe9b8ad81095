use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::database::store::SessionStore;
use crate::dto::session_dto::{
    AnswerUpsertRequest, AnswerUpsertResponse, CreateSessionRequest, HeartbeatRequest,
    SecurityEventRequest, SessionStatusResponse, SessionSummary, VerifyProofResponse,
};
use crate::error::{Error, Result};
use crate::models::exam_session::{ExamSession, HeartbeatUpdate};
use crate::models::security_event::SecurityEvent;
use crate::utils::{proof_token, time};

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    async fn require_session(&self, session_id: Uuid) -> Result<ExamSession> {
        self.store
            .find_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))
    }

    pub async fn create(&self, req: CreateSessionRequest) -> Result<SessionSummary> {
        req.validate()?;
        if self.store.quiz_settings(req.quiz_id).await?.is_none() {
            return Err(Error::NotFound("Quiz not found".to_string()));
        }

        let session = self
            .store
            .create_session(ExamSession::new(
                req.quiz_id,
                req.student_index,
                req.device_fingerprint,
            ))
            .await?;

        tracing::info!(
            session_id = %session.id,
            quiz_id = %session.quiz_id,
            "Exam session started"
        );

        Ok(SessionSummary {
            session_id: session.id,
            quiz_id: session.quiz_id,
            status: session.status,
            started_at: session.started_at,
        })
    }

    /// Liveness only. The session may already be terminal; that is harmless.
    pub async fn heartbeat(&self, session_id: Uuid, req: HeartbeatRequest) -> Result<()> {
        req.validate()?;
        let update = HeartbeatUpdate {
            received_at: time::now(),
            client_timestamp: req.client_timestamp,
            is_focused: req.is_focused,
            is_fullscreen: req.is_fullscreen,
            battery_level: req.battery_level,
        };
        if !self.store.record_heartbeat(session_id, update).await? {
            return Err(Error::NotFound("Session not found".to_string()));
        }
        Ok(())
    }

    /// Returns false when the event had already been recorded.
    pub async fn record_event(&self, session_id: Uuid, req: SecurityEventRequest) -> Result<bool> {
        req.validate()?;
        let event = SecurityEvent::new(
            session_id,
            req.kind,
            req.duration_seconds,
            req.occurred_at.unwrap_or_else(time::now),
        );
        let inserted = self.store.insert_security_event(event).await?;

        if inserted {
            tracing::warn!(
                session_id = %session_id,
                kind = %req.kind,
                duration_seconds = ?req.duration_seconds,
                "Security event recorded"
            );
        } else {
            tracing::debug!(session_id = %session_id, kind = %req.kind, "Duplicate security event ignored");
        }
        Ok(inserted)
    }

    pub async fn upsert_answer(
        &self,
        session_id: Uuid,
        question_id: i32,
        req: AnswerUpsertRequest,
    ) -> Result<AnswerUpsertResponse> {
        req.validate()?;
        let answered_at = req.answered_at.unwrap_or_else(time::now);
        let value = req.into_value()?;

        let stored = self
            .store
            .upsert_answer(session_id, question_id, value, answered_at)
            .await?;

        Ok(AnswerUpsertResponse {
            saved: true,
            question_id: stored.question_id,
            updated_at: stored.updated_at,
        })
    }

    pub async fn status(&self, session_id: Uuid) -> Result<SessionStatusResponse> {
        let session = self.require_session(session_id).await?;
        let answered = self.store.list_answers(session_id).await?.len() as i64;

        Ok(SessionStatusResponse {
            session_id: session.id,
            status: session.status,
            strike_count: session.strike_count,
            answered_questions: answered,
            last_heartbeat_at: session.last_heartbeat_at,
            started_at: session.started_at,
            completed_at: session.completed_at,
        })
    }

    /// Monitor-forced termination. Conflict when the session is already terminal.
    pub async fn terminate(&self, session_id: Uuid) -> Result<SessionSummary> {
        let session = self.require_session(session_id).await?;
        if session.is_finished() {
            return Err(Error::Conflict("Session already finished".to_string()));
        }
        if !self.store.terminate_session(session_id, time::now()).await? {
            return Err(Error::Conflict("Session already finished".to_string()));
        }

        tracing::warn!(session_id = %session_id, "Exam session terminated");
        let session = self.require_session(session_id).await?;
        Ok(SessionSummary {
            session_id: session.id,
            quiz_id: session.quiz_id,
            status: session.status,
            started_at: session.started_at,
        })
    }

    /// Checks an offline proof against the fingerprint bound to the session.
    pub async fn verify_proof(&self, session_id: Uuid, token: &str) -> Result<VerifyProofResponse> {
        let session = self.require_session(session_id).await?;

        match proof_token::decode(token, &session.device_fingerprint) {
            Ok(payload) if payload.session_id == session_id => Ok(VerifyProofResponse {
                valid: true,
                issued_at: Some(payload.issued_at),
                answered: payload.answers.len(),
            }),
            Ok(_) | Err(Error::Forbidden(_)) | Err(Error::BadRequest(_)) | Err(Error::Json(_)) => {
                tracing::warn!(session_id = %session_id, "Offline proof failed verification");
                Ok(VerifyProofResponse {
                    valid: false,
                    issued_at: None,
                    answered: 0,
                })
            }
            Err(err) => Err(err),
        }
    }
}
