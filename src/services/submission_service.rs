use std::sync::Arc;

use uuid::Uuid;

use crate::database::store::SessionStore;
use crate::dto::session_dto::SubmitResponse;
use crate::error::{Error, Result};
use crate::models::exam_session::{SessionFinalization, SessionStatus};
use crate::models::strictness::Strictness;
use crate::services::grading_service::GradingService;
use crate::utils::{crypto, time};

/// Finalizes sessions from server-held state only. Nothing the client sends other
/// than its device fingerprint influences the outcome.
#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn SessionStore>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn submit(&self, session_id: Uuid, device_fingerprint: &str) -> Result<SubmitResponse> {
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))?;

        if !crypto::fingerprints_match(device_fingerprint, &session.device_fingerprint) {
            tracing::warn!(session_id = %session_id, "Submission rejected: device fingerprint mismatch");
            return Err(Error::Forbidden(
                "Submission must come from the device that started the session".to_string(),
            ));
        }

        if session.is_finished() {
            return Err(Error::Conflict("Session already submitted".to_string()));
        }

        let keys = self.store.question_keys(session.quiz_id).await?;
        let answers = self.store.list_answers(session_id).await?;
        let breakdown = GradingService::score(&keys, &answers);

        let strictness = match self.store.quiz_settings(session.quiz_id).await? {
            Some(settings) => settings.strictness,
            None => {
                tracing::warn!(quiz_id = %session.quiz_id, "Quiz settings missing, using default strictness");
                Strictness::default()
            }
        };
        let violation_count = self.store.count_security_events(session_id).await?;
        let status = if strictness.policy().should_flag(violation_count) {
            SessionStatus::Flagged
        } else {
            SessionStatus::Submitted
        };

        let finalization = SessionFinalization {
            score: breakdown.earned,
            status,
            completed_at: time::now(),
        };
        if !self.store.finalize_session(session_id, finalization).await? {
            tracing::warn!(session_id = %session_id, "Concurrent submission lost the race");
            return Err(Error::Conflict("Session already submitted".to_string()));
        }

        tracing::info!(
            session_id = %session_id,
            status = %status,
            violation_count,
            strictness = %strictness,
            "Exam session finalized"
        );

        Ok(SubmitResponse {
            status,
            violation_count,
        })
    }
}
