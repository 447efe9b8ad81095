use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::answer::AnswerValue;
use crate::models::exam_session::SessionStatus;
use crate::models::security_event::SecurityEventKind;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateSessionRequest {
    pub quiz_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub student_index: String,
    #[validate(length(min = 8, max = 256))]
    pub device_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub quiz_id: Uuid,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct HeartbeatRequest {
    pub client_timestamp: DateTime<Utc>,
    pub is_focused: bool,
    pub is_fullscreen: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub battery_level: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SecurityEventRequest {
    pub kind: SecurityEventKind,
    #[validate(range(min = 0))]
    pub duration_seconds: Option<i32>,
    /// Client observation time. Part of the event's identity, so retries must resend it.
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecurityEventResponse {
    /// False when the event had already been recorded.
    pub recorded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AnswerUpsertRequest {
    pub selected_option_id: Option<i32>,
    #[validate(length(max = 20000))]
    pub text_response: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl AnswerUpsertRequest {
    pub fn from_value(value: &AnswerValue, answered_at: DateTime<Utc>) -> Self {
        Self {
            selected_option_id: value.selected_option_id(),
            text_response: value.text_response().map(str::to_string),
            answered_at: Some(answered_at),
        }
    }

    pub fn into_value(self) -> Result<AnswerValue> {
        match (self.selected_option_id, self.text_response) {
            (Some(option_id), None) => Ok(AnswerValue::Choice { option_id }),
            (None, Some(response)) => Ok(AnswerValue::Text { response }),
            (Some(_), Some(_)) => Err(Error::BadRequest(
                "selected_option_id and text_response are mutually exclusive".to_string(),
            )),
            (None, None) => Err(Error::BadRequest(
                "either selected_option_id or text_response is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerUpsertResponse {
    pub saved: bool,
    pub question_id: i32,
    pub updated_at: DateTime<Utc>,
}

/// Only the fingerprint is read. Anything else in the body, a score included, is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SubmitRequest {
    #[validate(length(min = 1, max = 256))]
    pub device_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    pub status: SessionStatus,
    pub violation_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionStatusResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub strike_count: i32,
    pub answered_questions: i64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct VerifyProofRequest {
    #[validate(length(min = 1, max = 1048576))]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyProofResponse {
    pub valid: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub answered: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_request_requires_exactly_one_value() {
        let both = AnswerUpsertRequest {
            selected_option_id: Some(2),
            text_response: Some("x".into()),
            answered_at: None,
        };
        assert!(matches!(both.into_value(), Err(Error::BadRequest(_))));

        let neither = AnswerUpsertRequest {
            selected_option_id: None,
            text_response: None,
            answered_at: None,
        };
        assert!(matches!(neither.into_value(), Err(Error::BadRequest(_))));

        let choice = AnswerUpsertRequest {
            selected_option_id: Some(2),
            text_response: None,
            answered_at: None,
        };
        assert_eq!(choice.into_value().unwrap(), AnswerValue::Choice { option_id: 2 });
    }

    #[test]
    fn submit_body_drops_injected_score() {
        let req: SubmitRequest = serde_json::from_value(serde_json::json!({
            "device_fingerprint": "abc",
            "score": 100
        }))
        .unwrap();
        assert_eq!(req.device_fingerprint, "abc");
    }

    #[test]
    fn battery_level_is_a_fraction() {
        let req = HeartbeatRequest {
            client_timestamp: Utc::now(),
            is_focused: true,
            is_fullscreen: true,
            battery_level: Some(1.5),
        };
        assert!(req.validate().is_err());
    }
}
