use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A student's response. Choice and free-text answers are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerValue {
    Choice { option_id: i32 },
    Text { response: String },
}

impl AnswerValue {
    pub fn selected_option_id(&self) -> Option<i32> {
        match self {
            AnswerValue::Choice { option_id } => Some(*option_id),
            AnswerValue::Text { .. } => None,
        }
    }

    pub fn text_response(&self) -> Option<&str> {
        match self {
            AnswerValue::Choice { .. } => None,
            AnswerValue::Text { response } => Some(response.as_str()),
        }
    }
}

/// The current answer to one question as known to the local device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalAnswerRecord {
    pub question_id: i32,
    pub value: AnswerValue,
    pub written_at: DateTime<Utc>,
}

impl LocalAnswerRecord {
    pub fn new(question_id: i32, value: AnswerValue, written_at: DateTime<Utc>) -> Self {
        Self {
            question_id,
            value,
            written_at,
        }
    }
}

/// The server's copy of an answer, one row per (session, question).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnswer {
    pub session_id: Uuid,
    pub question_id: i32,
    pub value: AnswerValue,
    pub answered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
