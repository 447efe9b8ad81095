use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Submitted,
    Flagged,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Flagged => "flagged",
            SessionStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "submitted" => Ok(SessionStatus::Submitted),
            "flagged" => Ok(SessionStatus::Flagged),
            "terminated" => Ok(SessionStatus::Terminated),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// One student's attempt at one quiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub student_index: String,
    pub device_fingerprint: String,
    pub status: SessionStatus,
    pub strike_count: i32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_client_timestamp: Option<DateTime<Utc>>,
    pub is_focused: Option<bool>,
    pub is_fullscreen: Option<bool>,
    pub battery_level: Option<f32>,
    /// Only readable through the results view once the quiz concludes.
    #[serde(skip_serializing)]
    pub score: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExamSession {
    pub fn new(quiz_id: Uuid, student_index: String, device_fingerprint: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            student_index,
            device_fingerprint,
            status: SessionStatus::InProgress,
            strike_count: 0,
            last_heartbeat_at: None,
            last_client_timestamp: None,
            is_focused: None,
            is_fullscreen: None,
            battery_level: None,
            score: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A session is finished once its status is terminal or a completion time was recorded.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal() || self.completed_at.is_some()
    }
}

/// Liveness fields written by a heartbeat. Last writer wins.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatUpdate {
    pub received_at: DateTime<Utc>,
    pub client_timestamp: DateTime<Utc>,
    pub is_focused: bool,
    pub is_fullscreen: bool,
    pub battery_level: Option<f32>,
}

/// Values written atomically when a submission is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFinalization {
    pub score: i32,
    pub status: SessionStatus,
    pub completed_at: DateTime<Utc>,
}
