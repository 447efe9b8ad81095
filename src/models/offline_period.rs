use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::security_event::SecurityEventKey;

/// An interval during which the heartbeat channel believed the device was disconnected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflinePeriod {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<SecurityEventKey>,
}

impl OfflinePeriod {
    pub fn open(session_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            started_at,
            ended_at: None,
            events: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn close(&mut self, ended_at: DateTime<Utc>) {
        if self.ended_at.is_none() {
            self.ended_at = Some(ended_at.max(self.started_at));
        }
    }

    /// Whole seconds spent offline, rounded. `None` while still open.
    pub fn duration_seconds(&self) -> Option<i32> {
        self.ended_at.map(|end| {
            let millis = (end - self.started_at).num_milliseconds().max(0);
            ((millis + 500) / 1000) as i32
        })
    }
}
