use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    TabSwitch,
    FocusLost,
    FullscreenExit,
    MouseLeave,
    NetworkDisconnect,
    TimeWarp,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::TabSwitch => "tab_switch",
            SecurityEventKind::FocusLost => "focus_lost",
            SecurityEventKind::FullscreenExit => "fullscreen_exit",
            SecurityEventKind::MouseLeave => "mouse_leave",
            SecurityEventKind::NetworkDisconnect => "network_disconnect",
            SecurityEventKind::TimeWarp => "time_warp",
        }
    }

    /// Kinds that cost the student a strike when they are produced.
    pub fn is_strike(&self) -> bool {
        matches!(
            self,
            SecurityEventKind::FocusLost
                | SecurityEventKind::FullscreenExit
                | SecurityEventKind::TimeWarp
        )
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tab_switch" => Ok(SecurityEventKind::TabSwitch),
            "focus_lost" => Ok(SecurityEventKind::FocusLost),
            "fullscreen_exit" => Ok(SecurityEventKind::FullscreenExit),
            "mouse_leave" => Ok(SecurityEventKind::MouseLeave),
            "network_disconnect" => Ok(SecurityEventKind::NetworkDisconnect),
            "time_warp" => Ok(SecurityEventKind::TimeWarp),
            other => Err(format!("unknown security event kind '{}'", other)),
        }
    }
}

/// Identity of a security event. Two observations with the same key are the same event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecurityEventKey {
    pub session_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub kind: SecurityEventKind,
}

/// One observed anomaly. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub session_id: Uuid,
    pub kind: SecurityEventKind,
    pub duration_seconds: Option<i32>,
    pub occurred_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        session_id: Uuid,
        kind: SecurityEventKind,
        duration_seconds: Option<i32>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            kind,
            duration_seconds,
            occurred_at,
        }
    }

    pub fn key(&self) -> SecurityEventKey {
        SecurityEventKey {
            session_id: self.session_id,
            occurred_at: self.occurred_at,
            kind: self.kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strike_kinds() {
        assert!(SecurityEventKind::FocusLost.is_strike());
        assert!(SecurityEventKind::TimeWarp.is_strike());
        assert!(SecurityEventKind::FullscreenExit.is_strike());
        assert!(!SecurityEventKind::TabSwitch.is_strike());
        assert!(!SecurityEventKind::MouseLeave.is_strike());
        assert!(!SecurityEventKind::NetworkDisconnect.is_strike());
    }

    #[test]
    fn wire_name_matches_serde() {
        let json = serde_json::to_value(SecurityEventKind::FullscreenExit).unwrap();
        assert_eq!(json, "fullscreen_exit");
        assert_eq!(
            "time_warp".parse::<SecurityEventKind>().unwrap(),
            SecurityEventKind::TimeWarp
        );
    }
}
