use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;

/// Per-quiz strictness tier, configured by the quiz author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    Low,
    #[default]
    Medium,
    High,
}

impl Strictness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strictness::Low => "low",
            Strictness::Medium => "medium",
            Strictness::High => "high",
        }
    }

    pub fn policy(&self) -> StrictnessPolicy {
        StrictnessPolicy::for_tier(*self)
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Strictness::Low),
            "medium" => Ok(Strictness::Medium),
            "high" => Ok(Strictness::High),
            other => Err(format!("unknown strictness '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrictnessPolicy {
    pub tier: Strictness,
    /// Away time after which regaining focus produces a warning.
    pub warning_after: Duration,
    /// Away time after which regaining focus produces a strike.
    pub strike_after: Duration,
    pub max_strikes: u32,
    /// Recorded violations at or above this count finalize the session as flagged.
    pub flag_threshold: i64,
}

impl StrictnessPolicy {
    pub const fn for_tier(tier: Strictness) -> Self {
        match tier {
            Strictness::Low => Self {
                tier,
                warning_after: Duration::from_millis(5_000),
                strike_after: Duration::from_millis(15_000),
                max_strikes: 5,
                flag_threshold: 8,
            },
            Strictness::Medium => Self {
                tier,
                warning_after: Duration::from_millis(2_000),
                strike_after: Duration::from_millis(5_000),
                max_strikes: 3,
                flag_threshold: 5,
            },
            Strictness::High => Self {
                tier,
                warning_after: Duration::from_millis(1_000),
                strike_after: Duration::from_millis(3_000),
                max_strikes: 2,
                flag_threshold: 3,
            },
        }
    }

    pub fn should_flag(&self, violation_count: i64) -> bool {
        violation_count >= self.flag_threshold
    }
}
