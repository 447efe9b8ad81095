use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Choice,
    /// Free text. Graded manually outside this service.
    Text,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Choice => "choice",
            QuestionType::Text => "text",
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "choice" => Ok(QuestionType::Choice),
            "text" => Ok(QuestionType::Text),
            other => Err(format!("unknown question type '{}'", other)),
        }
    }
}

/// Server-held grading data for one question. Authored outside this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionKey {
    pub id: i32,
    pub quiz_id: Uuid,
    pub question_type: QuestionType,
    pub correct_option_id: Option<i32>,
    #[serde(default = "default_points")]
    pub points: i32,
}

fn default_points() -> i32 {
    1
}

impl QuestionKey {
    pub fn choice(quiz_id: Uuid, id: i32, correct_option_id: i32) -> Self {
        Self {
            id,
            quiz_id,
            question_type: QuestionType::Choice,
            correct_option_id: Some(correct_option_id),
            points: default_points(),
        }
    }

    pub fn text(quiz_id: Uuid, id: i32) -> Self {
        Self {
            id,
            quiz_id,
            question_type: QuestionType::Text,
            correct_option_id: None,
            points: default_points(),
        }
    }

    pub fn with_points(mut self, points: i32) -> Self {
        self.points = points;
        self
    }
}
