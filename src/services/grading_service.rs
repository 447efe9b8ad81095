use std::collections::HashMap;

use serde::Serialize;

use crate::models::answer::StoredAnswer;
use crate::models::question::{QuestionKey, QuestionType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GradedAnswer {
    pub question_id: i32,
    pub points_earned: i32,
    pub max_points: i32,
    pub is_correct: bool,
    pub needs_review: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub earned: i32,
    pub max: i32,
    pub graded: Vec<GradedAnswer>,
    pub needs_review: bool,
}

pub struct GradingService;

impl GradingService {
    /// Scores server-held answers against the question keys.
    ///
    /// A choice question earns its points iff the stored option equals the key's correct
    /// option. Text questions earn nothing here and are marked for manual review.
    /// Answers to questions outside the key set are ignored.
    pub fn score(keys: &[QuestionKey], answers: &[StoredAnswer]) -> ScoreBreakdown {
        let by_question: HashMap<i32, &StoredAnswer> =
            answers.iter().map(|a| (a.question_id, a)).collect();

        let mut earned = 0;
        let mut max = 0;
        let mut needs_review = false;
        let mut graded = Vec::with_capacity(keys.len());

        for key in keys {
            max += key.points;
            let answer = by_question.get(&key.id);

            let item = match key.question_type {
                QuestionType::Choice => {
                    let is_correct = match (answer, key.correct_option_id) {
                        (Some(a), Some(correct)) => a.value.selected_option_id() == Some(correct),
                        _ => false,
                    };
                    let points_earned = if is_correct { key.points } else { 0 };
                    earned += points_earned;
                    GradedAnswer {
                        question_id: key.id,
                        points_earned,
                        max_points: key.points,
                        is_correct,
                        needs_review: false,
                    }
                }
                QuestionType::Text => {
                    let answered = answer.is_some();
                    needs_review |= answered;
                    GradedAnswer {
                        question_id: key.id,
                        points_earned: 0,
                        max_points: key.points,
                        is_correct: false,
                        needs_review: answered,
                    }
                }
            };
            graded.push(item);
        }

        ScoreBreakdown {
            earned,
            max,
            graded,
            needs_review,
        }
    }
}
