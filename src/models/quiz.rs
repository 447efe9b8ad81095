use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::strictness::Strictness;

/// The slice of quiz settings this service reads. Everything else about a quiz lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSettings {
    pub id: Uuid,
    pub strictness: Strictness,
}
