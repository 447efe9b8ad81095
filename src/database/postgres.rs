use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::database::store::SessionStore;
use crate::error::{Error, Result};
use crate::models::answer::{AnswerValue, StoredAnswer};
use crate::models::exam_session::{ExamSession, HeartbeatUpdate, SessionFinalization};
use crate::models::question::QuestionKey;
use crate::models::quiz::QuizSettings;
use crate::models::security_event::SecurityEvent;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

const SESSION_COLUMNS: &str = r#"
    id, quiz_id, student_index, device_fingerprint, status, strike_count,
    last_heartbeat_at, last_client_timestamp, is_focused, is_fullscreen, battery_level,
    score, started_at, completed_at
"#;

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_code(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|c| c.into_owned())
}

fn session_from_row(row: &PgRow) -> Result<ExamSession> {
    let status: String = row.try_get("status")?;
    Ok(ExamSession {
        id: row.try_get("id")?,
        quiz_id: row.try_get("quiz_id")?,
        student_index: row.try_get("student_index")?,
        device_fingerprint: row.try_get("device_fingerprint")?,
        status: status.parse().map_err(Error::Internal)?,
        strike_count: row.try_get("strike_count")?,
        last_heartbeat_at: row.try_get("last_heartbeat_at")?,
        last_client_timestamp: row.try_get("last_client_timestamp")?,
        is_focused: row.try_get("is_focused")?,
        is_fullscreen: row.try_get("is_fullscreen")?,
        battery_level: row.try_get("battery_level")?,
        score: row.try_get("score")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn answer_from_row(row: &PgRow) -> Result<StoredAnswer> {
    let selected: Option<i32> = row.try_get("selected_option_id")?;
    let text: Option<String> = row.try_get("text_response")?;
    let value = match (selected, text) {
        (Some(option_id), _) => AnswerValue::Choice { option_id },
        (None, Some(response)) => AnswerValue::Text { response },
        (None, None) => {
            return Err(Error::Internal(
                "Stored answer has neither an option nor a response".to_string(),
            ))
        }
    };
    Ok(StoredAnswer {
        session_id: row.try_get("session_id")?,
        question_id: row.try_get("question_id")?,
        value,
        answered_at: row.try_get("answered_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, session: ExamSession) -> Result<ExamSession> {
        let res = sqlx::query(
            r#"
            INSERT INTO exam_sessions (id, quiz_id, student_index, device_fingerprint, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id)
        .bind(session.quiz_id)
        .bind(&session.student_index)
        .bind(&session.device_fingerprint)
        .bind(session.status.as_str())
        .bind(session.started_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(session),
            Err(err) => match db_code(&err).as_deref() {
                Some(UNIQUE_VIOLATION) => Err(Error::Conflict(
                    "An open session already exists for this student".to_string(),
                )),
                Some(FOREIGN_KEY_VIOLATION) => Err(Error::NotFound("Quiz not found".to_string())),
                _ => Err(err.into()),
            },
        }
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<ExamSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM exam_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn quiz_settings(&self, quiz_id: Uuid) -> Result<Option<QuizSettings>> {
        let row = sqlx::query("SELECT id, strictness FROM quizzes WHERE id = $1")
            .bind(quiz_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let strictness: String = row.try_get("strictness")?;
        Ok(Some(QuizSettings {
            id: row.try_get("id")?,
            strictness: strictness.parse().map_err(Error::Internal)?,
        }))
    }

    async fn question_keys(&self, quiz_id: Uuid) -> Result<Vec<QuestionKey>> {
        let rows = sqlx::query(
            r#"
            SELECT id, quiz_id, question_type, correct_option_id, points
            FROM questions
            WHERE quiz_id = $1
            ORDER BY id
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let question_type: String = row.try_get("question_type")?;
                Ok(QuestionKey {
                    id: row.try_get("id")?,
                    quiz_id: row.try_get("quiz_id")?,
                    question_type: question_type.parse().map_err(Error::Internal)?,
                    correct_option_id: row.try_get("correct_option_id")?,
                    points: row.try_get("points")?,
                })
            })
            .collect()
    }

    async fn record_heartbeat(&self, session_id: Uuid, update: HeartbeatUpdate) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE exam_sessions
            SET last_heartbeat_at = $2,
                last_client_timestamp = $3,
                is_focused = $4,
                is_fullscreen = $5,
                battery_level = $6
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(update.received_at)
        .bind(update.client_timestamp)
        .bind(update.is_focused)
        .bind(update.is_fullscreen)
        .bind(update.battery_level)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn insert_security_event(&self, event: SecurityEvent) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO security_events (session_id, kind, duration_seconds, occurred_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, occurred_at, kind) DO NOTHING
            "#,
        )
        .bind(event.session_id)
        .bind(event.kind.as_str())
        .bind(event.duration_seconds)
        .bind(event.occurred_at)
        .execute(&mut *tx)
        .await;

        let inserted = match inserted {
            Ok(res) => res.rows_affected() == 1,
            Err(err) if db_code(&err).as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                return Err(Error::NotFound("Session not found".to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        if inserted && event.kind.is_strike() {
            sqlx::query("UPDATE exam_sessions SET strike_count = strike_count + 1 WHERE id = $1")
                .bind(event.session_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn count_security_events(&self, session_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM security_events WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn upsert_answer(
        &self,
        session_id: Uuid,
        question_id: i32,
        value: AnswerValue,
        answered_at: DateTime<Utc>,
    ) -> Result<StoredAnswer> {
        // The WHERE clause keeps a late re-delivery of an older answer from
        // overwriting a newer one.
        let row = sqlx::query(
            r#"
            INSERT INTO session_answers (session_id, question_id, selected_option_id, text_response, answered_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (session_id, question_id) DO UPDATE
            SET selected_option_id = EXCLUDED.selected_option_id,
                text_response = EXCLUDED.text_response,
                answered_at = EXCLUDED.answered_at,
                updated_at = NOW()
            WHERE session_answers.answered_at <= EXCLUDED.answered_at
            RETURNING session_id, question_id, selected_option_id, text_response, answered_at, updated_at
            "#,
        )
        .bind(session_id)
        .bind(question_id)
        .bind(value.selected_option_id())
        .bind(value.text_response())
        .bind(answered_at)
        .fetch_optional(&self.pool)
        .await;

        let row = match row {
            Ok(Some(row)) => row,
            Ok(None) => sqlx::query(
                r#"
                SELECT session_id, question_id, selected_option_id, text_response, answered_at, updated_at
                FROM session_answers
                WHERE session_id = $1 AND question_id = $2
                "#,
            )
            .bind(session_id)
            .bind(question_id)
            .fetch_one(&self.pool)
            .await?,
            Err(err) if db_code(&err).as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                return Err(Error::NotFound("Session not found".to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        answer_from_row(&row)
    }

    async fn list_answers(&self, session_id: Uuid) -> Result<Vec<StoredAnswer>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, question_id, selected_option_id, text_response, answered_at, updated_at
            FROM session_answers
            WHERE session_id = $1
            ORDER BY question_id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(answer_from_row).collect()
    }

    async fn finalize_session(
        &self,
        session_id: Uuid,
        finalization: SessionFinalization,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE exam_sessions
            SET score = $2, status = $3, completed_at = $4
            WHERE id = $1
              AND status = 'in_progress'
              AND completed_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(finalization.score)
        .bind(finalization.status.as_str())
        .bind(finalization.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn terminate_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE exam_sessions
            SET status = 'terminated', completed_at = $2
            WHERE id = $1
              AND status = 'in_progress'
              AND completed_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}
