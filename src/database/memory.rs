use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::store::SessionStore;
use crate::error::{Error, Result};
use crate::models::answer::{AnswerValue, StoredAnswer};
use crate::models::exam_session::{
    ExamSession, HeartbeatUpdate, SessionFinalization, SessionStatus,
};
use crate::models::question::QuestionKey;
use crate::models::quiz::QuizSettings;
use crate::models::security_event::{SecurityEvent, SecurityEventKey};

#[derive(Default)]
struct MemoryState {
    quizzes: HashMap<Uuid, QuizSettings>,
    questions: HashMap<Uuid, BTreeMap<i32, QuestionKey>>,
    sessions: HashMap<Uuid, ExamSession>,
    answers: HashMap<Uuid, BTreeMap<i32, StoredAnswer>>,
    events: HashMap<Uuid, Vec<SecurityEvent>>,
    event_keys: HashSet<SecurityEventKey>,
}

/// Process-local store with the same semantics as the Postgres one.
/// Used by tests and single-node demos.
#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_quiz(&self, settings: QuizSettings) {
        self.lock().quizzes.insert(settings.id, settings);
    }

    pub fn insert_question(&self, key: QuestionKey) {
        self.lock()
            .questions
            .entry(key.quiz_id)
            .or_default()
            .insert(key.id, key);
    }

    pub fn security_events(&self, session_id: Uuid) -> Vec<SecurityEvent> {
        self.lock()
            .events
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: ExamSession) -> Result<ExamSession> {
        let mut state = self.lock();
        let duplicate = state.sessions.values().any(|s| {
            s.quiz_id == session.quiz_id
                && s.student_index == session.student_index
                && !s.is_finished()
        });
        if duplicate {
            return Err(Error::Conflict(
                "An open session already exists for this student".to_string(),
            ));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<ExamSession>> {
        Ok(self.lock().sessions.get(&session_id).cloned())
    }

    async fn quiz_settings(&self, quiz_id: Uuid) -> Result<Option<QuizSettings>> {
        Ok(self.lock().quizzes.get(&quiz_id).cloned())
    }

    async fn question_keys(&self, quiz_id: Uuid) -> Result<Vec<QuestionKey>> {
        Ok(self
            .lock()
            .questions
            .get(&quiz_id)
            .map(|qs| qs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn record_heartbeat(&self, session_id: Uuid, update: HeartbeatUpdate) -> Result<bool> {
        let mut state = self.lock();
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return Ok(false);
        };
        session.last_heartbeat_at = Some(update.received_at);
        session.last_client_timestamp = Some(update.client_timestamp);
        session.is_focused = Some(update.is_focused);
        session.is_fullscreen = Some(update.is_fullscreen);
        session.battery_level = update.battery_level;
        Ok(true)
    }

    async fn insert_security_event(&self, event: SecurityEvent) -> Result<bool> {
        let mut state = self.lock();
        if !state.sessions.contains_key(&event.session_id) {
            return Err(Error::NotFound("Session not found".to_string()));
        }
        if !state.event_keys.insert(event.key()) {
            return Ok(false);
        }
        if event.kind.is_strike() {
            if let Some(session) = state.sessions.get_mut(&event.session_id) {
                session.strike_count += 1;
            }
        }
        state.events.entry(event.session_id).or_default().push(event);
        Ok(true)
    }

    async fn count_security_events(&self, session_id: Uuid) -> Result<i64> {
        Ok(self
            .lock()
            .events
            .get(&session_id)
            .map(|events| events.len() as i64)
            .unwrap_or(0))
    }

    async fn upsert_answer(
        &self,
        session_id: Uuid,
        question_id: i32,
        value: AnswerValue,
        answered_at: DateTime<Utc>,
    ) -> Result<StoredAnswer> {
        let mut state = self.lock();
        if !state.sessions.contains_key(&session_id) {
            return Err(Error::NotFound("Session not found".to_string()));
        }
        let answers = state.answers.entry(session_id).or_default();
        if let Some(existing) = answers.get(&question_id) {
            if existing.answered_at > answered_at {
                return Ok(existing.clone());
            }
        }
        let stored = StoredAnswer {
            session_id,
            question_id,
            value,
            answered_at,
            updated_at: Utc::now(),
        };
        answers.insert(question_id, stored.clone());
        Ok(stored)
    }

    async fn list_answers(&self, session_id: Uuid) -> Result<Vec<StoredAnswer>> {
        Ok(self
            .lock()
            .answers
            .get(&session_id)
            .map(|answers| answers.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn finalize_session(
        &self,
        session_id: Uuid,
        finalization: SessionFinalization,
    ) -> Result<bool> {
        let mut state = self.lock();
        match state.sessions.get_mut(&session_id) {
            Some(session) if !session.is_finished() => {
                session.score = Some(finalization.score);
                session.status = finalization.status;
                session.completed_at = Some(finalization.completed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn terminate_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock();
        match state.sessions.get_mut(&session_id) {
            Some(session) if !session.is_finished() => {
                session.status = SessionStatus::Terminated;
                session.completed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::security_event::SecurityEventKind;

    async fn open_session(store: &MemorySessionStore) -> ExamSession {
        store
            .create_session(ExamSession::new(Uuid::new_v4(), "S-1".into(), "fp".into()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_event_keys_are_ignored() {
        let store = MemorySessionStore::new();
        let session = open_session(&store).await;
        let event = SecurityEvent::new(session.id, SecurityEventKind::FocusLost, Some(9), Utc::now());

        assert!(store.insert_security_event(event.clone()).await.unwrap());
        assert!(!store.insert_security_event(event).await.unwrap());
        assert_eq!(store.count_security_events(session.id).await.unwrap(), 1);

        let session = store.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.strike_count, 1);
    }

    #[tokio::test]
    async fn second_open_session_for_same_student_conflicts() {
        let store = MemorySessionStore::new();
        let first = open_session(&store).await;
        let again = ExamSession::new(first.quiz_id, first.student_index.clone(), "fp".into());
        assert!(matches!(
            store.create_session(again.clone()).await,
            Err(Error::Conflict(_))
        ));

        assert!(store.terminate_session(first.id, Utc::now()).await.unwrap());
        assert!(store.create_session(again).await.is_ok());
    }

    #[tokio::test]
    async fn stale_answer_redelivery_does_not_overwrite_newer_value() {
        let store = MemorySessionStore::new();
        let session = open_session(&store).await;
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::seconds(5);

        store
            .upsert_answer(session.id, 1, AnswerValue::Choice { option_id: 2 }, later)
            .await
            .unwrap();
        let kept = store
            .upsert_answer(session.id, 1, AnswerValue::Choice { option_id: 1 }, earlier)
            .await
            .unwrap();

        assert_eq!(kept.value, AnswerValue::Choice { option_id: 2 });
        assert_eq!(store.list_answers(session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finalize_only_applies_once() {
        let store = MemorySessionStore::new();
        let session = open_session(&store).await;
        let fin = SessionFinalization {
            score: 3,
            status: SessionStatus::Submitted,
            completed_at: Utc::now(),
        };
        assert!(store.finalize_session(session.id, fin.clone()).await.unwrap());
        let second = SessionFinalization {
            score: 0,
            status: SessionStatus::Flagged,
            ..fin
        };
        assert!(!store.finalize_session(session.id, second).await.unwrap());

        let stored = store.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.score, Some(3));
        assert_eq!(stored.status, SessionStatus::Submitted);
    }
}
