use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_test::assert_ok;
use uuid::Uuid;

use exam_integrity::client::capabilities::{BrowserSignal, Capabilities};
use exam_integrity::client::clock::ManualClock;
use exam_integrity::client::{
    ClientError, ClientQueues, ClientResult, DurableQueue, ExamApi, ExamClient, FileQueue,
    SubmissionReceipt, SubmitTrigger, SyncReconciler,
};
use exam_integrity::config::ClientConfig;
use exam_integrity::database::MemorySessionStore;
use exam_integrity::dto::session_dto::{
    AnswerUpsertRequest, CreateSessionRequest, HeartbeatRequest, SecurityEventRequest,
    SubmitResponse,
};
use exam_integrity::models::answer::{AnswerValue, LocalAnswerRecord};
use exam_integrity::models::exam_session::SessionStatus;
use exam_integrity::models::offline_period::OfflinePeriod;
use exam_integrity::models::question::QuestionKey;
use exam_integrity::models::quiz::QuizSettings;
use exam_integrity::models::security_event::{SecurityEvent, SecurityEventKind};
use exam_integrity::models::strictness::Strictness;
use exam_integrity::AppState;

const FINGERPRINT: &str = "fp-offline-device-01";

/// Calls the session services directly, with a switch that simulates the network.
struct InProcessApi {
    state: AppState,
    online: AtomicBool,
}

impl InProcessApi {
    fn reachable(&self) -> ClientResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Unavailable("network down".into()))
        }
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExamApi for InProcessApi {
    async fn heartbeat(&self, session_id: Uuid, req: &HeartbeatRequest) -> ClientResult<()> {
        self.reachable()?;
        Ok(self.state.session_service.heartbeat(session_id, req.clone()).await?)
    }

    async fn record_event(&self, event: &SecurityEvent) -> ClientResult<bool> {
        self.reachable()?;
        let req = SecurityEventRequest {
            kind: event.kind,
            duration_seconds: event.duration_seconds,
            occurred_at: Some(event.occurred_at),
        };
        Ok(self
            .state
            .session_service
            .record_event(event.session_id, req)
            .await?)
    }

    async fn upsert_answer(&self, session_id: Uuid, answer: &LocalAnswerRecord) -> ClientResult<()> {
        self.reachable()?;
        let req = AnswerUpsertRequest::from_value(&answer.value, answer.written_at);
        self.state
            .session_service
            .upsert_answer(session_id, answer.question_id, req)
            .await?;
        Ok(())
    }

    async fn submit(&self, session_id: Uuid, device_fingerprint: &str) -> ClientResult<SubmitResponse> {
        self.reachable()?;
        Ok(self
            .state
            .submission_service
            .submit(session_id, device_fingerprint)
            .await?)
    }
}

struct World {
    store: Arc<MemorySessionStore>,
    api: Arc<InProcessApi>,
    session_id: Uuid,
}

async fn world(strictness: Strictness) -> World {
    let store = Arc::new(MemorySessionStore::new());
    let quiz_id = Uuid::new_v4();
    store.insert_quiz(QuizSettings {
        id: quiz_id,
        strictness,
    });
    for id in 1..=5 {
        store.insert_question(QuestionKey::choice(quiz_id, id, id * 10));
    }

    let state = AppState::new(store.clone());
    let summary = state
        .session_service
        .create(CreateSessionRequest {
            quiz_id,
            student_index: "S-42".into(),
            device_fingerprint: FINGERPRINT.into(),
        })
        .await
        .unwrap();

    World {
        store,
        api: Arc::new(InProcessApi {
            state,
            online: AtomicBool::new(true),
        }),
        session_id: summary.session_id,
    }
}

#[tokio::test]
async fn offline_writes_converge_without_duplicates() {
    let w = world(Strictness::Medium).await;
    let queues = ClientQueues::in_memory();
    let reconciler = SyncReconciler::new(
        w.session_id,
        w.api.clone(),
        queues.answers.clone(),
        queues.events.clone(),
        queues.offline_periods.clone(),
    );

    w.api.set_online(false);
    let base = Utc::now();
    for q in 1..=5 {
        queues
            .answers
            .put(LocalAnswerRecord::new(q, AnswerValue::Choice { option_id: q * 10 }, base))
            .await
            .unwrap();
    }
    for (i, kind) in [SecurityEventKind::TabSwitch, SecurityEventKind::FocusLost]
        .into_iter()
        .enumerate()
    {
        queues
            .events
            .append(SecurityEvent::new(
                w.session_id,
                kind,
                Some(4),
                base + chrono::Duration::seconds(i as i64),
            ))
            .await
            .unwrap();
    }

    let err = reconciler.drain().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(queues.answers.unsynced_count().await.unwrap(), 5);

    w.api.set_online(true);
    let report = assert_ok!(reconciler.drain().await);
    assert_eq!(report.answers, 5);
    assert_eq!(report.events, 2);
    assert_eq!(queues.answers.unsynced_count().await.unwrap(), 0);
    assert_eq!(queues.events.unsynced_count().await.unwrap(), 0);

    // A crash between the server ack and the local mark means everything is sent again.
    for event in queues.events.list_all().await.unwrap() {
        assert!(!w.api.record_event(&event).await.unwrap());
    }
    for answer in queues.answers.list_all().await.unwrap() {
        assert_ok!(w.api.upsert_answer(w.session_id, &answer).await);
    }

    assert_eq!(w.store.security_events(w.session_id).len(), 2);
    let response = w.api.submit(w.session_id, FINGERPRINT).await.unwrap();
    assert_eq!(response.status, SessionStatus::Submitted);
    assert_eq!(response.violation_count, 2);
}

#[tokio::test]
async fn file_queues_survive_a_reload() {
    let w = world(Strictness::Low).await;
    let dir = tempfile::tempdir().unwrap();

    {
        let queues = ClientQueues::open_files(dir.path(), w.session_id).await.unwrap();
        queues
            .answers
            .put(LocalAnswerRecord::new(1, AnswerValue::Choice { option_id: 10 }, Utc::now()))
            .await
            .unwrap();
        let mut period = OfflinePeriod::open(w.session_id, Utc::now());
        period.close(period.started_at + chrono::Duration::seconds(12));
        queues.offline_periods.put(period).await.unwrap();
    }

    let answers_path = dir
        .path()
        .join(w.session_id.to_string())
        .join("answers.json");
    let reopened = FileQueue::<LocalAnswerRecord>::open(&answers_path).await.unwrap();
    assert_eq!(reopened.unsynced_count().await.unwrap(), 1);

    let queues = ClientQueues::open_files(dir.path(), w.session_id).await.unwrap();
    let reconciler = SyncReconciler::new(
        w.session_id,
        w.api.clone(),
        queues.answers.clone(),
        queues.events.clone(),
        queues.offline_periods.clone(),
    );
    let report = assert_ok!(reconciler.drain().await);
    assert_eq!(report.answers, 1);
    assert_eq!(report.offline_periods, 1);

    let events = w.store.security_events(w.session_id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, SecurityEventKind::NetworkDisconnect);
    assert_eq!(events[0].duration_seconds, Some(12));
}

#[tokio::test]
async fn client_submits_offline_then_finalizes_on_reconnect() {
    let w = world(Strictness::Medium).await;
    let clock = Arc::new(ManualClock::default());
    let client = ExamClient::new(
        w.session_id,
        FINGERPRINT,
        Strictness::Medium.policy(),
        w.api.clone(),
        clock.clone(),
        Capabilities::new(),
        ClientQueues::in_memory(),
        &ClientConfig::new("http://localhost:8080"),
    );

    assert_ok!(client.save_answer(1, AnswerValue::Choice { option_id: 10 }).await);

    w.api.set_online(false);
    assert!(!client.heartbeat().beat().await);
    assert_ok!(client.save_answer(2, AnswerValue::Choice { option_id: 20 }).await);
    client.monitor().handle_signal(BrowserSignal::VisibilityHidden);
    clock.advance(Duration::from_secs(3));
    client.monitor().handle_signal(BrowserSignal::VisibilityVisible);

    let receipt = client.submit(SubmitTrigger::Manual).await.unwrap();
    assert!(matches!(receipt, SubmissionReceipt::OfflineProof(_)));
    assert_eq!(client.pending_submission(), Some(SubmitTrigger::Manual));

    clock.advance(Duration::from_secs(20));
    w.api.set_online(true);
    assert!(client.heartbeat().beat().await);

    for _ in 0..200 {
        if client.is_submitted() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(client.is_submitted());

    let session = w.store.security_events(w.session_id);
    let kinds: Vec<_> = session.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&SecurityEventKind::TabSwitch));
    assert!(kinds.contains(&SecurityEventKind::NetworkDisconnect));

    let status = w.api.state.session_service.status(w.session_id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Submitted);
    assert_eq!(status.answered_questions, 2);
    client.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn strike_limit_submit_counts_every_triggering_event() {
    for _ in 0..25 {
        let w = world(Strictness::High).await;
        let clock = Arc::new(ManualClock::default());
        let client = ExamClient::new(
            w.session_id,
            FINGERPRINT,
            Strictness::High.policy(),
            w.api.clone(),
            clock.clone(),
            Capabilities::new(),
            ClientQueues::in_memory(),
            &ClientConfig::new("http://localhost:8080"),
        );

        client.monitor().handle_signal(BrowserSignal::PointerLeave);
        clock.advance(Duration::from_secs(1));
        client.monitor().handle_signal(BrowserSignal::FullscreenExit);
        clock.advance(Duration::from_secs(1));
        client.monitor().handle_signal(BrowserSignal::FullscreenExit);

        for _ in 0..400 {
            if client.is_submitted() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(client.is_submitted());

        let status = w.api.state.session_service.status(w.session_id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Flagged);
        assert_eq!(w.store.security_events(w.session_id).len(), 3);
        client.shutdown();
    }
}
