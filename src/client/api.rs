use async_trait::async_trait;
use reqwest::{Client, Response};
use url::Url;
use uuid::Uuid;

use crate::client::error::{ClientError, ClientResult};
use crate::config::ClientConfig;
use crate::dto::session_dto::{
    AnswerUpsertRequest, HeartbeatRequest, SecurityEventRequest, SecurityEventResponse,
    SubmitRequest, SubmitResponse,
};
use crate::models::answer::LocalAnswerRecord;
use crate::models::security_event::SecurityEvent;

/// The server operations the in-tab core depends on.
#[async_trait]
pub trait ExamApi: Send + Sync {
    async fn heartbeat(&self, session_id: Uuid, req: &HeartbeatRequest) -> ClientResult<()>;

    /// Returns false when the server already had this event.
    async fn record_event(&self, event: &SecurityEvent) -> ClientResult<bool>;

    async fn upsert_answer(&self, session_id: Uuid, answer: &LocalAnswerRecord) -> ClientResult<()>;

    async fn submit(&self, session_id: Uuid, device_fingerprint: &str) -> ClientResult<SubmitResponse>;
}

#[derive(Clone)]
pub struct HttpExamApi {
    client: Client,
    base_url: Url,
}

impl HttpExamApi {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let mut base = config.api_base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ClientError::Config(format!("Invalid API base URL '{}': {}", base, e)))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Config(format!("Invalid endpoint '{}': {}", path, e)))
    }

    async fn check(resp: Response) -> ClientResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);
        Err(ClientError::from_status(status, message))
    }
}

#[async_trait]
impl ExamApi for HttpExamApi {
    async fn heartbeat(&self, session_id: Uuid, req: &HeartbeatRequest) -> ClientResult<()> {
        let url = self.endpoint(&format!("api/sessions/{}/heartbeat", session_id))?;
        let resp = self.client.post(url).json(req).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn record_event(&self, event: &SecurityEvent) -> ClientResult<bool> {
        let url = self.endpoint(&format!("api/sessions/{}/events", event.session_id))?;
        let body = SecurityEventRequest {
            kind: event.kind,
            duration_seconds: event.duration_seconds,
            occurred_at: Some(event.occurred_at),
        };
        let resp = Self::check(self.client.post(url).json(&body).send().await?).await?;
        let ack: SecurityEventResponse = resp.json().await?;
        Ok(ack.recorded)
    }

    async fn upsert_answer(&self, session_id: Uuid, answer: &LocalAnswerRecord) -> ClientResult<()> {
        let url = self.endpoint(&format!(
            "api/sessions/{}/answers/{}",
            session_id, answer.question_id
        ))?;
        let body = AnswerUpsertRequest::from_value(&answer.value, answer.written_at);
        Self::check(self.client.put(url).json(&body).send().await?).await?;
        Ok(())
    }

    async fn submit(&self, session_id: Uuid, device_fingerprint: &str) -> ClientResult<SubmitResponse> {
        let url = self.endpoint(&format!("api/sessions/{}/submit", session_id))?;
        let body = SubmitRequest {
            device_fingerprint: device_fingerprint.to_string(),
        };
        let resp = Self::check(self.client.post(url).json(&body).send().await?).await?;
        Ok(resp.json().await?)
    }
}
