pub mod health;
pub mod session;

use axum::{
    routing::{get, post, put},
    Json, Router,
};
use utoipa::OpenApi;

use crate::dto::session_dto;
use crate::middleware::rate_limit::{new_rps_state, rps_middleware};
use crate::models::{exam_session::SessionStatus, security_event::SecurityEventKind};
use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        session::create_session,
        session::heartbeat,
        session::record_event,
        session::upsert_answer,
        session::submit,
        session::get_status,
        session::terminate,
        session::verify_proof,
    ),
    components(schemas(
        SessionStatus,
        SecurityEventKind,
        session_dto::CreateSessionRequest,
        session_dto::SessionSummary,
        session_dto::HeartbeatRequest,
        session_dto::SecurityEventRequest,
        session_dto::SecurityEventResponse,
        session_dto::AnswerUpsertRequest,
        session_dto::AnswerUpsertResponse,
        session_dto::SubmitRequest,
        session_dto::SubmitResponse,
        session_dto::SessionStatusResponse,
        session_dto::VerifyProofRequest,
        session_dto::VerifyProofResponse,
    ))
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Assembles the HTTP surface. Session routes share one per-session request budget.
pub fn build_router(state: AppState, session_rps: u32) -> Router {
    let base_routes = Router::new()
        .route("/health", get(health::health))
        .route("/api-docs/openapi.json", get(openapi_json));

    let session_api = Router::new()
        .route("/api/sessions", post(session::create_session))
        .route("/api/sessions/:id/heartbeat", post(session::heartbeat))
        .route("/api/sessions/:id/events", post(session::record_event))
        .route(
            "/api/sessions/:id/answers/:question_id",
            put(session::upsert_answer),
        )
        .route("/api/sessions/:id/submit", post(session::submit))
        .route("/api/sessions/:id/status", get(session::get_status))
        .route("/api/sessions/:id/terminate", post(session::terminate))
        .route("/api/sessions/:id/proof/verify", post(session::verify_proof))
        .layer(axum::middleware::from_fn_with_state(
            new_rps_state(session_rps),
            rps_middleware,
        ));

    base_routes.merge(session_api).with_state(state)
}
