use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::session_dto::{
    AnswerUpsertRequest, CreateSessionRequest, HeartbeatRequest, SecurityEventRequest,
    SecurityEventResponse, SubmitRequest, VerifyProofRequest,
};
use crate::error::Result;
use crate::AppState;

#[utoipa::path(
    post,
    path = "/api/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session started", body = crate::dto::session_dto::SessionSummary),
        (status = 404, description = "Quiz not found"),
        (status = 409, description = "Student already has an open session for this quiz")
    )
)]
#[axum::debug_handler]
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Response> {
    let summary = state.session_service.create(req).await?;
    Ok((StatusCode::CREATED, Json(summary)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/heartbeat",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Liveness recorded"),
        (status = 404, description = "Session not found")
    )
)]
#[axum::debug_handler]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Response> {
    state.session_service.heartbeat(id, req).await?;
    Ok(Json(serde_json::json!({ "ok": true })).into_response())
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/events",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = SecurityEventRequest,
    responses(
        (status = 201, description = "Event recorded", body = SecurityEventResponse),
        (status = 200, description = "Event was already recorded", body = SecurityEventResponse),
        (status = 404, description = "Session not found")
    )
)]
#[axum::debug_handler]
pub async fn record_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SecurityEventRequest>,
) -> Result<Response> {
    let recorded = state.session_service.record_event(id, req).await?;
    let status = if recorded {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(SecurityEventResponse { recorded })).into_response())
}

#[utoipa::path(
    put,
    path = "/api/sessions/{id}/answers/{question_id}",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("question_id" = i32, Path, description = "Question ID")
    ),
    request_body = AnswerUpsertRequest,
    responses(
        (status = 200, description = "Answer stored", body = crate::dto::session_dto::AnswerUpsertResponse),
        (status = 400, description = "Neither or both of option and text were given"),
        (status = 404, description = "Session not found")
    )
)]
#[axum::debug_handler]
pub async fn upsert_answer(
    State(state): State<AppState>,
    Path((id, question_id)): Path<(Uuid, i32)>,
    Json(req): Json<AnswerUpsertRequest>,
) -> Result<Response> {
    let saved = state
        .session_service
        .upsert_answer(id, question_id, req)
        .await?;
    Ok(Json(saved).into_response())
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/submit",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Session finalized", body = crate::dto::session_dto::SubmitResponse),
        (status = 403, description = "Device fingerprint does not match the session"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session already submitted")
    )
)]
#[axum::debug_handler]
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitRequest>,
) -> Result<Response> {
    req.validate()?;
    let result = state
        .submission_service
        .submit(id, &req.device_fingerprint)
        .await?;
    Ok(Json(result).into_response())
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/status",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Current session state", body = crate::dto::session_dto::SessionStatusResponse),
        (status = 404, description = "Session not found")
    )
)]
#[axum::debug_handler]
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let status = state.session_service.status(id).await?;
    Ok(Json(status).into_response())
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/terminate",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session terminated", body = crate::dto::session_dto::SessionSummary),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session already finished")
    )
)]
#[axum::debug_handler]
pub async fn terminate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let summary = state.session_service.terminate(id).await?;
    Ok(Json(summary).into_response())
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/proof/verify",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = VerifyProofRequest,
    responses(
        (status = 200, description = "Verification verdict", body = crate::dto::session_dto::VerifyProofResponse),
        (status = 404, description = "Session not found")
    )
)]
#[axum::debug_handler]
pub async fn verify_proof(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<VerifyProofRequest>,
) -> Result<Response> {
    req.validate()?;
    let verdict = state.session_service.verify_proof(id, &req.token).await?;
    Ok(Json(verdict).into_response())
}
