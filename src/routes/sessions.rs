use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        participant_dto::{BulkInvitePayload, InvitePayload},
        session_dto::{CreateSessionPayload, ModulePayload, SessionListQuery, SessionListResponse, SessionResponse},
    },
    error::Result,
    services::enrollment_service::InviteOptions,
    AppState,
};

#[axum::debug_handler]
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let session = state.session_service.create_session(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new(session, state.clock.now())),
    ))
}

#[axum::debug_handler]
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> Result<impl IntoResponse> {
    let list = state
        .session_service
        .list_sessions(query.status, query.page, query.per_page)
        .await?;
    Ok(Json(SessionListResponse::new(list, state.clock.now())))
}

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.session_service.get_session(id).await?;
    Ok(Json(SessionResponse::new(session, state.clock.now())))
}

#[axum::debug_handler]
pub async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.session_service.summary(id).await?))
}

#[axum::debug_handler]
pub async fn activate_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.session_service.activate(id).await?;
    Ok(Json(SessionResponse::new(session, state.clock.now())))
}

#[axum::debug_handler]
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.session_service.cancel(id).await?;
    Ok(Json(SessionResponse::new(session, state.clock.now())))
}

#[axum::debug_handler]
pub async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.session_service.complete(id).await?;
    Ok(Json(SessionResponse::new(session, state.clock.now())))
}

#[axum::debug_handler]
pub async fn expire_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.session_service.expire(id).await?;
    Ok(Json(SessionResponse::new(session, state.clock.now())))
}

#[axum::debug_handler]
pub async fn add_module(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ModulePayload>,
) -> Result<impl IntoResponse> {
    let session = state.session_service.add_module(id, payload).await?;
    Ok(Json(SessionResponse::new(session, state.clock.now())))
}

#[axum::debug_handler]
pub async fn remove_module(
    State(state): State<AppState>,
    Path((id, test_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let session = state.session_service.remove_module(id, test_id).await?;
    Ok(Json(SessionResponse::new(session, state.clock.now())))
}

#[axum::debug_handler]
pub async fn list_participants(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.session_service.get_session(id).await?;
    Ok(Json(state.enrollment_service.list_participants(id).await?))
}

#[axum::debug_handler]
pub async fn invite_participant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<InvitePayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let (invitee, opts) = payload.into_parts();
    let result = state.enrollment_service.invite(id, invitee, opts).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[axum::debug_handler]
pub async fn bulk_invite(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<BulkInvitePayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let opts = InviteOptions {
        link_expires_hours: payload.link_expires_hours,
    };
    let result = state
        .enrollment_service
        .bulk_invite(id, payload.participants, opts)
        .await?;
    Ok(Json(result))
}

/// Runs the status sweep immediately instead of waiting for the next tick.
#[axum::debug_handler]
pub async fn trigger_sweep(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let report = state.scheduler_service.trigger_now().await;
    Ok(Json(report))
}
