use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{participant_dto::PublicSessionResponse, progress_dto::ActivityPayload},
    error::Result,
    models::progress::ProgressKey,
    AppState,
};

/// Every public call re-checks the link, so an expired link stops working
/// mid-session.
async fn key_for(state: &AppState, token: &str, test_id: Uuid) -> Result<ProgressKey> {
    let (participant, session) = state.enrollment_service.authenticate_link(token).await?;
    Ok(ProgressKey::new(session.id, participant.id, test_id))
}

#[axum::debug_handler]
pub async fn open_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse> {
    let resolution = state.enrollment_service.resolve_link(&token).await?;
    let progress = state
        .progress_service
        .list_participant_progress(resolution.session.id, resolution.participant.id)
        .await?
        .into_iter()
        .map(|view| view.progress)
        .collect::<Vec<_>>();
    Ok(Json(PublicSessionResponse::new(
        resolution.participant,
        &resolution.session,
        &progress,
        state.clock.now(),
    )))
}

#[axum::debug_handler]
pub async fn next_step(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse> {
    let (participant, session) = state.enrollment_service.authenticate_link(&token).await?;
    let step = state
        .navigation_service
        .next_step(session.id, participant.id)
        .await?;
    Ok(Json(step))
}

#[axum::debug_handler]
pub async fn start_test(
    State(state): State<AppState>,
    Path((token, test_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse> {
    let key = key_for(&state, &token, test_id).await?;
    Ok(Json(state.progress_service.start(key).await?))
}

#[axum::debug_handler]
pub async fn record_activity(
    State(state): State<AppState>,
    Path((token, test_id)): Path<(String, Uuid)>,
    Json(payload): Json<ActivityPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let key = key_for(&state, &token, test_id).await?;
    Ok(Json(
        state
            .progress_service
            .record_activity(key, payload.into())
            .await?,
    ))
}

#[axum::debug_handler]
pub async fn complete_test(
    State(state): State<AppState>,
    Path((token, test_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse> {
    let key = key_for(&state, &token, test_id).await?;
    Ok(Json(state.progress_service.complete(key).await?))
}

#[axum::debug_handler]
pub async fn get_progress(
    State(state): State<AppState>,
    Path((token, test_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse> {
    let key = key_for(&state, &token, test_id).await?;
    Ok(Json(state.progress_service.get_progress(key).await?))
}
