use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::participant_dto::{ReissueLinkQuery, UpdateParticipantStatusPayload},
    error::Result,
    models::{participant::SessionParticipant, progress::ProgressView},
    services::enrollment_service::InviteOptions,
    AppState,
};

#[derive(Debug, Serialize)]
pub struct ParticipantDetail {
    #[serde(flatten)]
    pub participant: SessionParticipant,
    pub progress: Vec<ProgressView>,
}

#[axum::debug_handler]
pub async fn get_participant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let participant = state.enrollment_service.get_participant(id).await?;
    let progress = state
        .progress_service
        .list_participant_progress(participant.session_id, participant.id)
        .await?;
    Ok(Json(ParticipantDetail {
        participant,
        progress,
    }))
}

#[axum::debug_handler]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateParticipantStatusPayload>,
) -> Result<impl IntoResponse> {
    let participant = state
        .enrollment_service
        .update_status(id, payload.status)
        .await?;
    Ok(Json(participant))
}

#[axum::debug_handler]
pub async fn remove_participant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.enrollment_service.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn reissue_link(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReissueLinkQuery>,
) -> Result<impl IntoResponse> {
    query.validate()?;
    let result = state
        .enrollment_service
        .reissue_link(
            id,
            InviteOptions {
                link_expires_hours: query.link_expires_hours,
            },
        )
        .await?;
    Ok(Json(result))
}
