use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session cannot move from '{from}' to '{to}'")]
    InvalidStateTransition { from: String, to: String },

    #[error("Session {0} is not active")]
    SessionNotActive(Uuid),

    #[error("Session {0} can no longer be modified")]
    SessionNotModifiable(Uuid),

    #[error("Session {0} has reached its participant limit")]
    SessionFull(Uuid),

    #[error("User {user_id} is already enrolled in session {session_id}")]
    DuplicateParticipant { session_id: Uuid, user_id: Uuid },

    #[error("The access link has expired")]
    LinkExpired,

    #[error("Participant cannot move from '{from}' to '{to}'")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Participant {0} already has test progress")]
    ParticipantHasProgress(Uuid),

    #[error("Test {0} has already been started")]
    AlreadyStarted(Uuid),

    #[error("Late entry is not allowed for session {0}")]
    LateEntryNotAllowed(Uuid),

    #[error("Attempt for test {0} is not active")]
    AttemptNotActive(Uuid),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code returned to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::BadRequest(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::InvalidStateTransition { .. } => "invalid_state_transition",
            Error::SessionNotActive(_) => "session_not_active",
            Error::SessionNotModifiable(_) => "session_not_modifiable",
            Error::SessionFull(_) => "session_full",
            Error::DuplicateParticipant { .. } => "duplicate_participant",
            Error::LinkExpired => "link_expired",
            Error::InvalidStatusTransition { .. } => "invalid_status_transition",
            Error::ParticipantHasProgress(_) => "participant_has_progress",
            Error::AlreadyStarted(_) => "already_started",
            Error::LateEntryNotAllowed(_) => "late_entry_not_allowed",
            Error::AttemptNotActive(_) => "attempt_not_active",
            Error::StorageUnavailable(_) => "storage_unavailable",
            Error::Database(_) => "database_error",
            Error::Validation(_) => "validation_error",
            Error::Reqwest(_) => "external_service_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Domain errors describe an invalid request; everything else is a fault.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Error::InvalidStateTransition { .. }
                | Error::SessionNotActive(_)
                | Error::SessionNotModifiable(_)
                | Error::SessionFull(_)
                | Error::DuplicateParticipant { .. }
                | Error::LinkExpired
                | Error::InvalidStatusTransition { .. }
                | Error::ParticipantHasProgress(_)
                | Error::AlreadyStarted(_)
                | Error::LateEntryNotAllowed(_)
                | Error::AttemptNotActive(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::LateEntryNotAllowed(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::LinkExpired => StatusCode::GONE,
            Error::InvalidStateTransition { .. }
            | Error::SessionNotActive(_)
            | Error::SessionNotModifiable(_)
            | Error::SessionFull(_)
            | Error::DuplicateParticipant { .. }
            | Error::InvalidStatusTransition { .. }
            | Error::ParticipantHasProgress(_)
            | Error::AlreadyStarted(_)
            | Error::AttemptNotActive(_) => StatusCode::CONFLICT,
            Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Reqwest(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Database(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = match &self {
            Error::Database(_) | Error::Internal(_) | Error::Config(_) => {
                tracing::error!(error = %self, "request failed");
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };
        if self.is_domain() {
            tracing::debug!(code = self.code(), "request rejected");
        }

        let body = Json(json!({ "error": self.code(), "message": message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
