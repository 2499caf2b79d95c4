use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::participant::{ParticipantStatus, SessionParticipant};
use crate::models::progress::{ParticipantTestProgress, ProgressStatus};
use crate::models::session::{Session, SessionStatus};
use crate::services::enrollment_service::{InviteOptions, Invitee};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InvitePayload {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[validate(range(min = 1, max = 8760))]
    pub link_expires_hours: Option<i64>,
}

impl InvitePayload {
    pub fn into_parts(self) -> (Invitee, InviteOptions) {
        (
            Invitee {
                user_id: self.user_id,
                name: self.name,
                email: self.email,
                is_active: self.is_active,
            },
            InviteOptions {
                link_expires_hours: self.link_expires_hours,
            },
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkInvitePayload {
    #[validate(length(min = 1, max = 1000))]
    pub participants: Vec<Invitee>,
    #[validate(range(min = 1, max = 8760))]
    pub link_expires_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateParticipantStatusPayload {
    pub status: ParticipantStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ReissueLinkQuery {
    #[validate(range(min = 1, max = 8760))]
    pub link_expires_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleState {
    pub test_id: Uuid,
    pub sequence: i32,
    pub is_required: bool,
    pub status: ProgressStatus,
}

/// What a participant sees after opening their link.
#[derive(Debug, Clone, Serialize)]
pub struct PublicSessionResponse {
    pub participant_id: Uuid,
    pub name: String,
    pub status: ParticipantStatus,
    pub link_expires_at: DateTime<Utc>,
    pub session_id: Uuid,
    pub session_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub session_status: SessionStatus,
    pub modules: Vec<ModuleState>,
}

impl PublicSessionResponse {
    pub fn new(
        participant: SessionParticipant,
        session: &Session,
        progress: &[ParticipantTestProgress],
        now: DateTime<Utc>,
    ) -> Self {
        let modules = session
            .ordered_modules()
            .into_iter()
            .map(|m| ModuleState {
                test_id: m.test_id,
                sequence: m.sequence,
                is_required: m.is_required,
                status: progress
                    .iter()
                    .find(|p| p.test_id == m.test_id)
                    .map(|p| p.status)
                    .unwrap_or(ProgressStatus::NotStarted),
            })
            .collect();

        Self {
            participant_id: participant.id,
            name: participant.name,
            status: participant.status,
            link_expires_at: participant.link_expires_at,
            session_id: session.id,
            session_name: session.name.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            session_status: session.effective_status(now),
            modules,
        }
    }
}
