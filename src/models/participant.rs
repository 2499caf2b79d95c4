use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Invited,
    Registered,
    Started,
    Completed,
    NoShow,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Invited => "invited",
            ParticipantStatus::Registered => "registered",
            ParticipantStatus::Started => "started",
            ParticipantStatus::Completed => "completed",
            ParticipantStatus::NoShow => "no_show",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ParticipantStatus::Completed | ParticipantStatus::NoShow)
    }

    /// Transitions an administrator may request explicitly.
    pub fn allows_manual_transition(&self, target: ParticipantStatus) -> bool {
        use ParticipantStatus::*;
        matches!(
            (self, target),
            (Invited, Registered)
                | (Registered, Started)
                | (Started, Completed)
                | (Invited, NoShow)
                | (Registered, NoShow)
        )
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionParticipant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub status: ParticipantStatus,
    pub invitation_sent_at: Option<DateTime<Utc>>,
    pub registered_at: Option<DateTime<Utc>>,
    pub unique_link: String,
    pub link_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionParticipant {
    /// Link validity is independent of the enrollment status.
    pub fn is_link_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.link_expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::ParticipantStatus::*;

    #[test]
    fn manual_transitions_only_step_forward() {
        assert!(Invited.allows_manual_transition(Registered));
        assert!(Registered.allows_manual_transition(Started));
        assert!(Started.allows_manual_transition(Completed));
        assert!(Invited.allows_manual_transition(NoShow));
        assert!(Registered.allows_manual_transition(NoShow));

        assert!(!Started.allows_manual_transition(NoShow));
        assert!(!Invited.allows_manual_transition(Started));
        assert!(!Completed.allows_manual_transition(Started));
        assert!(!Registered.allows_manual_transition(Registered));
        assert!(!NoShow.allows_manual_transition(Registered));
    }
}
