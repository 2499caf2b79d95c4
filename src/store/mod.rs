//! Persistence seam for sessions, enrollments and timed attempts.
//!
//! Every status change goes through a conditional update ("move to `target`
//! only if the row is currently in one of `expected`"), so two writers racing
//! on the same row can never both win. Unrelated rows never contend.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::participant::{ParticipantStatus, SessionParticipant};
use crate::models::progress::{ParticipantTestProgress, ProgressKey, ProgressStatus};
use crate::models::session::{Session, SessionModule, SessionStatus};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Outcome of a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult<S> {
    Success,
    NotFound,
    StateMismatch { actual: S },
}

impl<S> CasResult<S> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Outcome of an enrollment insert. Capacity and uniqueness are checked in
/// the same write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
    Full,
}

/// Outcome of a module list rewrite guarded by the list it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulesOutcome {
    Replaced,
    NotFound,
    /// The stored list no longer matches the expected one.
    Stale,
    /// The session reached a terminal status.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    HasProgress,
}

/// Partial activity update applied to an in-progress attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityUpdate {
    pub answered_questions: Option<i32>,
    pub time_spent_delta: Option<i32>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- Sessions ---

    /// Inserts a session together with its modules.
    async fn insert_session(&self, session: &Session) -> Result<()>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>>;

    async fn count_sessions(&self, status: Option<SessionStatus>) -> Result<i64>;

    /// Sessions currently stored in `status`, modules included.
    async fn sessions_in_status(&self, status: SessionStatus) -> Result<Vec<Session>>;

    async fn cas_session_status(
        &self,
        id: Uuid,
        expected: &[SessionStatus],
        target: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<SessionStatus>>;

    /// Replaces the module list of a session, provided the stored list still
    /// holds `expected` test ids in sequence order.
    async fn replace_modules(
        &self,
        session_id: Uuid,
        expected: &[Uuid],
        modules: &[SessionModule],
    ) -> Result<ModulesOutcome>;

    // --- Participants ---

    /// Inserts the enrollment unless the user is already enrolled or the
    /// session already holds `capacity` participants, checked in that order.
    async fn insert_participant(
        &self,
        participant: &SessionParticipant,
        capacity: Option<i32>,
    ) -> Result<InsertOutcome>;

    async fn get_participant(&self, id: Uuid) -> Result<Option<SessionParticipant>>;

    async fn find_participant_by_link(&self, token: &str) -> Result<Option<SessionParticipant>>;

    async fn list_participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>>;

    /// Moving into `registered` or `started` also stamps `registered_at`
    /// when it is still empty.
    async fn cas_participant_status(
        &self,
        id: Uuid,
        expected: &[ParticipantStatus],
        target: ParticipantStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ParticipantStatus>>;

    async fn mark_invitation_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn replace_link(
        &self,
        id: Uuid,
        expected: &[ParticipantStatus],
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ParticipantStatus>>;

    /// Deletes the enrollment unless an attempt of it has left `not_started`.
    async fn delete_participant(&self, id: Uuid) -> Result<RemoveOutcome>;

    // --- Attempt progress ---

    /// Inserts the row if the tuple has none yet and returns the stored row.
    async fn ensure_progress(&self, row: &ParticipantTestProgress) -> Result<ParticipantTestProgress>;

    async fn get_progress(&self, key: ProgressKey) -> Result<Option<ParticipantTestProgress>>;

    async fn list_participant_progress(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Vec<ParticipantTestProgress>>;

    async fn list_session_progress(&self, session_id: Uuid) -> Result<Vec<ParticipantTestProgress>>;

    async fn progress_in_status(&self, status: ProgressStatus) -> Result<Vec<ParticipantTestProgress>>;

    /// `not_started` -> `in_progress`, setting `started_at` if it was never set.
    async fn start_progress(
        &self,
        key: ProgressKey,
        total_questions: i32,
        time_limit_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>>;

    /// Applies activity only while the row is `in_progress`.
    async fn record_activity(
        &self,
        key: ProgressKey,
        update: ActivityUpdate,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>>;

    /// Moves into a terminal state and stamps `completed_at` once.
    async fn finish_progress(
        &self,
        key: ProgressKey,
        expected: &[ProgressStatus],
        target: ProgressStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>>;
}
