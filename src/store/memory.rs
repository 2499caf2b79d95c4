//! In-memory [`Store`] with the same conditional-update semantics as Postgres.
//!
//! All tables sit behind one lock, so cross-table checks (such as refusing to
//! remove a participant with progress) are atomic. State is lost on exit.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ActivityUpdate, CasResult, InsertOutcome, ModulesOutcome, RemoveOutcome, Store};
use crate::error::{Error, Result};
use crate::models::participant::{ParticipantStatus, SessionParticipant};
use crate::models::progress::{ParticipantTestProgress, ProgressKey, ProgressStatus};
use crate::models::session::{Session, SessionModule, SessionStatus};

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<Uuid, Session>,
    participants: HashMap<Uuid, SessionParticipant>,
    progress: HashMap<ProgressKey, ParticipantTestProgress>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::StorageUnavailable("in-memory store lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(poison_err)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(poison_err)
    }
}

fn sorted_sessions(mut sessions: Vec<Session>) -> Vec<Session> {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    sessions
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut tables = self.write()?;
        if tables.sessions.values().any(|s| s.code == session.code) {
            return Err(Error::BadRequest(format!(
                "Session code '{}' is already in use",
                session.code
            )));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.read()?.sessions.get(&id).cloned())
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>> {
        let matching: Vec<Session> = {
            let tables = self.read()?;
            tables
                .sessions
                .values()
                .filter(|s| status.map_or(true, |st| s.status == st))
                .cloned()
                .collect()
        };
        Ok(sorted_sessions(matching)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_sessions(&self, status: Option<SessionStatus>) -> Result<i64> {
        let tables = self.read()?;
        Ok(tables
            .sessions
            .values()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .count() as i64)
    }

    async fn sessions_in_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        let tables = self.read()?;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn cas_session_status(
        &self,
        id: Uuid,
        expected: &[SessionStatus],
        target: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<SessionStatus>> {
        let mut tables = self.write()?;
        let Some(session) = tables.sessions.get_mut(&id) else {
            return Ok(CasResult::NotFound);
        };
        if !expected.contains(&session.status) {
            return Ok(CasResult::StateMismatch {
                actual: session.status,
            });
        }
        session.status = target;
        session.updated_at = now;
        Ok(CasResult::Success)
    }

    async fn replace_modules(
        &self,
        session_id: Uuid,
        expected: &[Uuid],
        modules: &[SessionModule],
    ) -> Result<ModulesOutcome> {
        let mut tables = self.write()?;
        let Some(session) = tables.sessions.get_mut(&session_id) else {
            return Ok(ModulesOutcome::NotFound);
        };
        if session.status.is_terminal() {
            return Ok(ModulesOutcome::Closed);
        }
        let current: Vec<Uuid> = session.ordered_modules().iter().map(|m| m.test_id).collect();
        if current != expected {
            return Ok(ModulesOutcome::Stale);
        }
        session.modules = modules.to_vec();
        Ok(ModulesOutcome::Replaced)
    }

    async fn insert_participant(
        &self,
        participant: &SessionParticipant,
        capacity: Option<i32>,
    ) -> Result<InsertOutcome> {
        let mut tables = self.write()?;
        let duplicate = tables.participants.values().any(|p| {
            p.session_id == participant.session_id && p.user_id == participant.user_id
        });
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }
        let enrolled = tables
            .participants
            .values()
            .filter(|p| p.session_id == participant.session_id)
            .count();
        if capacity.is_some_and(|max| enrolled >= max.max(0) as usize) {
            return Ok(InsertOutcome::Full);
        }
        tables.participants.insert(participant.id, participant.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_participant(&self, id: Uuid) -> Result<Option<SessionParticipant>> {
        Ok(self.read()?.participants.get(&id).cloned())
    }

    async fn find_participant_by_link(&self, token: &str) -> Result<Option<SessionParticipant>> {
        let tables = self.read()?;
        Ok(tables
            .participants
            .values()
            .find(|p| p.unique_link == token)
            .cloned())
    }

    async fn list_participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>> {
        let mut participants: Vec<SessionParticipant> = {
            let tables = self.read()?;
            tables
                .participants
                .values()
                .filter(|p| p.session_id == session_id)
                .cloned()
                .collect()
        };
        participants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(participants)
    }

    async fn cas_participant_status(
        &self,
        id: Uuid,
        expected: &[ParticipantStatus],
        target: ParticipantStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ParticipantStatus>> {
        let mut tables = self.write()?;
        let Some(participant) = tables.participants.get_mut(&id) else {
            return Ok(CasResult::NotFound);
        };
        if !expected.contains(&participant.status) {
            return Ok(CasResult::StateMismatch {
                actual: participant.status,
            });
        }
        participant.status = target;
        if matches!(target, ParticipantStatus::Registered | ParticipantStatus::Started)
            && participant.registered_at.is_none()
        {
            participant.registered_at = Some(now);
        }
        participant.updated_at = now;
        Ok(CasResult::Success)
    }

    async fn mark_invitation_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.write()?;
        if let Some(participant) = tables.participants.get_mut(&id) {
            participant.invitation_sent_at = Some(at);
            participant.updated_at = at;
        }
        Ok(())
    }

    async fn replace_link(
        &self,
        id: Uuid,
        expected: &[ParticipantStatus],
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ParticipantStatus>> {
        let mut tables = self.write()?;
        let Some(participant) = tables.participants.get_mut(&id) else {
            return Ok(CasResult::NotFound);
        };
        if !expected.contains(&participant.status) {
            return Ok(CasResult::StateMismatch {
                actual: participant.status,
            });
        }
        participant.unique_link = token.to_string();
        participant.link_expires_at = expires_at;
        participant.updated_at = now;
        Ok(CasResult::Success)
    }

    async fn delete_participant(&self, id: Uuid) -> Result<RemoveOutcome> {
        let mut tables = self.write()?;
        if !tables.participants.contains_key(&id) {
            return Ok(RemoveOutcome::NotFound);
        }
        let has_progress = tables
            .progress
            .values()
            .any(|p| p.participant_id == id && p.status != ProgressStatus::NotStarted);
        if has_progress {
            return Ok(RemoveOutcome::HasProgress);
        }
        tables.progress.retain(|_, p| p.participant_id != id);
        tables.participants.remove(&id);
        Ok(RemoveOutcome::Removed)
    }

    async fn ensure_progress(&self, row: &ParticipantTestProgress) -> Result<ParticipantTestProgress> {
        let mut tables = self.write()?;
        let stored = tables
            .progress
            .entry(row.key())
            .or_insert_with(|| row.clone());
        Ok(stored.clone())
    }

    async fn get_progress(&self, key: ProgressKey) -> Result<Option<ParticipantTestProgress>> {
        Ok(self.read()?.progress.get(&key).cloned())
    }

    async fn list_participant_progress(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Vec<ParticipantTestProgress>> {
        let tables = self.read()?;
        Ok(tables
            .progress
            .values()
            .filter(|p| p.session_id == session_id && p.participant_id == participant_id)
            .cloned()
            .collect())
    }

    async fn list_session_progress(&self, session_id: Uuid) -> Result<Vec<ParticipantTestProgress>> {
        let tables = self.read()?;
        Ok(tables
            .progress
            .values()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn progress_in_status(&self, status: ProgressStatus) -> Result<Vec<ParticipantTestProgress>> {
        let tables = self.read()?;
        Ok(tables
            .progress
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }

    async fn start_progress(
        &self,
        key: ProgressKey,
        total_questions: i32,
        time_limit_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>> {
        let mut tables = self.write()?;
        let Some(row) = tables.progress.get_mut(&key) else {
            return Ok(CasResult::NotFound);
        };
        if row.status != ProgressStatus::NotStarted || row.started_at.is_some() {
            return Ok(CasResult::StateMismatch { actual: row.status });
        }
        row.status = ProgressStatus::InProgress;
        row.started_at = Some(now);
        row.total_questions = total_questions;
        row.time_limit_minutes = time_limit_minutes;
        row.updated_at = now;
        Ok(CasResult::Success)
    }

    async fn record_activity(
        &self,
        key: ProgressKey,
        update: ActivityUpdate,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>> {
        let mut tables = self.write()?;
        let Some(row) = tables.progress.get_mut(&key) else {
            return Ok(CasResult::NotFound);
        };
        if row.status != ProgressStatus::InProgress {
            return Ok(CasResult::StateMismatch { actual: row.status });
        }
        if let Some(answered) = update.answered_questions {
            row.answered_questions = answered;
        }
        if let Some(delta) = update.time_spent_delta {
            row.time_spent = row.time_spent.saturating_add(delta);
        }
        row.updated_at = now;
        Ok(CasResult::Success)
    }

    async fn finish_progress(
        &self,
        key: ProgressKey,
        expected: &[ProgressStatus],
        target: ProgressStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>> {
        let mut tables = self.write()?;
        let Some(row) = tables.progress.get_mut(&key) else {
            return Ok(CasResult::NotFound);
        };
        if !expected.contains(&row.status) {
            return Ok(CasResult::StateMismatch { actual: row.status });
        }
        row.status = target;
        row.is_auto_completed = target == ProgressStatus::AutoCompleted;
        if row.completed_at.is_none() {
            row.completed_at = Some(now);
        }
        row.updated_at = now;
        Ok(CasResult::Success)
    }
}
