use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::models::participant::{ParticipantStatus, SessionParticipant};
use crate::models::progress::{ParticipantTestProgress, ProgressKey, ProgressStatus, ProgressView};
use crate::models::session::{Session, SessionStatus};
use crate::services::catalog::{require_test, TestCatalog};
use crate::services::enrollment_service::EnrollmentService;
use crate::services::navigation_service::{NavigationService, NextStep};
use crate::store::{ActivityUpdate, CasResult, Store};
use crate::utils::time::Clock;

#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub progress: ProgressView,
    pub next: NextStep,
    /// `false` when the attempt was already finished before this call.
    pub changed: bool,
}

/// Timed attempt state machine: `not_started -> in_progress -> completed`,
/// or `auto_completed` once the time limit runs out.
#[derive(Clone)]
pub struct ProgressService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    catalog: Arc<dyn TestCatalog>,
    enrollment: EnrollmentService,
    navigation: NavigationService,
    settings: EngineSettings,
}

impl ProgressService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        catalog: Arc<dyn TestCatalog>,
        enrollment: EnrollmentService,
        navigation: NavigationService,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            catalog,
            enrollment,
            navigation,
            settings,
        }
    }

    pub async fn start(&self, key: ProgressKey) -> Result<ProgressView> {
        let now = self.clock.now();

        if let Some(existing) = self.store.get_progress(key).await? {
            if existing.status.is_terminal() {
                return Err(Error::AttemptNotActive(key.test_id));
            }
            if existing.started_at.is_some() {
                return Err(Error::AlreadyStarted(key.test_id));
            }
        }

        let session = self.require_session(key.session_id).await?;
        if session.effective_status(now) != SessionStatus::Active {
            return Err(Error::SessionNotActive(session.id));
        }
        let participant = self.require_participant(&key).await?;
        if participant.status.is_final() {
            return Err(Error::AttemptNotActive(key.test_id));
        }
        self.check_late_entry(&session, &participant, now)?;

        let row = self.ensure_row(&session, key, now).await?;
        let test = require_test(self.catalog.as_ref(), key.test_id).await?;

        match self
            .store
            .start_progress(key, test.total_questions, test.time_limit_minutes, now)
            .await?
        {
            CasResult::Success => {}
            CasResult::NotFound => {
                return Err(Error::Internal(format!("Progress row {} vanished", row.id)))
            }
            CasResult::StateMismatch { actual } if actual.is_terminal() => {
                return Err(Error::AttemptNotActive(key.test_id))
            }
            CasResult::StateMismatch { .. } => return Err(Error::AlreadyStarted(key.test_id)),
        }

        self.enrollment.mark_started(&participant, now).await?;

        tracing::info!(
            session_id = %key.session_id,
            participant_id = %key.participant_id,
            test_id = %key.test_id,
            time_limit_minutes = test.time_limit_minutes,
            "attempt started"
        );
        self.events.publish(LifecycleEvent::AttemptStarted {
            session_id: key.session_id,
            participant_id: key.participant_id,
            test_id: key.test_id,
            at: now,
        });

        Ok(self.require_progress(key).await?.view(now))
    }

    pub async fn record_activity(&self, key: ProgressKey, update: ActivityUpdate) -> Result<ProgressView> {
        if update.answered_questions.is_some_and(|v| v < 0)
            || update.time_spent_delta.is_some_and(|v| v < 0)
        {
            return Err(Error::BadRequest("Activity values cannot be negative".to_string()));
        }

        let now = self.clock.now();
        let session = self.require_session(key.session_id).await?;
        if session.status == SessionStatus::Cancelled {
            return Err(Error::AttemptNotActive(key.test_id));
        }

        let row = self
            .store
            .get_progress(key)
            .await?
            .ok_or(Error::AttemptNotActive(key.test_id))?;
        if row.status != ProgressStatus::InProgress {
            return Err(Error::AttemptNotActive(key.test_id));
        }
        if row.is_time_expired(now) {
            self.complete_auto_at(key, now).await?;
            return Err(Error::AttemptNotActive(key.test_id));
        }
        if update
            .answered_questions
            .is_some_and(|answered| answered > row.total_questions)
        {
            return Err(Error::BadRequest(format!(
                "answered_questions cannot exceed {}",
                row.total_questions
            )));
        }

        match self.store.record_activity(key, update, now).await? {
            CasResult::Success => {}
            CasResult::NotFound | CasResult::StateMismatch { .. } => {
                return Err(Error::AttemptNotActive(key.test_id))
            }
        }

        tracing::debug!(
            participant_id = %key.participant_id,
            test_id = %key.test_id,
            "attempt activity recorded"
        );
        Ok(self.require_progress(key).await?.view(now))
    }

    /// Participant-initiated submission of a running attempt.
    pub async fn complete(&self, key: ProgressKey) -> Result<CompletionOutcome> {
        let now = self.clock.now();
        let session = self.require_session(key.session_id).await?;
        if session.status == SessionStatus::Cancelled {
            return Err(Error::AttemptNotActive(key.test_id));
        }

        let row = self
            .store
            .get_progress(key)
            .await?
            .ok_or(Error::AttemptNotActive(key.test_id))?;
        if row.status != ProgressStatus::InProgress {
            return Err(Error::AttemptNotActive(key.test_id));
        }
        if row.is_time_expired(now) {
            self.complete_auto_at(key, now).await?;
            return Err(Error::AttemptNotActive(key.test_id));
        }

        match self
            .store
            .finish_progress(key, &[ProgressStatus::InProgress], ProgressStatus::Completed, now)
            .await?
        {
            CasResult::Success => {}
            CasResult::NotFound | CasResult::StateMismatch { .. } => {
                return Err(Error::AttemptNotActive(key.test_id))
            }
        }

        self.finished(key, ProgressStatus::Completed, now).await
    }

    /// Engine-initiated finish. Works on attempts that were never opened and
    /// leaves already-finished attempts untouched.
    pub async fn complete_auto(&self, key: ProgressKey) -> Result<CompletionOutcome> {
        self.complete_auto_at(key, self.clock.now()).await
    }

    pub(crate) async fn complete_auto_at(
        &self,
        key: ProgressKey,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        if self.store.get_progress(key).await?.is_none() {
            let session = self.require_session(key.session_id).await?;
            self.ensure_row(&session, key, now).await?;
        }

        let outcome = self
            .store
            .finish_progress(
                key,
                &[ProgressStatus::NotStarted, ProgressStatus::InProgress],
                ProgressStatus::AutoCompleted,
                now,
            )
            .await?;

        match outcome {
            CasResult::Success => self.finished(key, ProgressStatus::AutoCompleted, now).await,
            CasResult::StateMismatch { .. } => {
                let progress = self.require_progress(key).await?.view(now);
                let next = self
                    .navigation
                    .next_step(key.session_id, key.participant_id)
                    .await?;
                Ok(CompletionOutcome {
                    progress,
                    next,
                    changed: false,
                })
            }
            CasResult::NotFound => Err(Error::NotFound(format!(
                "No attempt of test {} for participant {}",
                key.test_id, key.participant_id
            ))),
        }
    }

    /// Current attempt state; the row is created on first access.
    pub async fn get_progress(&self, key: ProgressKey) -> Result<ProgressView> {
        let now = self.clock.now();
        if let Some(row) = self.store.get_progress(key).await? {
            return Ok(row.view(now));
        }
        let session = self.require_session(key.session_id).await?;
        self.require_participant(&key).await?;
        Ok(self.ensure_row(&session, key, now).await?.view(now))
    }

    pub async fn list_participant_progress(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Vec<ProgressView>> {
        let now = self.clock.now();
        let rows = self
            .store
            .list_participant_progress(session_id, participant_id)
            .await?;
        Ok(rows.iter().map(|r| r.view(now)).collect())
    }

    async fn finished(
        &self,
        key: ProgressKey,
        status: ProgressStatus,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        tracing::info!(
            session_id = %key.session_id,
            participant_id = %key.participant_id,
            test_id = %key.test_id,
            status = %status,
            "attempt finished"
        );
        self.events.publish(LifecycleEvent::AttemptFinished {
            session_id: key.session_id,
            participant_id: key.participant_id,
            test_id: key.test_id,
            status,
            at: now,
        });

        let next = self
            .navigation
            .on_attempt_finished_at(key.session_id, key.participant_id, key.test_id, now)
            .await?;
        let progress = self.require_progress(key).await?.view(now);
        Ok(CompletionOutcome {
            progress,
            next,
            changed: true,
        })
    }

    /// Participants who have not entered yet may only join before the start
    /// time (plus grace) unless the session allows late entry.
    fn check_late_entry(
        &self,
        session: &Session,
        participant: &SessionParticipant,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let entering = matches!(
            participant.status,
            ParticipantStatus::Invited | ParticipantStatus::Registered
        );
        let cutoff = session.start_time + Duration::minutes(self.settings.late_entry_grace_minutes);
        if entering && !session.allow_late_entry && now > cutoff {
            return Err(Error::LateEntryNotAllowed(session.id));
        }
        Ok(())
    }

    async fn ensure_row(
        &self,
        session: &Session,
        key: ProgressKey,
        now: DateTime<Utc>,
    ) -> Result<ParticipantTestProgress> {
        if session.module_for_test(key.test_id).is_none() {
            return Err(Error::NotFound(format!(
                "Test {} is not part of session {}",
                key.test_id, key.session_id
            )));
        }
        let test = require_test(self.catalog.as_ref(), key.test_id).await?;
        let row = ParticipantTestProgress::not_started(
            key,
            test.total_questions,
            test.time_limit_minutes,
            now,
        );
        self.store.ensure_progress(&row).await
    }

    async fn require_session(&self, id: Uuid) -> Result<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", id)))
    }

    async fn require_participant(&self, key: &ProgressKey) -> Result<SessionParticipant> {
        self.store
            .get_participant(key.participant_id)
            .await?
            .filter(|p| p.session_id == key.session_id)
            .ok_or_else(|| Error::NotFound(format!("Participant {} not found", key.participant_id)))
    }

    async fn require_progress(&self, key: ProgressKey) -> Result<ParticipantTestProgress> {
        self.store.get_progress(key).await?.ok_or_else(|| {
            Error::NotFound(format!(
                "No attempt of test {} for participant {}",
                key.test_id, key.participant_id
            ))
        })
    }
}
