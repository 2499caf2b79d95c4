use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::progress::{ParticipantTestProgress, ProgressStatus};
use crate::models::session::SessionModule;
use crate::services::enrollment_service::EnrollmentService;
use crate::store::Store;
use crate::utils::time::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum NextStep {
    NextTest {
        test_id: Uuid,
        sequence: i32,
        is_required: bool,
    },
    SessionComplete,
}

/// Picks the lowest-sequence module whose attempt is not terminal yet.
/// A module without a progress row counts as `not_started`.
pub fn first_open_module<'a>(
    modules: &[&'a SessionModule],
    progress: &[ParticipantTestProgress],
) -> Option<&'a SessionModule> {
    let statuses: HashMap<Uuid, ProgressStatus> =
        progress.iter().map(|p| (p.test_id, p.status)).collect();

    let mut ordered: Vec<&'a SessionModule> = modules.to_vec();
    ordered.sort_by_key(|m| m.sequence);
    ordered.into_iter().find(|m| {
        !statuses
            .get(&m.test_id)
            .copied()
            .unwrap_or(ProgressStatus::NotStarted)
            .is_terminal()
    })
}

#[derive(Clone)]
pub struct NavigationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    enrollment: EnrollmentService,
}

impl NavigationService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, enrollment: EnrollmentService) -> Self {
        Self {
            store,
            clock,
            enrollment,
        }
    }

    /// Read-only probe of where the participant should go next.
    pub async fn next_step(&self, session_id: Uuid, participant_id: Uuid) -> Result<NextStep> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", session_id)))?;
        let progress = self
            .store
            .list_participant_progress(session_id, participant_id)
            .await?;

        Ok(match first_open_module(&session.ordered_modules(), &progress) {
            Some(module) => NextStep::NextTest {
                test_id: module.test_id,
                sequence: module.sequence,
                is_required: module.is_required,
            },
            None => NextStep::SessionComplete,
        })
    }

    pub async fn on_attempt_finished(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        finished_test_id: Uuid,
    ) -> Result<NextStep> {
        self.on_attempt_finished_at(session_id, participant_id, finished_test_id, self.clock.now())
            .await
    }

    /// Once nothing is left the participant is marked completed.
    pub(crate) async fn on_attempt_finished_at(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        finished_test_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<NextStep> {
        let step = self.next_step(session_id, participant_id).await?;
        if step == NextStep::SessionComplete
            && self.enrollment.mark_completed(participant_id, now).await?
        {
            tracing::info!(
                session_id = %session_id,
                participant_id = %participant_id,
                last_test_id = %finished_test_id,
                "participant finished all modules"
            );
        }
        Ok(step)
    }
}
