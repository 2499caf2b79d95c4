use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::{Error, Result};
use crate::models::participant::ParticipantStatus;
use crate::models::progress::ProgressStatus;
use crate::models::session::{Session, SessionStatus};
use crate::services::progress_service::ProgressService;
use crate::services::session_service::SessionService;
use crate::store::Store;
use crate::utils::time::Clock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sessions_activated: usize,
    pub sessions_expired: usize,
    pub sessions_completed: usize,
    pub attempts_auto_completed: usize,
    pub failures: usize,
}

/// Periodic reconciliation of stored state with the clock.
///
/// Every change goes through the same conditional updates as the request
/// path, so overlapping sweeps (or a sweep racing a participant) converge on
/// the same result.
#[derive(Clone)]
pub struct SchedulerService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    sessions: SessionService,
    progress: ProgressService,
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        sessions: SessionService,
        progress: ProgressService,
    ) -> Self {
        Self {
            store,
            clock,
            sessions,
            progress,
        }
    }

    pub async fn trigger_now(&self) -> SweepReport {
        self.sweep(self.clock.now()).await
    }

    /// Never fails as a whole; per-row faults are logged and counted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        // Attempts before closing, so a participant whose last attempt times
        // out is already completed when the session closes.
        self.activate_due_sessions(now, &mut report).await;
        self.auto_complete_attempts(now, &mut report).await;
        self.close_due_sessions(now, &mut report).await;

        if report != SweepReport::default() {
            tracing::info!(
                activated = report.sessions_activated,
                expired = report.sessions_expired,
                completed = report.sessions_completed,
                auto_completed = report.attempts_auto_completed,
                failures = report.failures,
                "status sweep finished"
            );
        } else {
            tracing::debug!("status sweep found nothing to do");
        }
        report
    }

    async fn activate_due_sessions(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let drafts = match self.store.sessions_in_status(SessionStatus::Draft).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!(error = %e, "failed to load draft sessions");
                report.failures += 1;
                return;
            }
        };

        for session in drafts.iter().filter(|s| s.is_due_for_activation(now)) {
            match self.sessions.transition(session.id, SessionStatus::Active, now).await {
                Ok(_) => report.sessions_activated += 1,
                Err(e) => record_failure(report, session, "activate", e),
            }
        }
    }

    async fn close_due_sessions(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let active = match self.store.sessions_in_status(SessionStatus::Active).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!(error = %e, "failed to load active sessions");
                report.failures += 1;
                return;
            }
        };

        for session in active.iter().filter(|s| s.is_due_for_expiry(now)) {
            let target = match self.everyone_completed(session).await {
                Ok(true) => SessionStatus::Completed,
                Ok(false) => SessionStatus::Expired,
                Err(e) => {
                    record_failure(report, session, "inspect", e);
                    continue;
                }
            };
            match self.sessions.transition(session.id, target, now).await {
                Ok(_) if target == SessionStatus::Completed => report.sessions_completed += 1,
                Ok(_) => report.sessions_expired += 1,
                Err(e) => record_failure(report, session, "close", e),
            }
        }
    }

    async fn auto_complete_attempts(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let running = match self.store.progress_in_status(ProgressStatus::InProgress).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to load running attempts");
                report.failures += 1;
                return;
            }
        };

        for row in running.iter().filter(|r| r.is_time_expired(now)) {
            match self.progress.complete_auto_at(row.key(), now).await {
                Ok(outcome) if outcome.changed => report.attempts_auto_completed += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        participant_id = %row.participant_id,
                        test_id = %row.test_id,
                        error = %e,
                        "failed to auto-complete attempt"
                    );
                    report.failures += 1;
                }
            }
        }
    }

    async fn everyone_completed(&self, session: &Session) -> Result<bool> {
        let participants = self.store.list_participants(session.id).await?;
        Ok(!participants.is_empty()
            && participants
                .iter()
                .all(|p| p.status == ParticipantStatus::Completed))
    }

    /// Registers the sweep as a repeated job and starts the scheduler.
    pub async fn start(self, interval: Duration) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Internal(format!("scheduler init failed: {:?}", e)))?;

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let sweeper = self.clone();
            Box::pin(async move {
                sweeper.trigger_now().await;
            })
        })
        .map_err(|e| Error::Internal(format!("sweep job rejected: {:?}", e)))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| Error::Internal(format!("failed to add sweep job: {:?}", e)))?;
        scheduler
            .start()
            .await
            .map_err(|e| Error::Internal(format!("scheduler start failed: {:?}", e)))?;

        tracing::info!(interval_secs = interval.as_secs(), "status sweep scheduled");
        Ok(scheduler)
    }
}

/// A lost race is not a failure: another writer already moved the row.
fn record_failure(report: &mut SweepReport, session: &Session, action: &str, error: Error) {
    if matches!(error, Error::InvalidStateTransition { .. }) {
        tracing::debug!(session_id = %session.id, action, "session already moved on");
        return;
    }
    tracing::warn!(session_id = %session.id, action, error = %error, "sweep step failed");
    report.failures += 1;
}
