use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ActivityUpdate, CasResult, InsertOutcome, ModulesOutcome, RemoveOutcome, Store};
use crate::error::{Error, Result};
use crate::models::participant::{ParticipantStatus, SessionParticipant};
use crate::models::progress::{ParticipantTestProgress, ProgressKey, ProgressStatus};
use crate::models::session::{Session, SessionModule, SessionStatus};

macro_rules! session_columns {
    () => {
        "id, name, code, start_time, end_time, status, auto_expire, allow_late_entry, \
         max_participants, created_by, created_at, updated_at"
    };
}

macro_rules! participant_columns {
    () => {
        "id, session_id, user_id, name, email, status, invitation_sent_at, registered_at, \
         unique_link, link_expires_at, created_at, updated_at"
    };
}

macro_rules! progress_columns {
    () => {
        "id, session_id, participant_id, test_id, status, started_at, completed_at, \
         answered_questions, total_questions, time_limit_minutes, time_spent, \
         is_auto_completed, created_at, updated_at"
    };
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    max_attempts: u32,
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

fn status_texts<S: Copy>(statuses: &[S], as_str: fn(&S) -> &'static str) -> Vec<String> {
    statuses.iter().map(|s| as_str(s).to_string()).collect()
}

impl PgStore {
    pub fn new(pool: PgPool, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Runs `op`, retrying transient connection faults a bounded number of
    /// times before reporting the store as unavailable.
    async fn retry<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>> + Send,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) => {
                    if attempt >= self.max_attempts {
                        tracing::error!(operation, attempt, error = %err, "storage unavailable");
                        return Err(Error::StorageUnavailable(format!("{}: {}", operation, err)));
                    }
                    tracing::warn!(operation, attempt, error = %err, "transient storage error, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn attach_modules(&self, mut sessions: Vec<Session>) -> Result<Vec<Session>> {
        if sessions.is_empty() {
            return Ok(sessions);
        }
        let ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();
        let pool = &self.pool;
        let ids_ref = &ids;
        let modules = self
            .retry("load_modules", move || async move {
                sqlx::query_as::<_, SessionModule>(
                    r#"SELECT session_id, test_id, sequence, is_required, weight
                       FROM session_modules
                       WHERE session_id = ANY($1)
                       ORDER BY session_id, sequence"#,
                )
                .bind(ids_ref)
                .fetch_all(pool)
                .await
            })
            .await?;

        let mut by_session: HashMap<Uuid, Vec<SessionModule>> = HashMap::new();
        for module in modules {
            by_session.entry(module.session_id).or_default().push(module);
        }
        for session in sessions.iter_mut() {
            session.modules = by_session.remove(&session.id).unwrap_or_default();
        }
        Ok(sessions)
    }

    async fn current_session_status(&self, id: Uuid) -> Result<Option<SessionStatus>> {
        let pool = &self.pool;
        self.retry("current_session_status", move || async move {
            sqlx::query_scalar::<_, SessionStatus>("SELECT status FROM sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await
        })
        .await
    }

    async fn current_participant_status(&self, id: Uuid) -> Result<Option<ParticipantStatus>> {
        let pool = &self.pool;
        self.retry("current_participant_status", move || async move {
            sqlx::query_scalar::<_, ParticipantStatus>(
                "SELECT status FROM session_participants WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(pool)
            .await
        })
        .await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        let pool = &self.pool;
        let result = self
            .retry("insert_session", move || async move {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    r#"INSERT INTO sessions (
                        id, name, code, start_time, end_time, status, auto_expire,
                        allow_late_entry, max_participants, created_by, created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
                )
                .bind(session.id)
                .bind(&session.name)
                .bind(&session.code)
                .bind(session.start_time)
                .bind(session.end_time)
                .bind(session.status)
                .bind(session.auto_expire)
                .bind(session.allow_late_entry)
                .bind(session.max_participants)
                .bind(session.created_by)
                .bind(session.created_at)
                .bind(session.updated_at)
                .execute(&mut *tx)
                .await?;

                for module in &session.modules {
                    sqlx::query(
                        r#"INSERT INTO session_modules (session_id, test_id, sequence, is_required, weight)
                           VALUES ($1, $2, $3, $4, $5)"#,
                    )
                    .bind(module.session_id)
                    .bind(module.test_id)
                    .bind(module.sequence)
                    .bind(module.is_required)
                    .bind(module.weight)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await
            })
            .await;

        match result {
            Err(Error::Database(err)) if is_unique_violation(&err) => Err(Error::BadRequest(format!(
                "Session code '{}' is already in use",
                session.code
            ))),
            other => other,
        }
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let pool = &self.pool;
        let row = self
            .retry("get_session", move || async move {
                sqlx::query_as::<_, Session>(concat!(
                    "SELECT ",
                    session_columns!(),
                    " FROM sessions WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(pool)
                .await
            })
            .await?;

        match row {
            Some(session) => Ok(self.attach_modules(vec![session]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>> {
        let pool = &self.pool;
        let status_text = status.map(|s| s.as_str());
        let rows = self
            .retry("list_sessions", move || async move {
                sqlx::query_as::<_, Session>(concat!(
                    "SELECT ",
                    session_columns!(),
                    " FROM sessions WHERE ($1::text IS NULL OR status::text = $1)",
                    " ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
                ))
                .bind(status_text)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
            })
            .await?;
        self.attach_modules(rows).await
    }

    async fn count_sessions(&self, status: Option<SessionStatus>) -> Result<i64> {
        let pool = &self.pool;
        let status_text = status.map(|s| s.as_str());
        self.retry("count_sessions", move || async move {
            sqlx::query_scalar::<_, i64>(
                r#"SELECT COUNT(*) FROM sessions WHERE ($1::text IS NULL OR status::text = $1)"#,
            )
            .bind(status_text)
            .fetch_one(pool)
            .await
        })
        .await
    }

    async fn sessions_in_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        let pool = &self.pool;
        let rows = self
            .retry("sessions_in_status", move || async move {
                sqlx::query_as::<_, Session>(concat!(
                    "SELECT ",
                    session_columns!(),
                    " FROM sessions WHERE status = $1"
                ))
                .bind(status)
                .fetch_all(pool)
                .await
            })
            .await?;
        self.attach_modules(rows).await
    }

    async fn cas_session_status(
        &self,
        id: Uuid,
        expected: &[SessionStatus],
        target: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<SessionStatus>> {
        let pool = &self.pool;
        let expected = status_texts(expected, SessionStatus::as_str);
        let expected_ref = &expected;
        let updated = self
            .retry("cas_session_status", move || async move {
                sqlx::query_scalar::<_, Uuid>(
                    r#"UPDATE sessions SET status = $2, updated_at = $3
                       WHERE id = $1 AND status::text = ANY($4)
                       RETURNING id"#,
                )
                .bind(id)
                .bind(target)
                .bind(now)
                .bind(expected_ref)
                .fetch_optional(pool)
                .await
            })
            .await?;

        if updated.is_some() {
            return Ok(CasResult::Success);
        }
        let actual = self
            .current_session_status(id)
            .await?;
        Ok(match actual {
            Some(actual) => CasResult::StateMismatch { actual },
            None => CasResult::NotFound,
        })
    }

    async fn replace_modules(
        &self,
        session_id: Uuid,
        expected: &[Uuid],
        modules: &[SessionModule],
    ) -> Result<ModulesOutcome> {
        let pool = &self.pool;
        self.retry("replace_modules", move || async move {
            let mut tx = pool.begin().await?;
            let status = sqlx::query_scalar::<_, SessionStatus>(
                "SELECT status FROM sessions WHERE id = $1 FOR UPDATE",
            )
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;
            match status {
                None => return Ok(ModulesOutcome::NotFound),
                Some(status) if status.is_terminal() => return Ok(ModulesOutcome::Closed),
                Some(_) => {}
            }

            let current = sqlx::query_scalar::<_, Uuid>(
                "SELECT test_id FROM session_modules WHERE session_id = $1 ORDER BY sequence",
            )
            .bind(session_id)
            .fetch_all(&mut *tx)
            .await?;
            if current != expected {
                return Ok(ModulesOutcome::Stale);
            }

            sqlx::query("DELETE FROM session_modules WHERE session_id = $1")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            for module in modules {
                sqlx::query(
                    r#"INSERT INTO session_modules (session_id, test_id, sequence, is_required, weight)
                       VALUES ($1, $2, $3, $4, $5)"#,
                )
                .bind(session_id)
                .bind(module.test_id)
                .bind(module.sequence)
                .bind(module.is_required)
                .bind(module.weight)
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query("UPDATE sessions SET updated_at = NOW() WHERE id = $1")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(ModulesOutcome::Replaced)
        })
        .await
    }

    async fn insert_participant(
        &self,
        participant: &SessionParticipant,
        capacity: Option<i32>,
    ) -> Result<InsertOutcome> {
        let pool = &self.pool;
        self.retry("insert_participant", move || async move {
            let mut tx = pool.begin().await?;
            // Serializes enrollments of one session behind its row lock.
            sqlx::query("SELECT id FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(participant.session_id)
                .execute(&mut *tx)
                .await?;

            let enrolled_already = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM session_participants WHERE session_id = $1 AND user_id = $2)",
            )
            .bind(participant.session_id)
            .bind(participant.user_id)
            .fetch_one(&mut *tx)
            .await?;
            if enrolled_already {
                return Ok(InsertOutcome::Duplicate);
            }

            if let Some(max) = capacity {
                let enrolled = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM session_participants WHERE session_id = $1",
                )
                .bind(participant.session_id)
                .fetch_one(&mut *tx)
                .await?;
                if enrolled >= i64::from(max) {
                    return Ok(InsertOutcome::Full);
                }
            }

            let inserted = sqlx::query(
                r#"INSERT INTO session_participants (
                    id, session_id, user_id, name, email, status, invitation_sent_at,
                    registered_at, unique_link, link_expires_at, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (session_id, user_id) DO NOTHING"#,
            )
            .bind(participant.id)
            .bind(participant.session_id)
            .bind(participant.user_id)
            .bind(&participant.name)
            .bind(&participant.email)
            .bind(participant.status)
            .bind(participant.invitation_sent_at)
            .bind(participant.registered_at)
            .bind(&participant.unique_link)
            .bind(participant.link_expires_at)
            .bind(participant.created_at)
            .bind(participant.updated_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            tx.commit().await?;

            Ok(if inserted == 1 {
                InsertOutcome::Inserted
            } else {
                InsertOutcome::Duplicate
            })
        })
        .await
    }

    async fn get_participant(&self, id: Uuid) -> Result<Option<SessionParticipant>> {
        let pool = &self.pool;
        self.retry("get_participant", move || async move {
            sqlx::query_as::<_, SessionParticipant>(concat!(
                "SELECT ",
                participant_columns!(),
                " FROM session_participants WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(pool)
            .await
        })
        .await
    }

    async fn find_participant_by_link(&self, token: &str) -> Result<Option<SessionParticipant>> {
        let pool = &self.pool;
        self.retry("find_participant_by_link", move || async move {
            sqlx::query_as::<_, SessionParticipant>(concat!(
                "SELECT ",
                participant_columns!(),
                " FROM session_participants WHERE unique_link = $1"
            ))
            .bind(token)
            .fetch_optional(pool)
            .await
        })
        .await
    }

    async fn list_participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>> {
        let pool = &self.pool;
        self.retry("list_participants", move || async move {
            sqlx::query_as::<_, SessionParticipant>(concat!(
                "SELECT ",
                participant_columns!(),
                " FROM session_participants WHERE session_id = $1 ORDER BY created_at, id"
            ))
            .bind(session_id)
            .fetch_all(pool)
            .await
        })
        .await
    }

    async fn cas_participant_status(
        &self,
        id: Uuid,
        expected: &[ParticipantStatus],
        target: ParticipantStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ParticipantStatus>> {
        let pool = &self.pool;
        let expected = status_texts(expected, ParticipantStatus::as_str);
        let expected_ref = &expected;
        let stamps_registration = matches!(
            target,
            ParticipantStatus::Registered | ParticipantStatus::Started
        );
        let updated = self
            .retry("cas_participant_status", move || async move {
                sqlx::query_scalar::<_, Uuid>(
                    r#"UPDATE session_participants
                       SET status = $2,
                           registered_at = CASE WHEN $5 THEN COALESCE(registered_at, $3) ELSE registered_at END,
                           updated_at = $3
                       WHERE id = $1 AND status::text = ANY($4)
                       RETURNING id"#,
                )
                .bind(id)
                .bind(target)
                .bind(now)
                .bind(expected_ref)
                .bind(stamps_registration)
                .fetch_optional(pool)
                .await
            })
            .await?;

        if updated.is_some() {
            return Ok(CasResult::Success);
        }
        let actual = self
            .current_participant_status(id)
            .await?;
        Ok(match actual {
            Some(actual) => CasResult::StateMismatch { actual },
            None => CasResult::NotFound,
        })
    }

    async fn mark_invitation_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let pool = &self.pool;
        self.retry("mark_invitation_sent", move || async move {
            sqlx::query(
                "UPDATE session_participants SET invitation_sent_at = $2, updated_at = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(at)
            .execute(pool)
            .await
        })
        .await?;
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
        let pool = &self.pool;
        let expected = status_texts(expected, ParticipantStatus::as_str);
        let expected_ref = &expected;
        let updated = self
            .retry("replace_link", move || async move {
                sqlx::query_scalar::<_, Uuid>(
                    r#"UPDATE session_participants
                       SET unique_link = $2, link_expires_at = $3, updated_at = $4
                       WHERE id = $1 AND status::text = ANY($5)
                       RETURNING id"#,
                )
                .bind(id)
                .bind(token)
                .bind(expires_at)
                .bind(now)
                .bind(expected_ref)
                .fetch_optional(pool)
                .await
            })
            .await?;

        if updated.is_some() {
            return Ok(CasResult::Success);
        }
        let actual = self
            .current_participant_status(id)
            .await?;
        Ok(match actual {
            Some(actual) => CasResult::StateMismatch { actual },
            None => CasResult::NotFound,
        })
    }

    async fn delete_participant(&self, id: Uuid) -> Result<RemoveOutcome> {
        let pool = &self.pool;
        let deleted = self
            .retry("delete_participant", move || async move {
                sqlx::query(
                    r#"DELETE FROM session_participants sp
                       WHERE sp.id = $1
                         AND NOT EXISTS (
                             SELECT 1 FROM participant_test_progress p
                             WHERE p.participant_id = sp.id AND p.status <> 'not_started'
                         )"#,
                )
                .bind(id)
                .execute(pool)
                .await
            })
            .await?;

        if deleted.rows_affected() == 1 {
            return Ok(RemoveOutcome::Removed);
        }
        let exists = self
            .current_participant_status(id)
            .await?;
        Ok(if exists.is_some() {
            RemoveOutcome::HasProgress
        } else {
            RemoveOutcome::NotFound
        })
    }

    async fn ensure_progress(&self, row: &ParticipantTestProgress) -> Result<ParticipantTestProgress> {
        let pool = &self.pool;
        self.retry("ensure_progress", move || async move {
            sqlx::query(
                r#"INSERT INTO participant_test_progress (
                    id, session_id, participant_id, test_id, status, started_at, completed_at,
                    answered_questions, total_questions, time_limit_minutes, time_spent,
                    is_auto_completed, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (session_id, participant_id, test_id) DO NOTHING"#,
            )
            .bind(row.id)
            .bind(row.session_id)
            .bind(row.participant_id)
            .bind(row.test_id)
            .bind(row.status)
            .bind(row.started_at)
            .bind(row.completed_at)
            .bind(row.answered_questions)
            .bind(row.total_questions)
            .bind(row.time_limit_minutes)
            .bind(row.time_spent)
            .bind(row.is_auto_completed)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(pool)
            .await?;

            sqlx::query_as::<_, ParticipantTestProgress>(concat!(
                "SELECT ",
                progress_columns!(),
                " FROM participant_test_progress",
                " WHERE session_id = $1 AND participant_id = $2 AND test_id = $3"
            ))
            .bind(row.session_id)
            .bind(row.participant_id)
            .bind(row.test_id)
            .fetch_one(pool)
            .await
        })
        .await
    }

    async fn get_progress(&self, key: ProgressKey) -> Result<Option<ParticipantTestProgress>> {
        let pool = &self.pool;
        self.retry("get_progress", move || async move {
            sqlx::query_as::<_, ParticipantTestProgress>(concat!(
                "SELECT ",
                progress_columns!(),
                " FROM participant_test_progress",
                " WHERE session_id = $1 AND participant_id = $2 AND test_id = $3"
            ))
            .bind(key.session_id)
            .bind(key.participant_id)
            .bind(key.test_id)
            .fetch_optional(pool)
            .await
        })
        .await
    }

    async fn list_participant_progress(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Vec<ParticipantTestProgress>> {
        let pool = &self.pool;
        self.retry("list_participant_progress", move || async move {
            sqlx::query_as::<_, ParticipantTestProgress>(concat!(
                "SELECT ",
                progress_columns!(),
                " FROM participant_test_progress WHERE session_id = $1 AND participant_id = $2"
            ))
            .bind(session_id)
            .bind(participant_id)
            .fetch_all(pool)
            .await
        })
        .await
    }

    async fn list_session_progress(&self, session_id: Uuid) -> Result<Vec<ParticipantTestProgress>> {
        let pool = &self.pool;
        self.retry("list_session_progress", move || async move {
            sqlx::query_as::<_, ParticipantTestProgress>(concat!(
                "SELECT ",
                progress_columns!(),
                " FROM participant_test_progress WHERE session_id = $1"
            ))
            .bind(session_id)
            .fetch_all(pool)
            .await
        })
        .await
    }

    async fn progress_in_status(&self, status: ProgressStatus) -> Result<Vec<ParticipantTestProgress>> {
        let pool = &self.pool;
        self.retry("progress_in_status", move || async move {
            sqlx::query_as::<_, ParticipantTestProgress>(concat!(
                "SELECT ",
                progress_columns!(),
                " FROM participant_test_progress WHERE status = $1"
            ))
            .bind(status)
            .fetch_all(pool)
            .await
        })
        .await
    }

    async fn start_progress(
        &self,
        key: ProgressKey,
        total_questions: i32,
        time_limit_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>> {
        let pool = &self.pool;
        let updated = self
            .retry("start_progress", move || async move {
                sqlx::query_scalar::<_, Uuid>(
                    r#"UPDATE participant_test_progress
                       SET status = 'in_progress', started_at = $4, total_questions = $5,
                           time_limit_minutes = $6, updated_at = $4
                       WHERE session_id = $1 AND participant_id = $2 AND test_id = $3
                         AND status = 'not_started' AND started_at IS NULL
                       RETURNING id"#,
                )
                .bind(key.session_id)
                .bind(key.participant_id)
                .bind(key.test_id)
                .bind(now)
                .bind(total_questions)
                .bind(time_limit_minutes)
                .fetch_optional(pool)
                .await
            })
            .await?;
        self.progress_cas_outcome(key, updated.is_some()).await
    }

    async fn record_activity(
        &self,
        key: ProgressKey,
        update: ActivityUpdate,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>> {
        let pool = &self.pool;
        let updated = self
            .retry("record_activity", move || async move {
                sqlx::query_scalar::<_, Uuid>(
                    r#"UPDATE participant_test_progress
                       SET answered_questions = COALESCE($4, answered_questions),
                           time_spent = time_spent + COALESCE($5, 0),
                           updated_at = $6
                       WHERE session_id = $1 AND participant_id = $2 AND test_id = $3
                         AND status = 'in_progress'
                       RETURNING id"#,
                )
                .bind(key.session_id)
                .bind(key.participant_id)
                .bind(key.test_id)
                .bind(update.answered_questions)
                .bind(update.time_spent_delta)
                .bind(now)
                .fetch_optional(pool)
                .await
            })
            .await?;
        self.progress_cas_outcome(key, updated.is_some()).await
    }

    async fn finish_progress(
        &self,
        key: ProgressKey,
        expected: &[ProgressStatus],
        target: ProgressStatus,
        now: DateTime<Utc>,
    ) -> Result<CasResult<ProgressStatus>> {
        let pool = &self.pool;
        let expected = status_texts(expected, ProgressStatus::as_str);
        let expected_ref = &expected;
        let auto = target == ProgressStatus::AutoCompleted;
        let updated = self
            .retry("finish_progress", move || async move {
                sqlx::query_scalar::<_, Uuid>(
                    r#"UPDATE participant_test_progress
                       SET status = $4, is_auto_completed = $5,
                           completed_at = COALESCE(completed_at, $6), updated_at = $6
                       WHERE session_id = $1 AND participant_id = $2 AND test_id = $3
                         AND status::text = ANY($7)
                       RETURNING id"#,
                )
                .bind(key.session_id)
                .bind(key.participant_id)
                .bind(key.test_id)
                .bind(target)
                .bind(auto)
                .bind(now)
                .bind(expected_ref)
                .fetch_optional(pool)
                .await
            })
            .await?;
        self.progress_cas_outcome(key, updated.is_some()).await
    }
}

impl PgStore {
    async fn progress_cas_outcome(
        &self,
        key: ProgressKey,
        applied: bool,
    ) -> Result<CasResult<ProgressStatus>> {
        if applied {
            return Ok(CasResult::Success);
        }
        Ok(match self.get_progress(key).await? {
            Some(row) => CasResult::StateMismatch { actual: row.status },
            None => CasResult::NotFound,
        })
    }
}
