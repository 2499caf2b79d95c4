use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::config::EngineSettings;
use crate::dto::session_dto::{CreateSessionPayload, ModulePayload};
use crate::error::{Error, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::models::session::{renumber_modules, Session, SessionModule, SessionStatus};
use crate::services::catalog::{require_test, TestCatalog};
use crate::services::enrollment_service::EnrollmentService;
use crate::store::{CasResult, ModulesOutcome, Store};
use crate::utils::time::Clock;
use crate::utils::token::generate_session_code;

const MAX_PER_PAGE: i64 = 100;
const MODULE_WRITE_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct SessionList {
    pub items: Vec<Session>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub effective_status: SessionStatus,
    pub total_participants: usize,
    pub participants_by_status: BTreeMap<String, usize>,
    pub attempts_by_status: BTreeMap<String, usize>,
    pub modules: usize,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    catalog: Arc<dyn TestCatalog>,
    enrollment: EnrollmentService,
    settings: EngineSettings,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        catalog: Arc<dyn TestCatalog>,
        enrollment: EnrollmentService,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            catalog,
            enrollment,
            settings,
        }
    }

    pub async fn create_session(&self, payload: CreateSessionPayload) -> Result<Session> {
        payload.validate()?;
        if payload.end_time <= payload.start_time {
            return Err(Error::BadRequest(
                "end_time must be after start_time".to_string(),
            ));
        }

        let now = self.clock.now();
        let id = Uuid::new_v4();
        let mut seen = HashSet::new();
        let mut modules = Vec::with_capacity(payload.modules.len());
        for (idx, module) in payload.modules.iter().enumerate() {
            if !seen.insert(module.test_id) {
                return Err(Error::BadRequest(format!(
                    "Test {} is listed more than once",
                    module.test_id
                )));
            }
            modules.push(self.build_module(id, module, idx as i32 + 1).await?);
        }

        let code = payload
            .code
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(generate_session_code);

        let session = Session {
            id,
            name: payload.name.trim().to_string(),
            code,
            start_time: payload.start_time,
            end_time: payload.end_time,
            status: SessionStatus::Draft,
            auto_expire: payload.auto_expire,
            allow_late_entry: payload.allow_late_entry,
            max_participants: payload.max_participants,
            created_by: payload.created_by,
            created_at: now,
            updated_at: now,
            modules,
        };
        self.store.insert_session(&session).await?;

        tracing::info!(
            session_id = %session.id,
            code = %session.code,
            modules = session.modules.len(),
            "session created"
        );
        Ok(session)
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Session> {
        self.require_session(id).await
    }

    pub async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        page: Option<i64>,
        per_page: Option<i64>,
    ) -> Result<SessionList> {
        let page = page.unwrap_or(1).max(1);
        let per_page = per_page.unwrap_or(20).clamp(1, MAX_PER_PAGE);
        let offset = (page - 1) * per_page;

        let items = self.store.list_sessions(status, per_page, offset).await?;
        let total = self.store.count_sessions(status).await?;
        let total_pages = (total + per_page - 1) / per_page;

        Ok(SessionList {
            items,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    pub async fn activate(&self, id: Uuid) -> Result<Session> {
        self.transition(id, SessionStatus::Active, self.clock.now()).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Session> {
        self.transition(id, SessionStatus::Cancelled, self.clock.now()).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<Session> {
        self.transition(id, SessionStatus::Completed, self.clock.now()).await
    }

    pub async fn expire(&self, id: Uuid) -> Result<Session> {
        self.transition(id, SessionStatus::Expired, self.clock.now()).await
    }

    /// Moves a session along its lifecycle through a conditional update.
    ///
    /// Closing a session (expired or completed) sweeps unfinished
    /// participants into `no_show` when that behavior is enabled.
    pub(crate) async fn transition(
        &self,
        id: Uuid,
        target: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session = self.require_session(id).await?;
        if !session.status.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: session.status.to_string(),
                to: target.to_string(),
            });
        }

        let sources = SessionStatus::sources_for(target);
        match self.store.cas_session_status(id, sources, target, now).await? {
            CasResult::Success => {}
            CasResult::NotFound => return Err(Error::NotFound(format!("Session {} not found", id))),
            CasResult::StateMismatch { actual } => {
                return Err(Error::InvalidStateTransition {
                    from: actual.to_string(),
                    to: target.to_string(),
                })
            }
        }

        tracing::info!(session_id = %id, from = %session.status, to = %target, "session status changed");
        self.events.publish(LifecycleEvent::SessionStatusChanged {
            session_id: id,
            from: session.status,
            to: target,
            at: now,
        });

        if matches!(target, SessionStatus::Expired | SessionStatus::Completed)
            && self.settings.mark_no_show_on_close
        {
            if let Err(e) = self.enrollment.mark_no_shows(&session, now).await {
                tracing::warn!(session_id = %id, error = %e, "no-show cascade failed");
            }
        }

        self.require_session(id).await
    }

    /// Appends a module at the end of the sequence.
    pub async fn add_module(&self, session_id: Uuid, module: ModulePayload) -> Result<Session> {
        self.modifiable_session(session_id).await?;
        let built = self.build_module(session_id, &module, 0).await?;

        let session = self
            .rewrite_modules(session_id, |session| {
                if session.module_for_test(module.test_id).is_some() {
                    return Err(Error::BadRequest(format!(
                        "Test {} is already part of session {}",
                        module.test_id, session_id
                    )));
                }
                let mut modules = session.modules.clone();
                let next = modules.iter().map(|m| m.sequence).max().unwrap_or(0) + 1;
                modules.push(SessionModule {
                    sequence: next,
                    ..built.clone()
                });
                Ok(modules)
            })
            .await?;

        tracing::info!(session_id = %session_id, test_id = %module.test_id, "module added");
        Ok(session)
    }

    /// Removes a module and closes the gap in the sequence.
    pub async fn remove_module(&self, session_id: Uuid, test_id: Uuid) -> Result<Session> {
        self.modifiable_session(session_id).await?;
        let attempted = self
            .store
            .list_session_progress(session_id)
            .await?
            .iter()
            .any(|p| p.test_id == test_id && p.started_at.is_some());
        if attempted {
            return Err(Error::BadRequest(format!(
                "Test {} already has attempts in session {}",
                test_id, session_id
            )));
        }

        let session = self
            .rewrite_modules(session_id, |session| {
                if session.module_for_test(test_id).is_none() {
                    return Err(Error::NotFound(format!(
                        "Test {} is not part of session {}",
                        test_id, session_id
                    )));
                }
                Ok(session
                    .modules
                    .iter()
                    .filter(|m| m.test_id != test_id)
                    .cloned()
                    .collect())
            })
            .await?;

        tracing::info!(session_id = %session_id, test_id = %test_id, "module removed");
        Ok(session)
    }

    /// Read-modify-write of the module list. The write only lands if the
    /// stored list is still the one `edit` saw; otherwise it is re-read.
    async fn rewrite_modules<F>(&self, session_id: Uuid, mut edit: F) -> Result<Session>
    where
        F: FnMut(&Session) -> Result<Vec<SessionModule>> + Send,
    {
        for attempt in 1..=MODULE_WRITE_ATTEMPTS {
            let session = self.modifiable_session(session_id).await?;
            let expected: Vec<Uuid> = session.ordered_modules().iter().map(|m| m.test_id).collect();
            let mut modules = edit(&session)?;
            renumber_modules(&mut modules);

            match self
                .store
                .replace_modules(session_id, &expected, &modules)
                .await?
            {
                ModulesOutcome::Replaced => return self.require_session(session_id).await,
                ModulesOutcome::Stale => {
                    tracing::debug!(session_id = %session_id, attempt, "module list changed, retrying");
                }
                ModulesOutcome::Closed => return Err(Error::SessionNotModifiable(session_id)),
                ModulesOutcome::NotFound => {
                    return Err(Error::NotFound(format!("Session {} not found", session_id)))
                }
            }
        }
        Err(Error::StorageUnavailable(format!(
            "modules of session {} kept changing",
            session_id
        )))
    }

    pub async fn summary(&self, session_id: Uuid) -> Result<SessionSummary> {
        let now = self.clock.now();
        let session = self.require_session(session_id).await?;
        let participants = self.store.list_participants(session_id).await?;
        let progress = self.store.list_session_progress(session_id).await?;

        let mut participants_by_status = BTreeMap::new();
        for p in &participants {
            *participants_by_status
                .entry(p.status.to_string())
                .or_insert(0) += 1;
        }
        let mut attempts_by_status = BTreeMap::new();
        for p in &progress {
            *attempts_by_status.entry(p.status.to_string()).or_insert(0) += 1;
        }

        Ok(SessionSummary {
            session_id,
            status: session.status,
            effective_status: session.effective_status(now),
            total_participants: participants.len(),
            participants_by_status,
            attempts_by_status,
            modules: session.modules.len(),
        })
    }

    async fn build_module(
        &self,
        session_id: Uuid,
        module: &ModulePayload,
        sequence: i32,
    ) -> Result<SessionModule> {
        if module.weight.is_sign_negative() {
            return Err(Error::BadRequest("Module weight cannot be negative".to_string()));
        }
        let test = require_test(self.catalog.as_ref(), module.test_id).await?;
        if !test.is_active {
            return Err(Error::BadRequest(format!("Test {} is not active", test.id)));
        }
        Ok(SessionModule {
            session_id,
            test_id: module.test_id,
            sequence,
            is_required: module.is_required,
            weight: module.weight,
        })
    }

    async fn modifiable_session(&self, id: Uuid) -> Result<Session> {
        let session = self.require_session(id).await?;
        if session.status.is_terminal() {
            return Err(Error::SessionNotModifiable(id));
        }
        Ok(session)
    }

    async fn require_session(&self, id: Uuid) -> Result<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", id)))
    }
}
