#![allow(dead_code)]

use std::sync::Arc;

use assessment_backend::config::EngineSettings;
use assessment_backend::dto::session_dto::{CreateSessionPayload, ModulePayload};
use assessment_backend::models::participant::SessionParticipant;
use assessment_backend::models::session::Session;
use assessment_backend::services::catalog::StaticTestCatalog;
use assessment_backend::services::enrollment_service::{InviteOptions, Invitee};
use assessment_backend::services::notification_service::NoopLinkNotifier;
use assessment_backend::store::InMemoryStore;
use assessment_backend::utils::time::{Clock, ManualClock};
use assessment_backend::AppState;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key";

/// 2026-03-02 09:00 UTC.
pub fn nine_am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub catalog: Arc<StaticTestCatalog>,
    pub store: Arc<InMemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let clock = Arc::new(ManualClock::new(nine_am()));
        let catalog = Arc::new(StaticTestCatalog::new());
        let store = Arc::new(InMemoryStore::new());
        let state = AppState::new(
            store.clone(),
            catalog.clone(),
            Arc::new(NoopLinkNotifier),
            clock.clone(),
            settings,
            JWT_SECRET.to_string(),
        );
        Self {
            state,
            clock,
            catalog,
            store,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.state.clock.now()
    }

    /// A session running 09:00-11:00 with the given tests as required modules.
    pub async fn session_with(&self, tests: &[Uuid], configure: impl FnOnce(&mut CreateSessionPayload)) -> Session {
        let mut payload = CreateSessionPayload {
            name: "Spring intake".into(),
            code: None,
            start_time: nine_am(),
            end_time: nine_am() + Duration::hours(2),
            auto_expire: true,
            allow_late_entry: true,
            max_participants: None,
            modules: tests
                .iter()
                .map(|id| ModulePayload {
                    test_id: *id,
                    is_required: true,
                    weight: Decimal::ONE,
                })
                .collect(),
            created_by: None,
        };
        configure(&mut payload);
        self.state
            .session_service
            .create_session(payload)
            .await
            .expect("create session")
    }

    pub async fn active_session(&self, tests: &[Uuid]) -> Session {
        let session = self.session_with(tests, |_| {}).await;
        self.state
            .session_service
            .activate(session.id)
            .await
            .expect("activate session")
    }

    pub async fn invite(&self, session_id: Uuid, name: &str) -> SessionParticipant {
        self.state
            .enrollment_service
            .invite(session_id, invitee(name), InviteOptions::default())
            .await
            .expect("invite")
            .participant
    }
}

pub fn invitee(name: &str) -> Invitee {
    Invitee {
        user_id: Uuid::new_v4(),
        name: name.to_string(),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        is_active: true,
    }
}
