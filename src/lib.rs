pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod events;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::PgPool;

use crate::config::{Config, EngineSettings};
use crate::error::Result;
use crate::events::EventBus;
use crate::services::{
    catalog::{PgTestCatalog, TestCatalog},
    enrollment_service::EnrollmentService,
    navigation_service::NavigationService,
    notification_service::{LinkNotifier, NoopLinkNotifier, WebhookLinkNotifier},
    progress_service::ProgressService,
    scheduler_service::SchedulerService,
    session_service::SessionService,
};
use crate::store::{PgStore, Store};
use crate::utils::time::{Clock, SystemClock};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub session_service: SessionService,
    pub enrollment_service: EnrollmentService,
    pub navigation_service: NavigationService,
    pub progress_service: ProgressService,
    pub scheduler_service: SchedulerService,
    pub jwt_secret: String,
}

impl AppState {
    /// Wires the engine services around the given seams.
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn TestCatalog>,
        notifier: Arc<dyn LinkNotifier>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
        jwt_secret: String,
    ) -> Self {
        let events = EventBus::new();

        let enrollment_service = EnrollmentService::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            notifier,
            settings.clone(),
        );
        let navigation_service =
            NavigationService::new(store.clone(), clock.clone(), enrollment_service.clone());
        let session_service = SessionService::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            catalog.clone(),
            enrollment_service.clone(),
            settings.clone(),
        );
        let progress_service = ProgressService::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            catalog,
            enrollment_service.clone(),
            navigation_service.clone(),
            settings,
        );
        let scheduler_service = SchedulerService::new(
            store.clone(),
            clock.clone(),
            session_service.clone(),
            progress_service.clone(),
        );

        Self {
            store,
            clock,
            events,
            session_service,
            enrollment_service,
            navigation_service,
            progress_service,
            scheduler_service,
            jwt_secret,
        }
    }

    /// Production wiring: Postgres storage and catalog, webhook delivery
    /// when a target is configured, and the system clock.
    pub fn from_config(pool: PgPool, config: &Config) -> Result<Self> {
        let notifier: Arc<dyn LinkNotifier> = match &config.invitation_webhook_url {
            Some(url) => {
                let http_client = Client::builder().timeout(Duration::from_secs(15)).build()?;
                Arc::new(WebhookLinkNotifier::new(
                    http_client,
                    url.clone(),
                    config.webhook_secret.clone(),
                ))
            }
            None => {
                tracing::warn!("INVITATION_WEBHOOK_URL not set, invitations will not be delivered");
                Arc::new(NoopLinkNotifier)
            }
        };

        Ok(Self::new(
            Arc::new(PgStore::new(pool.clone(), config.engine.storage_retry_attempts)),
            Arc::new(PgTestCatalog::new(pool)),
            notifier,
            Arc::new(SystemClock),
            config.engine.clone(),
            config.jwt_secret.clone(),
        ))
    }
}
