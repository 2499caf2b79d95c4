pub mod health;
pub mod participants;
pub mod public;
pub mod sessions;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Router,
};

use crate::middleware::auth::require_admin;
use crate::middleware::rate_limit::{per_link_limit, LinkRateLimiter};
use crate::AppState;

/// All API routes with their guards; transport layers are added by the caller.
pub fn router(state: AppState, public_rps: u32) -> Router {
    let admin_api = Router::new()
        .route(
            "/api/admin/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route("/api/admin/sessions/:id", get(sessions::get_session))
        .route("/api/admin/sessions/:id/summary", get(sessions::get_summary))
        .route("/api/admin/sessions/:id/activate", post(sessions::activate_session))
        .route("/api/admin/sessions/:id/cancel", post(sessions::cancel_session))
        .route("/api/admin/sessions/:id/complete", post(sessions::complete_session))
        .route("/api/admin/sessions/:id/expire", post(sessions::expire_session))
        .route("/api/admin/sessions/:id/modules", post(sessions::add_module))
        .route(
            "/api/admin/sessions/:id/modules/:test_id",
            delete(sessions::remove_module),
        )
        .route(
            "/api/admin/sessions/:id/participants",
            get(sessions::list_participants).post(sessions::invite_participant),
        )
        .route(
            "/api/admin/sessions/:id/participants/bulk",
            post(sessions::bulk_invite),
        )
        .route(
            "/api/admin/participants/:id",
            get(participants::get_participant).delete(participants::remove_participant),
        )
        .route(
            "/api/admin/participants/:id/status",
            patch(participants::update_status),
        )
        .route(
            "/api/admin/participants/:id/reissue-link",
            post(participants::reissue_link),
        )
        .route("/api/admin/status/sweep", post(sessions::trigger_sweep))
        .layer(from_fn_with_state(state.clone(), require_admin));

    let public_api = Router::new()
        .route("/api/public/sessions/:token", get(public::open_session))
        .route("/api/public/sessions/:token/next", get(public::next_step))
        .route(
            "/api/public/sessions/:token/tests/:test_id/start",
            post(public::start_test),
        )
        .route(
            "/api/public/sessions/:token/tests/:test_id/activity",
            patch(public::record_activity),
        )
        .route(
            "/api/public/sessions/:token/tests/:test_id/complete",
            post(public::complete_test),
        )
        .route(
            "/api/public/sessions/:token/tests/:test_id/progress",
            get(public::get_progress),
        )
        .layer(from_fn_with_state(LinkRateLimiter::new(public_rps), per_link_limit));

    Router::new()
        .route("/health", get(health::health))
        .merge(admin_api)
        .merge(public_api)
        .with_state(state)
}
