use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::session::{Session, SessionStatus};
use crate::services::session_service::SessionList;

fn default_true() -> bool {
    true
}

fn default_weight() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulePayload {
    pub test_id: Uuid,
    #[serde(default = "default_true")]
    pub is_required: bool,
    #[serde(default = "default_weight")]
    pub weight: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSessionPayload {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    /// Generated when omitted.
    #[validate(length(min = 4, max = 32))]
    pub code: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub auto_expire: bool,
    #[serde(default)]
    pub allow_late_entry: bool,
    #[validate(range(min = 1))]
    pub max_participants: Option<i32>,
    /// Taken in order; sequences are assigned 1..=n.
    #[serde(default)]
    pub modules: Vec<ModulePayload>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionListQuery {
    pub status: Option<SessionStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: Session,
    pub effective_status: SessionStatus,
}

impl SessionResponse {
    pub fn new(mut session: Session, now: DateTime<Utc>) -> Self {
        let effective_status = session.effective_status(now);
        session.modules.sort_by_key(|m| m.sequence);
        Self {
            session,
            effective_status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionListResponse {
    pub items: Vec<SessionResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl SessionListResponse {
    pub fn new(list: SessionList, now: DateTime<Utc>) -> Self {
        Self {
            items: list
                .items
                .into_iter()
                .map(|s| SessionResponse::new(s, now))
                .collect(),
            total: list.total,
            page: list.page,
            per_page: list.per_page,
            total_pages: list.total_pages,
        }
    }
}
