use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The slice of a catalog test the session engine depends on.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TestDefinition {
    pub id: Uuid,
    pub title: String,
    pub time_limit_minutes: i32,
    pub total_questions: i32,
    pub is_active: bool,
}
