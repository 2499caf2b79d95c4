use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::store::ActivityUpdate;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ActivityPayload {
    #[validate(range(min = 0))]
    pub answered_questions: Option<i32>,
    /// Seconds of activity since the previous report.
    #[validate(range(min = 0, max = 86400))]
    pub time_spent_delta: Option<i32>,
}

impl From<ActivityPayload> for ActivityUpdate {
    fn from(payload: ActivityPayload) -> Self {
        Self {
            answered_questions: payload.answered_questions,
            time_spent_delta: payload.time_spent_delta,
        }
    }
}
