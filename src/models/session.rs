use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Draft,
    Active,
    Expired,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled sessions accept no further changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// States a transition into `target` may start from.
    pub fn sources_for(target: SessionStatus) -> &'static [SessionStatus] {
        match target {
            SessionStatus::Draft => &[],
            SessionStatus::Active => &[SessionStatus::Draft],
            SessionStatus::Expired => &[SessionStatus::Active],
            SessionStatus::Completed => &[SessionStatus::Active, SessionStatus::Expired],
            SessionStatus::Cancelled => &[
                SessionStatus::Draft,
                SessionStatus::Active,
                SessionStatus::Expired,
            ],
        }
    }

    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        Self::sources_for(target).contains(self)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub auto_expire: bool,
    pub allow_late_entry: bool,
    pub max_participants: Option<i32>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub modules: Vec<SessionModule>,
}

impl Session {
    /// Status as dictated by the clock, which may run ahead of the stored one
    /// until the next sweep catches up.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        match self.status {
            SessionStatus::Active if self.auto_expire && now > self.end_time => {
                SessionStatus::Expired
            }
            SessionStatus::Draft if self.start_time <= now && now < self.end_time => {
                SessionStatus::Active
            }
            other => other,
        }
    }

    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.auto_expire && self.end_time < now
    }

    pub fn is_due_for_activation(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Draft && self.start_time <= now && now < self.end_time
    }

    pub fn module_for_test(&self, test_id: Uuid) -> Option<&SessionModule> {
        self.modules.iter().find(|m| m.test_id == test_id)
    }

    pub fn ordered_modules(&self) -> Vec<&SessionModule> {
        let mut modules: Vec<&SessionModule> = self.modules.iter().collect();
        modules.sort_by_key(|m| m.sequence);
        modules
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SessionModule {
    pub session_id: Uuid,
    pub test_id: Uuid,
    pub sequence: i32,
    pub is_required: bool,
    pub weight: Decimal,
}

/// Reassigns sequences 1..=n in the current order.
pub fn renumber_modules(modules: &mut [SessionModule]) {
    modules.sort_by_key(|m| m.sequence);
    for (idx, module) in modules.iter_mut().enumerate() {
        module.sequence = idx as i32 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(status: SessionStatus) -> Session {
        let start = Utc::now();
        Session {
            id: Uuid::new_v4(),
            name: "Spring intake".into(),
            code: "SPRING01".into(),
            start_time: start,
            end_time: start + Duration::hours(2),
            status,
            auto_expire: true,
            allow_late_entry: true,
            max_participants: None,
            created_by: None,
            created_at: start,
            updated_at: start,
            modules: Vec::new(),
        }
    }

    #[test]
    fn transition_table_is_forward_only_except_cancel() {
        use SessionStatus::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Expired));
        assert!(Expired.can_transition_to(Completed));
        assert!(Active.can_transition_to(Cancelled));
        assert!(!Active.can_transition_to(Draft));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Draft.can_transition_to(Expired));
    }

    #[test]
    fn effective_status_follows_the_window() {
        let s = session(SessionStatus::Active);
        assert_eq!(s.effective_status(s.end_time), SessionStatus::Active);
        assert_eq!(
            s.effective_status(s.end_time + Duration::seconds(1)),
            SessionStatus::Expired
        );

        let draft = session(SessionStatus::Draft);
        assert_eq!(
            draft.effective_status(draft.start_time - Duration::minutes(1)),
            SessionStatus::Draft
        );
        assert_eq!(draft.effective_status(draft.start_time), SessionStatus::Active);

        let cancelled = session(SessionStatus::Cancelled);
        assert_eq!(
            cancelled.effective_status(cancelled.start_time),
            SessionStatus::Cancelled
        );
    }

    #[test]
    fn renumbering_closes_gaps() {
        let session_id = Uuid::new_v4();
        let mut modules: Vec<SessionModule> = [4, 1, 7]
            .into_iter()
            .map(|sequence| SessionModule {
                session_id,
                test_id: Uuid::new_v4(),
                sequence,
                is_required: true,
                weight: Decimal::ONE,
            })
            .collect();
        let first = modules[1].test_id;

        renumber_modules(&mut modules);

        let sequences: Vec<i32> = modules.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(modules[0].test_id, first);
    }
}
