use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "progress_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
    AutoCompleted,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::AutoCompleted => "auto_completed",
        }
    }

    /// Both finished states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::AutoCompleted)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressKey {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub test_id: Uuid,
}

impl ProgressKey {
    pub fn new(session_id: Uuid, participant_id: Uuid, test_id: Uuid) -> Self {
        Self {
            session_id,
            participant_id,
            test_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParticipantTestProgress {
    pub id: Uuid,
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub test_id: Uuid,
    pub status: ProgressStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub answered_questions: i32,
    pub total_questions: i32,
    pub time_limit_minutes: i32,
    pub time_spent: i32,
    pub is_auto_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParticipantTestProgress {
    /// A fresh row for a module the participant has not opened yet.
    pub fn not_started(key: ProgressKey, total_questions: i32, time_limit_minutes: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: key.session_id,
            participant_id: key.participant_id,
            test_id: key.test_id,
            status: ProgressStatus::NotStarted,
            started_at: None,
            completed_at: None,
            answered_questions: 0,
            total_questions,
            time_limit_minutes,
            time_spent: 0,
            is_auto_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.session_id, self.participant_id, self.test_id)
    }

    pub fn expected_completion_at(&self) -> Option<DateTime<Utc>> {
        expected_completion_at(self.started_at?, self.time_limit_minutes)
    }

    pub fn is_time_expired(&self, now: DateTime<Utc>) -> bool {
        self.started_at
            .map(|started| is_time_expired(started, self.time_limit_minutes, now))
            .unwrap_or(false)
    }

    pub fn view(&self, now: DateTime<Utc>) -> ProgressView {
        let expected = self.expected_completion_at();
        ProgressView {
            progress: self.clone(),
            expected_completion_at: expected,
            time_remaining_seconds: expected.map(|at| time_remaining(at, now).num_seconds()),
            is_time_expired: self.is_time_expired(now),
            progress_percentage: progress_percentage(self.answered_questions, self.total_questions),
        }
    }
}

/// Stored row plus the fields derived from it at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressView {
    #[serde(flatten)]
    pub progress: ParticipantTestProgress,
    pub expected_completion_at: Option<DateTime<Utc>>,
    pub time_remaining_seconds: Option<i64>,
    pub is_time_expired: bool,
    pub progress_percentage: i32,
}

pub fn expected_completion_at(started_at: DateTime<Utc>, time_limit_minutes: i32) -> Option<DateTime<Utc>> {
    started_at.checked_add_signed(Duration::minutes(i64::from(time_limit_minutes)))
}

pub fn time_remaining(expected_completion_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expected_completion_at - now).max(Duration::zero())
}

pub fn is_time_expired(started_at: DateTime<Utc>, time_limit_minutes: i32, now: DateTime<Utc>) -> bool {
    match expected_completion_at(started_at, time_limit_minutes) {
        Some(deadline) => now >= deadline,
        None => false,
    }
}

pub fn progress_percentage(answered_questions: i32, total_questions: i32) -> i32 {
    if total_questions <= 0 {
        return 0;
    }
    let ratio = 100.0 * f64::from(answered_questions.max(0)) / f64::from(total_questions);
    (ratio.round() as i32).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let start = t0();
        let almost = start + Duration::minutes(29) + Duration::seconds(59);
        assert!(!is_time_expired(start, 30, almost));
        assert!(is_time_expired(start, 30, start + Duration::minutes(30)));
    }

    #[test]
    fn remaining_time_never_goes_negative() {
        let deadline = t0() + Duration::minutes(20);
        assert_eq!(time_remaining(deadline, t0()), Duration::minutes(20));
        assert_eq!(time_remaining(deadline, deadline + Duration::minutes(5)), Duration::zero());
    }

    #[test]
    fn percentage_rounds_and_caps() {
        assert_eq!(progress_percentage(4, 10), 40);
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(2, 3), 67);
        assert_eq!(progress_percentage(12, 10), 100);
        assert_eq!(progress_percentage(3, 0), 0);
    }

    #[test]
    fn view_of_unstarted_row_has_no_deadline() {
        let key = ProgressKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let row = ParticipantTestProgress::not_started(key, 10, 20, t0());
        let view = row.view(t0() + Duration::days(1));
        assert!(view.expected_completion_at.is_none());
        assert!(view.time_remaining_seconds.is_none());
        assert!(!view.is_time_expired);
        assert_eq!(view.progress_percentage, 0);
    }

    #[test]
    fn view_derives_from_started_at() {
        let key = ProgressKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut row = ParticipantTestProgress::not_started(key, 10, 20, t0());
        row.status = ProgressStatus::InProgress;
        row.started_at = Some(t0());
        row.answered_questions = 5;

        let view = row.view(t0() + Duration::minutes(5));
        assert_eq!(view.expected_completion_at, Some(t0() + Duration::minutes(20)));
        assert_eq!(view.time_remaining_seconds, Some(15 * 60));
        assert_eq!(view.progress_percentage, 50);
        assert!(!view.is_time_expired);
    }
}
