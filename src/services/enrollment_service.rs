use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::models::participant::{ParticipantStatus, SessionParticipant};
use crate::models::session::Session;
use crate::services::notification_service::{Invitation, LinkNotifier};
use crate::store::{CasResult, InsertOutcome, RemoveOutcome, Store};
use crate::utils::time::Clock;
use crate::utils::token::{generate_access_token, LINK_TOKEN_LENGTH};

/// A user as resolved by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitee {
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InviteOptions {
    pub link_expires_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteResult {
    pub participant: SessionParticipant,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyEnrolled,
    SessionFull,
    InactiveUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedParticipant {
    pub user_id: Uuid,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkInviteResult {
    pub added: Vec<SessionParticipant>,
    pub skipped_participants: Vec<SkippedParticipant>,
    pub total_added: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkResolution {
    pub participant: SessionParticipant,
    pub session: Session,
}

#[derive(Clone)]
pub struct EnrollmentService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    notifier: Arc<dyn LinkNotifier>,
    settings: EngineSettings,
}

impl EnrollmentService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        notifier: Arc<dyn LinkNotifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            notifier,
            settings,
        }
    }

    pub async fn invite(
        &self,
        session_id: Uuid,
        invitee: Invitee,
        opts: InviteOptions,
    ) -> Result<InviteResult> {
        let now = self.clock.now();
        let session = self.modifiable_session(session_id).await?;
        if !invitee.is_active {
            return Err(Error::BadRequest(format!(
                "User {} is inactive and cannot be invited",
                invitee.user_id
            )));
        }
        let hours = self.link_hours(opts)?;

        let participant = self.enroll(&session, &invitee, hours, now).await?;
        let (participant, warning) = self.deliver(&session, participant, now).await;
        Ok(InviteResult {
            participant,
            warning,
        })
    }

    /// Enrolls each user independently. Per-user rejections are reported in
    /// `skipped_participants`; only faults abort the call.
    pub async fn bulk_invite(
        &self,
        session_id: Uuid,
        invitees: Vec<Invitee>,
        opts: InviteOptions,
    ) -> Result<BulkInviteResult> {
        let now = self.clock.now();
        let session = self.modifiable_session(session_id).await?;
        let hours = self.link_hours(opts)?;

        let mut added = Vec::new();
        let mut skipped_participants = Vec::new();
        let mut warnings = Vec::new();

        for invitee in invitees {
            if !invitee.is_active {
                skipped_participants.push(SkippedParticipant {
                    user_id: invitee.user_id,
                    reason: SkipReason::InactiveUser,
                });
                continue;
            }

            match self.enroll(&session, &invitee, hours, now).await {
                Ok(participant) => {
                    let (participant, warning) = self.deliver(&session, participant, now).await;
                    warnings.extend(warning);
                    added.push(participant);
                }
                Err(Error::DuplicateParticipant { .. }) => {
                    skipped_participants.push(SkippedParticipant {
                        user_id: invitee.user_id,
                        reason: SkipReason::AlreadyEnrolled,
                    });
                }
                Err(Error::SessionFull(_)) => {
                    skipped_participants.push(SkippedParticipant {
                        user_id: invitee.user_id,
                        reason: SkipReason::SessionFull,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        tracing::info!(
            session_id = %session_id,
            added = added.len(),
            skipped = skipped_participants.len(),
            "bulk invite processed"
        );

        Ok(BulkInviteResult {
            total_added: added.len(),
            added,
            skipped_participants,
            warnings,
        })
    }

    /// Validates a capability link without changing anything.
    pub async fn authenticate_link(&self, token: &str) -> Result<(SessionParticipant, Session)> {
        let now = self.clock.now();
        let participant = self
            .store
            .find_participant_by_link(token)
            .await?
            .ok_or_else(|| Error::NotFound("Access link not found".to_string()))?;
        if participant.is_link_expired(now) {
            return Err(Error::LinkExpired);
        }
        let session = self
            .store
            .get_session(participant.session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", participant.session_id)))?;
        Ok((participant, session))
    }

    /// First successful resolution registers the participant.
    pub async fn resolve_link(&self, token: &str) -> Result<LinkResolution> {
        let now = self.clock.now();
        let (mut participant, session) = self.authenticate_link(token).await?;
        if session.status == crate::models::session::SessionStatus::Cancelled {
            return Err(Error::SessionNotActive(session.id));
        }

        if participant.status == ParticipantStatus::Invited {
            let outcome = self
                .store
                .cas_participant_status(
                    participant.id,
                    &[ParticipantStatus::Invited],
                    ParticipantStatus::Registered,
                    now,
                )
                .await?;
            if outcome.is_success() {
                self.announce(&participant, ParticipantStatus::Registered, now);
            }
            participant = self.require_participant(participant.id).await?;
        }

        Ok(LinkResolution {
            participant,
            session,
        })
    }

    pub async fn update_status(
        &self,
        participant_id: Uuid,
        new_status: ParticipantStatus,
    ) -> Result<SessionParticipant> {
        let now = self.clock.now();
        let participant = self.require_participant(participant_id).await?;
        if !participant.status.allows_manual_transition(new_status) {
            return Err(Error::InvalidStatusTransition {
                from: participant.status.to_string(),
                to: new_status.to_string(),
            });
        }

        match self
            .store
            .cas_participant_status(participant_id, &[participant.status], new_status, now)
            .await?
        {
            CasResult::Success => {}
            CasResult::NotFound => {
                return Err(Error::NotFound(format!("Participant {} not found", participant_id)))
            }
            CasResult::StateMismatch { actual } => {
                return Err(Error::InvalidStatusTransition {
                    from: actual.to_string(),
                    to: new_status.to_string(),
                })
            }
        }

        self.announce(&participant, new_status, now);
        self.require_participant(participant_id).await
    }

    pub async fn remove(&self, participant_id: Uuid) -> Result<()> {
        match self.store.delete_participant(participant_id).await? {
            RemoveOutcome::Removed => {
                tracing::info!(participant_id = %participant_id, "participant removed");
                Ok(())
            }
            RemoveOutcome::NotFound => Err(Error::NotFound(format!(
                "Participant {} not found",
                participant_id
            ))),
            RemoveOutcome::HasProgress => Err(Error::ParticipantHasProgress(participant_id)),
        }
    }

    /// Rotates the access link and sends the invitation again.
    pub async fn reissue_link(
        &self,
        participant_id: Uuid,
        opts: InviteOptions,
    ) -> Result<InviteResult> {
        let now = self.clock.now();
        let participant = self.require_participant(participant_id).await?;
        let session = self.modifiable_session(participant.session_id).await?;
        let hours = self.link_hours(opts)?;
        let token = generate_access_token(LINK_TOKEN_LENGTH);
        let expires_at = now + Duration::hours(hours);

        match self
            .store
            .replace_link(
                participant_id,
                &[ParticipantStatus::Invited, ParticipantStatus::Registered],
                &token,
                expires_at,
                now,
            )
            .await?
        {
            CasResult::Success => {}
            CasResult::NotFound => {
                return Err(Error::NotFound(format!("Participant {} not found", participant_id)))
            }
            CasResult::StateMismatch { actual } => {
                return Err(Error::BadRequest(format!(
                    "Cannot reissue the link of a participant in status '{}'",
                    actual
                )))
            }
        }

        let participant = self.require_participant(participant_id).await?;
        let (participant, warning) = self.deliver(&session, participant, now).await;
        Ok(InviteResult {
            participant,
            warning,
        })
    }

    pub async fn list_participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>> {
        self.store.list_participants(session_id).await
    }

    pub async fn get_participant(&self, participant_id: Uuid) -> Result<SessionParticipant> {
        self.require_participant(participant_id).await
    }

    /// Called when the participant opens their first attempt.
    pub(crate) async fn mark_started(
        &self,
        participant: &SessionParticipant,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let outcome = self
            .store
            .cas_participant_status(
                participant.id,
                &[ParticipantStatus::Invited, ParticipantStatus::Registered],
                ParticipantStatus::Started,
                now,
            )
            .await?;
        if outcome.is_success() {
            self.announce(participant, ParticipantStatus::Started, now);
        }
        Ok(())
    }

    /// Called when no module of the session is left for the participant.
    pub(crate) async fn mark_completed(&self, participant_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let participant = self.require_participant(participant_id).await?;
        let outcome = self
            .store
            .cas_participant_status(
                participant_id,
                &[
                    ParticipantStatus::Invited,
                    ParticipantStatus::Registered,
                    ParticipantStatus::Started,
                ],
                ParticipantStatus::Completed,
                now,
            )
            .await?;
        let changed = outcome.is_success();
        if changed {
            self.announce(&participant, ParticipantStatus::Completed, now);
        }
        Ok(changed)
    }

    /// Marks every registered or started participant that finished no
    /// required module as a no-show. Running it again changes nothing.
    pub(crate) async fn mark_no_shows(&self, session: &Session, now: DateTime<Utc>) -> Result<usize> {
        let candidates = [ParticipantStatus::Registered, ParticipantStatus::Started];
        let required: Vec<Uuid> = session
            .modules
            .iter()
            .filter(|m| m.is_required)
            .map(|m| m.test_id)
            .collect();

        let mut marked = 0;
        for participant in self.store.list_participants(session.id).await? {
            if !candidates.contains(&participant.status) {
                continue;
            }
            let progress = self
                .store
                .list_participant_progress(session.id, participant.id)
                .await?;
            let finished_required = progress
                .iter()
                .any(|p| required.contains(&p.test_id) && p.status.is_terminal());
            if finished_required {
                continue;
            }

            let outcome = self
                .store
                .cas_participant_status(participant.id, &candidates, ParticipantStatus::NoShow, now)
                .await?;
            if outcome.is_success() {
                self.announce(&participant, ParticipantStatus::NoShow, now);
                marked += 1;
            }
        }

        if marked > 0 {
            tracing::info!(session_id = %session.id, marked, "participants marked as no-show");
        }
        Ok(marked)
    }

    async fn enroll(
        &self,
        session: &Session,
        invitee: &Invitee,
        link_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionParticipant> {
        let participant = SessionParticipant {
            id: Uuid::new_v4(),
            session_id: session.id,
            user_id: invitee.user_id,
            name: invitee.name.clone(),
            email: invitee.email.clone(),
            status: ParticipantStatus::Invited,
            invitation_sent_at: None,
            registered_at: None,
            unique_link: generate_access_token(LINK_TOKEN_LENGTH),
            link_expires_at: now + Duration::hours(link_hours),
            created_at: now,
            updated_at: now,
        };

        match self
            .store
            .insert_participant(&participant, session.max_participants)
            .await?
        {
            InsertOutcome::Inserted => {}
            InsertOutcome::Full => return Err(Error::SessionFull(session.id)),
            InsertOutcome::Duplicate => {
                return Err(Error::DuplicateParticipant {
                    session_id: session.id,
                    user_id: invitee.user_id,
                })
            }
        }

        tracing::info!(
            session_id = %session.id,
            participant_id = %participant.id,
            user_id = %invitee.user_id,
            "participant invited"
        );
        Ok(participant)
    }

    /// Delivery failures never undo the enrollment; they come back as a warning.
    async fn deliver(
        &self,
        session: &Session,
        mut participant: SessionParticipant,
        now: DateTime<Utc>,
    ) -> (SessionParticipant, Option<String>) {
        let invitation = Invitation {
            event: "session_invitation".to_string(),
            participant_id: participant.id,
            session_id: session.id,
            session_name: session.name.clone(),
            session_code: session.code.clone(),
            name: participant.name.clone(),
            email: participant.email.clone(),
            unique_link: participant.unique_link.clone(),
            link_expires_at: participant.link_expires_at,
        };

        match self.notifier.send_invitation(&invitation).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_invitation_sent(participant.id, now).await {
                    tracing::warn!(participant_id = %participant.id, error = %e, "failed to stamp invitation");
                } else {
                    participant.invitation_sent_at = Some(now);
                }
                (participant, None)
            }
            Err(e) => {
                tracing::warn!(participant_id = %participant.id, error = %e, "invitation delivery failed");
                let warning = format!(
                    "Invitation for user {} was not delivered: {}",
                    participant.user_id, e
                );
                (participant, Some(warning))
            }
        }
    }

    async fn modifiable_session(&self, session_id: Uuid) -> Result<Session> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", session_id)))?;
        if session.status.is_terminal() {
            return Err(Error::SessionNotModifiable(session_id));
        }
        Ok(session)
    }

    async fn require_participant(&self, participant_id: Uuid) -> Result<SessionParticipant> {
        self.store
            .get_participant(participant_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Participant {} not found", participant_id)))
    }

    fn link_hours(&self, opts: InviteOptions) -> Result<i64> {
        let hours = opts
            .link_expires_hours
            .unwrap_or(self.settings.default_link_expires_hours);
        if hours <= 0 {
            return Err(Error::BadRequest(
                "link_expires_hours must be positive".to_string(),
            ));
        }
        Ok(hours)
    }

    fn announce(&self, participant: &SessionParticipant, to: ParticipantStatus, now: DateTime<Utc>) {
        tracing::info!(
            session_id = %participant.session_id,
            participant_id = %participant.id,
            from = %participant.status,
            to = %to,
            "participant status changed"
        );
        self.events.publish(LifecycleEvent::ParticipantStatusChanged {
            session_id: participant.session_id,
            participant_id: participant.id,
            from: participant.status,
            to,
            at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionStatus;
    use crate::services::notification_service::MockLinkNotifier;
    use crate::store::InMemoryStore;
    use crate::utils::time::ManualClock;

    async fn seeded(store: &InMemoryStore, now: DateTime<Utc>) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            name: "Onboarding".into(),
            code: "ONB00001".into(),
            start_time: now,
            end_time: now + Duration::hours(2),
            status: SessionStatus::Draft,
            auto_expire: true,
            allow_late_entry: true,
            max_participants: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            modules: Vec::new(),
        };
        store.insert_session(&session).await.unwrap();
        session
    }

    #[tokio::test]
    async fn failed_delivery_keeps_enrollment_and_reports_warning() {
        let now = Utc::now();
        let store = Arc::new(InMemoryStore::new());
        let session = seeded(&store, now).await;

        let mut notifier = MockLinkNotifier::new();
        notifier
            .expect_send_invitation()
            .withf(|inv| inv.event == "session_invitation")
            .times(1)
            .returning(|_| Err(Error::Internal("smtp down".into())));

        let svc = EnrollmentService::new(
            store.clone(),
            Arc::new(ManualClock::new(now)),
            EventBus::new(),
            Arc::new(notifier),
            EngineSettings::default(),
        );

        let result = svc
            .invite(
                session.id,
                Invitee {
                    user_id: Uuid::new_v4(),
                    name: "Dana".into(),
                    email: Some("dana@example.com".into()),
                    is_active: true,
                },
                InviteOptions::default(),
            )
            .await
            .unwrap();

        assert!(result.warning.unwrap().contains("smtp down"));
        assert!(result.participant.invitation_sent_at.is_none());
        assert_eq!(store.list_participants(session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_delivery_stamps_invitation_time() {
        let now = Utc::now();
        let store = Arc::new(InMemoryStore::new());
        let session = seeded(&store, now).await;

        let mut notifier = MockLinkNotifier::new();
        notifier.expect_send_invitation().returning(|_| Ok(()));

        let svc = EnrollmentService::new(
            store.clone(),
            Arc::new(ManualClock::new(now)),
            EventBus::new(),
            Arc::new(notifier),
            EngineSettings::default(),
        );

        let result = svc
            .invite(
                session.id,
                Invitee {
                    user_id: Uuid::new_v4(),
                    name: "Eli".into(),
                    email: None,
                    is_active: true,
                },
                InviteOptions {
                    link_expires_hours: Some(24),
                },
            )
            .await
            .unwrap();

        assert!(result.warning.is_none());
        assert_eq!(result.participant.invitation_sent_at, Some(now));
        assert_eq!(result.participant.link_expires_at, now + Duration::hours(24));
    }
}
