mod common;

use assessment_backend::error::Error;
use assessment_backend::models::participant::ParticipantStatus;
use assessment_backend::models::progress::ProgressKey;
use assessment_backend::services::enrollment_service::{InviteOptions, Invitee, SkipReason};
use assessment_backend::store::{InsertOutcome, Store};
use chrono::Duration;
use common::{invitee, nine_am, Harness};

#[tokio::test]
async fn bulk_invite_skips_already_enrolled_users() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h.session_with(&[test], |_| {}).await;
    let existing = h.invite(session.id, "Ana").await;

    let users = vec![
        Invitee {
            user_id: existing.user_id,
            ..invitee("Ana")
        },
        invitee("Ben"),
        invitee("Cleo"),
    ];
    let result = h
        .state
        .enrollment_service
        .bulk_invite(session.id, users, InviteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.total_added, 2);
    assert_eq!(result.skipped_participants.len(), 1);
    assert_eq!(result.skipped_participants[0].user_id, existing.user_id);
    assert_eq!(result.skipped_participants[0].reason, SkipReason::AlreadyEnrolled);
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn bulk_invite_reports_capacity_and_inactive_users() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h
        .session_with(&[test], |p| p.max_participants = Some(2))
        .await;

    let inactive = Invitee {
        is_active: false,
        ..invitee("Gone")
    };
    let overflow = invitee("Dan");
    let users = vec![invitee("Ana"), inactive.clone(), invitee("Ben"), overflow.clone()];

    let result = h
        .state
        .enrollment_service
        .bulk_invite(session.id, users, InviteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.total_added, 2);
    let reasons: Vec<_> = result
        .skipped_participants
        .iter()
        .map(|s| (s.user_id, s.reason))
        .collect();
    assert!(reasons.contains(&(inactive.user_id, SkipReason::InactiveUser)));
    assert!(reasons.contains(&(overflow.user_id, SkipReason::SessionFull)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invites_never_overfill_a_session() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h
        .session_with(&[test], |p| p.max_participants = Some(3))
        .await;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let enrollment = h.state.enrollment_service.clone();
            let session_id = session.id;
            tokio::spawn(async move {
                enrollment
                    .invite(session_id, invitee(&format!("P{}", i)), InviteOptions::default())
                    .await
            })
        })
        .collect();

    let mut enrolled = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => enrolled += 1,
            Err(Error::SessionFull(_)) => full += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(enrolled, 3);
    assert_eq!(full, 13);

    let stored = h
        .state
        .enrollment_service
        .list_participants(session.id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
}

#[tokio::test]
async fn store_checks_capacity_inside_the_insert() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h.session_with(&[test], |_| {}).await;
    let first = h.invite(session.id, "Ana").await;

    let mut second = first.clone();
    second.id = uuid::Uuid::new_v4();
    second.user_id = uuid::Uuid::new_v4();
    second.unique_link = "another-link".to_string();

    assert_eq!(
        h.store.insert_participant(&second, Some(1)).await.unwrap(),
        InsertOutcome::Full
    );
    assert_eq!(
        h.store.insert_participant(&first, Some(5)).await.unwrap(),
        InsertOutcome::Duplicate
    );
    assert_eq!(
        h.store.insert_participant(&second, Some(2)).await.unwrap(),
        InsertOutcome::Inserted
    );
}

#[tokio::test]
async fn single_invite_rejects_duplicates_and_full_sessions() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h
        .session_with(&[test], |p| p.max_participants = Some(1))
        .await;
    let user = invitee("Ana");

    h.state
        .enrollment_service
        .invite(session.id, user.clone(), InviteOptions::default())
        .await
        .unwrap();

    let duplicate = h
        .state
        .enrollment_service
        .invite(session.id, user, InviteOptions::default())
        .await;
    assert!(matches!(duplicate, Err(Error::DuplicateParticipant { .. })));

    let full = h
        .state
        .enrollment_service
        .invite(session.id, invitee("Ben"), InviteOptions::default())
        .await;
    assert!(matches!(full, Err(Error::SessionFull(_))));
}

#[tokio::test]
async fn link_resolution_registers_once_and_expires() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h.active_session(&[test]).await;
    let participant = h
        .state
        .enrollment_service
        .invite(
            session.id,
            invitee("Ana"),
            InviteOptions {
                link_expires_hours: Some(1),
            },
        )
        .await
        .unwrap()
        .participant;
    assert_eq!(participant.link_expires_at, nine_am() + Duration::hours(1));

    h.advance(Duration::minutes(10));
    let first = h
        .state
        .enrollment_service
        .resolve_link(&participant.unique_link)
        .await
        .unwrap();
    assert_eq!(first.participant.status, ParticipantStatus::Registered);
    let registered_at = first.participant.registered_at;
    assert_eq!(registered_at, Some(nine_am() + Duration::minutes(10)));

    h.advance(Duration::minutes(10));
    let second = h
        .state
        .enrollment_service
        .resolve_link(&participant.unique_link)
        .await
        .unwrap();
    assert_eq!(second.participant.registered_at, registered_at);

    h.advance(Duration::hours(1));
    let expired = h
        .state
        .enrollment_service
        .resolve_link(&participant.unique_link)
        .await;
    assert!(matches!(expired, Err(Error::LinkExpired)));

    let unknown = h.state.enrollment_service.resolve_link("nope").await;
    assert!(matches!(unknown, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn manual_status_changes_follow_the_lifecycle() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h.session_with(&[test], |_| {}).await;
    let participant = h.invite(session.id, "Ana").await;
    let svc = &h.state.enrollment_service;

    assert!(matches!(
        svc.update_status(participant.id, ParticipantStatus::Completed).await,
        Err(Error::InvalidStatusTransition { .. })
    ));

    let registered = svc
        .update_status(participant.id, ParticipantStatus::Registered)
        .await
        .unwrap();
    assert_eq!(registered.status, ParticipantStatus::Registered);

    let no_show = svc
        .update_status(participant.id, ParticipantStatus::NoShow)
        .await
        .unwrap();
    assert_eq!(no_show.status, ParticipantStatus::NoShow);

    assert!(matches!(
        svc.update_status(participant.id, ParticipantStatus::Registered).await,
        Err(Error::InvalidStatusTransition { .. })
    ));
}

#[tokio::test]
async fn removal_is_blocked_once_an_attempt_started() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h.active_session(&[test]).await;
    let idle = h.invite(session.id, "Idle").await;
    let busy = h.invite(session.id, "Busy").await;

    // Looking at progress creates a not_started row, which does not block removal.
    h.state
        .progress_service
        .get_progress(ProgressKey::new(session.id, idle.id, test))
        .await
        .unwrap();
    h.state.enrollment_service.remove(idle.id).await.unwrap();

    h.state
        .progress_service
        .start(ProgressKey::new(session.id, busy.id, test))
        .await
        .unwrap();
    let blocked = h.state.enrollment_service.remove(busy.id).await;
    assert!(matches!(blocked, Err(Error::ParticipantHasProgress(_))));

    let gone = h.state.enrollment_service.remove(idle.id).await;
    assert!(matches!(gone, Err(Error::NotFound(_))));
    assert_eq!(
        h.state
            .enrollment_service
            .list_participants(session.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn reissued_link_replaces_the_old_one() {
    let h = Harness::new();
    let test = h.catalog.add("Logic", 20, 10);
    let session = h.active_session(&[test]).await;
    let participant = h.invite(session.id, "Ana").await;

    h.advance(Duration::hours(1));
    let reissued = h
        .state
        .enrollment_service
        .reissue_link(participant.id, InviteOptions::default())
        .await
        .unwrap()
        .participant;

    assert_ne!(reissued.unique_link, participant.unique_link);
    assert_eq!(
        reissued.link_expires_at,
        nine_am() + Duration::hours(1) + Duration::hours(72)
    );
    assert!(matches!(
        h.state
            .enrollment_service
            .resolve_link(&participant.unique_link)
            .await,
        Err(Error::NotFound(_))
    ));
    h.state
        .enrollment_service
        .resolve_link(&reissued.unique_link)
        .await
        .unwrap();

    h.state
        .progress_service
        .start(ProgressKey::new(session.id, participant.id, test))
        .await
        .unwrap();
    let refused = h
        .state
        .enrollment_service
        .reissue_link(participant.id, InviteOptions::default())
        .await;
    assert!(matches!(refused, Err(Error::BadRequest(_))));
}
