//! End-to-end checks of the seat state machine against the in-memory
//! backend: credit consumption, rollback on lost races, and the
//! administrative paths.

mod common;

use chrono::Duration;
use common::*;
use studio_booking::catalog::StaticCatalog;
use studio_booking::errors::BookingError;
use studio_booking::models::SeatStatus;
use studio_booking::store::BookingStore;

#[tokio::test]
async fn reserve_consumes_one_credit_and_holds_the_seat() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    let grant = env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    let reserved = env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();
    assert_eq!(reserved.status, SeatStatus::Reserved);
    assert_eq!(reserved.holder_user_id, Some(1));
    assert!(reserved.expires_at.is_some());

    // Scenario A, first half: remaining 3 -> 2.
    let after = env.store.package_grant(grant).await.unwrap();
    assert_eq!(after.remaining_classes, 2);
    assert_eq!(after.used_classes, 1);
}

#[tokio::test]
async fn release_round_trip_restores_seat_and_balance() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    let grant = env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();
    let released = env.engine.release(seat).await.unwrap();

    // Scenario A, second half: the assignment is back to its
    // pre-reservation state and the credit came back.
    assert_eq!(released.status, SeatStatus::Available);
    assert_eq!(released.holder_user_id, None);
    assert_eq!(released.consumed_credit(), None);
    assert_eq!(released.reserved_at, None);
    assert_eq!(released.expires_at, None);

    let after = env.store.package_grant(grant).await.unwrap();
    assert_eq!(after.remaining_classes, 3);
    assert_eq!(after.used_classes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_have_exactly_one_winner() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;

    let mut grants = Vec::new();
    for user in 1..=8i64 {
        grants.push((user, env.store.seed_package_grant(package_grant(user, 10, 2, 30)).await));
    }

    let mut handles = Vec::new();
    for user in 1..=8i64 {
        let engine = env.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.reserve(seat, user, TTL_MINUTES).await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(BookingError::SeatNotAvailable) => losers += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(losers, 7);

    // Every loser's debit was rolled back; exactly one credit is consumed
    // across all grants.
    let mut consumed = 0;
    for (_, grant) in grants {
        consumed += env.store.package_grant(grant).await.unwrap().used_classes;
    }
    assert_eq!(consumed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_credit_is_never_spent_twice() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat_a = env.store.seed_assignment(occ, 101).await;
    let seat_b = env.store.seed_assignment(occ, 102).await;
    let grant = env.store.seed_package_grant(package_grant(1, 10, 1, 30)).await;

    let (first, second) = tokio::join!(
        {
            let engine = env.engine.clone();
            async move { engine.reserve(seat_a, 1, TTL_MINUTES).await }
        },
        {
            let engine = env.engine.clone();
            async move { engine.reserve(seat_b, 1, TTL_MINUTES).await }
        },
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for result in [first, second] {
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    BookingError::NoEligibleCredit { .. }
                        | BookingError::InsufficientCredit(_)
                ),
                "loser saw {e}"
            );
        }
    }

    let after = env.store.package_grant(grant).await.unwrap();
    assert_eq!(after.remaining_classes, 0);
    assert_eq!(after.used_classes, 1);
}

#[tokio::test]
async fn reserve_without_credit_leaves_seat_available() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;

    let err = env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap_err();
    assert!(matches!(err, BookingError::NoEligibleCredit { .. }));

    let assignment = env.store.assignment(seat).await.unwrap().unwrap();
    assert_eq!(assignment.status, SeatStatus::Available);
}

#[tokio::test]
async fn membership_burns_before_package() {
    // Scenario D: Pilates membership expiring in 2 days, Pilates+Cycling
    // package expiring in 30. A Pilates booking consumes the membership.
    let catalog = StaticCatalog::new().with_product(20, &[PILATES, CYCLING]);
    let env = test_env(catalog);
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    let membership = env.store.seed_membership_grant(membership_grant(1, PILATES, 2, 2)).await;
    let package = env.store.seed_package_grant(package_grant(1, 20, 5, 30)).await;

    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();

    assert_eq!(
        env.store.membership_grant(membership).await.unwrap().used_free_classes,
        1
    );
    assert_eq!(env.store.package_grant(package).await.unwrap().used_classes, 0);
}

#[tokio::test]
async fn confirm_clears_expiry_and_needs_a_reserved_seat() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    // Confirming an available seat is a state error, not a race.
    let err = env.engine.confirm(seat).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();
    let confirmed = env.engine.confirm(seat).await.unwrap();
    assert_eq!(confirmed.status, SeatStatus::Occupied);
    assert_eq!(confirmed.expires_at, None);
    assert_eq!(confirmed.holder_user_id, Some(1));

    // No credit movement on confirm: still exactly one debit.
    let grants = env.store.grants_for_user(1).await.unwrap();
    assert_eq!(grants[0].balance(), 2);
}

#[tokio::test]
async fn complete_is_terminal() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();
    env.engine.confirm(seat).await.unwrap();
    let completed = env.engine.complete(seat).await.unwrap();
    assert_eq!(completed.status, SeatStatus::Completed);

    let err = env.engine.release(seat).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));
}

#[tokio::test]
async fn blocking_a_held_seat_refunds_the_holder() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    let grant = env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();
    let blocked = env.engine.block(seat).await.unwrap();
    assert_eq!(blocked.status, SeatStatus::Blocked);
    assert_eq!(blocked.holder_user_id, None);

    // The holder lost the seat involuntarily; their credit must be back.
    let after = env.store.package_grant(grant).await.unwrap();
    assert_eq!(after.remaining_classes, 3);

    // Blocked seats cannot be reserved until explicitly unblocked.
    let err = env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatNotAvailable));

    let unblocked = env.engine.unblock(seat).await.unwrap();
    assert_eq!(unblocked.status, SeatStatus::Available);
    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();
}

#[tokio::test]
async fn batch_reserve_is_best_effort_per_seat() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat_a = env.store.seed_assignment(occ, 101).await;
    let seat_b = env.store.seed_assignment(occ, 102).await;
    env.store.seed_package_grant(package_grant(1, 10, 5, 30)).await;
    env.store.seed_package_grant(package_grant(2, 10, 5, 30)).await;

    // User 2 already holds seat B.
    env.engine.reserve(seat_b, 2, TTL_MINUTES).await.unwrap();

    let outcomes = env
        .engine
        .reserve_seats(occ, &[seat_a, seat_b], 1, TTL_MINUTES)
        .await;

    let by_id: std::collections::HashMap<i64, bool> = outcomes
        .iter()
        .map(|(id, r)| (*id, r.is_ok()))
        .collect();
    assert_eq!(by_id[&seat_a], true);
    assert_eq!(by_id[&seat_b], false);

    // The failed seat reported the race, not a credit problem.
    let (_, seat_b_result) = outcomes.into_iter().find(|(id, _)| *id == seat_b).unwrap();
    assert!(matches!(
        seat_b_result.unwrap_err(),
        BookingError::SeatNotAvailable
    ));
}

#[tokio::test]
async fn cancelled_occurrence_rejects_reservations() {
    let env = test_env(pilates_catalog());
    let mut occ = occurrence(PILATES, Duration::hours(2));
    occ.status = studio_booking::models::OccurrenceStatus::Cancelled;
    let occ = env.store.seed_occurrence(occ).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    let err = env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap_err();
    assert!(matches!(err, BookingError::OccurrenceNotBookable(_)));
}
