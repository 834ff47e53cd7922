//! Background job behavior: expiration sweeps and waiting-list promotion.

mod common;

use chrono::Duration;
use common::*;
use studio_booking::clock::Clock;
use studio_booking::models::{OccurrenceStatus, SeatStatus, WaitingStatus};
use studio_booking::store::{BookingStore, NewWaitingEntry};

#[tokio::test]
async fn sweeper_reclaims_lapsed_reservations() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    let grant = env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();

    // Scenario B: reserved at T with a 15 minute hold, swept at T+16.
    env.clock.advance(Duration::minutes(16));
    let released = env.sweeper.sweep_expired().await.unwrap();
    assert_eq!(released, 1);

    let assignment = env.store.assignment(seat).await.unwrap().unwrap();
    assert_eq!(assignment.status, SeatStatus::Available);
    assert_eq!(assignment.holder_user_id, None);
    assert_eq!(env.store.package_grant(grant).await.unwrap().remaining_classes, 3);
}

#[tokio::test]
async fn sweep_is_idempotent_and_never_double_refunds() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    let grant = env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();
    env.clock.advance(Duration::minutes(16));

    assert_eq!(env.sweeper.sweep_expired().await.unwrap(), 1);
    // Second pass with nothing newly expired is a no-op.
    assert_eq!(env.sweeper.sweep_expired().await.unwrap(), 0);

    let after = env.store.package_grant(grant).await.unwrap();
    assert_eq!(after.remaining_classes, 3);
    assert_eq!(after.used_classes, 0);
}

#[tokio::test]
async fn sweep_leaves_confirmed_seats_alone() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;

    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();
    env.engine.confirm(seat).await.unwrap();

    env.clock.advance(Duration::hours(1));
    assert_eq!(env.sweeper.sweep_expired().await.unwrap(), 0);

    let assignment = env.store.assignment(seat).await.unwrap().unwrap();
    assert_eq!(assignment.status, SeatStatus::Occupied);
}

#[tokio::test]
async fn sweeper_keeps_going_past_unreleasable_rows() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat_a = env.store.seed_assignment(occ, 101).await;
    let seat_b = env.store.seed_assignment(occ, 102).await;
    env.store.seed_package_grant(package_grant(1, 10, 5, 30)).await;

    env.engine.reserve(seat_a, 1, TTL_MINUTES).await.unwrap();
    env.engine.reserve(seat_b, 1, TTL_MINUTES).await.unwrap();
    env.clock.advance(Duration::minutes(16));

    // Seat A gets confirmed between the scan and the sweep in a real race;
    // here we confirm it up front, the guard skips it the same way.
    env.engine.confirm(seat_a).await.unwrap();

    let released = env.sweeper.sweep_expired().await.unwrap();
    assert_eq!(released, 1);
    assert_eq!(
        env.store.assignment(seat_a).await.unwrap().unwrap().status,
        SeatStatus::Occupied
    );
    assert_eq!(
        env.store.assignment(seat_b).await.unwrap().unwrap().status,
        SeatStatus::Available
    );
}

#[tokio::test]
async fn promotion_is_fifo() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;

    env.store.seed_package_grant(package_grant(1, 10, 3, 30)).await;
    env.store.seed_package_grant(package_grant(2, 10, 3, 30)).await;
    env.store.seed_package_grant(package_grant(3, 10, 3, 30)).await;

    // Occurrence is full: user 1 holds the only seat.
    env.engine.reserve(seat, 1, TTL_MINUTES).await.unwrap();

    // Scenario C: A queues first, B later.
    let entry_a = env
        .store
        .insert_waiting_entry(
            NewWaitingEntry { occurrence_id: occ, user_id: 2, preselected_credit: None },
            env.clock.now(),
        )
        .await
        .unwrap();
    env.clock.advance(Duration::minutes(1));
    let entry_b = env
        .store
        .insert_waiting_entry(
            NewWaitingEntry { occurrence_id: occ, user_id: 3, preselected_credit: None },
            env.clock.now(),
        )
        .await
        .unwrap();

    // The seat frees up while the class is still upcoming.
    env.engine.release(seat).await.unwrap();
    let promoted = env.promoter.promote_waiting_list(occ).await.unwrap();
    assert_eq!(promoted, 1);

    let assignment = env.store.assignment(seat).await.unwrap().unwrap();
    assert_eq!(assignment.holder_user_id, Some(2), "A wins, not B");
    // The row records the pending promotion until the user confirms.
    assert_eq!(assignment.waiting_user_id, Some(2));

    let a = env.store.waiting_entry(entry_a).await.unwrap().unwrap();
    let b = env.store.waiting_entry(entry_b).await.unwrap().unwrap();
    assert_eq!(a.status, WaitingStatus::Confirmed);
    assert_eq!(b.status, WaitingStatus::Waiting);
}

#[tokio::test]
async fn promotion_consumes_credit_and_expires_broke_entries() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    let seat = env.store.seed_assignment(occ, 101).await;

    // User 2 has no credit at all; user 3 does.
    let grant = env.store.seed_package_grant(package_grant(3, 10, 2, 30)).await;

    let entry_broke = env
        .store
        .insert_waiting_entry(
            NewWaitingEntry { occurrence_id: occ, user_id: 2, preselected_credit: None },
            env.clock.now(),
        )
        .await
        .unwrap();
    env.clock.advance(Duration::minutes(1));
    env.store
        .insert_waiting_entry(
            NewWaitingEntry { occurrence_id: occ, user_id: 3, preselected_credit: None },
            env.clock.now(),
        )
        .await
        .unwrap();

    let promoted = env.promoter.promote_waiting_list(occ).await.unwrap();
    assert_eq!(promoted, 1);

    // The credit-less entry can never be promoted again.
    let broke = env.store.waiting_entry(entry_broke).await.unwrap().unwrap();
    assert_eq!(broke.status, WaitingStatus::Expired);

    // The promoted user paid at promotion time.
    let assignment = env.store.assignment(seat).await.unwrap().unwrap();
    assert_eq!(assignment.holder_user_id, Some(3));
    assert_eq!(env.store.package_grant(grant).await.unwrap().used_classes, 1);
}

#[tokio::test]
async fn promotion_prefers_the_preselected_credit() {
    let env = test_env(pilates_catalog());
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::hours(2))).await;
    env.store.seed_assignment(occ, 101).await;

    // Policy alone would pick the membership; the entry pins the package.
    env.store.seed_membership_grant(membership_grant(1, PILATES, 2, 5)).await;
    let package = env.store.seed_package_grant(package_grant(1, 10, 2, 30)).await;

    env.store
        .insert_waiting_entry(
            NewWaitingEntry {
                occurrence_id: occ,
                user_id: 1,
                preselected_credit: Some(studio_booking::models::GrantRef::Package(package)),
            },
            env.clock.now(),
        )
        .await
        .unwrap();

    assert_eq!(env.promoter.promote_waiting_list(occ).await.unwrap(), 1);
    assert_eq!(env.store.package_grant(package).await.unwrap().used_classes, 1);
}

#[tokio::test]
async fn due_occurrences_start_once_and_trigger_promotion() {
    let env = test_env(pilates_catalog());
    // Already past its start time.
    let occ = env.store.seed_occurrence(occurrence(PILATES, Duration::minutes(-5))).await;
    let seat = env.store.seed_assignment(occ, 101).await;
    let grant = env.store.seed_package_grant(package_grant(1, 10, 2, 30)).await;

    env.store
        .insert_waiting_entry(
            NewWaitingEntry { occurrence_id: occ, user_id: 1, preselected_credit: None },
            env.clock.now(),
        )
        .await
        .unwrap();

    let started = env.promoter.start_due_occurrences().await.unwrap();
    assert_eq!(started, 1);

    let occurrence = env.store.occurrence(occ).await.unwrap().unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::InProgress);

    // Trigger (a) ran the promotion sweep: the queued user got the seat.
    let assignment = env.store.assignment(seat).await.unwrap().unwrap();
    assert_eq!(assignment.holder_user_id, Some(1));
    assert_eq!(env.store.package_grant(grant).await.unwrap().used_classes, 1);

    // A second pass finds nothing left to start.
    assert_eq!(env.promoter.start_due_occurrences().await.unwrap(), 0);
}
