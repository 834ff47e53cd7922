#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use studio_booking::catalog::StaticCatalog;
use studio_booking::clock::{Clock, FixedClock};
use studio_booking::models::{
    ClassOccurrence, GrantStatus, MembershipGrant, OccurrenceStatus, PackageGrant,
};
use studio_booking::services::{
    CreditLedger, ExpirationSweeper, NoopNotifier, NotificationSender, ReservationEngine,
    WaitingListPromoter,
};
use studio_booking::store::{BookingStore, MemoryStore};

pub const PILATES: i64 = 1;
pub const CYCLING: i64 = 2;

pub const TTL_MINUTES: i64 = 15;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap()
}

pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub ledger: CreditLedger,
    pub engine: ReservationEngine,
    pub sweeper: ExpirationSweeper,
    pub promoter: WaitingListPromoter,
}

/// Engine wired against the in-memory backend and a manually advanced clock.
pub fn test_env(catalog: StaticCatalog) -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn BookingStore> = store.clone();
    let clock = Arc::new(FixedClock::new(base_time()));
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let notifier: Arc<dyn NotificationSender> = Arc::new(NoopNotifier);

    let ledger = CreditLedger::new(Arc::clone(&store_dyn), Arc::new(catalog), true);
    let engine = ReservationEngine::new(
        Arc::clone(&store_dyn),
        ledger.clone(),
        Arc::clone(&clock_dyn),
        Arc::clone(&notifier),
    );
    let sweeper = ExpirationSweeper::new(
        Arc::clone(&store_dyn),
        ledger.clone(),
        Arc::clone(&clock_dyn),
    );
    let promoter = WaitingListPromoter::new(
        store_dyn,
        engine.clone(),
        clock_dyn,
        notifier,
        TTL_MINUTES,
    );

    TestEnv {
        store,
        clock,
        ledger,
        engine,
        sweeper,
        promoter,
    }
}

/// An occurrence starting `starts_in` after the fixed base time.
pub fn occurrence(discipline_id: i64, starts_in: Duration) -> ClassOccurrence {
    let starts_at = base_time() + starts_in;
    ClassOccurrence {
        id: 0,
        discipline_id,
        studio_id: 1,
        capacity: 10,
        status: OccurrenceStatus::Scheduled,
        starts_at,
        ends_at: starts_at + Duration::hours(1),
        created_at: base_time() - Duration::days(1),
    }
}

pub fn package_grant(
    user_id: i64,
    product_id: i64,
    remaining: i32,
    expires_in_days: i64,
) -> PackageGrant {
    PackageGrant {
        id: 0,
        user_id,
        product_id,
        total_classes: remaining,
        used_classes: 0,
        remaining_classes: remaining,
        status: GrantStatus::Active,
        activation_date: base_time() - Duration::days(1),
        expiry_date: base_time() + Duration::days(expires_in_days),
        created_at: base_time() - Duration::days(1),
    }
}

pub fn membership_grant(
    user_id: i64,
    discipline_id: i64,
    remaining: i32,
    expires_in_days: i64,
) -> MembershipGrant {
    MembershipGrant {
        id: 0,
        user_id,
        discipline_id,
        remaining_free_classes: remaining,
        used_free_classes: 0,
        status: GrantStatus::Active,
        activation_date: base_time() - Duration::days(1),
        expiry_date: base_time() + Duration::days(expires_in_days),
        created_at: base_time() - Duration::days(1),
    }
}

/// Catalog with a single one-discipline product; enough for most tests.
pub fn pilates_catalog() -> StaticCatalog {
    StaticCatalog::new().with_product(10, &[PILATES])
}
