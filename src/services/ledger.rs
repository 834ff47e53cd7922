use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::error;

use crate::catalog::DisciplineCatalog;
use crate::errors::BookingError;
use crate::models::{Grant, GrantRef};
use crate::store::BookingStore;

/// Per-user consumable credit balances: purchased package credits and
/// complimentary membership credits, both behind the same debit/credit
/// surface. All balance movement goes through the store's atomic
/// operations, never through field writes.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn BookingStore>,
    catalog: Arc<dyn DisciplineCatalog>,
    /// When set, a grant for discipline A also covers discipline B if some
    /// package product bundles A and B together. Business rule inherited
    /// from the studios' sales model; deliberately toggleable.
    group_eligibility: bool,
}

impl CreditLedger {
    pub fn new(
        store: Arc<dyn BookingStore>,
        catalog: Arc<dyn DisciplineCatalog>,
        group_eligibility: bool,
    ) -> Self {
        Self {
            store,
            catalog,
            group_eligibility,
        }
    }

    /// Grants usable for `discipline_id` right now: active, inside their
    /// validity window, balance above zero, discipline in scope. Ordered
    /// soonest-expiry-first (use-it-or-lose-it), creation order as
    /// tie-break. Computed fresh on every call; balances move concurrently.
    pub async fn eligible_grants(
        &self,
        user_id: i64,
        discipline_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Grant>, BookingError> {
        let target = self.expand_discipline(discipline_id).await?;

        let mut eligible = Vec::new();
        for grant in self.store.grants_for_user(user_id).await? {
            if !grant.is_active(now) || grant.balance() < 1 {
                continue;
            }
            let scope: HashSet<i64> = match &grant {
                Grant::Membership(m) => HashSet::from([m.discipline_id]),
                Grant::Package(p) => self.catalog.disciplines_of(p.product_id).await?,
            };
            if scope.is_disjoint(&target) {
                continue;
            }
            eligible.push(grant);
        }

        eligible.sort_by_key(|g| (g.expiry(), g.created_at(), g.grant_ref().id()));
        Ok(eligible)
    }

    pub async fn debit(&self, grant: GrantRef, now: DateTime<Utc>) -> Result<(), BookingError> {
        self.store.debit_grant(grant, now).await
    }

    /// Refund one class back onto the grant that paid for a seat. A refund
    /// that does not match a prior debit is a ledger bug and stays loud.
    pub async fn credit(&self, grant: GrantRef) -> Result<(), BookingError> {
        match self.store.credit_grant(grant).await {
            Err(e @ BookingError::RefundMismatch(_)) => {
                error!("refund mismatch while crediting {}: double refund?", grant);
                Err(e)
            }
            other => other,
        }
    }

    /// The discipline set a booking for `discipline_id` may be paid from.
    async fn expand_discipline(
        &self,
        discipline_id: i64,
    ) -> Result<HashSet<i64>, BookingError> {
        let mut target = HashSet::from([discipline_id]);
        if self.group_eligibility {
            for group in self.catalog.groups_containing(discipline_id).await? {
                target.extend(group);
            }
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::models::{GrantStatus, MembershipGrant, PackageGrant};
    use crate::store::MemoryStore;
    use chrono::Duration;

    const PILATES: i64 = 1;
    const CYCLING: i64 = 2;
    const BARRE: i64 = 3;

    fn package(user_id: i64, product_id: i64, remaining: i32, expires_in_days: i64) -> PackageGrant {
        let now = Utc::now();
        PackageGrant {
            id: 0,
            user_id,
            product_id,
            total_classes: remaining,
            used_classes: 0,
            remaining_classes: remaining,
            status: GrantStatus::Active,
            activation_date: now - Duration::days(1),
            expiry_date: now + Duration::days(expires_in_days),
            created_at: now - Duration::days(1),
        }
    }

    fn membership(user_id: i64, discipline_id: i64, remaining: i32, expires_in_days: i64) -> MembershipGrant {
        let now = Utc::now();
        MembershipGrant {
            id: 0,
            user_id,
            discipline_id,
            remaining_free_classes: remaining,
            used_free_classes: 0,
            status: GrantStatus::Active,
            activation_date: now - Duration::days(1),
            expiry_date: now + Duration::days(expires_in_days),
            created_at: now - Duration::days(1),
        }
    }

    fn ledger(store: Arc<MemoryStore>, catalog: StaticCatalog, groups: bool) -> CreditLedger {
        CreditLedger::new(store, Arc::new(catalog), groups)
    }

    #[tokio::test]
    async fn orders_by_soonest_expiry() {
        let store = Arc::new(MemoryStore::new());
        let catalog = StaticCatalog::new().with_product(10, &[PILATES]);
        let late = store.seed_package_grant(package(1, 10, 5, 30)).await;
        let soon = store.seed_package_grant(package(1, 10, 5, 2)).await;

        let ledger = ledger(store, catalog, false);
        let eligible = ledger.eligible_grants(1, PILATES, Utc::now()).await.unwrap();
        let ids: Vec<i64> = eligible.iter().map(|g| g.grant_ref().id()).collect();
        assert_eq!(ids, vec![soon, late]);
    }

    #[tokio::test]
    async fn skips_exhausted_and_expired_grants() {
        let store = Arc::new(MemoryStore::new());
        let catalog = StaticCatalog::new().with_product(10, &[PILATES]);
        store.seed_package_grant(package(1, 10, 0, 30)).await;
        let mut dead = package(1, 10, 5, 30);
        dead.expiry_date = Utc::now() - Duration::days(1);
        store.seed_package_grant(dead).await;

        let ledger = ledger(store, catalog, false);
        let eligible = ledger.eligible_grants(1, PILATES, Utc::now()).await.unwrap();
        assert!(eligible.is_empty());
    }

    #[tokio::test]
    async fn membership_reaches_sibling_discipline_through_bundle() {
        // A Pilates membership covers a Cycling booking because product 20
        // bundles Pilates and Cycling together.
        let store = Arc::new(MemoryStore::new());
        let catalog = StaticCatalog::new().with_product(20, &[PILATES, CYCLING]);
        let grant = store.seed_membership_grant(membership(1, PILATES, 3, 10)).await;

        let with_groups = ledger(store.clone(), catalog.clone(), true);
        let eligible = with_groups.eligible_grants(1, CYCLING, Utc::now()).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].grant_ref().id(), grant);

        // Toggle off: the same membership no longer covers Cycling.
        let without_groups = ledger(store, catalog, false);
        let eligible = without_groups.eligible_grants(1, CYCLING, Utc::now()).await.unwrap();
        assert!(eligible.is_empty());
    }

    #[tokio::test]
    async fn unrelated_discipline_stays_out_of_scope() {
        let store = Arc::new(MemoryStore::new());
        let catalog = StaticCatalog::new().with_product(20, &[PILATES, CYCLING]);
        store.seed_membership_grant(membership(1, PILATES, 3, 10)).await;

        let ledger = ledger(store, catalog, true);
        let eligible = ledger.eligible_grants(1, BARRE, Utc::now()).await.unwrap();
        assert!(eligible.is_empty());
    }
}
