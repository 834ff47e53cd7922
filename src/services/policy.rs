use crate::models::{Grant, GrantRef};

/// Picks which credit pays for a booking. Memberships first: free credits
/// cannot be resold or transferred and expire with no refund path, so they
/// burn before purchased package credits. Within each kind the
/// soonest-expiring grant wins, creation order breaks ties.
///
/// Pure and stateless; callers re-run it on every reservation and every
/// promotion because balances move underneath them.
pub fn select_credit(eligible: &[Grant]) -> Option<GrantRef> {
    eligible
        .iter()
        .min_by_key(|g| {
            (
                !g.is_membership(), // false < true: memberships sort first
                g.expiry(),
                g.created_at(),
                g.grant_ref().id(),
            )
        })
        .map(|g| g.grant_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GrantStatus, MembershipGrant, PackageGrant};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    fn package(id: i64, expires_in_days: i64) -> Grant {
        let now = Utc::now();
        Grant::Package(PackageGrant {
            id,
            user_id: 1,
            product_id: 1,
            total_classes: 10,
            used_classes: 0,
            remaining_classes: 10,
            status: GrantStatus::Active,
            activation_date: now - Duration::days(1),
            expiry_date: now + Duration::days(expires_in_days),
            created_at: now - Duration::days(id),
        })
    }

    fn membership(id: i64, expires_in_days: i64) -> Grant {
        let now = Utc::now();
        Grant::Membership(MembershipGrant {
            id,
            user_id: 1,
            discipline_id: 1,
            remaining_free_classes: 4,
            used_free_classes: 0,
            status: GrantStatus::Active,
            activation_date: now - Duration::days(1),
            expiry_date: now + Duration::days(expires_in_days),
            created_at: now - Duration::days(id),
        })
    }

    #[test]
    fn empty_list_selects_nothing() {
        assert_eq!(select_credit(&[]), None);
    }

    #[test]
    fn membership_beats_package_even_when_package_expires_sooner() {
        // Membership expiring in 2 days vs package expiring in 30: the
        // membership is consumed first regardless of relative expiry.
        let grants = vec![package(1, 30), membership(2, 2)];
        assert_eq!(select_credit(&grants), Some(GrantRef::Membership(2)));

        let grants = vec![package(1, 1), membership(2, 60)];
        assert_eq!(select_credit(&grants), Some(GrantRef::Membership(2)));
    }

    #[test]
    fn soonest_expiry_wins_within_a_kind() {
        let grants = vec![package(1, 30), package(2, 5), package(3, 90)];
        assert_eq!(select_credit(&grants), Some(GrantRef::Package(2)));
    }

    proptest! {
        // The selection never depends on list order.
        #[test]
        fn selection_is_order_independent(seed in 0usize..6) {
            let mut grants = vec![
                package(1, 30),
                package(2, 5),
                membership(3, 10),
                membership(4, 40),
            ];
            let grants_len = grants.len();
            grants.rotate_left(seed % grants_len);
            prop_assert_eq!(select_credit(&grants), Some(GrantRef::Membership(3)));
        }
    }
}
