use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::errors::BookingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "grant_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Package,
    Membership,
}

/// Which grant paid for a seat. Written into the seat assignment so the
/// release path knows where to refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GrantRef {
    Package(i64),
    Membership(i64),
}

impl GrantRef {
    pub fn from_parts(kind: CreditKind, id: i64) -> Self {
        match kind {
            CreditKind::Package => GrantRef::Package(id),
            CreditKind::Membership => GrantRef::Membership(id),
        }
    }

    pub fn kind(&self) -> CreditKind {
        match self {
            GrantRef::Package(_) => CreditKind::Package,
            GrantRef::Membership(_) => CreditKind::Membership,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            GrantRef::Package(id) | GrantRef::Membership(id) => *id,
        }
    }
}

impl std::fmt::Display for GrantRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantRef::Package(id) => write!(f, "package:{}", id),
            GrantRef::Membership(id) => write!(f, "membership:{}", id),
        }
    }
}

/// A purchased bundle of class credits, valid for the disciplines of its
/// product. Counters only move through `debit`/`credit`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PackageGrant {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub total_classes: i32,
    pub used_classes: i32,
    pub remaining_classes: i32,
    pub status: GrantStatus,
    pub activation_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A recurring complimentary allowance scoped to exactly one discipline.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MembershipGrant {
    pub id: i64,
    pub user_id: i64,
    pub discipline_id: i64,
    pub remaining_free_classes: i32,
    pub used_free_classes: i32,
    pub status: GrantStatus,
    pub activation_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PackageGrant {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active
            && self.activation_date <= now
            && now < self.expiry_date
    }

    pub fn debit(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        if !self.is_active(now) {
            return Err(BookingError::GrantNotActive(GrantRef::Package(self.id)));
        }
        if self.remaining_classes < 1 {
            return Err(BookingError::InsufficientCredit(GrantRef::Package(self.id)));
        }
        self.used_classes += 1;
        self.remaining_classes -= 1;
        Ok(())
    }

    pub fn credit(&mut self) -> Result<(), BookingError> {
        if self.used_classes < 1 {
            return Err(BookingError::RefundMismatch(GrantRef::Package(self.id)));
        }
        self.used_classes -= 1;
        self.remaining_classes += 1;
        Ok(())
    }
}

impl MembershipGrant {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active
            && self.activation_date <= now
            && now < self.expiry_date
    }

    pub fn debit(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        if !self.is_active(now) {
            return Err(BookingError::GrantNotActive(GrantRef::Membership(self.id)));
        }
        if self.remaining_free_classes < 1 {
            return Err(BookingError::InsufficientCredit(GrantRef::Membership(self.id)));
        }
        self.used_free_classes += 1;
        self.remaining_free_classes -= 1;
        Ok(())
    }

    pub fn credit(&mut self) -> Result<(), BookingError> {
        if self.used_free_classes < 1 {
            return Err(BookingError::RefundMismatch(GrantRef::Membership(self.id)));
        }
        self.used_free_classes -= 1;
        self.remaining_free_classes += 1;
        Ok(())
    }
}

/// Credit source polymorphism: ledger and policy are written once against
/// this union instead of per concrete grant type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    Package(PackageGrant),
    Membership(MembershipGrant),
}

impl Grant {
    pub fn grant_ref(&self) -> GrantRef {
        match self {
            Grant::Package(g) => GrantRef::Package(g.id),
            Grant::Membership(g) => GrantRef::Membership(g.id),
        }
    }

    pub fn user_id(&self) -> i64 {
        match self {
            Grant::Package(g) => g.user_id,
            Grant::Membership(g) => g.user_id,
        }
    }

    pub fn balance(&self) -> i32 {
        match self {
            Grant::Package(g) => g.remaining_classes,
            Grant::Membership(g) => g.remaining_free_classes,
        }
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        match self {
            Grant::Package(g) => g.expiry_date,
            Grant::Membership(g) => g.expiry_date,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Grant::Package(g) => g.created_at,
            Grant::Membership(g) => g.created_at,
        }
    }

    pub fn is_membership(&self) -> bool {
        matches!(self, Grant::Membership(_))
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            Grant::Package(g) => g.is_active(now),
            Grant::Membership(g) => g.is_active(now),
        }
    }

    pub fn debit(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        match self {
            Grant::Package(g) => g.debit(now),
            Grant::Membership(g) => g.debit(now),
        }
    }

    pub fn credit(&mut self) -> Result<(), BookingError> {
        match self {
            Grant::Package(g) => g.credit(),
            Grant::Membership(g) => g.credit(),
        }
    }
}
