pub mod assignment;
pub mod grant;
pub mod occurrence;
pub mod seat;
pub mod user;
pub mod waiting_list;

pub use assignment::{AssignmentPatch, SeatAction, SeatAssignment, SeatStatus};
pub use grant::{CreditKind, Grant, GrantRef, GrantStatus, MembershipGrant, PackageGrant};
pub use occurrence::{ClassOccurrence, OccurrenceStatus};
pub use seat::Seat;
pub use user::User;
pub use waiting_list::{WaitingListEntry, WaitingStatus};
