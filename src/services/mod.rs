pub mod ledger;
pub mod notifier;
pub mod policy;
pub mod promoter;
pub mod reservation;
pub mod seat_layout;
pub mod sweeper;

pub use ledger::CreditLedger;
pub use notifier::{NoopNotifier, NotificationEvent, NotificationSender, WebhookNotifier};
pub use promoter::WaitingListPromoter;
pub use reservation::ReservationEngine;
pub use seat_layout::{PgSeatLayout, SeatLayoutProvider};
pub use sweeper::ExpirationSweeper;
