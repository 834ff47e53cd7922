pub mod admin;
pub mod bookings;
pub mod occurrences;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(occurrences::routes())
        .merge(bookings::routes())
        .merge(admin::routes())
}
