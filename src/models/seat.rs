use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A physical position in a studio. Long-lived, independent of any
/// class occurrence.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub studio_id: i64,
    pub row: i32,
    pub number: i32,
}
