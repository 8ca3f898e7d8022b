use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Employee {
    pub id: u64,
    pub user_id: Option<u64>,
    pub name: String,
    /// Pay per hour.
    pub rate: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
