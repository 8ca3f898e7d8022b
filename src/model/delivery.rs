use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: u64,
    pub tracking_number: String,
    pub sale_id: Option<u64>,
    pub customer_id: Option<u64>,
    pub address: String,
    pub driver_id: Option<u64>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryStatusUpdate {
    pub id: u64,
    pub delivery_id: u64,
    pub status: String,
    pub note: Option<String>,
    pub updated_by: Option<u64>,
    pub created_at: DateTime<Utc>,
}
