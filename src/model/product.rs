use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: u64,
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub reorder_level: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.reorder_level
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockMovement {
    pub id: u64,
    pub product_id: u64,
    pub change_qty: i32,
    pub reason: String,
    pub reference: Option<String>,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
}
