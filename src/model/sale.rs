use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::sale::LinePricing;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sale {
    pub id: u64,
    pub customer_id: Option<u64>,
    pub cashier_id: u64,
    pub status: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub change_due: Decimal,
    pub void_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SaleItem {
    pub id: u64,
    pub sale_id: u64,
    pub product_id: u64,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub line_total: Decimal,
}

impl SaleItem {
    pub fn pricing(&self) -> LinePricing {
        LinePricing {
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount: self.discount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SalePayment {
    pub id: u64,
    pub sale_id: u64,
    pub method: String,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}
