use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::payslip::PayslipTotals;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PayrollRun {
    pub id: u64,
    pub pay_period_id: u64,
    pub status: String,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payslip {
    pub id: u64,
    pub payroll_run_id: u64,
    pub employee_id: u64,
    pub gross_pay: Decimal,
    pub total_deductions: Decimal,
    pub net_pay: Decimal,
    pub status: String,
}

impl Payslip {
    pub fn stored_totals(&self) -> PayslipTotals {
        PayslipTotals {
            gross_pay: self.gross_pay,
            total_deductions: self.total_deductions,
            net_pay: self.net_pay,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Earning {
    pub id: u64,
    pub payslip_id: u64,
    pub earning_type: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deduction {
    pub id: u64,
    pub payslip_id: u64,
    pub deduction_type: String,
    pub amount: Decimal,
    pub description: Option<String>,
}
