use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attendance {
    pub id: u64,
    pub employee_id: u64,
    /// None until a payroll run adopts it.
    pub pay_period_id: Option<u64>,
    pub submitted_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttendanceDay {
    pub id: u64,
    pub attendance_id: u64,
    pub date: NaiveDate,
    pub present: bool,
    pub hours_worked: Option<Decimal>,
    pub clock_in: Option<NaiveTime>,
    pub clock_out: Option<NaiveTime>,
}
