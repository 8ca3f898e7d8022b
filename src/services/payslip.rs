//! Payslip persistence: deriving lines from attendance and keeping stored
//! totals equal to the fold over the current lines.
//!
//! Every function here expects to run inside a transaction that already holds
//! the payslip row lock (`lock_payslip`).

use rust_decimal::Decimal;
use sqlx::MySqlConnection;
use tracing::{debug, warn};

use super::parse_stored;
use crate::domain::deductions::PeriodType;
use crate::domain::hours::total_hours;
use crate::domain::payslip::{
    DeductionType, DerivedLines, EarningType, Line, PayslipStatus, PayslipTotals, ReconcileMode,
    check_totals, derive_lines, needs_derivation,
};
use crate::error::AppError;
use crate::model::attendance::AttendanceDay;
use crate::model::payroll::{Deduction, Earning, Payslip};

const PAYSLIP_COLUMNS: &str =
    "id, payroll_run_id, employee_id, gross_pay, total_deductions, net_pay, status";

pub async fn lock_payslip(
    conn: &mut MySqlConnection,
    payslip_id: u64,
) -> Result<Option<Payslip>, sqlx::Error> {
    sqlx::query_as::<_, Payslip>(&format!(
        "SELECT {} FROM payslips WHERE id = ? FOR UPDATE",
        PAYSLIP_COLUMNS
    ))
    .bind(payslip_id)
    .fetch_optional(conn)
    .await
}

pub async fn payslips_for_run(
    conn: &mut MySqlConnection,
    run_id: u64,
) -> Result<Vec<Payslip>, sqlx::Error> {
    sqlx::query_as::<_, Payslip>(&format!(
        "SELECT {} FROM payslips WHERE payroll_run_id = ? ORDER BY employee_id FOR UPDATE",
        PAYSLIP_COLUMNS
    ))
    .bind(run_id)
    .fetch_all(conn)
    .await
}

pub async fn load_lines(
    conn: &mut MySqlConnection,
    payslip_id: u64,
) -> Result<(Vec<Earning>, Vec<Deduction>), sqlx::Error> {
    let earnings = sqlx::query_as::<_, Earning>(
        r#"
        SELECT id, payslip_id, earning_type, amount, description
        FROM payslip_earnings
        WHERE payslip_id = ?
        ORDER BY id
        "#,
    )
    .bind(payslip_id)
    .fetch_all(&mut *conn)
    .await?;

    let deductions = sqlx::query_as::<_, Deduction>(
        r#"
        SELECT id, payslip_id, deduction_type, amount, description
        FROM payslip_deductions
        WHERE payslip_id = ?
        ORDER BY id
        "#,
    )
    .bind(payslip_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok((earnings, deductions))
}

/// Total attendance hours for one employee in one pay period.
pub async fn attendance_hours(
    conn: &mut MySqlConnection,
    employee_id: u64,
    pay_period_id: u64,
) -> Result<Decimal, sqlx::Error> {
    let days = sqlx::query_as::<_, AttendanceDay>(
        r#"
        SELECT d.id, d.attendance_id, d.date, d.present, d.hours_worked, d.clock_in, d.clock_out
        FROM attendance_days d
        JOIN attendance a ON a.id = d.attendance_id
        WHERE a.employee_id = ? AND a.pay_period_id = ?
        "#,
    )
    .bind(employee_id)
    .bind(pay_period_id)
    .fetch_all(conn)
    .await?;

    Ok(total_hours(&days))
}

/// Rate, pay period and pay frequency a payslip is computed against.
async fn pay_context(
    conn: &mut MySqlConnection,
    payslip: &Payslip,
) -> Result<(Decimal, u64, PeriodType), AppError> {
    let row = sqlx::query_as::<_, (Decimal, u64, String)>(
        r#"
        SELECT e.rate, p.id, p.period_type
        FROM payroll_runs r
        JOIN pay_periods p ON p.id = r.pay_period_id
        JOIN employees e ON e.id = ?
        WHERE r.id = ?
        "#,
    )
    .bind(payslip.employee_id)
    .bind(payslip.payroll_run_id)
    .fetch_optional(conn)
    .await?;

    let (rate, period_id, period_type) =
        row.ok_or_else(|| AppError::not_found("Employee or pay period"))?;
    Ok((rate, period_id, parse_stored(&period_type, "period type")?))
}

pub async fn insert_earnings(
    conn: &mut MySqlConnection,
    payslip_id: u64,
    lines: &[Line<EarningType>],
) -> Result<(), sqlx::Error> {
    for line in lines {
        sqlx::query(
            "INSERT INTO payslip_earnings (payslip_id, earning_type, amount, description) VALUES (?, ?, ?, ?)",
        )
        .bind(payslip_id)
        .bind(line.kind.as_ref())
        .bind(line.amount)
        .bind(&line.description)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn insert_deductions(
    conn: &mut MySqlConnection,
    payslip_id: u64,
    lines: &[Line<DeductionType>],
) -> Result<(), sqlx::Error> {
    for line in lines {
        sqlx::query(
            "INSERT INTO payslip_deductions (payslip_id, deduction_type, amount, description) VALUES (?, ?, ?, ?)",
        )
        .bind(payslip_id)
        .bind(line.kind.as_ref())
        .bind(line.amount)
        .bind(&line.description)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn replace_earnings(
    conn: &mut MySqlConnection,
    payslip_id: u64,
    lines: &[Line<EarningType>],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM payslip_earnings WHERE payslip_id = ?")
        .bind(payslip_id)
        .execute(&mut *conn)
        .await?;
    insert_earnings(conn, payslip_id, lines).await
}

pub async fn replace_deductions(
    conn: &mut MySqlConnection,
    payslip_id: u64,
    lines: &[Line<DeductionType>],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM payslip_deductions WHERE payslip_id = ?")
        .bind(payslip_id)
        .execute(&mut *conn)
        .await?;
    insert_deductions(conn, payslip_id, lines).await
}

/// Computes the regular earning and statutory deductions from attendance and
/// inserts them. Callers decide whether existing lines must go first.
pub async fn derive_from_attendance(
    conn: &mut MySqlConnection,
    payslip: &Payslip,
) -> Result<DerivedLines, AppError> {
    let (rate, pay_period_id, period_type) = pay_context(&mut *conn, payslip).await?;
    let hours = attendance_hours(&mut *conn, payslip.employee_id, pay_period_id).await?;
    let lines = derive_lines(hours, rate, period_type);

    insert_earnings(&mut *conn, payslip.id, std::slice::from_ref(&lines.earning)).await?;
    insert_deductions(&mut *conn, payslip.id, &lines.deductions).await?;

    debug!(
        payslip_id = payslip.id,
        hours = %lines.total_hours,
        gross = %lines.earning.amount,
        deductions = lines.deductions.len(),
        "Derived payslip lines from attendance"
    );
    Ok(lines)
}

/// Where `ensure_derived` counts and writes payslip lines.
#[allow(async_fn_in_trait)]
pub trait PayslipLines {
    async fn earning_count(&mut self, payslip_id: u64) -> Result<usize, AppError>;
    async fn derive(&mut self, payslip: &Payslip) -> Result<DerivedLines, AppError>;
}

impl PayslipLines for MySqlConnection {
    async fn earning_count(&mut self, payslip_id: u64) -> Result<usize, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payslip_earnings WHERE payslip_id = ?",
        )
        .bind(payslip_id)
        .fetch_one(&mut *self)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn derive(&mut self, payslip: &Payslip) -> Result<DerivedLines, AppError> {
        derive_from_attendance(self, payslip).await
    }
}

/// Derives lines for a draft payslip that has no earnings yet. Safe to call
/// repeatedly: against MySQL the count runs under the payslip row lock.
pub async fn ensure_derived<S: PayslipLines>(
    store: &mut S,
    payslip: &Payslip,
) -> Result<bool, AppError> {
    let status: PayslipStatus = parse_stored(&payslip.status, "payslip status")?;
    let earning_count = store.earning_count(payslip.id).await?;

    if !needs_derivation(status, earning_count) {
        return Ok(false);
    }

    store.derive(payslip).await?;
    Ok(true)
}

/// Outcome of comparing stored totals with the current lines.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub totals: PayslipTotals,
    pub earnings: Vec<Earning>,
    pub deductions: Vec<Deduction>,
    /// Stored figures are not exactly what the lines add up to.
    pub was_stale: bool,
}

/// Recomputes totals from the current lines and writes them back to a draft
/// payslip as `mode` requires. Final payslips are never written.
pub async fn reconcile(
    conn: &mut MySqlConnection,
    payslip: &Payslip,
    mode: ReconcileMode,
) -> Result<Reconciled, AppError> {
    let status: PayslipStatus = parse_stored(&payslip.status, "payslip status")?;
    let (earnings, deductions) = load_lines(&mut *conn, payslip.id).await?;

    let totals = PayslipTotals::from_lines(
        earnings.iter().map(|e| e.amount),
        deductions.iter().map(|d| d.amount),
    );
    let check = check_totals(status, mode, &totals, &payslip.stored_totals());

    if check.persist {
        sqlx::query(
            "UPDATE payslips SET gross_pay = ?, total_deductions = ?, net_pay = ? WHERE id = ?",
        )
        .bind(totals.gross_pay)
        .bind(totals.total_deductions)
        .bind(totals.net_pay)
        .bind(payslip.id)
        .execute(&mut *conn)
        .await?;
    } else if check.mismatch && status == PayslipStatus::Final {
        warn!(
            payslip_id = payslip.id,
            stored_net = %payslip.net_pay,
            computed_net = %totals.net_pay,
            "Final payslip totals disagree with its lines"
        );
    }

    Ok(Reconciled {
        totals,
        earnings,
        deductions,
        was_stale: check.mismatch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// Lines kept in memory, derived from a fixed number of hours.
    struct MemoryLines {
        hours: Decimal,
        rate: Decimal,
        earnings: Vec<Line<EarningType>>,
        deductions: Vec<Line<DeductionType>>,
    }

    impl PayslipLines for MemoryLines {
        async fn earning_count(&mut self, _payslip_id: u64) -> Result<usize, AppError> {
            Ok(self.earnings.len())
        }

        async fn derive(&mut self, _payslip: &Payslip) -> Result<DerivedLines, AppError> {
            let lines = derive_lines(self.hours, self.rate, PeriodType::Monthly);
            self.earnings.push(lines.earning.clone());
            self.deductions.extend(lines.deductions.iter().cloned());
            Ok(lines)
        }
    }

    fn payslip(status: &str) -> Payslip {
        Payslip {
            id: 5,
            payroll_run_id: 1,
            employee_id: 3,
            gross_pay: Decimal::ZERO,
            total_deductions: Decimal::ZERO,
            net_pay: Decimal::ZERO,
            status: status.into(),
        }
    }

    fn store() -> MemoryLines {
        MemoryLines {
            hours: dec!(40),
            rate: dec!(150),
            earnings: Vec::new(),
            deductions: Vec::new(),
        }
    }

    #[actix_web::test]
    async fn repeated_derivation_keeps_one_regular_earning() {
        let mut lines = store();
        let draft = payslip("draft");

        assert!(ensure_derived(&mut lines, &draft).await.unwrap());
        assert!(!ensure_derived(&mut lines, &draft).await.unwrap());

        let regular = lines
            .earnings
            .iter()
            .filter(|e| e.kind == EarningType::Regular)
            .count();
        assert_eq!(regular, 1);
        assert_eq!(lines.earnings[0].amount, dec!(6000.00));
        assert_eq!(lines.deductions.len(), 3);
    }

    #[actix_web::test]
    async fn final_payslips_are_not_derived() {
        let mut lines = store();
        assert!(!ensure_derived(&mut lines, &payslip("final")).await.unwrap());
        assert!(lines.earnings.is_empty());
    }

    #[actix_web::test]
    async fn manual_earnings_block_derivation() {
        let mut lines = store();
        lines.earnings.push(Line {
            kind: EarningType::Bonus,
            amount: dec!(500),
            description: "Holiday bonus".into(),
        });

        assert!(!ensure_derived(&mut lines, &payslip("draft")).await.unwrap());
        assert_eq!(lines.earnings.len(), 1);
    }
}
