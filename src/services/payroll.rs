use sqlx::MySqlConnection;
use tracing::{debug, info};

use super::parse_stored;
use super::payslip::{derive_from_attendance, ensure_derived, payslips_for_run, reconcile};
use crate::domain::payslip::{PayrollRunStatus, PayslipStatus, ReconcileMode};
use crate::error::AppError;
use crate::model::pay_period::PayPeriod;
use crate::model::payroll::Payslip;

/// Moves attendance submitted without a pay period into `period` when its
/// days fall inside the period's dates. Returns how many orphan rows were
/// touched.
///
/// Days are merged into the employee's existing attendance for the period
/// when there is one; on a date clash the existing day wins.
pub async fn adopt_orphan_attendance(
    conn: &mut MySqlConnection,
    period: &PayPeriod,
) -> Result<u64, sqlx::Error> {
    let orphans = sqlx::query_as::<_, (u64, u64)>(
        r#"
        SELECT DISTINCT a.id, a.employee_id
        FROM attendance a
        JOIN attendance_days d ON d.attendance_id = a.id
        WHERE a.pay_period_id IS NULL
          AND d.date BETWEEN ? AND ?
        ORDER BY a.id
        FOR UPDATE
        "#,
    )
    .bind(period.start_date)
    .bind(period.end_date)
    .fetch_all(&mut *conn)
    .await?;

    for (orphan_id, employee_id) in &orphans {
        let outside = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM attendance_days
            WHERE attendance_id = ? AND (date < ? OR date > ?)
            "#,
        )
        .bind(orphan_id)
        .bind(period.start_date)
        .bind(period.end_date)
        .fetch_one(&mut *conn)
        .await?;

        let existing = sqlx::query_scalar::<_, u64>(
            "SELECT id FROM attendance WHERE employee_id = ? AND pay_period_id = ? FOR UPDATE",
        )
        .bind(employee_id)
        .bind(period.id)
        .fetch_optional(&mut *conn)
        .await?;

        let target = match existing {
            None if outside == 0 => {
                sqlx::query("UPDATE attendance SET pay_period_id = ? WHERE id = ?")
                    .bind(period.id)
                    .bind(orphan_id)
                    .execute(&mut *conn)
                    .await?;
                debug!(attendance_id = orphan_id, pay_period_id = period.id, "Adopted orphan attendance");
                continue;
            }
            None => sqlx::query(
                "INSERT INTO attendance (employee_id, pay_period_id, status) VALUES (?, ?, 'on_time')",
            )
            .bind(employee_id)
            .bind(period.id)
            .execute(&mut *conn)
            .await?
            .last_insert_id(),
            Some(id) => id,
        };

        sqlx::query(
            r#"
            UPDATE IGNORE attendance_days
            SET attendance_id = ?
            WHERE attendance_id = ? AND date BETWEEN ? AND ?
            "#,
        )
        .bind(target)
        .bind(orphan_id)
        .bind(period.start_date)
        .bind(period.end_date)
        .execute(&mut *conn)
        .await?;

        // leftovers are dates the target already had
        sqlx::query("DELETE FROM attendance_days WHERE attendance_id = ? AND date BETWEEN ? AND ?")
            .bind(orphan_id)
            .bind(period.start_date)
            .bind(period.end_date)
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM attendance
            WHERE id = ?
              AND NOT EXISTS (SELECT 1 FROM attendance_days WHERE attendance_id = ?)
            "#,
        )
        .bind(orphan_id)
        .bind(orphan_id)
        .execute(&mut *conn)
        .await?;

        debug!(attendance_id = orphan_id, target, "Merged orphan attendance days");
    }

    Ok(orphans.len() as u64)
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub run_id: u64,
    pub payslips: u64,
    pub adopted_attendance: u64,
}

/// Creates the payroll run for `period` with one payslip per employee that
/// has attendance in it.
pub async fn create_run(
    conn: &mut MySqlConnection,
    period: &PayPeriod,
    created_by: u64,
) -> Result<RunSummary, AppError> {
    let existing = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM payroll_runs WHERE pay_period_id = ? FOR UPDATE",
    )
    .bind(period.id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(run_id) = existing {
        return Err(AppError::Conflict(format!(
            "Payroll run {} already exists for this pay period",
            run_id
        )));
    }

    let run_id = sqlx::query(
        "INSERT INTO payroll_runs (pay_period_id, status, created_by) VALUES (?, ?, ?)",
    )
    .bind(period.id)
    .bind(PayrollRunStatus::Draft.as_ref())
    .bind(created_by)
    .execute(&mut *conn)
    .await?
    .last_insert_id();

    let adopted_attendance = adopt_orphan_attendance(&mut *conn, period).await?;

    let employees = sqlx::query_scalar::<_, u64>(
        "SELECT DISTINCT employee_id FROM attendance WHERE pay_period_id = ? ORDER BY employee_id",
    )
    .bind(period.id)
    .fetch_all(&mut *conn)
    .await?;

    for employee_id in &employees {
        let payslip_id = sqlx::query(
            "INSERT INTO payslips (payroll_run_id, employee_id, status) VALUES (?, ?, ?)",
        )
        .bind(run_id)
        .bind(employee_id)
        .bind(PayslipStatus::Draft.as_ref())
        .execute(&mut *conn)
        .await?
        .last_insert_id();

        let payslip = Payslip {
            id: payslip_id,
            payroll_run_id: run_id,
            employee_id: *employee_id,
            gross_pay: Default::default(),
            total_deductions: Default::default(),
            net_pay: Default::default(),
            status: PayslipStatus::Draft.to_string(),
        };
        derive_from_attendance(&mut *conn, &payslip).await?;
        reconcile(&mut *conn, &payslip, ReconcileMode::Force).await?;
    }

    info!(
        run_id,
        pay_period_id = period.id,
        payslips = employees.len(),
        adopted_attendance,
        "Payroll run created"
    );

    Ok(RunSummary {
        run_id,
        payslips: employees.len() as u64,
        adopted_attendance,
    })
}

/// Reconciles every payslip of a draft run, then locks them as final.
pub async fn finalize_run(conn: &mut MySqlConnection, run_id: u64) -> Result<u64, AppError> {
    let status = sqlx::query_scalar::<_, String>(
        "SELECT status FROM payroll_runs WHERE id = ? FOR UPDATE",
    )
    .bind(run_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Payroll run"))?;

    let status: PayrollRunStatus = parse_stored(&status, "payroll run status")?;
    if status != PayrollRunStatus::Draft {
        return Err(AppError::Conflict("Payroll run is already finalized".into()));
    }

    let payslips = payslips_for_run(&mut *conn, run_id).await?;
    for payslip in &payslips {
        let payslip_status: PayslipStatus = parse_stored(&payslip.status, "payslip status")?;
        if payslip_status != PayslipStatus::Draft {
            continue;
        }
        ensure_derived(&mut *conn, payslip).await?;
        reconcile(&mut *conn, payslip, ReconcileMode::Force).await?;
    }

    sqlx::query("UPDATE payslips SET status = ? WHERE payroll_run_id = ?")
        .bind(PayslipStatus::Final.as_ref())
        .bind(run_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE payroll_runs SET status = ?, finalized_at = NOW() WHERE id = ?")
        .bind(PayrollRunStatus::Finalized.as_ref())
        .bind(run_id)
        .execute(&mut *conn)
        .await?;

    info!(run_id, payslips = payslips.len(), "Payroll run finalized");
    Ok(payslips.len() as u64)
}
