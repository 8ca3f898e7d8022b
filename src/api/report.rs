use actix_web::{HttpResponse, Responder, http::header, web};
use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::MySqlPool;
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use tracing::info;
use utoipa::IntoParams;

use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::delivery::DeliveryStatus;
use crate::domain::hours::day_hours;
use crate::domain::money::to_fixed;
use crate::error::{ApiResult, AppError};
use crate::report::{
    ReportFormat, ReportKind, ReportTable, csv_export::to_csv, pdf_export::to_pdf,
};

/// Window used when neither `from` nor `to` is given.
const DEFAULT_RANGE_DAYS: u64 = 30;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    /// json (default), csv or pdf
    pub format: Option<ReportFormat>,
    /// First day, inclusive (YYYY-MM-DD)
    pub from: Option<NaiveDate>,
    /// Last day, inclusive (YYYY-MM-DD)
    pub to: Option<NaiveDate>,
    /// Required for the payroll report
    pub payroll_run_id: Option<u64>,
}

fn resolve_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), AppError> {
    let to = to.unwrap_or(today);
    let from = match from {
        Some(d) => d,
        None => to
            .checked_sub_days(Days::new(DEFAULT_RANGE_DAYS - 1))
            .unwrap_or(NaiveDate::MIN),
    };
    if from > to {
        return Err(AppError::validation("from", "from must not be after to"));
    }
    Ok((from, to))
}

fn sales_table(from: NaiveDate, to: NaiveDate, rows: Vec<(NaiveDate, i64, Decimal)>) -> ReportTable {
    let mut table = ReportTable::new(
        format!("Sales {} to {}", from, to),
        ["Date", "Sales", "Revenue"],
    );
    let mut count = 0;
    let mut revenue = Decimal::ZERO;
    for (day, n, total) in rows {
        count += n;
        revenue += total;
        table.push_row(vec![day.to_string(), n.to_string(), to_fixed(total)]);
    }
    table.push_row(vec!["Total".into(), count.to_string(), to_fixed(revenue)]);
    table
}

/// One row per status, including statuses with no deliveries.
fn status_counts(rows: &[(String, i64)]) -> Vec<(DeliveryStatus, i64)> {
    DeliveryStatus::iter()
        .map(|status| {
            let n = rows
                .iter()
                .filter(|(s, _)| s == status.as_ref())
                .map(|(_, n)| *n)
                .sum::<i64>();
            (status, n)
        })
        .collect()
}

struct AttendanceTally {
    name: String,
    days_present: u32,
    hours: Decimal,
}

/// Folds day rows `(employee_id, name, present, hours_worked)` into per-employee
/// totals, ordered by name.
fn tally_attendance(rows: Vec<(u64, String, bool, Option<Decimal>)>) -> Vec<AttendanceTally> {
    let mut by_employee: BTreeMap<u64, AttendanceTally> = BTreeMap::new();
    for (employee_id, name, present, hours_worked) in rows {
        let entry = by_employee.entry(employee_id).or_insert_with(|| AttendanceTally {
            name,
            days_present: 0,
            hours: Decimal::ZERO,
        });
        if present {
            entry.days_present += 1;
        }
        entry.hours += day_hours(present, hours_worked);
    }

    let mut out: Vec<AttendanceTally> = by_employee.into_values().collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

async fn sales_report(pool: &MySqlPool, from: NaiveDate, to: NaiveDate) -> ApiResult<ReportTable> {
    let rows = sqlx::query_as::<_, (NaiveDate, i64, Decimal)>(
        r#"
        SELECT DATE(completed_at) AS day, COUNT(*), COALESCE(SUM(total), 0)
        FROM sales
        WHERE status = 'completed'
          AND completed_at >= ?
          AND completed_at < DATE_ADD(?, INTERVAL 1 DAY)
        GROUP BY DATE(completed_at)
        ORDER BY day
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(sales_table(from, to, rows))
}

async fn inventory_report(pool: &MySqlPool) -> ApiResult<ReportTable> {
    let rows = sqlx::query_as::<_, (String, String, String, i32, i32, Decimal)>(
        r#"
        SELECT sku, name, unit, stock_quantity, reorder_level, price
        FROM products
        WHERE active = TRUE
        ORDER BY sku
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut table = ReportTable::new(
        "Inventory levels",
        ["SKU", "Name", "Unit", "Stock", "Reorder level", "Price", "Status"],
    );
    for (sku, name, unit, stock, reorder, price) in rows {
        let status = if stock <= reorder { "LOW" } else { "OK" };
        table.push_row(vec![
            sku,
            name,
            unit,
            stock.to_string(),
            reorder.to_string(),
            to_fixed(price),
            status.into(),
        ]);
    }
    Ok(table)
}

async fn payroll_report(pool: &MySqlPool, run_id: Option<u64>) -> ApiResult<ReportTable> {
    let run_id = run_id
        .ok_or_else(|| AppError::validation("payrollRunId", "payrollRunId is required"))?;

    let period = sqlx::query_as::<_, (NaiveDate, NaiveDate, String)>(
        r#"
        SELECT pp.start_date, pp.end_date, pr.status
        FROM payroll_runs pr
        JOIN pay_periods pp ON pp.id = pr.pay_period_id
        WHERE pr.id = ?
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Payroll run"))?;

    let rows = sqlx::query_as::<_, (String, Decimal, Decimal, Decimal, String)>(
        r#"
        SELECT e.name, ps.gross_pay, ps.total_deductions, ps.net_pay, ps.status
        FROM payslips ps
        JOIN employees e ON e.id = ps.employee_id
        WHERE ps.payroll_run_id = ?
        ORDER BY e.name
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    let (start, end, status) = period;
    let mut table = ReportTable::new(
        format!("Payroll run #{} ({} to {}, {})", run_id, start, end, status),
        ["Employee", "Gross pay", "Deductions", "Net pay", "Status"],
    );
    let (mut gross, mut deductions, mut net) = (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
    for (name, g, d, n, slip_status) in rows {
        gross += g;
        deductions += d;
        net += n;
        table.push_row(vec![name, to_fixed(g), to_fixed(d), to_fixed(n), slip_status]);
    }
    table.push_row(vec![
        "Total".into(),
        to_fixed(gross),
        to_fixed(deductions),
        to_fixed(net),
    ]);
    Ok(table)
}

async fn deliveries_report(pool: &MySqlPool, from: NaiveDate, to: NaiveDate) -> ApiResult<ReportTable> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT status, COUNT(*)
        FROM deliveries
        WHERE created_at >= ? AND created_at < DATE_ADD(?, INTERVAL 1 DAY)
        GROUP BY status
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    let mut table = ReportTable::new(
        format!("Deliveries {} to {}", from, to),
        ["Status", "Deliveries"],
    );
    for (status, n) in status_counts(&rows) {
        table.push_row(vec![status.to_string(), n.to_string()]);
    }
    Ok(table)
}

async fn attendance_report(pool: &MySqlPool, from: NaiveDate, to: NaiveDate) -> ApiResult<ReportTable> {
    let rows = sqlx::query_as::<_, (u64, String, bool, Option<Decimal>)>(
        r#"
        SELECT e.id, e.name, d.present, d.hours_worked
        FROM attendance_days d
        JOIN attendance a ON a.id = d.attendance_id
        JOIN employees e ON e.id = a.employee_id
        WHERE d.date BETWEEN ? AND ?
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    let mut table = ReportTable::new(
        format!("Attendance {} to {}", from, to),
        ["Employee", "Days present", "Hours"],
    );
    for t in tally_attendance(rows) {
        table.push_row(vec![t.name, t.days_present.to_string(), to_fixed(t.hours)]);
    }
    Ok(table)
}

fn render(table: ReportTable, kind: ReportKind, format: ReportFormat) -> ApiResult<HttpResponse> {
    let response = match format {
        ReportFormat::Json => HttpResponse::Ok().json(table),
        ReportFormat::Csv => HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}-report.csv\"", kind),
            ))
            .body(to_csv(&table)?),
        ReportFormat::Pdf => HttpResponse::Ok()
            .content_type("application/pdf")
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}-report.pdf\"", kind),
            ))
            .body(to_pdf(&table)?),
    };
    Ok(response)
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{kind}",
    params(
        ("kind" = ReportKind, Path, description = "sales, inventory, payroll, deliveries or attendance"),
        ReportQuery
    ),
    responses(
        (status = 200, description = "Report table as JSON, CSV or PDF", body = ReportTable),
        (status = 400, description = "Bad date range or missing payrollRunId"),
        (status = 404, description = "Unknown report kind or payroll run")
    ),
    tag = "Report",
    security(("bearer_auth" = []))
)]
pub async fn get_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
    query: web::Query<ReportQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewReports)?;
    let kind: ReportKind = path
        .parse()
        .map_err(|_| AppError::NotFound(format!("Unknown report: {}", path.as_str())))?;
    let format = query.format.unwrap_or_default();
    let (from, to) = resolve_range(query.from, query.to, Utc::now().date_naive())?;

    let table = match kind {
        ReportKind::Sales => sales_report(pool.get_ref(), from, to).await?,
        ReportKind::Inventory => inventory_report(pool.get_ref()).await?,
        ReportKind::Payroll => payroll_report(pool.get_ref(), query.payroll_run_id).await?,
        ReportKind::Deliveries => deliveries_report(pool.get_ref(), from, to).await?,
        ReportKind::Attendance => attendance_report(pool.get_ref(), from, to).await?,
    };

    info!(user_id = auth.user_id, %kind, ?format, rows = table.rows.len(), "Report generated");
    render(table, kind, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn range_defaults_to_last_thirty_days() {
        let today = date(2026, 3, 31);
        assert_eq!(resolve_range(None, None, today).unwrap(), (date(2026, 3, 2), today));
        assert_eq!(
            resolve_range(Some(date(2026, 3, 1)), None, today).unwrap(),
            (date(2026, 3, 1), today)
        );
        assert!(resolve_range(Some(date(2026, 4, 1)), Some(date(2026, 3, 1)), today).is_err());
    }

    #[test]
    fn sales_table_ends_with_totals() {
        let table = sales_table(
            date(2026, 3, 1),
            date(2026, 3, 2),
            vec![(date(2026, 3, 1), 3, dec!(1250.50)), (date(2026, 3, 2), 1, dec!(99.5))],
        );
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[1], vec!["2026-03-02", "1", "99.50"]);
        assert_eq!(table.rows[2], vec!["Total", "4", "1350.00"]);
    }

    #[test]
    fn every_delivery_status_is_listed() {
        let counts = status_counts(&[("in_transit".into(), 4), ("delivered".into(), 9)]);
        assert_eq!(counts.len(), 7);
        assert_eq!(counts[0], (DeliveryStatus::Created, 0));
        assert!(counts.contains(&(DeliveryStatus::InTransit, 4)));
        assert!(counts.contains(&(DeliveryStatus::Delivered, 9)));
    }

    #[test]
    fn attendance_uses_default_day_hours() {
        let tallies = tally_attendance(vec![
            (2, "Pedro".into(), true, None),
            (1, "Ana".into(), true, Some(dec!(4.5))),
            (2, "Pedro".into(), false, None),
            (2, "Pedro".into(), true, Some(dec!(10))),
        ]);
        assert_eq!(tallies[0].name, "Ana");
        assert_eq!(tallies[0].hours, dec!(4.5));
        assert_eq!(tallies[1].days_present, 2);
        assert_eq!(tallies[1].hours, dec!(18.0));
    }
}
