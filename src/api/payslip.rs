use actix_web::{HttpResponse, Responder, web};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::api::payroll::PayslipSummary;
use crate::api::{FilterValue, Filters, Page, Paginated, bind_filters};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::money::{parse_amount, to_fixed};
use crate::domain::payslip::{DeductionType, EarningType, Line, PayslipStatus, ReconcileMode};
use crate::error::{ApiResult, AppError};
use crate::model::payroll::{Deduction, Earning, Payslip};
use crate::services::payslip::{
    Reconciled, derive_from_attendance, ensure_derived, lock_payslip, reconcile,
    replace_deductions, replace_earnings,
};
use crate::services::{audit, parse_stored};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PayslipQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub payroll_run_id: Option<u64>,
    pub employee_id: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EarningInput {
    #[serde(rename = "type")]
    pub kind: EarningType,
    #[schema(example = "500.00")]
    pub amount: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeductionInput {
    #[serde(rename = "type")]
    pub kind: DeductionType,
    #[schema(example = "250.00")]
    pub amount: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EarningsInput {
    pub earnings: Vec<EarningInput>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeductionsInput {
    pub deductions: Vec<DeductionInput>,
}

fn parse_line<K>(kind: K, amount: &str, description: Option<&str>) -> Result<Line<K>, AppError> {
    Ok(Line {
        kind,
        amount: parse_amount("amount", amount)?,
        description: description.map(str::trim).unwrap_or_default().to_string(),
    })
}

fn parse_earnings(input: &[EarningInput]) -> Result<Vec<Line<EarningType>>, AppError> {
    input
        .iter()
        .map(|l| parse_line(l.kind, &l.amount, l.description.as_deref()))
        .collect()
}

fn parse_deductions(input: &[DeductionInput]) -> Result<Vec<Line<DeductionType>>, AppError> {
    input
        .iter()
        .map(|l| parse_line(l.kind, &l.amount, l.description.as_deref()))
        .collect()
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineResponse {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[schema(example = "6000.00")]
    pub amount: String,
    pub description: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayslipResponse {
    pub id: u64,
    pub payroll_run_id: u64,
    pub employee_id: u64,
    #[schema(example = "draft")]
    pub status: String,
    #[schema(example = "6000.00")]
    pub gross_pay: String,
    #[schema(example = "630.00")]
    pub total_deductions: String,
    #[schema(example = "5370.00")]
    pub net_pay: String,
    /// Set on final payslips whose stored totals disagree with their lines
    pub totals_mismatch: bool,
    pub earnings: Vec<LineResponse>,
    pub deductions: Vec<LineResponse>,
}

/// Drafts show the reconciled (and persisted) totals; final payslips keep
/// what was stored at finalization.
fn payslip_response(payslip: &Payslip, reconciled: Reconciled) -> ApiResult<PayslipResponse> {
    let status: PayslipStatus = parse_stored(&payslip.status, "payslip status")?;
    let (totals, totals_mismatch) = match status {
        PayslipStatus::Draft => (reconciled.totals, false),
        PayslipStatus::Final => (payslip.stored_totals(), reconciled.was_stale),
    };

    Ok(PayslipResponse {
        id: payslip.id,
        payroll_run_id: payslip.payroll_run_id,
        employee_id: payslip.employee_id,
        status: payslip.status.clone(),
        gross_pay: to_fixed(totals.gross_pay),
        total_deductions: to_fixed(totals.total_deductions),
        net_pay: to_fixed(totals.net_pay),
        totals_mismatch,
        earnings: reconciled.earnings.into_iter().map(earning_line).collect(),
        deductions: reconciled.deductions.into_iter().map(deduction_line).collect(),
    })
}

fn earning_line(e: Earning) -> LineResponse {
    LineResponse {
        id: e.id,
        kind: e.earning_type,
        amount: to_fixed(e.amount),
        description: e.description,
    }
}

fn deduction_line(d: Deduction) -> LineResponse {
    LineResponse {
        id: d.id,
        kind: d.deduction_type,
        amount: to_fixed(d.amount),
        description: d.description,
    }
}

async fn lock_readable(
    conn: &mut MySqlConnection,
    auth: &AuthUser,
    payslip_id: u64,
) -> ApiResult<Payslip> {
    let payslip = lock_payslip(conn, payslip_id)
        .await?
        .ok_or_else(|| AppError::not_found("Payslip"))?;
    auth.require_any_or_own(
        Permission::ViewPayroll,
        Permission::ViewOwnPayslip,
        payslip.employee_id,
    )?;
    Ok(payslip)
}

async fn lock_draft(conn: &mut MySqlConnection, payslip_id: u64) -> ApiResult<Payslip> {
    let payslip = lock_payslip(conn, payslip_id)
        .await?
        .ok_or_else(|| AppError::not_found("Payslip"))?;
    match parse_stored::<PayslipStatus>(&payslip.status, "payslip status")? {
        PayslipStatus::Draft => Ok(payslip),
        PayslipStatus::Final => Err(AppError::Conflict(
            "Payslip is final and can no longer be edited".into(),
        )),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/payslips",
    params(PayslipQuery),
    responses((status = 200, description = "Paginated payslip summaries")),
    tag = "Payslip",
    security(("bearer_auth" = []))
)]
pub async fn list_payslips(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PayslipQuery>,
) -> ApiResult<impl Responder> {
    let page = Page::new(query.page, query.per_page);

    let employee_filter = if auth.can(Permission::ViewPayroll) {
        query.employee_id
    } else {
        auth.require(Permission::ViewOwnPayslip)?;
        match auth.employee_id {
            Some(own) if query.employee_id.is_none_or(|id| id == own) => Some(own),
            Some(_) => {
                return Err(AppError::Forbidden(format!(
                    "Missing permission: {}",
                    Permission::ViewPayroll
                )));
            }
            None => {
                return Ok(HttpResponse::Ok().json(Paginated::<PayslipSummary>::new(
                    Vec::new(),
                    page,
                    0,
                )));
            }
        }
    };

    let mut filters = Filters::default();
    if let Some(id) = query.payroll_run_id {
        filters.push("p.payroll_run_id = ?", FilterValue::U64(id));
    }
    if let Some(id) = employee_filter {
        filters.push("p.employee_id = ?", FilterValue::U64(id));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM payslips p{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        r#"
        SELECT p.id, p.employee_id, e.name AS employee_name,
               p.gross_pay, p.total_deductions, p.net_pay, p.status
        FROM payslips p
        JOIN employees e ON e.id = p.employee_id{}
        ORDER BY p.id DESC
        LIMIT ? OFFSET ?
        "#,
        where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, PayslipSummary>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(rows, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payslips/{id}",
    params(("id" = u64, Path, description = "Payslip ID")),
    responses(
        (status = 200, description = "Payslip with earnings and deductions", body = PayslipResponse),
        (status = 403, description = "Not the caller's payslip"),
        (status = 404, description = "Payslip not found")
    ),
    tag = "Payslip",
    security(("bearer_auth" = []))
)]
pub async fn get_payslip(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    let payslip_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let payslip = lock_readable(&mut *tx, &auth, payslip_id).await?;

    let mode = if ensure_derived(&mut *tx, &payslip).await? {
        debug!(payslip_id, "Derived lines on first read");
        ReconcileMode::Force
    } else {
        ReconcileMode::Lazy
    };
    let reconciled = reconcile(&mut *tx, &payslip, mode).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(payslip_response(&payslip, reconciled)?))
}

#[utoipa::path(
    put,
    path = "/api/v1/payslips/{id}/earnings",
    request_body = EarningsInput,
    params(("id" = u64, Path, description = "Payslip ID")),
    responses(
        (status = 200, description = "Earnings replaced and totals recomputed", body = PayslipResponse),
        (status = 400, description = "Invalid amount or type"),
        (status = 409, description = "Payslip is final")
    ),
    tag = "Payslip",
    security(("bearer_auth" = []))
)]
pub async fn replace_payslip_earnings(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<EarningsInput>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::RunPayroll)?;
    let payslip_id = path.into_inner();
    let lines = parse_earnings(&payload.earnings)?;

    let mut tx = pool.begin().await?;
    let payslip = lock_draft(&mut *tx, payslip_id).await?;

    replace_earnings(&mut *tx, payslip_id, &lines).await?;
    let reconciled = reconcile(&mut *tx, &payslip, ReconcileMode::Force).await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "replace_earnings",
        "payslip",
        Some(payslip_id),
        Some(json!({ "lines": lines.len(), "grossPay": to_fixed(reconciled.totals.gross_pay) })),
    )
    .await?;
    tx.commit().await?;

    info!(payslip_id, lines = lines.len(), "Payslip earnings replaced");
    Ok(HttpResponse::Ok().json(payslip_response(&payslip, reconciled)?))
}

#[utoipa::path(
    put,
    path = "/api/v1/payslips/{id}/deductions",
    request_body = DeductionsInput,
    params(("id" = u64, Path, description = "Payslip ID")),
    responses(
        (status = 200, description = "Deductions replaced and totals recomputed", body = PayslipResponse),
        (status = 400, description = "Invalid amount or type"),
        (status = 409, description = "Payslip is final")
    ),
    tag = "Payslip",
    security(("bearer_auth" = []))
)]
pub async fn replace_payslip_deductions(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<DeductionsInput>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::RunPayroll)?;
    let payslip_id = path.into_inner();
    let lines = parse_deductions(&payload.deductions)?;

    let mut tx = pool.begin().await?;
    let payslip = lock_draft(&mut *tx, payslip_id).await?;

    replace_deductions(&mut *tx, payslip_id, &lines).await?;
    let reconciled = reconcile(&mut *tx, &payslip, ReconcileMode::Force).await?;
    if reconciled.totals.net_pay < Decimal::ZERO {
        warn!(payslip_id, net = %reconciled.totals.net_pay, "Deductions exceed gross pay");
    }
    audit::record(
        &mut *tx,
        auth.user_id,
        "replace_deductions",
        "payslip",
        Some(payslip_id),
        Some(json!({
            "lines": lines.len(),
            "totalDeductions": to_fixed(reconciled.totals.total_deductions),
        })),
    )
    .await?;
    tx.commit().await?;

    info!(payslip_id, lines = lines.len(), "Payslip deductions replaced");
    Ok(HttpResponse::Ok().json(payslip_response(&payslip, reconciled)?))
}

#[utoipa::path(
    post,
    path = "/api/v1/payslips/{id}/recalculate",
    params(("id" = u64, Path, description = "Payslip ID")),
    responses(
        (status = 200, description = "Lines re-derived from attendance", body = PayslipResponse),
        (status = 409, description = "Payslip is final")
    ),
    tag = "Payslip",
    security(("bearer_auth" = []))
)]
pub async fn recalculate_payslip(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::RunPayroll)?;
    let payslip_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let payslip = lock_draft(&mut *tx, payslip_id).await?;

    replace_earnings(&mut *tx, payslip_id, &[]).await?;
    replace_deductions(&mut *tx, payslip_id, &[]).await?;
    let derived = derive_from_attendance(&mut *tx, &payslip).await?;
    let reconciled = reconcile(&mut *tx, &payslip, ReconcileMode::Force).await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "recalculate",
        "payslip",
        Some(payslip_id),
        Some(json!({ "totalHours": to_fixed(derived.total_hours) })),
    )
    .await?;
    tx.commit().await?;

    info!(payslip_id, hours = %derived.total_hours, "Payslip recalculated");
    Ok(HttpResponse::Ok().json(payslip_response(&payslip, reconciled)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payslip::PayslipTotals;
    use rust_decimal_macros::dec;

    fn payslip(status: &str, gross: Decimal, deductions: Decimal) -> Payslip {
        Payslip {
            id: 5,
            payroll_run_id: 1,
            employee_id: 9,
            gross_pay: gross,
            total_deductions: deductions,
            net_pay: gross - deductions,
            status: status.into(),
        }
    }

    fn reconciled(gross: Decimal, deductions: Decimal, was_stale: bool) -> Reconciled {
        Reconciled {
            totals: PayslipTotals::from_lines([gross], [deductions]),
            earnings: vec![Earning {
                id: 1,
                payslip_id: 5,
                earning_type: "regular".into(),
                amount: gross,
                description: Some("40.00 hours × ₱150.00/hour".into()),
            }],
            deductions: vec![Deduction {
                id: 2,
                payslip_id: 5,
                deduction_type: "sss".into(),
                amount: deductions,
                description: None,
            }],
            was_stale,
        }
    }

    #[test]
    fn draft_shows_recomputed_totals() {
        let body = payslip_response(
            &payslip("draft", dec!(0), dec!(0)),
            reconciled(dec!(6000), dec!(270), true),
        )
        .unwrap();
        assert_eq!(body.gross_pay, "6000.00");
        assert_eq!(body.net_pay, "5730.00");
        assert!(!body.totals_mismatch);
        assert_eq!(body.earnings[0].kind, "regular");
    }

    #[test]
    fn final_keeps_stored_totals_and_flags_mismatch() {
        let body = payslip_response(
            &payslip("final", dec!(5000), dec!(0)),
            reconciled(dec!(6000), dec!(270), true),
        )
        .unwrap();
        assert_eq!(body.gross_pay, "5000.00");
        assert_eq!(body.net_pay, "5000.00");
        assert!(body.totals_mismatch);
    }

    #[test]
    fn line_inputs_are_validated() {
        let ok: EarningsInput = serde_json::from_str(
            r#"{"earnings":[{"type":"bonus","amount":"500.00","description":" holiday "}]}"#,
        )
        .unwrap();
        let lines = parse_earnings(&ok.earnings).unwrap();
        assert_eq!(lines[0].kind, EarningType::Bonus);
        assert_eq!(lines[0].amount, dec!(500.00));
        assert_eq!(lines[0].description, "holiday");

        let negative: DeductionsInput =
            serde_json::from_str(r#"{"deductions":[{"type":"loan","amount":"-1.00"}]}"#).unwrap();
        assert!(parse_deductions(&negative.deductions).is_err());

        assert!(serde_json::from_str::<DeductionsInput>(
            r#"{"deductions":[{"type":"fine","amount":"1.00"}]}"#
        )
        .is_err());
    }
}
