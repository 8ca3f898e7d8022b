use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::api::pay_period::fetch_period;
use crate::api::{FilterValue, Filters, Page, Paginated, bind_filters};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::money::serialize_fixed;
use crate::error::{ApiResult, AppError, is_integrity_violation};
use crate::model::payroll::PayrollRun;
use crate::services::{audit, payroll};

const RUN_COLUMNS: &str = "id, pay_period_id, status, created_by, created_at, finalized_at";

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayrollRun {
    #[schema(example = 3)]
    pub pay_period_id: u64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PayrollRunQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// draft | finalized
    pub status: Option<String>,
}

#[derive(Serialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PayslipSummary {
    pub id: u64,
    pub employee_id: u64,
    pub employee_name: String,
    #[schema(value_type = String, example = "6000.00")]
    #[serde(serialize_with = "serialize_fixed")]
    pub gross_pay: Decimal,
    #[schema(value_type = String, example = "630.00")]
    #[serde(serialize_with = "serialize_fixed")]
    pub total_deductions: Decimal,
    #[schema(value_type = String, example = "5370.00")]
    #[serde(serialize_with = "serialize_fixed")]
    pub net_pay: Decimal,
    pub status: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayrollRunResponse {
    pub id: u64,
    pub pay_period_id: u64,
    #[schema(example = "draft")]
    pub status: String,
    pub created_by: Option<u64>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payslips: Option<Vec<PayslipSummary>>,
}

impl From<PayrollRun> for PayrollRunResponse {
    fn from(r: PayrollRun) -> Self {
        Self {
            id: r.id,
            pay_period_id: r.pay_period_id,
            status: r.status,
            created_by: r.created_by,
            created_at: r.created_at,
            finalized_at: r.finalized_at,
            payslips: None,
        }
    }
}

async fn load_run_detail(conn: &mut MySqlConnection, run_id: u64) -> ApiResult<PayrollRunResponse> {
    let run = sqlx::query_as::<_, PayrollRun>(&format!(
        "SELECT {} FROM payroll_runs WHERE id = ?",
        RUN_COLUMNS
    ))
    .bind(run_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Payroll run"))?;

    let payslips = sqlx::query_as::<_, PayslipSummary>(
        r#"
        SELECT p.id, p.employee_id, e.name AS employee_name,
               p.gross_pay, p.total_deductions, p.net_pay, p.status
        FROM payslips p
        JOIN employees e ON e.id = p.employee_id
        WHERE p.payroll_run_id = ?
        ORDER BY e.name, p.id
        "#,
    )
    .bind(run_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut body = PayrollRunResponse::from(run);
    body.payslips = Some(payslips);
    Ok(body)
}

#[utoipa::path(
    post,
    path = "/api/v1/payroll/runs",
    request_body = CreatePayrollRun,
    responses(
        (status = 201, description = "Run created with one draft payslip per employee", body = PayrollRunResponse),
        (status = 404, description = "Pay period not found"),
        (status = 409, description = "A run already exists for the pay period")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
#[instrument(skip(auth, pool, payload), fields(user_id = auth.user_id, pay_period_id = payload.pay_period_id))]
pub async fn create_payroll_run(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreatePayrollRun>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::RunPayroll)?;

    let mut tx = pool.begin().await?;
    let period = fetch_period(&mut *tx, payload.pay_period_id).await?;

    let summary = match payroll::create_run(&mut *tx, &period, auth.user_id).await {
        Ok(summary) => summary,
        // lost a race with a concurrent create for the same period
        Err(AppError::Database(e)) if is_integrity_violation(&e) => {
            return Err(AppError::Conflict(
                "A payroll run already exists for this pay period".into(),
            ));
        }
        Err(e) => return Err(e),
    };

    audit::record(
        &mut *tx,
        auth.user_id,
        "create",
        "payroll_run",
        Some(summary.run_id),
        Some(json!({
            "payPeriodId": period.id,
            "payslips": summary.payslips,
            "adoptedAttendance": summary.adopted_attendance,
        })),
    )
    .await?;

    let body = load_run_detail(&mut *tx, summary.run_id).await?;
    tx.commit().await?;

    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    get,
    path = "/api/v1/payroll/runs",
    params(PayrollRunQuery),
    responses((status = 200, description = "Paginated payroll runs")),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn list_payroll_runs(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PayrollRunQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewPayroll)?;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(status) = &query.status {
        filters.push("status = ?", FilterValue::Str(status.clone()));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM payroll_runs{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {} FROM payroll_runs{} ORDER BY id DESC LIMIT ? OFFSET ?",
        RUN_COLUMNS, where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, PayrollRun>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    let data: Vec<PayrollRunResponse> = rows.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(Paginated::new(data, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payroll/runs/{id}",
    params(("id" = u64, Path, description = "Payroll run ID")),
    responses(
        (status = 200, description = "Run with payslip summaries", body = PayrollRunResponse),
        (status = 404, description = "Payroll run not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn get_payroll_run(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewPayroll)?;
    let mut conn = pool.acquire().await?;
    let body = load_run_detail(&mut *conn, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/payroll/runs/{id}/finalize",
    params(("id" = u64, Path, description = "Payroll run ID")),
    responses(
        (status = 200, description = "Run finalized; payslips are now read-only", body = PayrollRunResponse),
        (status = 404, description = "Payroll run not found"),
        (status = 409, description = "Run already finalized")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn finalize_payroll_run(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::RunPayroll)?;
    let run_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let finalized = payroll::finalize_run(&mut *tx, run_id).await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "finalize",
        "payroll_run",
        Some(run_id),
        Some(json!({ "payslips": finalized })),
    )
    .await?;
    let body = load_run_detail(&mut *tx, run_id).await?;
    tx.commit().await?;

    info!(run_id, user_id = auth.user_id, "Payroll run finalized by user");
    Ok(HttpResponse::Ok().json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn summary_renders_fixed_amounts() {
        let summary = PayslipSummary {
            id: 1,
            employee_id: 2,
            employee_name: "Ana".into(),
            gross_pay: dec!(6000),
            total_deductions: dec!(630),
            net_pay: dec!(5370),
            status: "draft".into(),
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["grossPay"], "6000.00");
        assert_eq!(value["totalDeductions"], "630.00");
        assert_eq!(value["netPay"], "5370.00");
        assert_eq!(value["employeeName"], "Ana");
    }
}
