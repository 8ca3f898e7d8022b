use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

use crate::api::{Page, PageQuery, Paginated};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::deductions::PeriodType;
use crate::error::{ApiResult, AppError};
use crate::model::pay_period::PayPeriod;
use crate::services::audit;

const PERIOD_COLUMNS: &str = "id, start_date, end_date, pay_date, period_type";

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayPeriod {
    #[schema(example = "2026-01-01", value_type = String, format = "date")]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-15", value_type = String, format = "date")]
    pub end_date: NaiveDate,
    #[schema(example = "2026-01-20", value_type = String, format = "date")]
    pub pay_date: NaiveDate,
    #[serde(rename = "type")]
    pub period_type: PeriodType,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayPeriodResponse {
    pub id: u64,
    #[schema(value_type = String, format = "date")]
    pub start_date: NaiveDate,
    #[schema(value_type = String, format = "date")]
    pub end_date: NaiveDate,
    #[schema(value_type = String, format = "date")]
    pub pay_date: NaiveDate,
    #[serde(rename = "type")]
    pub period_type: String,
}

impl From<PayPeriod> for PayPeriodResponse {
    fn from(p: PayPeriod) -> Self {
        Self {
            id: p.id,
            start_date: p.start_date,
            end_date: p.end_date,
            pay_date: p.pay_date,
            period_type: p.period_type,
        }
    }
}

fn check_dates(p: &CreatePayPeriod) -> Result<(), AppError> {
    if p.start_date > p.end_date {
        return Err(AppError::validation(
            "endDate",
            "endDate must not be before startDate",
        ));
    }
    if p.pay_date < p.start_date {
        return Err(AppError::validation(
            "payDate",
            "payDate must not be before startDate",
        ));
    }
    Ok(())
}

pub async fn fetch_period(
    conn: &mut sqlx::MySqlConnection,
    id: u64,
) -> ApiResult<PayPeriod> {
    sqlx::query_as::<_, PayPeriod>(&format!(
        "SELECT {} FROM pay_periods WHERE id = ?",
        PERIOD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::not_found("Pay period"))
}

/// Latest pay period whose dates include `date`.
pub async fn period_containing(
    conn: &mut sqlx::MySqlConnection,
    date: NaiveDate,
) -> Result<Option<PayPeriod>, sqlx::Error> {
    sqlx::query_as::<_, PayPeriod>(&format!(
        "SELECT {} FROM pay_periods WHERE ? BETWEEN start_date AND end_date ORDER BY start_date DESC LIMIT 1",
        PERIOD_COLUMNS
    ))
    .bind(date)
    .fetch_optional(conn)
    .await
}

#[utoipa::path(
    post,
    path = "/api/v1/pay-periods",
    request_body = CreatePayPeriod,
    responses(
        (status = 201, description = "Pay period created", body = PayPeriodResponse),
        (status = 400, description = "Invalid dates or type")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn create_pay_period(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreatePayPeriod>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::RunPayroll)?;
    check_dates(&payload)?;

    let mut tx = pool.begin().await?;
    let id = sqlx::query(
        "INSERT INTO pay_periods (start_date, end_date, pay_date, period_type) VALUES (?, ?, ?, ?)",
    )
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(payload.pay_date)
    .bind(payload.period_type.as_ref())
    .execute(&mut *tx)
    .await?
    .last_insert_id();

    audit::record(&mut *tx, auth.user_id, "create", "pay_period", Some(id), None).await?;
    let period = fetch_period(&mut *tx, id).await?;
    tx.commit().await?;

    info!(pay_period_id = id, start = %period.start_date, end = %period.end_date, "Pay period created");
    Ok(HttpResponse::Created().json(PayPeriodResponse::from(period)))
}

#[utoipa::path(
    get,
    path = "/api/v1/pay-periods",
    params(PageQuery),
    responses((status = 200, description = "Pay periods, newest first")),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn list_pay_periods(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PageQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewPayroll)?;
    let page = Page::new(query.page, query.per_page);

    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pay_periods")
        .fetch_one(pool.get_ref())
        .await?;
    let rows = sqlx::query_as::<_, PayPeriod>(&format!(
        "SELECT {} FROM pay_periods ORDER BY start_date DESC LIMIT ? OFFSET ?",
        PERIOD_COLUMNS
    ))
    .bind(page.per_page)
    .bind(page.offset)
    .fetch_all(pool.get_ref())
    .await?;

    let data: Vec<PayPeriodResponse> = rows.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(Paginated::new(data, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/pay-periods/{id}",
    params(("id" = u64, Path, description = "Pay period ID")),
    responses(
        (status = 200, description = "Pay period", body = PayPeriodResponse),
        (status = 404, description = "Pay period not found")
    ),
    tag = "Payroll",
    security(("bearer_auth" = []))
)]
pub async fn get_pay_period(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewPayroll)?;
    let mut conn = pool.acquire().await?;
    let period = fetch_period(&mut *conn, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(PayPeriodResponse::from(period)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(start: &str, end: &str, pay: &str) -> CreatePayPeriod {
        CreatePayPeriod {
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
            pay_date: pay.parse().unwrap(),
            period_type: PeriodType::BiWeekly,
        }
    }

    #[test]
    fn accepts_ordered_dates() {
        assert!(check_dates(&period("2026-01-01", "2026-01-15", "2026-01-20")).is_ok());
        assert!(check_dates(&period("2026-01-01", "2026-01-01", "2026-01-01")).is_ok());
    }

    #[test]
    fn rejects_inverted_range() {
        let err = check_dates(&period("2026-01-15", "2026-01-01", "2026-01-20")).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "endDate"));
    }

    #[test]
    fn rejects_pay_date_before_start() {
        let err = check_dates(&period("2026-01-01", "2026-01-15", "2025-12-31")).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "payDate"));
    }

    #[test]
    fn type_field_uses_snake_case() {
        let body: CreatePayPeriod = serde_json::from_str(
            r#"{"startDate":"2026-02-01","endDate":"2026-02-28","payDate":"2026-03-05","type":"monthly"}"#,
        )
        .unwrap();
        assert_eq!(body.period_type, PeriodType::Monthly);
        assert!(serde_json::from_str::<CreatePayPeriod>(
            r#"{"startDate":"2026-02-01","endDate":"2026-02-28","payDate":"2026-03-05","type":"daily"}"#,
        )
        .is_err());
    }
}
