use actix_web::{HttpResponse, Responder, web};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::money::serialize_fixed;
use crate::error::ApiResult;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub sales_today: i64,
    #[serde(serialize_with = "serialize_fixed")]
    #[schema(value_type = String, example = "18450.00")]
    pub revenue_today: Decimal,
    pub low_stock_products: i64,
    pub open_deliveries: i64,
    pub draft_payroll_runs: i64,
}

#[utoipa::path(
    get,
    path = "/api/v1/dashboard",
    responses((status = 200, description = "Today's counters", body = DashboardSummary)),
    tag = "Dashboard",
    security(("bearer_auth" = []))
)]
pub async fn dashboard(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewReports)?;
    let pool = pool.get_ref();

    let (sales_today, revenue_today) = sqlx::query_as::<_, (i64, Decimal)>(
        r#"
        SELECT COUNT(*), COALESCE(SUM(total), 0)
        FROM sales
        WHERE status = 'completed' AND completed_at >= CURDATE()
        "#,
    )
    .fetch_one(pool)
    .await?;

    let low_stock_products = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM products WHERE active = TRUE AND stock_quantity <= reorder_level",
    )
    .fetch_one(pool)
    .await?;

    let open_deliveries = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM deliveries WHERE status NOT IN ('delivered', 'failed', 'returned')",
    )
    .fetch_one(pool)
    .await?;

    let draft_payroll_runs =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payroll_runs WHERE status = 'draft'")
            .fetch_one(pool)
            .await?;

    Ok(HttpResponse::Ok().json(DashboardSummary {
        sales_today,
        revenue_today,
        low_stock_products,
        open_deliveries,
        draft_payroll_runs,
    }))
}
