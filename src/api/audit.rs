use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use sqlx::MySqlPool;
use utoipa::IntoParams;

use crate::api::{FilterValue, Filters, Page, Paginated, bind_filters};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::error::ApiResult;
use crate::model::audit_log::AuditLog;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// e.g. `sale`, `payroll_run`, `product`
    pub entity: Option<String>,
    pub entity_id: Option<u64>,
    pub user_id: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/audit-logs",
    params(AuditLogQuery),
    responses((status = 200, description = "Audit entries, newest first")),
    tag = "Audit",
    security(("bearer_auth" = []))
)]
pub async fn list_audit_logs(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AuditLogQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewAuditLog)?;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(entity) = query.entity.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        filters.push("entity = ?", FilterValue::Str(entity.to_string()));
    }
    if let Some(id) = query.entity_id {
        filters.push("entity_id = ?", FilterValue::U64(id));
    }
    if let Some(id) = query.user_id {
        filters.push("user_id = ?", FilterValue::U64(id));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM audit_logs{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT id, user_id, action, entity, entity_id, details, created_at FROM audit_logs{} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, AuditLog>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(rows, page, total)))
}
