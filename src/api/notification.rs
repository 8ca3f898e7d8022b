use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use sqlx::MySqlPool;
use utoipa::IntoParams;

use crate::api::{FilterValue, Filters, Page, Paginated, bind_filters};
use crate::auth::auth::AuthUser;
use crate::error::{ApiResult, AppError};
use crate::model::notification::Notification;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct NotificationQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub unread_only: Option<bool>,
}

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    params(NotificationQuery),
    responses((status = 200, description = "The caller's notifications, newest first")),
    tag = "Notification",
    security(("bearer_auth" = []))
)]
pub async fn list_notifications(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<NotificationQuery>,
) -> ApiResult<impl Responder> {
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    filters.push("user_id = ?", FilterValue::U64(auth.user_id));
    if query.unread_only.unwrap_or(false) {
        filters.push("is_read = ?", FilterValue::Bool(false));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM notifications{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT id, user_id, title, message, is_read, created_at FROM notifications{} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, Notification>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(rows, page, total)))
}

#[utoipa::path(
    put,
    path = "/api/v1/notifications/{id}/read",
    params(("id" = u64, Path, description = "Notification ID")),
    responses(
        (status = 204, description = "Marked as read"),
        (status = 404, description = "Not one of the caller's notifications")
    ),
    tag = "Notification",
    security(("bearer_auth" = []))
)]
pub async fn mark_notification_read(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    let id = path.into_inner();

    // marking twice is fine; someone else's id is a 404
    let owned = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(auth.user_id)
    .fetch_one(pool.get_ref())
    .await?;
    if owned == 0 {
        return Err(AppError::not_found("Notification"));
    }

    sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(auth.user_id)
        .execute(pool.get_ref())
        .await?;

    Ok(HttpResponse::NoContent().finish())
}
