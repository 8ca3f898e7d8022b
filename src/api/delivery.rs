use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::api::{FilterValue, Filters, Page, Paginated, bind_filters, validate};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::delivery::{DeliveryStatus, check_transition};
use crate::error::{ApiResult, AppError};
use crate::model::delivery::{Delivery, DeliveryStatusUpdate};
use crate::services::tracking::allocate_tracking_number;
use crate::services::{audit, notify, parse_stored};

const DELIVERY_COLUMNS: &str =
    "id, tracking_number, sale_id, customer_id, address, driver_id, status, notes, created_at, updated_at";

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDelivery {
    pub sale_id: Option<u64>,
    pub customer_id: Option<u64>,
    #[validate(length(min = 1, max = 255, message = "address is required"))]
    #[schema(example = "Lot 4, Brgy. San Isidro, Antipolo")]
    pub address: String,
    /// User id of the assigned driver
    pub driver_id: Option<u64>,
    #[validate(length(max = 255))]
    pub notes: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct UpdateDeliveryStatus {
    pub status: DeliveryStatus,
    #[validate(length(max = 255))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DeliveryQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<DeliveryStatus>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub id: u64,
    #[schema(example = "DLV-7K2M9QXA")]
    pub tracking_number: String,
    pub sale_id: Option<u64>,
    pub customer_id: Option<u64>,
    pub address: String,
    pub driver_id: Option<u64>,
    #[schema(example = "created")]
    pub status: String,
    pub notes: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(d: Delivery) -> Self {
        Self {
            id: d.id,
            tracking_number: d.tracking_number,
            sale_id: d.sale_id,
            customer_id: d.customer_id,
            address: d.address,
            driver_id: d.driver_id,
            status: d.status,
            notes: d.notes,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateResponse {
    pub id: u64,
    pub status: String,
    pub note: Option<String>,
    pub updated_by: Option<u64>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl From<DeliveryStatusUpdate> for StatusUpdateResponse {
    fn from(u: DeliveryStatusUpdate) -> Self {
        Self {
            id: u.id,
            status: u.status,
            note: u.note,
            updated_by: u.updated_by,
            created_at: u.created_at,
        }
    }
}

/// Dispatchers see everything; drivers see deliveries assigned to them.
fn can_see(auth: &AuthUser, delivery: &Delivery) -> Result<(), AppError> {
    if auth.can(Permission::ManageDeliveries) || auth.can(Permission::ManageSales) {
        return Ok(());
    }
    auth.require(Permission::UpdateDeliveryStatus)?;
    if delivery.driver_id == Some(auth.user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Delivery is assigned to another driver".into()))
    }
}

async fn fetch_delivery(conn: &mut MySqlConnection, id: u64, lock: bool) -> ApiResult<Delivery> {
    let sql = format!(
        "SELECT {} FROM deliveries WHERE id = ?{}",
        DELIVERY_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, Delivery>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("Delivery"))
}

async fn record_status(
    conn: &mut MySqlConnection,
    delivery_id: u64,
    status: DeliveryStatus,
    note: Option<&str>,
    updated_by: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO delivery_status_updates (delivery_id, status, note, updated_by) VALUES (?, ?, ?, ?)",
    )
    .bind(delivery_id)
    .bind(status.as_ref())
    .bind(note)
    .bind(updated_by)
    .execute(conn)
    .await?;
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v1/deliveries",
    request_body = CreateDelivery,
    responses(
        (status = 201, description = "Delivery created with a tracking number", body = DeliveryResponse),
        (status = 400, description = "Invalid payload")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn create_delivery(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateDelivery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageDeliveries)?;
    validate(&*payload)?;

    let mut tx = pool.begin().await?;
    let tracking_number = allocate_tracking_number(&mut *tx).await?;

    let id = sqlx::query(
        r#"
        INSERT INTO deliveries (tracking_number, sale_id, customer_id, address, driver_id, status, notes)
        VALUES (?, ?, ?, ?, ?, 'created', ?)
        "#,
    )
    .bind(&tracking_number)
    .bind(payload.sale_id)
    .bind(payload.customer_id)
    .bind(payload.address.trim())
    .bind(payload.driver_id)
    .bind(payload.notes.as_deref())
    .execute(&mut *tx)
    .await?
    .last_insert_id();

    record_status(&mut *tx, id, DeliveryStatus::Created, None, auth.user_id).await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "create",
        "delivery",
        Some(id),
        Some(json!({ "trackingNumber": tracking_number })),
    )
    .await?;
    if let Some(driver_id) = payload.driver_id {
        notify::notify_user(
            &mut *tx,
            driver_id,
            "New delivery assigned",
            &format!("Delivery {} to {}", tracking_number, payload.address.trim()),
        )
        .await?;
    }

    let delivery = fetch_delivery(&mut *tx, id, false).await?;
    tx.commit().await?;

    info!(delivery_id = id, tracking_number = %tracking_number, "Delivery created");
    Ok(HttpResponse::Created().json(DeliveryResponse::from(delivery)))
}

#[utoipa::path(
    get,
    path = "/api/v1/deliveries",
    params(DeliveryQuery),
    responses((status = 200, description = "Paginated deliveries")),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn list_deliveries(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<DeliveryQuery>,
) -> ApiResult<impl Responder> {
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    if !(auth.can(Permission::ManageDeliveries) || auth.can(Permission::ManageSales)) {
        auth.require(Permission::UpdateDeliveryStatus)?;
        filters.push("driver_id = ?", FilterValue::U64(auth.user_id));
    }
    if let Some(status) = query.status {
        filters.push("status = ?", FilterValue::Str(status.to_string()));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM deliveries{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {} FROM deliveries{} ORDER BY id DESC LIMIT ? OFFSET ?",
        DELIVERY_COLUMNS, where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, Delivery>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    let data: Vec<DeliveryResponse> = rows.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(Paginated::new(data, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/deliveries/{id}",
    params(("id" = u64, Path, description = "Delivery ID")),
    responses(
        (status = 200, description = "Delivery", body = DeliveryResponse),
        (status = 404, description = "Delivery not found")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn get_delivery(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    let mut conn = pool.acquire().await?;
    let delivery = fetch_delivery(&mut *conn, path.into_inner(), false).await?;
    can_see(&auth, &delivery)?;
    Ok(HttpResponse::Ok().json(DeliveryResponse::from(delivery)))
}

#[utoipa::path(
    get,
    path = "/api/v1/deliveries/track/{tracking_number}",
    params(("tracking_number" = String, Path, description = "Tracking number, e.g. DLV-7K2M9QXA")),
    responses(
        (status = 200, description = "Delivery", body = DeliveryResponse),
        (status = 404, description = "Unknown tracking number")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn track_delivery(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
) -> ApiResult<impl Responder> {
    let tracking_number = path.into_inner().trim().to_ascii_uppercase();

    let delivery = sqlx::query_as::<_, Delivery>(&format!(
        "SELECT {} FROM deliveries WHERE tracking_number = ?",
        DELIVERY_COLUMNS
    ))
    .bind(&tracking_number)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::not_found("Delivery"))?;

    can_see(&auth, &delivery)?;
    Ok(HttpResponse::Ok().json(DeliveryResponse::from(delivery)))
}

#[utoipa::path(
    get,
    path = "/api/v1/deliveries/{id}/history",
    params(("id" = u64, Path, description = "Delivery ID")),
    responses(
        (status = 200, description = "Status updates, oldest first", body = [StatusUpdateResponse]),
        (status = 404, description = "Delivery not found")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn delivery_history(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    let delivery_id = path.into_inner();
    let mut conn = pool.acquire().await?;
    let delivery = fetch_delivery(&mut *conn, delivery_id, false).await?;
    can_see(&auth, &delivery)?;

    let updates = sqlx::query_as::<_, DeliveryStatusUpdate>(
        r#"
        SELECT id, delivery_id, status, note, updated_by, created_at
        FROM delivery_status_updates
        WHERE delivery_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(delivery_id)
    .fetch_all(&mut *conn)
    .await?;

    let body: Vec<StatusUpdateResponse> = updates.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    put,
    path = "/api/v1/deliveries/{id}/status",
    request_body = UpdateDeliveryStatus,
    params(("id" = u64, Path, description = "Delivery ID")),
    responses(
        (status = 200, description = "Status advanced", body = DeliveryResponse),
        (status = 400, description = "Not the next status in sequence"),
        (status = 404, description = "Delivery not found"),
        (status = 409, description = "Delivery is already in a terminal status")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn update_delivery_status(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateDeliveryStatus>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::UpdateDeliveryStatus)?;
    validate(&*payload)?;
    let delivery_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let delivery = fetch_delivery(&mut *tx, delivery_id, true).await?;
    can_see(&auth, &delivery)?;

    let current: DeliveryStatus = parse_stored(&delivery.status, "delivery status")?;
    let next = check_transition(current, payload.status)?;

    sqlx::query("UPDATE deliveries SET status = ? WHERE id = ?")
        .bind(next.as_ref())
        .bind(delivery_id)
        .execute(&mut *tx)
        .await?;
    record_status(&mut *tx, delivery_id, next, payload.note.as_deref(), auth.user_id).await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "update_status",
        "delivery",
        Some(delivery_id),
        Some(json!({ "from": current, "to": next })),
    )
    .await?;

    let delivery = fetch_delivery(&mut *tx, delivery_id, false).await?;
    tx.commit().await?;

    info!(delivery_id, from = %current, to = %next, "Delivery status updated");
    Ok(HttpResponse::Ok().json(DeliveryResponse::from(delivery)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;

    fn delivery(driver_id: Option<u64>) -> Delivery {
        Delivery {
            id: 1,
            tracking_number: "DLV-ABCD1234".into(),
            sale_id: None,
            customer_id: None,
            address: "Warehouse 2".into(),
            driver_id,
            status: "created".into(),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user(id: u64, role: Role) -> AuthUser {
        AuthUser {
            user_id: id,
            username: format!("user{}", id),
            roles: vec![role],
            employee_id: None,
        }
    }

    #[test]
    fn drivers_only_see_their_own() {
        let driver = user(8, Role::Driver);
        assert!(can_see(&driver, &delivery(Some(8))).is_ok());
        assert!(matches!(
            can_see(&driver, &delivery(Some(9))),
            Err(AppError::Forbidden(_))
        ));
        assert!(can_see(&driver, &delivery(None)).is_err());
    }

    #[test]
    fn dispatch_roles_see_everything() {
        assert!(can_see(&user(1, Role::Manager), &delivery(Some(9))).is_ok());
        assert!(can_see(&user(2, Role::Cashier), &delivery(None)).is_ok());
        assert!(can_see(&user(3, Role::Hr), &delivery(None)).is_err());
    }

    #[test]
    fn status_payload_uses_snake_case() {
        let body: UpdateDeliveryStatus =
            serde_json::from_str(r#"{"status":"out_for_delivery","note":"left depot"}"#).unwrap();
        assert_eq!(body.status, DeliveryStatus::OutForDelivery);
        assert!(serde_json::from_str::<UpdateDeliveryStatus>(r#"{"status":"lost"}"#).is_err());
    }
}
