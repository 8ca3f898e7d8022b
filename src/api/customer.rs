use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidateEmail};

use crate::api::{Filters, Page, Paginated, bind_filters, validate};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::error::{ApiResult, AppError, is_integrity_violation};
use crate::model::customer::Customer;
use crate::services::audit;
use crate::utils::db_utils::{FieldKind, UpdateField, build_update_sql, execute_update};

const CUSTOMER_COLUMNS: &str = "id, name, phone, email, address, created_at";

const CUSTOMER_FIELDS: &[UpdateField] = &[
    UpdateField::new("name", "name", FieldKind::Text),
    UpdateField::new("phone", "phone", FieldKind::NullableText),
    UpdateField::new("email", "email", FieldKind::NullableText),
    UpdateField::new("address", "address", FieldKind::NullableText),
];

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateCustomer {
    #[validate(length(min = 1, max = 128, message = "name is required"))]
    #[schema(example = "Dela Cruz Builders")]
    pub name: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(email(message = "email is not a valid address"))]
    pub email: Option<String>,
    #[validate(length(max = 255))]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CustomerQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Matches name, phone or e-mail
    pub search: Option<String>,
}

async fn fetch_customer(pool: &MySqlPool, id: u64) -> ApiResult<Customer> {
    sqlx::query_as::<_, Customer>(&format!(
        "SELECT {} FROM customers WHERE id = ?",
        CUSTOMER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Customer"))
}

#[utoipa::path(
    post,
    path = "/api/v1/customers",
    request_body = CreateCustomer,
    responses(
        (status = 201, description = "Customer created", body = Customer),
        (status = 400, description = "Invalid payload")
    ),
    tag = "Customer",
    security(("bearer_auth" = []))
)]
pub async fn create_customer(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateCustomer>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageCustomers)?;
    validate(&*payload)?;

    let mut tx = pool.begin().await?;
    let id = sqlx::query("INSERT INTO customers (name, phone, email, address) VALUES (?, ?, ?, ?)")
        .bind(payload.name.trim())
        .bind(payload.phone.as_deref().map(str::trim))
        .bind(payload.email.as_deref().map(str::trim))
        .bind(payload.address.as_deref().map(str::trim))
        .execute(&mut *tx)
        .await?
        .last_insert_id();
    audit::record(&mut *tx, auth.user_id, "create", "customer", Some(id), None).await?;
    tx.commit().await?;

    info!(customer_id = id, "Customer created");
    let customer = fetch_customer(pool.get_ref(), id).await?;
    Ok(HttpResponse::Created().json(customer))
}

#[utoipa::path(
    get,
    path = "/api/v1/customers",
    params(CustomerQuery),
    responses((status = 200, description = "Paginated customers")),
    tag = "Customer",
    security(("bearer_auth" = []))
)]
pub async fn list_customers(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<CustomerQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewCustomers)?;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        filters.push_search("(name LIKE ? OR phone LIKE ? OR email LIKE ?)", 3, search);
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM customers{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {} FROM customers{} ORDER BY name, id LIMIT ? OFFSET ?",
        CUSTOMER_COLUMNS, where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, Customer>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(rows, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}",
    params(("id" = u64, Path, description = "Customer ID")),
    responses(
        (status = 200, description = "Customer", body = Customer),
        (status = 404, description = "Customer not found")
    ),
    tag = "Customer",
    security(("bearer_auth" = []))
)]
pub async fn get_customer(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewCustomers)?;
    let customer = fetch_customer(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(customer))
}

#[utoipa::path(
    put,
    path = "/api/v1/customers/{id}",
    request_body(content = Object, description = "Any of name, phone, email, address"),
    params(("id" = u64, Path, description = "Customer ID")),
    responses(
        (status = 200, description = "Customer updated", body = Customer),
        (status = 404, description = "Customer not found")
    ),
    tag = "Customer",
    security(("bearer_auth" = []))
)]
pub async fn update_customer(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<Value>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageCustomers)?;
    let customer_id = path.into_inner();

    if let Some(email) = payload.get("email").and_then(Value::as_str) {
        if !email.validate_email() {
            return Err(AppError::validation("email", "email is not a valid address"));
        }
    }

    let update = build_update_sql("customers", &payload, CUSTOMER_FIELDS, "id", customer_id)?;
    if execute_update(pool.get_ref(), update).await? == 0 {
        fetch_customer(pool.get_ref(), customer_id).await?;
    }

    let mut conn = pool.acquire().await?;
    audit::record(&mut *conn, auth.user_id, "update", "customer", Some(customer_id), None).await?;

    let customer = fetch_customer(pool.get_ref(), customer_id).await?;
    Ok(HttpResponse::Ok().json(customer))
}

#[utoipa::path(
    delete,
    path = "/api/v1/customers/{id}",
    params(("id" = u64, Path, description = "Customer ID")),
    responses(
        (status = 204, description = "Customer deleted"),
        (status = 404, description = "Customer not found"),
        (status = 409, description = "Customer has sales or deliveries")
    ),
    tag = "Customer",
    security(("bearer_auth" = []))
)]
pub async fn delete_customer(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageCustomers)?;
    let customer_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let deleted = match sqlx::query("DELETE FROM customers WHERE id = ?")
        .bind(customer_id)
        .execute(&mut *tx)
        .await
    {
        Ok(r) => r.rows_affected(),
        Err(e) if is_integrity_violation(&e) => {
            return Err(AppError::Conflict("Customer has sales or deliveries".into()));
        }
        Err(e) => return Err(e.into()),
    };
    if deleted == 0 {
        return Err(AppError::not_found("Customer"));
    }
    audit::record(&mut *tx, auth.user_id, "delete", "customer", Some(customer_id), None).await?;
    tx.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_email() {
        let body: CreateCustomer =
            serde_json::from_str(r#"{"name":"Ramos Hardware","email":"not-an-email"}"#).unwrap();
        assert!(body.validate().is_err());

        let body: CreateCustomer =
            serde_json::from_str(r#"{"name":"Ramos Hardware","email":"buy@ramos.ph"}"#).unwrap();
        assert!(body.validate().is_ok());
    }
}
