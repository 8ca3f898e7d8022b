use crate::{
    api::{FilterValue, Filters, Page, Paginated, bind_filters, validate},
    auth::{auth::AuthUser, permissions::Permission},
    domain::money::{parse_amount, to_fixed},
    error::{ApiResult, AppError, is_integrity_violation},
    model::employee::Employee,
    services::audit,
    utils::db_utils::{FieldKind, UpdateField, build_update_sql, execute_update},
};
use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const EMPLOYEE_COLUMNS: &str = "id, user_id, name, rate, active, created_at";

const EMPLOYEE_FIELDS: &[UpdateField] = &[
    UpdateField::new("name", "name", FieldKind::Text),
    UpdateField::new("rate", "rate", FieldKind::Money),
    UpdateField::new("active", "active", FieldKind::Bool),
];

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmployee {
    #[validate(length(min = 1, max = 128, message = "name is required"))]
    #[schema(example = "Juan dela Cruz")]
    pub name: String,
    /// Hourly rate, "D.DD".
    #[schema(example = "150.00")]
    pub rate: String,
    #[schema(example = 7)]
    pub user_id: Option<u64>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct EmployeeQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub active: Option<bool>,
    /// Matches the employee name
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "id": 1,
    "userId": 7,
    "name": "Juan dela Cruz",
    "rate": "150.00",
    "active": true,
    "createdAt": "2026-01-01T00:00:00Z"
}))]
pub struct EmployeeResponse {
    pub id: u64,
    pub user_id: Option<u64>,
    pub name: String,
    pub rate: String,
    pub active: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl From<Employee> for EmployeeResponse {
    fn from(e: Employee) -> Self {
        Self {
            id: e.id,
            user_id: e.user_id,
            name: e.name,
            rate: to_fixed(e.rate),
            active: e.active,
            created_at: e.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeListResponse {
    pub data: Vec<EmployeeResponse>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 42)]
    pub total: i64,
}

/// Partial update; any subset of the listed keys.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmployee {
    pub name: Option<String>,
    #[schema(example = "175.50")]
    pub rate: Option<String>,
    pub active: Option<bool>,
}

pub async fn fetch_employee(pool: &MySqlPool, id: u64) -> ApiResult<Employee> {
    sqlx::query_as::<_, Employee>(&format!(
        "SELECT {} FROM employees WHERE id = ?",
        EMPLOYEE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Employee"))
}

/// Create Employee
#[utoipa::path(
    post,
    path = "/api/v1/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = EmployeeResponse),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "User already linked to an employee")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateEmployee>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageEmployees)?;
    validate(&*payload)?;
    let rate = parse_amount("rate", &payload.rate)?;

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query("INSERT INTO employees (user_id, name, rate, active) VALUES (?, ?, ?, ?)")
        .bind(payload.user_id)
        .bind(payload.name.trim())
        .bind(rate)
        .bind(payload.active.unwrap_or(true))
        .execute(&mut *tx)
        .await;

    let id = match inserted {
        Ok(r) => r.last_insert_id(),
        Err(e) if is_integrity_violation(&e) => {
            return Err(AppError::Conflict(
                "User is already linked to an employee".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(user_id) = payload.user_id {
        let linked = sqlx::query("UPDATE users SET employee_id = ? WHERE id = ? AND employee_id IS NULL")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if linked == 0 {
            return Err(AppError::validation(
                "userId",
                "userId must be an existing user without an employee record",
            ));
        }
    }

    audit::record(&mut *tx, auth.user_id, "create", "employee", Some(id), None).await?;
    tx.commit().await?;

    info!(employee_id = id, "Employee created");

    let employee = fetch_employee(pool.get_ref(), id).await?;
    Ok(HttpResponse::Created().json(EmployeeResponse::from(employee)))
}

// -------------------- Handler --------------------

#[utoipa::path(
    get,
    path = "/api/v1/employees",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Paginated employee list", body = EmployeeListResponse)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageEmployees)?;

    let page = Page::new(query.page, query.per_page);

    // ---------- build WHERE clause dynamically ----------
    let mut filters = Filters::default();
    if let Some(active) = query.active {
        filters.push("active = ?", FilterValue::Bool(active));
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        filters.push_search("name LIKE ?", 1, search);
    }
    let where_clause = filters.where_clause();

    // ---------- total count ----------
    let count_sql = format!("SELECT COUNT(*) FROM employees{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    // ---------- data ----------
    let data_sql = format!(
        "SELECT {} FROM employees{} ORDER BY id DESC LIMIT ? OFFSET ?",
        EMPLOYEE_COLUMNS, where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, Employee>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    debug!(total, page = page.page, "Listed employees");

    let data = rows.into_iter().map(EmployeeResponse::from).collect();
    Ok(HttpResponse::Ok().json(Paginated::new(data, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/employees/{id}",
    params(("id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee found", body = EmployeeResponse),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    let employee_id = path.into_inner();
    if auth.employee_id != Some(employee_id) {
        auth.require(Permission::ManageEmployees)?;
    }

    let employee = fetch_employee(pool.get_ref(), employee_id).await?;
    Ok(HttpResponse::Ok().json(EmployeeResponse::from(employee)))
}

#[utoipa::path(
    put,
    path = "/api/v1/employees/{id}",
    request_body = UpdateEmployee,
    params(("id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee updated", body = EmployeeResponse),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<Value>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageEmployees)?;
    let employee_id = path.into_inner();

    let update = build_update_sql("employees", &payload, EMPLOYEE_FIELDS, "id", employee_id)?;
    let affected = execute_update(pool.get_ref(), update).await?;
    if affected == 0 {
        // MySQL reports 0 for unchanged rows too
        fetch_employee(pool.get_ref(), employee_id).await?;
    }

    let mut conn = pool.acquire().await?;
    audit::record(
        &mut *conn,
        auth.user_id,
        "update",
        "employee",
        Some(employee_id),
        Some(payload.into_inner()),
    )
    .await?;

    let employee = fetch_employee(pool.get_ref(), employee_id).await?;
    Ok(HttpResponse::Ok().json(EmployeeResponse::from(employee)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/employees/{id}",
    params(("id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 204, description = "Employee deleted"),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "Employee has payroll history")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageEmployees)?;
    let employee_id = path.into_inner();

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE users SET employee_id = NULL WHERE employee_id = ?")
        .bind(employee_id)
        .execute(&mut *tx)
        .await?;

    let deleted = match sqlx::query("DELETE FROM employees WHERE id = ?")
        .bind(employee_id)
        .execute(&mut *tx)
        .await
    {
        Ok(r) => r.rows_affected(),
        // payslips or attendance reference the row
        Err(e) if is_integrity_violation(&e) => {
            return Err(AppError::Conflict(
                "Employee has payroll history; deactivate instead".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if deleted == 0 {
        return Err(AppError::not_found("Employee"));
    }

    audit::record(
        &mut *tx,
        auth.user_id,
        "delete",
        "employee",
        Some(employee_id),
        Some(json!({ "id": employee_id })),
    )
    .await?;
    tx.commit().await?;

    info!(employee_id, "Employee deleted");
    Ok(HttpResponse::NoContent().finish())
}
