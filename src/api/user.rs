use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use std::collections::HashMap;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::api::{Filters, Page, Paginated, bind_filters, validate};
use crate::auth::{auth::AuthUser, password::hash_password, permissions::Permission};
use crate::error::{ApiResult, AppError, is_integrity_violation};
use crate::model::{role::Role, user::User};
use crate::services::audit;
use crate::utils::role_cache::RoleCache;

const USER_COLUMNS: &str =
    "id, username, password, full_name, employee_id, is_active, last_login_at, created_at";

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    #[validate(length(min = 3, max = 64, message = "username must be 3 to 64 characters"))]
    #[schema(example = "cashier01")]
    pub username: String,
    #[validate(length(min = 8, max = 128, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(max = 128))]
    #[schema(example = "Maria Santos")]
    pub full_name: Option<String>,
    #[validate(length(min = 1, message = "at least one role is required"))]
    pub roles: Vec<Role>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct ReplaceRoles {
    #[validate(length(min = 1, message = "at least one role is required"))]
    pub roles: Vec<Role>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserStatus {
    pub is_active: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Matches username or full name
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: u64,
    pub username: String,
    pub full_name: Option<String>,
    pub employee_id: Option<u64>,
    pub is_active: bool,
    pub roles: Vec<Role>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl UserResponse {
    fn new(user: User, roles: Vec<Role>) -> Self {
        Self {
            id: user.id,
            username: user.username,
            full_name: user.full_name,
            employee_id: user.employee_id,
            is_active: user.is_active,
            roles,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

/// Drops repeats, keeping first-seen order.
fn distinct_roles(roles: &[Role]) -> Vec<Role> {
    let mut out: Vec<Role> = Vec::with_capacity(roles.len());
    for role in roles {
        if !out.contains(role) {
            out.push(*role);
        }
    }
    out
}

async fn replace_roles(
    conn: &mut MySqlConnection,
    user_id: u64,
    roles: &[Role],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    for role in roles {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) SELECT ?, id FROM roles WHERE name = ?")
            .bind(user_id)
            .bind(role.as_ref())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn fetch_user(conn: &mut MySqlConnection, user_id: u64) -> ApiResult<UserResponse> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let names = sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.name
        FROM roles r
        JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = ?
        ORDER BY r.id
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(UserResponse::new(user, Role::parse_all(names)))
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid payload or unknown role"),
        (status = 409, description = "Username already taken")
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageUsers)?;
    validate(&*payload)?;

    let hashed = hash_password(&payload.password)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))?;
    let roles = distinct_roles(&payload.roles);
    let username = payload.username.trim();

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query("INSERT INTO users (username, password, full_name) VALUES (?, ?, ?)")
        .bind(username)
        .bind(&hashed)
        .bind(payload.full_name.as_deref().map(str::trim))
        .execute(&mut *tx)
        .await;
    let user_id = match inserted {
        Ok(r) => r.last_insert_id(),
        Err(e) if is_integrity_violation(&e) => {
            info!(username, "User creation refused: username taken");
            return Err(AppError::Conflict("Username already taken".into()));
        }
        Err(e) => return Err(e.into()),
    };

    replace_roles(&mut *tx, user_id, &roles).await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "create",
        "user",
        Some(user_id),
        Some(json!({ "username": username, "roles": roles })),
    )
    .await?;
    let body = fetch_user(&mut *tx, user_id).await?;
    tx.commit().await?;

    info!(user_id, "User created");
    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(UserQuery),
    responses((status = 200, description = "Paginated users with their roles")),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageUsers)?;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        filters.push_search("(username LIKE ? OR full_name LIKE ?)", 2, search);
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM users{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {} FROM users{} ORDER BY username LIMIT ? OFFSET ?",
        USER_COLUMNS, where_clause
    );
    let users = bind_filters!(sqlx::query_as::<_, User>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    let mut roles_by_user: HashMap<u64, Vec<String>> = HashMap::new();
    if !users.is_empty() {
        let placeholders = vec!["?"; users.len()].join(", ");
        let sql = format!(
            r#"
            SELECT ur.user_id, r.name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id IN ({})
            ORDER BY r.id
            "#,
            placeholders
        );
        let mut q = sqlx::query_as::<_, (u64, String)>(&sql);
        for u in &users {
            q = q.bind(u.id);
        }
        for (user_id, name) in q.fetch_all(pool.get_ref()).await? {
            roles_by_user.entry(user_id).or_default().push(name);
        }
    }

    let data: Vec<UserResponse> = users
        .into_iter()
        .map(|u| {
            let roles = Role::parse_all(roles_by_user.remove(&u.id).unwrap_or_default());
            UserResponse::new(u, roles)
        })
        .collect();

    Ok(HttpResponse::Ok().json(Paginated::new(data, page, total)))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/roles",
    request_body = ReplaceRoles,
    params(("id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Role set replaced", body = UserResponse),
        (status = 400, description = "Unknown role"),
        (status = 404, description = "User not found")
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn replace_user_roles(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    role_cache: web::Data<RoleCache>,
    path: web::Path<u64>,
    payload: web::Json<ReplaceRoles>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageUsers)?;
    validate(&*payload)?;
    let user_id = path.into_inner();
    let roles = distinct_roles(&payload.roles);

    let mut tx = pool.begin().await?;
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = ? FOR UPDATE")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
    if exists == 0 {
        return Err(AppError::not_found("User"));
    }

    replace_roles(&mut *tx, user_id, &roles).await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "replace_roles",
        "user",
        Some(user_id),
        Some(json!({ "roles": roles })),
    )
    .await?;
    let body = fetch_user(&mut *tx, user_id).await?;
    tx.commit().await?;

    role_cache.invalidate(user_id).await;
    info!(user_id, ?roles, "User roles replaced");
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/status",
    request_body = UpdateUserStatus,
    params(("id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Account activated or deactivated", body = UserResponse),
        (status = 400, description = "Cannot deactivate yourself"),
        (status = 404, description = "User not found")
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn update_user_status(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    role_cache: web::Data<RoleCache>,
    path: web::Path<u64>,
    payload: web::Json<UpdateUserStatus>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageUsers)?;
    let user_id = path.into_inner();
    if user_id == auth.user_id && !payload.is_active {
        return Err(AppError::BadRequest("You cannot deactivate your own account".into()));
    }

    let mut tx = pool.begin().await?;
    let updated = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
        .bind(payload.is_active)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    // MySQL reports 0 when the value is unchanged
    if updated == 0 {
        fetch_user(&mut *tx, user_id).await?;
    }

    if !payload.is_active {
        let revoked = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ? AND revoked = FALSE")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if revoked > 0 {
            warn!(user_id, revoked, "Refresh tokens revoked on deactivation");
        }
    }

    audit::record(
        &mut *tx,
        auth.user_id,
        if payload.is_active { "activate" } else { "deactivate" },
        "user",
        Some(user_id),
        None,
    )
    .await?;
    let body = fetch_user(&mut *tx, user_id).await?;
    tx.commit().await?;

    role_cache.invalidate(user_id).await;
    info!(user_id, is_active = payload.is_active, "User status changed");
    Ok(HttpResponse::Ok().json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_is_rejected_at_parse() {
        assert!(serde_json::from_str::<ReplaceRoles>(r#"{"roles":["cashier","owner"]}"#).is_err());

        let body: ReplaceRoles =
            serde_json::from_str(r#"{"roles":["inventory_clerk","driver"]}"#).unwrap();
        assert_eq!(body.roles, vec![Role::InventoryClerk, Role::Driver]);
    }

    #[test]
    fn empty_role_set_fails_validation() {
        let body: ReplaceRoles = serde_json::from_str(r#"{"roles":[]}"#).unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn repeated_roles_collapse() {
        let roles = distinct_roles(&[Role::Cashier, Role::Driver, Role::Cashier]);
        assert_eq!(roles, vec![Role::Cashier, Role::Driver]);
    }

    #[test]
    fn short_password_fails_validation() {
        let body: CreateUser = serde_json::from_str(
            r#"{"username":"till2","password":"short","roles":["cashier"]}"#,
        )
        .unwrap();
        assert!(body.validate().is_err());
    }
}
