use moka::future::Cache;
use sqlx::MySqlPool;
use std::sync::Arc;
use std::time::Duration;

use crate::model::role::Role;

/// What a request needs to know about its caller beyond the token.
#[derive(Debug, Clone)]
pub struct UserAccess {
    pub user_id: u64,
    pub username: String,
    pub employee_id: Option<u64>,
    pub is_active: bool,
    pub roles: Vec<Role>,
}

/// Short-lived cache of role sets keyed by user id, so role edits take
/// effect without waiting for tokens to expire.
#[derive(Clone)]
pub struct RoleCache {
    inner: Cache<u64, Arc<UserAccess>>,
}

impl RoleCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(ttl_secs))
                .build(),
        }
    }

    /// Cached access record, loading from the database on a miss.
    /// `None` when the user no longer exists.
    pub async fn get_or_load(
        &self,
        pool: &MySqlPool,
        user_id: u64,
    ) -> Result<Option<Arc<UserAccess>>, sqlx::Error> {
        if let Some(hit) = self.inner.get(&user_id).await {
            return Ok(Some(hit));
        }

        let Some(access) = load_access(pool, user_id).await? else {
            return Ok(None);
        };

        let access = Arc::new(access);
        self.inner.insert(user_id, access.clone()).await;
        Ok(Some(access))
    }

    pub async fn invalidate(&self, user_id: u64) {
        self.inner.invalidate(&user_id).await;
    }
}

pub async fn load_role_names(pool: &MySqlPool, user_id: u64) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.name
        FROM roles r
        JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = ?
        ORDER BY r.id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

async fn load_access(pool: &MySqlPool, user_id: u64) -> Result<Option<UserAccess>, sqlx::Error> {
    let row = sqlx::query_as::<_, (u64, String, Option<u64>, bool)>(
        "SELECT id, username, employee_id, is_active FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some((id, username, employee_id, is_active)) = row else {
        return Ok(None);
    };

    let roles = Role::parse_all(load_role_names(pool, user_id).await?);

    Ok(Some(UserAccess {
        user_id: id,
        username,
        employee_id,
        is_active,
        roles,
    }))
}
