use sqlx::MySqlConnection;

use crate::auth::permissions::{Permission, role_has};
use crate::model::role::Role;

pub async fn notify_user(
    conn: &mut MySqlConnection,
    user_id: u64,
    title: &str,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO notifications (user_id, title, message) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(title)
        .bind(message)
        .execute(conn)
        .await?;
    Ok(())
}

/// Notifies every active user holding a role that grants `permission`.
pub async fn notify_permission_holders(
    conn: &mut MySqlConnection,
    permission: Permission,
    title: &str,
    message: &str,
) -> Result<u64, sqlx::Error> {
    let rows = sqlx::query_as::<_, (u64, String)>(
        r#"
        SELECT DISTINCT u.id, r.name
        FROM users u
        JOIN user_roles ur ON ur.user_id = u.id
        JOIN roles r ON r.id = ur.role_id
        WHERE u.is_active = TRUE
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut recipients: Vec<u64> = rows
        .into_iter()
        .filter(|(_, role)| role.parse::<Role>().is_ok_and(|r| role_has(r, permission)))
        .map(|(id, _)| id)
        .collect();
    recipients.sort_unstable();
    recipients.dedup();

    for user_id in &recipients {
        notify_user(&mut *conn, *user_id, title, message).await?;
    }

    Ok(recipients.len() as u64)
}
