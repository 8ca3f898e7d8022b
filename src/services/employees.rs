use sqlx::MySqlConnection;
use tracing::info;

/// Employee id linked to `user_id`, creating and linking a zero-rate record
/// when the user has none yet.
pub async fn ensure_employee_for_user(
    conn: &mut MySqlConnection,
    user_id: u64,
) -> Result<u64, sqlx::Error> {
    let user = sqlx::query_as::<_, (String, Option<String>, Option<u64>)>(
        "SELECT username, full_name, employee_id FROM users WHERE id = ? FOR UPDATE",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let (username, full_name, employee_id) = user;
    if let Some(id) = employee_id {
        return Ok(id);
    }

    let result = sqlx::query("INSERT INTO employees (user_id, name, rate, active) VALUES (?, ?, 0.00, TRUE)")
        .bind(user_id)
        .bind(full_name.unwrap_or(username))
        .execute(&mut *conn)
        .await?;
    let employee_id = result.last_insert_id();

    sqlx::query("UPDATE users SET employee_id = ? WHERE id = ?")
        .bind(employee_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    info!(user_id, employee_id, "Created employee record for user");
    Ok(employee_id)
}
