use serde_json::Value;
use sqlx::MySqlConnection;

/// Appends an audit entry on the caller's connection, so it commits or rolls
/// back with the change it describes.
pub async fn record(
    conn: &mut MySqlConnection,
    user_id: u64,
    action: &str,
    entity: &str,
    entity_id: Option<u64>,
    details: Option<Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (user_id, action, entity, entity_id, details)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(action)
    .bind(entity)
    .bind(entity_id)
    .bind(details.map(|d| d.to_string()))
    .execute(conn)
    .await?;
    Ok(())
}
