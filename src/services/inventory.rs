use sqlx::MySqlConnection;
use tracing::{debug, info};

use super::notify::notify_permission_holders;
use crate::auth::permissions::Permission;
use crate::error::AppError;
use crate::model::product::Product;

pub const PRODUCT_COLUMNS: &str =
    "id, sku, name, unit, price, stock_quantity, reorder_level, active, created_at, updated_at";

pub async fn lock_product(
    conn: &mut MySqlConnection,
    product_id: u64,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {} FROM products WHERE id = ? FOR UPDATE",
        PRODUCT_COLUMNS
    ))
    .bind(product_id)
    .fetch_optional(conn)
    .await
}

/// A product just dropped to or below its reorder level.
pub fn crossed_reorder_level(before: i32, after: i32, reorder_level: i32) -> bool {
    before > reorder_level && after <= reorder_level
}

/// Applies `change` to the product's stock and records the movement. The
/// resulting quantity may not go below zero. Inventory users are notified
/// when the change crosses the reorder level.
pub async fn apply_stock_change(
    conn: &mut MySqlConnection,
    product_id: u64,
    change: i32,
    reason: &str,
    reference: Option<&str>,
    user_id: u64,
) -> Result<Product, AppError> {
    let mut product = lock_product(&mut *conn, product_id)
        .await?
        .ok_or_else(|| AppError::not_found("Product"))?;

    let before = product.stock_quantity;
    let after = before
        .checked_add(change)
        .filter(|q| *q >= 0)
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "Insufficient stock for {}: {} available, {} requested",
                product.sku,
                before,
                change.unsigned_abs()
            ))
        })?;

    sqlx::query("UPDATE products SET stock_quantity = ? WHERE id = ?")
        .bind(after)
        .bind(product_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO stock_movements (product_id, change_qty, reason, reference, created_by) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(product_id)
    .bind(change)
    .bind(reason)
    .bind(reference)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    product.stock_quantity = after;
    debug!(product_id, before, after, reason, "Stock changed");

    if crossed_reorder_level(before, after, product.reorder_level) {
        let notified = notify_permission_holders(
            &mut *conn,
            Permission::ManageInventory,
            "Low stock",
            &format!(
                "{} ({}) is down to {} {}; reorder level is {}",
                product.name, product.sku, after, product.unit, product.reorder_level
            ),
        )
        .await?;
        info!(product_id, sku = %product.sku, stock = after, notified, "Low stock alert sent");
    }

    Ok(product)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_fires_once_on_crossing() {
        assert!(crossed_reorder_level(12, 10, 10));
        assert!(crossed_reorder_level(12, 0, 10));
        // already low: no repeat alert
        assert!(!crossed_reorder_level(10, 8, 10));
        // restock
        assert!(!crossed_reorder_level(5, 50, 10));
        assert!(!crossed_reorder_level(50, 11, 10));
    }
}
