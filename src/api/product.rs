use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::api::{FilterValue, Filters, Page, Paginated, bind_filters, validate};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::money::{parse_amount, to_fixed};
use crate::error::{ApiResult, AppError, is_integrity_violation};
use crate::model::product::{Product, StockMovement};
use crate::services::audit;
use crate::services::inventory::{PRODUCT_COLUMNS, apply_stock_change};
use crate::utils::db_utils::{FieldKind, UpdateField, build_update_sql, execute_update};

const PRODUCT_FIELDS: &[UpdateField] = &[
    UpdateField::new("name", "name", FieldKind::Text),
    UpdateField::new("unit", "unit", FieldKind::Text),
    UpdateField::new("price", "price", FieldKind::Money),
    UpdateField::new("reorderLevel", "reorder_level", FieldKind::Int),
    UpdateField::new("active", "active", FieldKind::Bool),
];

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProduct {
    #[validate(length(min = 1, max = 64, message = "sku is required"))]
    #[schema(example = "CEM-40KG")]
    pub sku: String,
    #[validate(length(min = 1, max = 128, message = "name is required"))]
    #[schema(example = "Portland cement 40kg")]
    pub name: String,
    #[validate(length(min = 1, max = 16))]
    #[schema(example = "bag")]
    pub unit: Option<String>,
    #[schema(example = "265.00")]
    pub price: String,
    #[validate(range(min = 0))]
    pub stock_quantity: Option<i32>,
    #[validate(range(min = 0))]
    pub reorder_level: Option<i32>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct StockAdjustment {
    /// Signed quantity; negative removes stock
    #[schema(example = -3)]
    pub change: i32,
    #[validate(length(min = 1, max = 32, message = "reason is required"))]
    #[schema(example = "damaged")]
    pub reason: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ProductQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Matches name or SKU
    pub search: Option<String>,
    /// Only products at or below their reorder level
    pub low_stock: Option<bool>,
    pub active: Option<bool>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: u64,
    pub sku: String,
    pub name: String,
    pub unit: String,
    #[schema(example = "265.00")]
    pub price: String,
    pub stock_quantity: i32,
    pub reorder_level: i32,
    pub low_stock: bool,
    pub active: bool,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            low_stock: p.is_low_stock(),
            id: p.id,
            sku: p.sku,
            name: p.name,
            unit: p.unit,
            price: to_fixed(p.price),
            stock_quantity: p.stock_quantity,
            reorder_level: p.reorder_level,
            active: p.active,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockMovementResponse {
    pub id: u64,
    pub change: i32,
    pub reason: String,
    pub reference: Option<String>,
    pub created_by: Option<u64>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl From<StockMovement> for StockMovementResponse {
    fn from(m: StockMovement) -> Self {
        Self {
            id: m.id,
            change: m.change_qty,
            reason: m.reason,
            reference: m.reference,
            created_by: m.created_by,
            created_at: m.created_at,
        }
    }
}

async fn fetch_product(pool: &MySqlPool, id: u64) -> ApiResult<Product> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {} FROM products WHERE id = ?",
        PRODUCT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Product"))
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProduct,
    responses(
        (status = 201, description = "Product created", body = ProductResponse),
        (status = 409, description = "SKU already exists")
    ),
    tag = "Inventory",
    security(("bearer_auth" = []))
)]
pub async fn create_product(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateProduct>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageInventory)?;
    validate(&*payload)?;
    let price = parse_amount("price", &payload.price)?;
    let sku = payload.sku.trim().to_ascii_uppercase();

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        "INSERT INTO products (sku, name, unit, price, stock_quantity, reorder_level) VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(&sku)
    .bind(payload.name.trim())
    .bind(payload.unit.as_deref().unwrap_or("pc"))
    .bind(price)
    .bind(payload.reorder_level.unwrap_or(0))
    .execute(&mut *tx)
    .await;

    let id = match inserted {
        Ok(r) => r.last_insert_id(),
        Err(e) if is_integrity_violation(&e) => {
            return Err(AppError::Conflict(format!("SKU {} already exists", sku)));
        }
        Err(e) => return Err(e.into()),
    };

    let opening = payload.stock_quantity.unwrap_or(0);
    if opening > 0 {
        apply_stock_change(&mut *tx, id, opening, "opening", None, auth.user_id).await?;
    }
    audit::record(
        &mut *tx,
        auth.user_id,
        "create",
        "product",
        Some(id),
        Some(json!({ "sku": sku })),
    )
    .await?;
    tx.commit().await?;

    info!(product_id = id, sku = %sku, "Product created");
    let product = fetch_product(pool.get_ref(), id).await?;
    Ok(HttpResponse::Created().json(ProductResponse::from(product)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductQuery),
    responses((status = 200, description = "Paginated products")),
    tag = "Inventory",
    security(("bearer_auth" = []))
)]
pub async fn list_products(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ProductQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewInventory)?;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        filters.push_search("(name LIKE ? OR sku LIKE ?)", 2, search);
    }
    if query.low_stock == Some(true) {
        filters.push("stock_quantity <= reorder_level AND active = ?", FilterValue::Bool(true));
    }
    if let Some(active) = query.active {
        filters.push("active = ?", FilterValue::Bool(active));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM products{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {} FROM products{} ORDER BY name, id LIMIT ? OFFSET ?",
        PRODUCT_COLUMNS, where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, Product>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    let data: Vec<ProductResponse> = rows.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(Paginated::new(data, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = u64, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product", body = ProductResponse),
        (status = 404, description = "Product not found")
    ),
    tag = "Inventory",
    security(("bearer_auth" = []))
)]
pub async fn get_product(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewInventory)?;
    let product = fetch_product(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ProductResponse::from(product)))
}

#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    request_body(content = Object, description = "Any of name, unit, price, reorderLevel, active"),
    params(("id" = u64, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product updated", body = ProductResponse),
        (status = 400, description = "Unknown field or invalid value"),
        (status = 404, description = "Product not found")
    ),
    tag = "Inventory",
    security(("bearer_auth" = []))
)]
pub async fn update_product(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<Value>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageInventory)?;
    let product_id = path.into_inner();

    // stock only moves through adjustments so every change has a movement row
    let update = build_update_sql("products", &payload, PRODUCT_FIELDS, "id", product_id)?;
    if execute_update(pool.get_ref(), update).await? == 0 {
        fetch_product(pool.get_ref(), product_id).await?;
    }

    let mut conn = pool.acquire().await?;
    audit::record(
        &mut *conn,
        auth.user_id,
        "update",
        "product",
        Some(product_id),
        Some(payload.into_inner()),
    )
    .await?;

    let product = fetch_product(pool.get_ref(), product_id).await?;
    Ok(HttpResponse::Ok().json(ProductResponse::from(product)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = u64, Path, description = "Product ID")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 404, description = "Product not found"),
        (status = 409, description = "Product appears on sales; deactivate instead")
    ),
    tag = "Inventory",
    security(("bearer_auth" = []))
)]
pub async fn delete_product(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageInventory)?;
    let product_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let deleted = match sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(product_id)
        .execute(&mut *tx)
        .await
    {
        Ok(r) => r.rows_affected(),
        Err(e) if is_integrity_violation(&e) => {
            return Err(AppError::Conflict(
                "Product appears on sales; deactivate instead".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    if deleted == 0 {
        return Err(AppError::not_found("Product"));
    }

    audit::record(&mut *tx, auth.user_id, "delete", "product", Some(product_id), None).await?;
    tx.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/stock-adjustments",
    request_body = StockAdjustment,
    params(("id" = u64, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Stock adjusted", body = ProductResponse),
        (status = 400, description = "Zero change or missing reason"),
        (status = 404, description = "Product not found"),
        (status = 409, description = "Stock would go below zero")
    ),
    tag = "Inventory",
    security(("bearer_auth" = []))
)]
pub async fn adjust_stock(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<StockAdjustment>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageInventory)?;
    validate(&*payload)?;
    if payload.change == 0 {
        return Err(AppError::validation("change", "change must not be zero"));
    }
    let product_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let product = apply_stock_change(
        &mut *tx,
        product_id,
        payload.change,
        payload.reason.trim(),
        None,
        auth.user_id,
    )
    .await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "adjust_stock",
        "product",
        Some(product_id),
        Some(json!({ "change": payload.change, "reason": payload.reason.trim() })),
    )
    .await?;
    tx.commit().await?;

    info!(product_id, change = payload.change, stock = product.stock_quantity, "Stock adjusted");
    Ok(HttpResponse::Ok().json(ProductResponse::from(product)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/stock-movements",
    params(("id" = u64, Path, description = "Product ID")),
    responses((status = 200, description = "Latest 100 movements", body = [StockMovementResponse])),
    tag = "Inventory",
    security(("bearer_auth" = []))
)]
pub async fn list_stock_movements(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ViewInventory)?;
    let product_id = path.into_inner();
    fetch_product(pool.get_ref(), product_id).await?;

    let rows = sqlx::query_as::<_, StockMovement>(
        r#"
        SELECT id, product_id, change_qty, reason, reference, created_by, created_at
        FROM stock_movements
        WHERE product_id = ?
        ORDER BY id DESC
        LIMIT 100
        "#,
    )
    .bind(product_id)
    .fetch_all(pool.get_ref())
    .await?;

    let body: Vec<StockMovementResponse> = rows.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn response_flags_low_stock() {
        let product = Product {
            id: 1,
            sku: "REB-10MM".into(),
            name: "Rebar 10mm".into(),
            unit: "pc".into(),
            price: dec!(185.5),
            stock_quantity: 20,
            reorder_level: 20,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let body = ProductResponse::from(product);
        assert!(body.low_stock);
        assert_eq!(body.price, "185.50");
    }

    #[test]
    fn create_payload_validation() {
        let bad: CreateProduct = serde_json::from_str(
            r#"{"sku":"","name":"Sand","price":"1200.00","reorderLevel":-1}"#,
        )
        .unwrap();
        assert!(bad.validate().is_err());

        let good: CreateProduct = serde_json::from_str(
            r#"{"sku":"SND-CUM","name":"Sand per cubic meter","unit":"cu.m","price":"1200.00","stockQuantity":30}"#,
        )
        .unwrap();
        assert!(good.validate().is_ok());
    }
}
