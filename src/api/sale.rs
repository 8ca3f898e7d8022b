use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::api::{FilterValue, Filters, Page, Paginated, bind_filters, validate};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::money::{parse_amount, parse_optional_amount, to_fixed};
use crate::domain::sale::{
    LinePricing, PaymentMethod, SaleAction, SaleStatus, SaleTotals, apply_action, sale_totals,
    settle,
};
use crate::error::{ApiResult, AppError};
use crate::model::sale::{Sale, SaleItem, SalePayment};
use crate::services::inventory::apply_stock_change;
use crate::services::{audit, parse_stored};

const SALE_COLUMNS: &str = "id, customer_id, cashier_id, status, subtotal, discount_total, total, amount_paid, change_due, void_reason, created_at, completed_at";

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSale {
    pub customer_id: Option<u64>,
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddSaleItem {
    pub product_id: u64,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    #[schema(example = 10)]
    pub quantity: i32,
    /// Line discount, "D.DD"
    #[schema(example = "50.00")]
    pub discount: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct PaymentInput {
    pub method: PaymentMethod,
    #[schema(example = "3000.00")]
    pub amount: String,
    pub reference: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct CompleteSale {
    pub payments: Vec<PaymentInput>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct VoidSale {
    #[validate(length(min = 1, max = 255, message = "reason is required"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SaleQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<SaleStatus>,
    pub customer_id: Option<u64>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaleItemResponse {
    pub id: u64,
    pub product_id: u64,
    pub quantity: i32,
    #[schema(example = "265.00")]
    pub unit_price: String,
    pub discount: String,
    pub line_total: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: u64,
    pub method: String,
    pub amount: String,
    pub reference: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaleResponse {
    pub id: u64,
    pub customer_id: Option<u64>,
    pub cashier_id: u64,
    #[schema(example = "draft")]
    pub status: String,
    pub subtotal: String,
    pub discount_total: String,
    pub total: String,
    pub amount_paid: String,
    pub change_due: String,
    pub void_reason: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<SaleItemResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payments: Option<Vec<PaymentResponse>>,
}

impl From<Sale> for SaleResponse {
    fn from(s: Sale) -> Self {
        Self {
            id: s.id,
            customer_id: s.customer_id,
            cashier_id: s.cashier_id,
            status: s.status,
            subtotal: to_fixed(s.subtotal),
            discount_total: to_fixed(s.discount_total),
            total: to_fixed(s.total),
            amount_paid: to_fixed(s.amount_paid),
            change_due: to_fixed(s.change_due),
            void_reason: s.void_reason,
            created_at: s.created_at,
            completed_at: s.completed_at,
            items: None,
            payments: None,
        }
    }
}

struct ParsedPayment {
    method: PaymentMethod,
    amount: Decimal,
    reference: Option<String>,
}

fn parse_payments(input: &[PaymentInput]) -> Result<Vec<ParsedPayment>, AppError> {
    if input.is_empty() {
        return Err(AppError::validation("payments", "at least one payment is required"));
    }
    input
        .iter()
        .map(|p| {
            let amount = parse_amount("amount", &p.amount)?;
            if amount.is_zero() {
                return Err(AppError::validation("amount", "amount must be greater than zero"));
            }
            Ok(ParsedPayment {
                method: p.method,
                amount,
                reference: p.reference.as_deref().map(str::trim).map(str::to_string),
            })
        })
        .collect()
}

async fn lock_sale(conn: &mut MySqlConnection, sale_id: u64) -> ApiResult<(Sale, SaleStatus)> {
    let sale = sqlx::query_as::<_, Sale>(&format!(
        "SELECT {} FROM sales WHERE id = ? FOR UPDATE",
        SALE_COLUMNS
    ))
    .bind(sale_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Sale"))?;
    let status = parse_stored(&sale.status, "sale status")?;
    Ok((sale, status))
}

async fn load_items(conn: &mut MySqlConnection, sale_id: u64) -> Result<Vec<SaleItem>, sqlx::Error> {
    sqlx::query_as::<_, SaleItem>(
        r#"
        SELECT id, sale_id, product_id, quantity, unit_price, discount, line_total
        FROM sale_items
        WHERE sale_id = ?
        ORDER BY id
        "#,
    )
    .bind(sale_id)
    .fetch_all(conn)
    .await
}

/// Recomputes the sale's totals from its items and stores them.
async fn store_totals(conn: &mut MySqlConnection, sale_id: u64) -> Result<SaleTotals, sqlx::Error> {
    let items = load_items(&mut *conn, sale_id).await?;
    let lines: Vec<LinePricing> = items.iter().map(SaleItem::pricing).collect();
    let totals = sale_totals(&lines);

    sqlx::query("UPDATE sales SET subtotal = ?, discount_total = ?, total = ? WHERE id = ?")
        .bind(totals.subtotal)
        .bind(totals.discount_total)
        .bind(totals.total)
        .bind(sale_id)
        .execute(&mut *conn)
        .await?;
    Ok(totals)
}

async fn load_sale_detail(conn: &mut MySqlConnection, sale_id: u64) -> ApiResult<SaleResponse> {
    let sale = sqlx::query_as::<_, Sale>(&format!("SELECT {} FROM sales WHERE id = ?", SALE_COLUMNS))
        .bind(sale_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Sale"))?;

    let items = load_items(&mut *conn, sale_id).await?;
    let payments = sqlx::query_as::<_, SalePayment>(
        "SELECT id, sale_id, method, amount, reference, created_at FROM sale_payments WHERE sale_id = ? ORDER BY id",
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut body = SaleResponse::from(sale);
    body.items = Some(
        items
            .into_iter()
            .map(|i| SaleItemResponse {
                id: i.id,
                product_id: i.product_id,
                quantity: i.quantity,
                unit_price: to_fixed(i.unit_price),
                discount: to_fixed(i.discount),
                line_total: to_fixed(i.line_total),
            })
            .collect(),
    );
    body.payments = Some(
        payments
            .into_iter()
            .map(|p| PaymentResponse {
                id: p.id,
                method: p.method,
                amount: to_fixed(p.amount),
                reference: p.reference,
            })
            .collect(),
    );
    Ok(body)
}

#[utoipa::path(
    post,
    path = "/api/v1/sales",
    request_body = CreateSale,
    responses((status = 201, description = "Draft sale opened", body = SaleResponse)),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
pub async fn create_sale(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateSale>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageSales)?;

    let mut tx = pool.begin().await?;
    let id = sqlx::query("INSERT INTO sales (customer_id, cashier_id, status) VALUES (?, ?, 'draft')")
        .bind(payload.customer_id)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?
        .last_insert_id();
    let body = load_sale_detail(&mut *tx, id).await?;
    tx.commit().await?;

    info!(sale_id = id, cashier_id = auth.user_id, "Sale opened");
    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    get,
    path = "/api/v1/sales",
    params(SaleQuery),
    responses((status = 200, description = "Paginated sales without lines")),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
pub async fn list_sales(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<SaleQuery>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageSales)?;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(status) = query.status {
        filters.push("status = ?", FilterValue::Str(status.to_string()));
    }
    if let Some(id) = query.customer_id {
        filters.push("customer_id = ?", FilterValue::U64(id));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM sales{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {} FROM sales{} ORDER BY id DESC LIMIT ? OFFSET ?",
        SALE_COLUMNS, where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, Sale>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(pool.get_ref())
        .await?;

    let data: Vec<SaleResponse> = rows.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(Paginated::new(data, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/v1/sales/{id}",
    params(("id" = u64, Path, description = "Sale ID")),
    responses(
        (status = 200, description = "Sale with items and payments", body = SaleResponse),
        (status = 404, description = "Sale not found")
    ),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
pub async fn get_sale(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageSales)?;
    let mut conn = pool.acquire().await?;
    let body = load_sale_detail(&mut *conn, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/sales/{id}/items",
    request_body = AddSaleItem,
    params(("id" = u64, Path, description = "Sale ID")),
    responses(
        (status = 200, description = "Item added; totals recomputed", body = SaleResponse),
        (status = 400, description = "Invalid quantity or discount, or inactive product"),
        (status = 409, description = "Sale is not a draft")
    ),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
pub async fn add_sale_item(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<AddSaleItem>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageSales)?;
    validate(&*payload)?;
    let discount = parse_optional_amount("discount", payload.discount.as_deref())?.unwrap_or_default();
    let sale_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let (_, status) = lock_sale(&mut *tx, sale_id).await?;
    apply_action(status, SaleAction::EditItems)?;

    let product = sqlx::query_as::<_, (Decimal, bool)>("SELECT price, active FROM products WHERE id = ?")
        .bind(payload.product_id)
        .fetch_optional(&mut *tx)
        .await?;
    let unit_price = match product {
        Some((price, true)) => price,
        Some((_, false)) => {
            return Err(AppError::validation("productId", "product is not active"));
        }
        None => return Err(AppError::not_found("Product")),
    };

    let pricing = LinePricing {
        quantity: payload.quantity,
        unit_price,
        discount,
    };
    sqlx::query(
        "INSERT INTO sale_items (sale_id, product_id, quantity, unit_price, discount, line_total) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(sale_id)
    .bind(payload.product_id)
    .bind(pricing.quantity)
    .bind(pricing.unit_price)
    .bind(pricing.discount)
    .bind(pricing.line_total())
    .execute(&mut *tx)
    .await?;

    store_totals(&mut *tx, sale_id).await?;
    let body = load_sale_detail(&mut *tx, sale_id).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    delete,
    path = "/api/v1/sales/{id}/items/{item_id}",
    params(
        ("id" = u64, Path, description = "Sale ID"),
        ("item_id" = u64, Path, description = "Sale item ID")
    ),
    responses(
        (status = 200, description = "Item removed; totals recomputed", body = SaleResponse),
        (status = 404, description = "Item not on this sale"),
        (status = 409, description = "Sale is not a draft")
    ),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
pub async fn remove_sale_item(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<(u64, u64)>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageSales)?;
    let (sale_id, item_id) = path.into_inner();

    let mut tx = pool.begin().await?;
    let (_, status) = lock_sale(&mut *tx, sale_id).await?;
    apply_action(status, SaleAction::EditItems)?;

    let removed = sqlx::query("DELETE FROM sale_items WHERE id = ? AND sale_id = ?")
        .bind(item_id)
        .bind(sale_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(AppError::not_found("Sale item"));
    }

    store_totals(&mut *tx, sale_id).await?;
    let body = load_sale_detail(&mut *tx, sale_id).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(body))
}

async fn simple_transition(
    pool: &MySqlPool,
    auth: &AuthUser,
    sale_id: u64,
    action: SaleAction,
) -> ApiResult<SaleResponse> {
    auth.require(Permission::ManageSales)?;

    let mut tx = pool.begin().await?;
    let (_, status) = lock_sale(&mut *tx, sale_id).await?;
    let next = apply_action(status, action)?;

    sqlx::query("UPDATE sales SET status = ? WHERE id = ?")
        .bind(next.as_ref())
        .bind(sale_id)
        .execute(&mut *tx)
        .await?;
    let body = load_sale_detail(&mut *tx, sale_id).await?;
    tx.commit().await?;

    info!(sale_id, from = %status, to = %next, "Sale status changed");
    Ok(body)
}

#[utoipa::path(
    post,
    path = "/api/v1/sales/{id}/hold",
    params(("id" = u64, Path, description = "Sale ID")),
    responses(
        (status = 200, description = "Sale parked", body = SaleResponse),
        (status = 409, description = "Only drafts can be held")
    ),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
pub async fn hold_sale(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    let body = simple_transition(pool.get_ref(), &auth, path.into_inner(), SaleAction::Hold).await?;
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/sales/{id}/resume",
    params(("id" = u64, Path, description = "Sale ID")),
    responses(
        (status = 200, description = "Held sale back to draft", body = SaleResponse),
        (status = 409, description = "Sale is not held")
    ),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
pub async fn resume_sale(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<impl Responder> {
    let body = simple_transition(pool.get_ref(), &auth, path.into_inner(), SaleAction::Resume).await?;
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/sales/{id}/complete",
    request_body = CompleteSale,
    params(("id" = u64, Path, description = "Sale ID")),
    responses(
        (status = 200, description = "Sale completed; stock decremented", body = SaleResponse),
        (status = 400, description = "No items, or insufficient payment"),
        (status = 409, description = "Sale already closed, or insufficient stock")
    ),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
#[instrument(skip(auth, pool, payload), fields(user_id = auth.user_id, sale_id = *path))]
pub async fn complete_sale(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<CompleteSale>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageSales)?;
    let payments = parse_payments(&payload.payments)?;
    let sale_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let (_, status) = lock_sale(&mut *tx, sale_id).await?;
    apply_action(status, SaleAction::Complete)?;

    let items = load_items(&mut *tx, sale_id).await?;
    if items.is_empty() {
        return Err(AppError::BadRequest("Sale has no items".into()));
    }
    let totals = store_totals(&mut *tx, sale_id).await?;

    let amounts: Vec<Decimal> = payments.iter().map(|p| p.amount).collect();
    let change_due = settle(totals.total, &amounts)?;
    let amount_paid: Decimal = amounts.iter().copied().sum();

    let reference = format!("SALE-{}", sale_id);
    for item in &items {
        apply_stock_change(
            &mut *tx,
            item.product_id,
            -item.quantity,
            "sale",
            Some(&reference),
            auth.user_id,
        )
        .await?;
    }

    for p in &payments {
        sqlx::query("INSERT INTO sale_payments (sale_id, method, amount, reference) VALUES (?, ?, ?, ?)")
            .bind(sale_id)
            .bind(p.method.as_ref())
            .bind(p.amount)
            .bind(p.reference.as_deref())
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        r#"
        UPDATE sales
        SET status = 'completed', amount_paid = ?, change_due = ?, completed_at = NOW()
        WHERE id = ?
        "#,
    )
    .bind(amount_paid)
    .bind(change_due)
    .bind(sale_id)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        auth.user_id,
        "complete",
        "sale",
        Some(sale_id),
        Some(json!({
            "total": to_fixed(totals.total),
            "amountPaid": to_fixed(amount_paid),
            "items": items.len(),
        })),
    )
    .await?;

    let body = load_sale_detail(&mut *tx, sale_id).await?;
    tx.commit().await?;

    info!(sale_id, total = %totals.total, change = %change_due, "Sale completed");
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/sales/{id}/void",
    request_body = VoidSale,
    params(("id" = u64, Path, description = "Sale ID")),
    responses(
        (status = 200, description = "Sale voided", body = SaleResponse),
        (status = 409, description = "Completed or voided sales cannot be voided")
    ),
    tag = "Sales",
    security(("bearer_auth" = []))
)]
pub async fn void_sale(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<VoidSale>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::ManageSales)?;
    validate(&*payload)?;
    let sale_id = path.into_inner();

    let mut tx = pool.begin().await?;
    let (_, status) = lock_sale(&mut *tx, sale_id).await?;
    apply_action(status, SaleAction::Void)?;

    sqlx::query("UPDATE sales SET status = 'voided', void_reason = ? WHERE id = ?")
        .bind(payload.reason.trim())
        .bind(sale_id)
        .execute(&mut *tx)
        .await?;
    audit::record(
        &mut *tx,
        auth.user_id,
        "void",
        "sale",
        Some(sale_id),
        Some(json!({ "reason": payload.reason.trim() })),
    )
    .await?;
    let body = load_sale_detail(&mut *tx, sale_id).await?;
    tx.commit().await?;

    info!(sale_id, "Sale voided");
    Ok(HttpResponse::Ok().json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment(method: PaymentMethod, amount: &str) -> PaymentInput {
        PaymentInput {
            method,
            amount: amount.into(),
            reference: None,
        }
    }

    #[test]
    fn split_tender_is_summed() {
        let parsed = parse_payments(&[
            payment(PaymentMethod::Cash, "1000.00"),
            payment(PaymentMethod::Gcash, "1650.50"),
        ])
        .unwrap();
        let amounts: Vec<Decimal> = parsed.iter().map(|p| p.amount).collect();
        assert_eq!(settle(dec!(2650.50), &amounts).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn payments_are_required_and_positive() {
        assert!(parse_payments(&[]).is_err());
        assert!(parse_payments(&[payment(PaymentMethod::Card, "0")]).is_err());
        assert!(parse_payments(&[payment(PaymentMethod::Card, "abc")]).is_err());
    }

    #[test]
    fn payment_methods_deserialize() {
        let body: CompleteSale = serde_json::from_str(
            r#"{"payments":[{"method":"bank_transfer","amount":"500.00","reference":"BPI-1234"}]}"#,
        )
        .unwrap();
        assert_eq!(body.payments[0].method, PaymentMethod::BankTransfer);
        assert!(serde_json::from_str::<CompleteSale>(
            r#"{"payments":[{"method":"barter","amount":"1.00"}]}"#
        )
        .is_err());
    }
}
