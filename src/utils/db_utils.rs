use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::MySqlPool;

use crate::domain::money::parse_amount;
use crate::error::AppError;

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    I64(i64),
    Decimal(Decimal),
    Bool(bool),
    Null,
}

/// How a patchable JSON field is validated before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    NullableText,
    Money,
    Int,
    Bool,
}

/// A JSON key clients may patch and the column it writes.
#[derive(Debug, Clone, Copy)]
pub struct UpdateField {
    pub key: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl UpdateField {
    pub const fn new(key: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self { key, column, kind }
    }
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

fn convert(field: &UpdateField, value: &Value) -> Result<SqlValue, AppError> {
    let invalid = |what: &str| AppError::validation(field.key, format!("{} must be {}", field.key, what));

    match (field.kind, value) {
        (FieldKind::NullableText, Value::Null) => Ok(SqlValue::Null),
        (FieldKind::Text | FieldKind::NullableText, Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(invalid("a non-empty string"));
            }
            Ok(SqlValue::String(s.to_string()))
        }
        (FieldKind::Text | FieldKind::NullableText, _) => Err(invalid("a string")),
        (FieldKind::Money, Value::String(s)) => Ok(SqlValue::Decimal(parse_amount(field.key, s)?)),
        (FieldKind::Money, _) => Err(invalid("a decimal string such as \"150.00\"")),
        (FieldKind::Int, Value::Number(n)) => n
            .as_i64()
            .filter(|v| *v >= 0)
            .map(SqlValue::I64)
            .ok_or_else(|| invalid("a non-negative integer")),
        (FieldKind::Int, _) => Err(invalid("an integer")),
        (FieldKind::Bool, Value::Bool(b)) => Ok(SqlValue::Bool(*b)),
        (FieldKind::Bool, _) => Err(invalid("true or false")),
    }
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
/// Only keys listed in `allowed` are accepted; column names never come from
/// the payload.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[UpdateField],
    id_column: &str,
    id_value: u64,
) -> Result<SqlUpdate, AppError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| AppError::BadRequest("Payload must be a JSON object".into()))?;

    if obj.is_empty() {
        return Err(AppError::BadRequest("No fields provided for update".into()));
    }

    let mut assignments = Vec::with_capacity(obj.len());
    let mut values = Vec::with_capacity(obj.len() + 1);

    for (key, value) in obj {
        let field = allowed
            .iter()
            .find(|f| f.key == key)
            .ok_or_else(|| AppError::validation(key.clone(), format!("{} cannot be updated", key)))?;

        assignments.push(format!("{} = ?", field.column));
        values.push(convert(field, value)?);
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        table,
        assignments.join(", "),
        id_column
    );

    // WHERE id = ?
    values.push(SqlValue::I64(id_value as i64));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::Decimal(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    const FIELDS: &[UpdateField] = &[
        UpdateField::new("name", "name", FieldKind::Text),
        UpdateField::new("rate", "rate", FieldKind::Money),
        UpdateField::new("active", "active", FieldKind::Bool),
        UpdateField::new("reorderLevel", "reorder_level", FieldKind::Int),
        UpdateField::new("phone", "phone", FieldKind::NullableText),
    ];

    #[test]
    fn maps_keys_to_columns() {
        let update = build_update_sql(
            "employees",
            &json!({"rate": "175.50"}),
            FIELDS,
            "id",
            9,
        )
        .unwrap();

        assert_eq!(update.sql, "UPDATE employees SET rate = ? WHERE id = ?");
        assert_eq!(update.values, vec![SqlValue::Decimal(dec!(175.50)), SqlValue::I64(9)]);
    }

    #[test]
    fn renames_camel_case_keys() {
        let update =
            build_update_sql("products", &json!({"reorderLevel": 12}), FIELDS, "id", 1).unwrap();
        assert_eq!(update.sql, "UPDATE products SET reorder_level = ? WHERE id = ?");
    }

    #[test]
    fn rejects_unknown_columns() {
        let err = build_update_sql("employees", &json!({"id; DROP TABLE x": 1}), FIELDS, "id", 1)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn rejects_bad_values() {
        for payload in [
            json!({"rate": 150.0}),
            json!({"rate": "-3.00"}),
            json!({"active": "yes"}),
            json!({"reorderLevel": -1}),
            json!({"name": "   "}),
        ] {
            assert!(build_update_sql("t", &payload, FIELDS, "id", 1).is_err(), "{}", payload);
        }
    }

    #[test]
    fn nullable_text_accepts_null() {
        let update = build_update_sql("customers", &json!({"phone": null}), FIELDS, "id", 2).unwrap();
        assert_eq!(update.values[0], SqlValue::Null);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            build_update_sql("t", &json!({}), FIELDS, "id", 1),
            Err(AppError::BadRequest(_))
        ));
    }
}
