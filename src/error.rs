//! API error type shared by every handler.
//!
//! Handlers return `ApiResult<T>` and propagate with `?`. Database errors are
//! logged once here, when they are turned into a 500.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use validator::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{} not found", what))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Validation { field, message } => json!({
                "error": message,
                "field": field,
            }),
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                json!({ "error": "Internal Server Error" })
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                json!({ "error": "Internal Server Error" })
            }
            other => json!({ "error": other.to_string() }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        // one field is enough for the client to act on
        let first = errors.field_errors().into_iter().next();
        match first {
            Some((field, errs)) => {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("{} is invalid", field));
                AppError::validation(field.to_string(), message)
            }
            None => AppError::BadRequest("Invalid request".to_string()),
        }
    }
}

/// True for MySQL integrity errors (SQLSTATE 23000): duplicate keys and
/// foreign-key violations.
pub fn is_integrity_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23000"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn validation_error_carries_field() {
        let err = AppError::validation("hoursWorked", "must not be negative");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["field"], "hoursWorked");
        assert_eq!(value["error"], "must not be negative");
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(AppError::not_found("Payslip").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Conflict("Payslip is final".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Forbidden("no".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn database_error_hides_details() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Internal Server Error");
    }
}
