use std::collections::BTreeMap;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Message returned when a user reviews the same title twice
pub const DUPLICATE_REVIEW_MESSAGE: &str = "You have already reviewed this movie!";

/// Key for validation messages not tied to one field
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Per-field validation messages, serialized as `{"field": ["message", ...]}`
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("{}", DUPLICATE_REVIEW_MESSAGE)]
    DuplicateReview,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("Authentication credentials were not provided or are invalid")]
    Unauthorized,

    #[error("You do not have permission to perform this action")]
    Forbidden,

    #[error("Request was throttled ({0})")]
    RateLimited(&'static str),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Builds a validation error carrying a single field message
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        AppError::Validation(errors)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DuplicateReview | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Cache(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = match self {
            AppError::Validation(errors) => Json(json!(errors)),
            other => Json(json!({
                "error": other.to_string()
            })),
        };

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => {
                let (field, message) = describe_data_error(&err.body_text());
                AppError::field(&field, message)
            }
            JsonRejection::JsonSyntaxError(_) => {
                AppError::field(NON_FIELD_ERRORS, "JSON parse error.")
            }
            JsonRejection::MissingJsonContentType(_) => AppError::field(
                NON_FIELD_ERRORS,
                "Expected request with `Content-Type: application/json`.",
            ),
            other => AppError::field(NON_FIELD_ERRORS, other.body_text()),
        }
    }
}

/// Splits a body decoding error into the offending field and a message.
///
/// Expects axum's `<prefix>: [<path>: ]<serde message> at line L column C`.
fn describe_data_error(text: &str) -> (String, String) {
    let detail = text.split_once(": ").map_or(text, |(_, rest)| rest);
    let detail = detail
        .rfind(" at line ")
        .map_or(detail, |at| &detail[..at]);

    if let Some(field) = detail
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split_once('`'))
        .map(|(field, _)| field)
    {
        return (field.to_string(), "This field is required.".to_string());
    }

    match detail.split_once(": ") {
        Some((path, message)) if !path.contains(' ') => {
            (path.to_string(), format!("Invalid value: {}.", message))
        }
        _ => (NON_FIELD_ERRORS.to_string(), detail.to_string()),
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_review_is_client_error() {
        let err = AppError::DuplicateReview;
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "You have already reviewed this movie!");
    }

    #[test]
    fn test_field_error_shape() {
        let err = AppError::field("rating", "Ensure this value is less than or equal to 5.");
        match err {
            AppError::Validation(errors) => {
                assert_eq!(errors["rating"].len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_field_is_named() {
        let (field, message) = describe_data_error(
            "Failed to deserialize the JSON body into the target type: \
             missing field `rating` at line 1 column 27",
        );
        assert_eq!(field, "rating");
        assert_eq!(message, "This field is required.");
    }

    #[test]
    fn test_wrong_type_is_attributed_to_path() {
        let (field, message) = describe_data_error(
            "Failed to deserialize the JSON body into the target type: \
             rating: invalid type: floating point `4.5`, expected i32 at line 1 column 13",
        );
        assert_eq!(field, "rating");
        assert_eq!(
            message,
            "Invalid value: invalid type: floating point `4.5`, expected i32."
        );
    }

    #[test]
    fn test_unattributed_error_is_non_field() {
        let (field, _) = describe_data_error(
            "Failed to deserialize the JSON body into the target type: \
             invalid type: integer `3`, expected a map at line 1 column 1",
        );
        assert_eq!(field, NON_FIELD_ERRORS);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RateLimited("anon").status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
