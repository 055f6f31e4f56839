//! Error taxonomy for the goal tracker
//!
//! Every failure a caller can see is one of these variants. The HTTP layer
//! maps them onto status codes through [`AppError::status_code`] and renders
//! them with the response envelope; storage detail is never sent to clients.

use crate::db::DbError;
use std::collections::BTreeMap;

/// Field name -> messages, rendered as the envelope's `errors` map
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing goal/milestone/task, or a child not under its claimed parent
    #[error("{0}")]
    NotFound(String),

    /// Acting user does not own the goal chain
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{message}")]
    Validation { message: String, errors: FieldErrors },

    /// Unreadable request (bad JSON, unknown route parameters)
    #[error("{0}")]
    BadRequest(String),

    /// Storage could not hand out a connection
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Server(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Validation failure on a single field
    pub fn invalid(field: &str, message: &str, detail: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![detail.into()]);
        AppError::Validation {
            message: message.to_string(),
            errors,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn forbidden(what: impl Into<String>) -> Self {
        AppError::Forbidden(what.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::Forbidden(_) => 403,
            AppError::Unauthorized(_) => 401,
            AppError::Validation { .. } => 422,
            AppError::BadRequest(_) => 400,
            AppError::Unavailable(_) => 503,
            AppError::Server(_) => 500,
        }
    }

    /// Field errors for the envelope; empty for everything but validation
    pub fn field_errors(&self) -> FieldErrors {
        match self {
            AppError::Validation { errors, .. } => errors.clone(),
            _ => FieldErrors::new(),
        }
    }

    /// Message safe to show a client
    pub fn public_message(&self) -> String {
        match self {
            AppError::Server(_) => "An error occurred while processing your request".to_string(),
            AppError::Unavailable(_) => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Connection(msg) => AppError::Unavailable(msg),
            DbError::Pool(e) => AppError::Unavailable(e.to_string()),
            DbError::Query(e) => AppError::from(e),
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => AppError::NotFound("Resource not found".to_string()),
            other => AppError::Server(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::not_found("Goal not found").status_code(), 404);
        assert_eq!(AppError::forbidden("nope").status_code(), 403);
        assert_eq!(AppError::invalid("due_date", "Invalid due date", "x").status_code(), 422);
        assert_eq!(AppError::Unavailable("pool".into()).status_code(), 503);
    }

    #[test]
    fn test_invalid_names_field() {
        let err = AppError::invalid("due_date", "Invalid due date", "Too early");
        let errors = err.field_errors();
        assert_eq!(errors["due_date"], vec!["Too early".to_string()]);
        assert_eq!(err.to_string(), "Invalid due date");
    }

    #[test]
    fn test_server_error_hides_detail() {
        let err = AppError::from(diesel::result::Error::RollbackTransaction);
        assert_eq!(err.status_code(), 500);
        assert!(!err.public_message().contains("Rollback"));
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        let err = AppError::from(DbError::Connection("unable to open".into()));
        assert_eq!(err.status_code(), 503);
    }
}
