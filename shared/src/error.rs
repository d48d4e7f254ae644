use lambda_http::http::StatusCode;
use thiserror::Error;

use crate::permissions::{Action, Module, Role};

/// Core result alias used across the shared crate
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Typed failures surfaced by the document-control core.
///
/// Permission and transition failures carry enough context for an operator
/// to see which role/action was missing or which state pair was illegal.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("missing or invalid caller credential")]
    Unauthorized,

    #[error("role {role} is not allowed to perform {module}/{action}")]
    PermissionDenied {
        role: Role,
        module: Module,
        action: Action,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("invitation has expired or was already used")]
    Expired,

    #[error("cannot move document from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CoreError {
    /// Stable machine-readable error code for the JSON error body
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthorized => "Unauthorized",
            CoreError::PermissionDenied { .. } => "PermissionDenied",
            CoreError::NotFound(_) => "NotFound",
            CoreError::Conflict(_) => "Conflict",
            CoreError::Expired => "Expired",
            CoreError::InvalidTransition { .. } => "InvalidTransition",
            CoreError::Validation(_) => "InvalidRequest",
            CoreError::StoreUnavailable(_) => "StoreUnavailable",
        }
    }

    /// HTTP status the API layer maps this error to
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Expired => StatusCode::GONE,
            CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
