use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use petspot_types::api::{ErrorBody, ErrorCode, ErrorResponse};

/// Every failure a service can report. Handlers return it directly and
/// `IntoResponse` picks the status code and JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid value for '{field}'")]
    Validation { field: String, code: ErrorCode },

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Deliberately says nothing about which half of the credentials failed.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Payload larger than {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: impl Into<String>, code: ErrorCode) -> Self {
        Self::Validation {
            field: field.into(),
            code,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidCredentials | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::Internal(_) => ErrorCode::InternalServerError,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Validation { field, code } => match code {
                ErrorCode::MissingValue => format!("'{}' is required", field),
                ErrorCode::InvalidFileFormat => "Unsupported image format".to_string(),
                _ => format!("'{}' has an invalid format", field),
            },
            // Internal details stay in the logs.
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!("Internal error: {:#}", e);
        }

        let field = match &self {
            Self::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.message(),
                field,
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!("Rejected JSON body: {}", rejection.body_text());
        Self::validation("body", ErrorCode::InvalidFormat)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        warn!("Rejected query string: {}", rejection.body_text());
        Self::validation("query", ErrorCode::InvalidFormat)
    }
}
