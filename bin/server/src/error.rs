//! API error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flowline_core::ParseIdError;
use flowline_engine::error::{DispatchError, EventSinkError, StoreError};
use flowline_rules::error::RuleStoreError;
use serde_json::json;

/// An error surfaced to API clients.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request (e.g. an unparseable ID).
    BadRequest(String),
    /// The referenced resource does not exist.
    NotFound(String),
    /// The request conflicts with resource state (e.g. inactive workflow).
    Conflict(String),
    /// The payload parsed but is semantically invalid (e.g. a cyclic graph).
    UnprocessableEntity(String),
    /// Something broke on our side.
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::UnprocessableEntity(m)
            | Self::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self.message(), "internal API error");
        }
        (self.status(), Json(json!({"error": self.message()}))).into_response()
    }
}

impl From<ParseIdError> for ApiError {
    fn from(e: ParseIdError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::UnknownWorkflow { .. } => Self::NotFound(e.to_string()),
            DispatchError::WorkflowInactive { .. } => Self::Conflict(e.to_string()),
            DispatchError::InvalidGraph { .. } => Self::UnprocessableEntity(e.to_string()),
            DispatchError::Store(StoreError::ExecutionNotFound { .. }) => {
                Self::NotFound(e.to_string())
            }
            DispatchError::Store(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ExecutionNotFound { .. } => Self::NotFound(e.to_string()),
            StoreError::Backend { .. } => Self::Internal(e.to_string()),
        }
    }
}

impl From<RuleStoreError> for ApiError {
    fn from(e: RuleStoreError) -> Self {
        match e {
            RuleStoreError::RuleNotFound { .. } => Self::NotFound(e.to_string()),
            RuleStoreError::Backend { .. } => Self::Internal(e.to_string()),
        }
    }
}

impl From<EventSinkError> for ApiError {
    fn from(e: EventSinkError) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::WorkflowId;

    #[test]
    fn dispatch_errors_map_to_statuses() {
        let workflow_id = WorkflowId::new();

        let err: ApiError = DispatchError::UnknownWorkflow { workflow_id }.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = DispatchError::WorkflowInactive { workflow_id }.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn parse_errors_are_bad_requests() {
        let parse_err = "nope".parse::<WorkflowId>().unwrap_err();
        let err: ApiError = parse_err.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
