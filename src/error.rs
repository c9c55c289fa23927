// Service error taxonomy
//
// Internal plumbing uses anyhow; this is the boundary type that HTTP
// handlers translate into status codes. The store maps SQLite failures
// onto Corrupt/Unavailable so callers can distinguish logic bugs from
// transient I/O.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    /// Bounded operation exceeded its budget. Grep never surfaces this
    /// (it returns partial results instead); the query pool does.
    #[error("query timed out after {0}ms")]
    Timeout(u64),

    /// Invariant violated in the durable store. The service keeps serving
    /// reads but refuses new writes until someone looks at the database.
    #[error("store corrupt: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Collapse an anyhow chain into the taxonomy. Anything the store
    /// tagged keeps its kind; everything else is Internal with a short
    /// message and no backtrace.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<ServiceError>() {
            Ok(svc) => svc,
            Err(other) => ServiceError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if matches!(self, ServiceError::Corrupt(_)) {
            tracing::error!("store corruption surfaced to a request: {}", self);
        }
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::from_anyhow(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ServiceError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Timeout(5000).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Corrupt("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn anyhow_roundtrip_preserves_kind() {
        let err = anyhow::Error::new(ServiceError::BadRequest("missing name".into()));
        match ServiceError::from_anyhow(err) {
            ServiceError::BadRequest(msg) => assert_eq!(msg, "missing name"),
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }
}
