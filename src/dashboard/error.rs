use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Dashboard error type: logs 5xx with full chains and returns the
/// `{ok: false, error}` envelope the UI consumes.
///
/// Business errors map to 4xx, infrastructure errors to 5xx, and conflicts
/// (double-start of a tunnel or sync session) to 409.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub source: Option<anyhow::Error>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 409 for double-starting an exclusive session
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            source: Some(source),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    error = ?source,
                    "dashboard error"
                );
            } else {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    "dashboard error"
                );
            }
        }

        let body = Json(json!({
            "ok": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(ae.message.clone()),
            _ => Self::internal(err.into(), "Kubernetes API request failed"),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err, "internal error")
    }
}

/// Extension trait for converting Results into dashboard errors
pub trait ApiErrorExt<T> {
    fn api_err(self, status: StatusCode, message: impl Into<String>) -> Result<T, ApiError>;
    fn internal_err(self, message: impl Into<String>) -> Result<T, ApiError>;
}

impl<T, E> ApiErrorExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn api_err(self, status: StatusCode, message: impl Into<String>) -> Result<T, ApiError> {
        self.map_err(|e| ApiError {
            status,
            message: message.into(),
            source: Some(e.into()),
        })
    }

    fn internal_err(self, message: impl Into<String>) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::internal(e.into(), message))
    }
}
