//! Maps `sandboxd_core::Error` onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sandboxd_core::Error;
use serde::Serialize;

/// Wrapper so we can implement a foreign trait (`IntoResponse`) for a
/// foreign type (`sandboxd_core::Error`) without running afoul of the
/// orphan rule.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) | Error::ObservationParse(_) => StatusCode::BAD_REQUEST,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::ImageFetch(_)
            | Error::ContainerCreate(_)
            | Error::ContainerStart(_)
            | Error::ContainerInspect(_)
            | Error::ContainerStop(_)
            | Error::ContainerRemove(_)
            | Error::NoAddress
            | Error::Timeout(_)
            | Error::AgentTransport(_)
            | Error::Config(_)
            | Error::Serialization(_)
            | Error::Internal(_)
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::warn!(error = %self.0, "request rejected");
        }

        let body = ErrorBody {
            error: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
