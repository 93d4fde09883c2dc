use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use energy_client::StorageError;
use serde_json::json;

use crate::{api::ValidationError, device::DeviceError, export::ExportError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Device(DeviceError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            Self::Device(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
