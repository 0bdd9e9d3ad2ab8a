use axum::http::StatusCode;
use tracing::error;

use crate::error::SimError;

pub mod account;
pub mod orders;
pub mod system;

pub use account::*;
pub use orders::*;
pub use system::*;

pub type ApiError = (StatusCode, String);

/// Map a service error onto an HTTP status and client-safe message
pub(crate) fn api_error(err: SimError) -> ApiError {
    let status = match &err {
        SimError::UserNotFound(_) | SimError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        SimError::Rejected(_) | SimError::Validation(_) => StatusCode::BAD_REQUEST,
        SimError::Cancel(_) => StatusCode::CONFLICT,
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (status, err.user_message())
}
