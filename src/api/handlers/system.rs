use axum::{extract::State, Json};

use super::{api_error, ApiError};
use crate::api::{state::AppState, types::*};
use crate::domain::TradingConfig;

/// GET /api/health
pub async fn health_handler(
    State(state): State<AppState>,
) -> std::result::Result<Json<HealthResponse>, ApiError> {
    let orders = state
        .service
        .order_status_counts()
        .await
        .map_err(api_error)?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_seconds(),
        connected_users: state.sessions.connected_users(),
        orders,
    }))
}

/// GET /api/config/trading
pub async fn get_trading_config(State(state): State<AppState>) -> Json<TradingConfig> {
    Json(state.service.trading_config().clone())
}
