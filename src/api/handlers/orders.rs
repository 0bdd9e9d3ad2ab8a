use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

use super::{api_error, ApiError};
use crate::api::{state::AppState, types::*};
use crate::domain::Order;
use crate::engine::ExecutionResult;

/// POST /api/orders/:id/cancel
///
/// The session push (snapshot) follows through the ledger event stream.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> std::result::Result<Json<CancelResponse>, ApiError> {
    let order = state.service.cancel(order_id).await.map_err(api_error)?;

    Ok(Json(CancelResponse {
        success: true,
        message: format!("order {} cancelled", order.order_no),
        order,
    }))
}

/// GET /api/orders/pending?user_id=
pub async fn get_pending_orders(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> std::result::Result<Json<Vec<Order>>, ApiError> {
    let orders = state
        .service
        .pending_orders(query.user_id)
        .await
        .map_err(api_error)?;
    Ok(Json(orders))
}

/// GET /api/orders/user/:user_id
pub async fn get_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> std::result::Result<Json<Vec<Order>>, ApiError> {
    let orders = state.service.list_orders(user_id).await.map_err(api_error)?;
    Ok(Json(orders))
}

/// GET /api/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> std::result::Result<Json<Order>, ApiError> {
    let order = state.service.get_order(order_id).await.map_err(api_error)?;
    Ok(Json(order))
}

/// POST /api/orders/:id/execute -- one fill attempt at the current price
pub async fn execute_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> std::result::Result<Json<ExecuteResponse>, ApiError> {
    let order = state.service.get_order(order_id).await.map_err(api_error)?;
    let result = state
        .service
        .execute_pending(&order)
        .await
        .map_err(api_error)?;

    let (executed, message) = match result {
        ExecutionResult::Filled(trade) => (
            true,
            format!("filled {} @ {}", trade.quantity, trade.price),
        ),
        ExecutionResult::Pending(reason) => (false, reason.to_string()),
    };

    Ok(Json(ExecuteResponse {
        order_id,
        executed,
        message,
    }))
}

/// POST /api/orders/process-all -- run one sweep now
pub async fn process_all_orders(
    State(state): State<AppState>,
) -> std::result::Result<Json<ProcessAllResponse>, ApiError> {
    let report = state.sweeper.run_once().await.map_err(api_error)?;
    info!(
        "Manual sweep: {} of {} pending orders filled",
        report.executed_count, report.total_checked
    );

    Ok(Json(ProcessAllResponse {
        executed_count: report.executed_count,
        total_checked: report.total_checked,
        message: format!(
            "checked {} pending orders, filled {}",
            report.total_checked, report.executed_count
        ),
    }))
}
