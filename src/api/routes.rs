use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState, websocket::websocket_handler};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Order endpoints
        .route("/api/orders/pending", get(handlers::get_pending_orders))
        .route("/api/orders/process-all", post(handlers::process_all_orders))
        .route("/api/orders/user/:user_id", get(handlers::get_user_orders))
        .route("/api/orders/:id", get(handlers::get_order))
        .route("/api/orders/:id/cancel", post(handlers::cancel_order))
        .route("/api/orders/:id/execute", post(handlers::execute_order))
        // Account endpoints
        .route("/api/account/overview", get(handlers::get_account_overview))
        .route("/api/account/positions", get(handlers::get_account_positions))
        // System endpoints
        .route("/api/health", get(handlers::health_handler))
        .route("/api/config/trading", get(handlers::get_trading_config))
        // WebSocket endpoint
        .route("/ws", get(websocket_handler))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}
