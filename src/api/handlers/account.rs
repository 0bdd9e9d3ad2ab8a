use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use super::{api_error, ApiError};
use crate::api::{state::AppState, types::*};
use crate::domain::AccountOverview;

fn require_user(query: &UserQuery) -> std::result::Result<i64, ApiError> {
    query
        .user_id
        .ok_or((StatusCode::BAD_REQUEST, "user_id is required".to_string()))
}

/// GET /api/account/overview?user_id=
pub async fn get_account_overview(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> std::result::Result<Json<AccountOverview>, ApiError> {
    let user_id = require_user(&query)?;
    let (overview, _, _) = state
        .service
        .account_overview(user_id)
        .await
        .map_err(api_error)?;
    Ok(Json(overview))
}

/// GET /api/account/positions?user_id=
pub async fn get_account_positions(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> std::result::Result<Json<PositionsResponse>, ApiError> {
    let user_id = require_user(&query)?;
    let (_, positions, _) = state
        .service
        .account_overview(user_id)
        .await
        .map_err(api_error)?;
    Ok(Json(PositionsResponse { user_id, positions }))
}
