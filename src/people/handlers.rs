use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{CreateUserRequest, CreateUserResponse},
    services,
};
use crate::{
    auth::{Role, SessionContext},
    error::AppResult,
    state::AppState,
};

pub fn people_routes() -> Router<AppState> {
    Router::new().route("/create-user", post(create_user))
}

/// POST /create-user (admin only)
#[instrument(skip(state, ctx, payload), fields(admin_id = %ctx.user_id))]
pub async fn create_user(
    State(state): State<AppState>,
    ctx: SessionContext,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<CreateUserResponse>)> {
    ctx.require(Role::Admin)?;
    let Json(body) = payload?;
    let user = services::create_user(&state, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            success: true,
            user,
        }),
    ))
}
