use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, MeResponse, RefreshRequest},
        extractors::SessionContext,
    },
    error::AppResult,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<AuthResponse>> {
    let Json(payload) = payload?;
    let session = state
        .identity
        .sign_in_with_password(&payload.email, &payload.password)
        .await?;
    Ok(Json(session.into()))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> AppResult<Json<AuthResponse>> {
    let Json(payload) = payload?;
    let session = state.identity.refresh(&payload.refresh_token).await?;
    Ok(Json(session.into()))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn logout(State(state): State<AppState>, ctx: SessionContext) -> AppResult<StatusCode> {
    state.identity.sign_out(&ctx.claims).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(ctx), fields(user_id = %ctx.user_id))]
pub async fn get_me(ctx: SessionContext) -> Json<MeResponse> {
    Json(MeResponse {
        id: ctx.user_id,
        email: ctx.email,
        roles: ctx.roles,
        persona_id: ctx.persona_id,
        display_name: ctx.display_name,
    })
}
