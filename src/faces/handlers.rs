use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    descriptor::Descriptor,
    dto::{DeletedFaces, EnrolledFace, FaceDescriptorRequest},
    services,
};
use crate::{auth::dto::AuthResponse, auth::SessionContext, error::AppResult, state::AppState};

pub fn face_routes() -> Router<AppState> {
    Router::new()
        .route("/authenticate-face", post(authenticate_face))
        .route("/faces/enroll", post(enroll_face))
        .route("/faces", get(list_faces).delete(delete_faces))
}

/// POST /authenticate-face { descriptor: number[] }
#[instrument(skip(state, payload))]
pub async fn authenticate_face(
    State(state): State<AppState>,
    payload: Result<Json<FaceDescriptorRequest>, JsonRejection>,
) -> AppResult<Json<AuthResponse>> {
    let Json(body) = payload?;
    let descriptor = Descriptor::new(body.descriptor, state.config.face.descriptor_len)?;
    let session = services::authenticate(&state, &descriptor).await?;
    Ok(Json(session.into()))
}

/// POST /faces/enroll: always enrolls the caller's own identity.
#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn enroll_face(
    State(state): State<AppState>,
    ctx: SessionContext,
    payload: Result<Json<FaceDescriptorRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<EnrolledFace>)> {
    let Json(body) = payload?;
    let descriptor = Descriptor::new(body.descriptor, state.config.face.descriptor_len)?;
    let record = services::enroll(&state, ctx.user_id, &descriptor).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn list_faces(
    State(state): State<AppState>,
    ctx: SessionContext,
) -> AppResult<Json<Vec<EnrolledFace>>> {
    let records = state.faces.list_descriptors_for(ctx.user_id).await?;
    Ok(Json(records.into_iter().map(EnrolledFace::from).collect()))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn delete_faces(
    State(state): State<AppState>,
    ctx: SessionContext,
) -> AppResult<Json<DeletedFaces>> {
    let deleted = state.faces.delete_descriptors_for(ctx.user_id).await?;
    tracing::info!(deleted, "face descriptors removed");
    Ok(Json(DeletedFaces { deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn short_descriptor_is_a_bad_request() {
        let state = AppState::fake();
        let err = authenticate_face(
            State(state),
            Ok(Json(FaceDescriptorRequest {
                descriptor: vec![0.1; 3],
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_face_is_unauthorized() {
        let state = AppState::fake();
        let err = authenticate_face(
            State(state),
            Ok(Json(FaceDescriptorRequest {
                descriptor: vec![0.1; 128],
            })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::FaceNotRecognized));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
