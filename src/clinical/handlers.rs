use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{AppointmentView, ClinicalQuery, ClinicalRecordView, CreateAppointmentRequest, RecordList},
    records::ClinicalRecord,
    services,
};
use crate::{auth::SessionContext, error::AppResult, state::AppState};

pub fn clinical_routes() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(create_appointment).get(list_appointments))
        .route("/appointments/:id/records", post(create_record))
        .route("/records", get(list_records))
        .route("/records/:id", get(get_record).delete(delete_record))
}

fn parse_query(query: Result<Query<ClinicalQuery>, QueryRejection>) -> AppResult<ClinicalQuery> {
    let Query(q) = query?;
    Ok(q)
}

/// POST /appointments (admin)
#[instrument(skip(state, ctx, query, payload), fields(user_id = %ctx.user_id))]
pub async fn create_appointment(
    State(state): State<AppState>,
    ctx: SessionContext,
    query: Result<Query<ClinicalQuery>, QueryRejection>,
    payload: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AppointmentView>)> {
    let q = parse_query(query)?;
    let scope = services::resolve_scope(&state, &ctx, q.role).await?;
    let Json(body) = payload?;
    let view = services::create_appointment(&state, scope, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state, ctx, query), fields(user_id = %ctx.user_id))]
pub async fn list_appointments(
    State(state): State<AppState>,
    ctx: SessionContext,
    query: Result<Query<ClinicalQuery>, QueryRejection>,
) -> AppResult<Json<Vec<AppointmentView>>> {
    let q = parse_query(query)?;
    let scope = services::resolve_scope(&state, &ctx, q.role).await?;
    Ok(Json(services::list_appointments(&state, scope).await?))
}

/// POST /appointments/:id/records { kind, data }
#[instrument(skip(state, ctx, query, payload), fields(user_id = %ctx.user_id))]
pub async fn create_record(
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(appointment_id): Path<Uuid>,
    query: Result<Query<ClinicalQuery>, QueryRejection>,
    payload: Result<Json<ClinicalRecord>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ClinicalRecordView>)> {
    let q = parse_query(query)?;
    let scope = services::resolve_scope(&state, &ctx, q.role).await?;
    let Json(record) = payload?;
    let view = services::create_record(&state, scope, appointment_id, record).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /records?kind=&role=
#[instrument(skip(state, ctx, query), fields(user_id = %ctx.user_id))]
pub async fn list_records(
    State(state): State<AppState>,
    ctx: SessionContext,
    query: Result<Query<ClinicalQuery>, QueryRejection>,
) -> AppResult<Json<RecordList>> {
    let q = parse_query(query)?;
    let scope = services::resolve_scope(&state, &ctx, q.role).await?;
    let records = services::list_records(&state, scope, q.kind).await?;
    Ok(Json(RecordList {
        count: records.len(),
        records,
    }))
}

#[instrument(skip(state, ctx, query), fields(user_id = %ctx.user_id))]
pub async fn get_record(
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(id): Path<Uuid>,
    query: Result<Query<ClinicalQuery>, QueryRejection>,
) -> AppResult<Json<ClinicalRecordView>> {
    let q = parse_query(query)?;
    let scope = services::resolve_scope(&state, &ctx, q.role).await?;
    Ok(Json(services::get_record(&state, scope, id).await?))
}

#[instrument(skip(state, ctx, query), fields(user_id = %ctx.user_id))]
pub async fn delete_record(
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(id): Path<Uuid>,
    query: Result<Query<ClinicalQuery>, QueryRejection>,
) -> AppResult<StatusCode> {
    let q = parse_query(query)?;
    let scope = services::resolve_scope(&state, &ctx, q.role).await?;
    services::delete_record(&state, scope, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            claims::{Claims, TokenKind},
            Role,
        },
        error::AppError,
    };
    use time::OffsetDateTime;

    fn ctx(roles: Vec<Role>) -> SessionContext {
        let id = Uuid::new_v4();
        SessionContext {
            user_id: id,
            claims: Claims {
                sub: id,
                sid: Uuid::new_v4(),
                iat: 0,
                exp: 0,
                iss: "iss".into(),
                aud: "aud".into(),
                kind: TokenKind::Access,
            },
            email: None,
            roles,
            persona_id: None,
            display_name: None,
        }
    }

    fn role(role: Option<Role>) -> Result<Query<ClinicalQuery>, QueryRejection> {
        Ok(Query(ClinicalQuery { role, kind: None }))
    }

    #[tokio::test]
    async fn admin_lists_an_empty_record_set() {
        let state = AppState::fake();
        let Json(list) = list_records(State(state), ctx(vec![Role::Admin]), role(None))
            .await
            .unwrap();
        assert_eq!(list.count, 0);
    }

    #[tokio::test]
    async fn several_roles_need_an_explicit_choice() {
        let state = AppState::fake();
        let err = list_records(
            State(state.clone()),
            ctx(vec![Role::Patient, Role::Admin]),
            role(None),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let ok = list_records(
            State(state),
            ctx(vec![Role::Patient, Role::Admin]),
            role(Some(Role::Admin)),
        )
        .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn unknown_appointment_is_not_found() {
        let state = AppState::fake();
        let err = create_record(
            State(state),
            ctx(vec![Role::Admin]),
            Path(Uuid::new_v4()),
            role(None),
            Ok(Json(ClinicalRecord::Triage(Default::default()))),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn patient_without_profile_cannot_book() {
        let state = AppState::fake();
        let err = create_appointment(
            State(state),
            ctx(vec![Role::Patient]),
            role(None),
            Ok(Json(CreateAppointmentRequest {
                patient_id: Uuid::new_v4(),
                staff_id: Uuid::new_v4(),
                scheduled_at: OffsetDateTime::now_utc(),
                reason: None,
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
