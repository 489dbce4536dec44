use async_trait::async_trait;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{descriptor::Descriptor, matcher, repo_types::DescriptorRecord};
use crate::{
    auth::provider::Session,
    capture::FaceGateway,
    error::{AppError, AppResult},
    state::AppState,
};

/// Stores one more capture for `user_id`. Prior captures are untouched.
#[instrument(skip(st, descriptor))]
pub async fn enroll(st: &AppState, user_id: Uuid, descriptor: &Descriptor) -> AppResult<DescriptorRecord> {
    let record = st.faces.insert_descriptor(user_id, descriptor).await?;
    info!(record_id = %record.id, "face enrolled");
    Ok(record)
}

/// Identifies the caller among every enrolled face and signs them in.
#[instrument(skip(st, descriptor))]
pub async fn authenticate(st: &AppState, descriptor: &Descriptor) -> AppResult<Session> {
    let records = st.faces.list_all_descriptors().await?;
    let outcome = matcher::identify(&records, descriptor, st.config.face.match_threshold)?;

    let identity = st
        .identity
        .find(outcome.user_id)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %outcome.user_id, "descriptor owner has no identity");
            AppError::AuthProvider("User not found".into())
        })?;

    let Some(email) = identity.email.as_deref() else {
        warn!(user_id = %identity.id, "matched identity has no email");
        return Err(AppError::IdentityHasNoEmail(identity.id));
    };

    let link = st.identity.generate_magic_link(email).await?;
    let session = st.identity.redeem_magic_link(&link.token).await?;

    info!(user_id = %session.user.id, distance = outcome.distance, "face login");
    Ok(session)
}

#[async_trait]
impl FaceGateway for AppState {
    async fn enroll(&self, user_id: Uuid, descriptor: &Descriptor) -> AppResult<DescriptorRecord> {
        enroll(self, user_id, descriptor).await
    }

    async fn authenticate(&self, descriptor: &Descriptor) -> AppResult<Session> {
        authenticate(self, descriptor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{provider::IdentityRequest, repo::IdentityStore, repo_types::NewIdentity, roles::Role},
        memory::{FailPoint, MemoryDb},
    };
    use std::sync::Arc;

    fn descriptor(seed: f32) -> Descriptor {
        Descriptor::new((0..128).map(|i| seed + i as f32 * 0.001).collect(), 128).unwrap()
    }

    async fn patient(st: &AppState, email: &str) -> Uuid {
        st.identity
            .create_identity(IdentityRequest {
                email: email.into(),
                password: "Secur3P@ssw0rd!".into(),
                roles: vec![Role::Patient],
                persona_id: None,
                display_name: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn enrolling_twice_keeps_both_records() {
        let st = AppState::fake();
        let user = patient(&st, "rosa@essalud.gob.pe").await;

        let first = enroll(&st, user, &descriptor(0.1)).await.unwrap();
        let second = enroll(&st, user, &descriptor(0.1)).await.unwrap();
        assert_ne!(first.id, second.id);

        let stored = st.faces.list_descriptors_for(user).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn exact_descriptor_signs_in_its_owner() {
        let st = AppState::fake();
        let rosa = patient(&st, "rosa@essalud.gob.pe").await;
        let juan = patient(&st, "juan@essalud.gob.pe").await;
        enroll(&st, rosa, &descriptor(0.1)).await.unwrap();
        enroll(&st, juan, &descriptor(0.9)).await.unwrap();

        let session = authenticate(&st, &descriptor(0.1)).await.unwrap();
        assert_eq!(session.user.id, rosa);
        assert_eq!(session.user.email.as_deref(), Some("rosa@essalud.gob.pe"));
        let claims = st.identity.verify_access(&session.access_token).unwrap();
        assert_eq!(claims.sub, rosa);
    }

    #[tokio::test]
    async fn distant_descriptor_is_not_recognized() {
        let st = AppState::fake();
        let rosa = patient(&st, "rosa@essalud.gob.pe").await;
        enroll(&st, rosa, &descriptor(0.1)).await.unwrap();

        let err = authenticate(&st, &descriptor(5.0)).await.unwrap_err();
        assert!(matches!(err, AppError::FaceNotRecognized));
    }

    #[tokio::test]
    async fn identity_without_email_is_reported() {
        let db = Arc::new(MemoryDb::default());
        let st = AppState::with_memory(crate::config::AppConfig::for_tests(), db.clone());
        let row = db
            .insert_identity(&NewIdentity {
                email: None,
                password_hash: None,
                roles: vec![Role::Patient],
                persona_id: None,
                display_name: None,
            })
            .await
            .unwrap();
        enroll(&st, row.id, &descriptor(0.2)).await.unwrap();

        let err = authenticate(&st, &descriptor(0.2)).await.unwrap_err();
        assert!(matches!(err, AppError::IdentityHasNoEmail(id) if id == row.id));
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_auth_provider_error() {
        let db = Arc::new(MemoryDb::default());
        let st = AppState::with_memory(crate::config::AppConfig::for_tests(), db.clone());
        let rosa = patient(&st, "rosa@essalud.gob.pe").await;
        enroll(&st, rosa, &descriptor(0.1)).await.unwrap();

        db.fail_on(FailPoint::ConsumeOneTimeToken).await;
        let err = authenticate(&st, &descriptor(0.1)).await.unwrap_err();
        assert!(matches!(err, AppError::AuthProvider(_)));
    }
}
