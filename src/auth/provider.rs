//! Local identity provider: accounts, one-time sign-in links and session pairs.
//!
//! The face login path never hands out tokens directly. It asks the provider
//! for a one-time link bound to the matched identity's email and redeems it
//! straight away, so every session is minted by the same code path.

use std::sync::Arc;

use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use serde::Serialize;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    claims::Claims,
    jwt::JwtKeys,
    password::{check_password, hash_password, verify_password},
    repo::IdentityStore,
    repo_types::{Identity, NewIdentity, OneTimeToken},
    roles::Role,
};
use crate::{
    config::{AppConfig, BootstrapAdmin},
    error::{AppError, AppResult},
};

const ONE_TIME_TOKEN_LEN: usize = 48;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Request to create an identity.
#[derive(Debug, Clone)]
pub struct IdentityRequest {
    pub email: String,
    pub password: String,
    pub roles: Vec<Role>,
    pub persona_id: Option<Uuid>,
    pub display_name: Option<String>,
}

/// One-time sign-in link minted for an email.
#[derive(Debug, Clone)]
pub struct MagicLink {
    pub email: String,
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Access + refresh pair bound to a server-side session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: Identity,
}

pub struct IdentityProvider {
    store: Arc<dyn IdentityStore>,
    keys: JwtKeys,
    link_ttl: TimeDuration,
}

impl IdentityProvider {
    pub fn new(store: Arc<dyn IdentityStore>, config: &AppConfig) -> Self {
        Self {
            store,
            keys: JwtKeys::from_config(&config.jwt),
            link_ttl: TimeDuration::seconds(config.magic_link_ttl_seconds),
        }
    }

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn create_identity(&self, req: IdentityRequest) -> AppResult<Identity> {
        let email = normalize_email(&req.email);
        if !is_valid_email(&email) {
            warn!("invalid email");
            return Err(AppError::BadRequest("Invalid email".into()));
        }
        if let Err(problem) = check_password(&req.password) {
            warn!("password too short");
            return Err(AppError::BadRequest(problem));
        }
        if req.roles.is_empty() {
            return Err(AppError::BadRequest("At least one role is required".into()));
        }

        if self.store.find_identity_by_email(&email).await?.is_some() {
            warn!("email already registered");
            return Err(AppError::Conflict("Email already registered".into()));
        }

        let password_hash = hash_password(&req.password)?;
        let mut roles = req.roles;
        roles.sort();
        roles.dedup();

        let row = self
            .store
            .insert_identity(&NewIdentity {
                email: Some(email),
                password_hash: Some(password_hash),
                roles,
                persona_id: req.persona_id,
                display_name: req.display_name,
            })
            .await?;

        info!(identity_id = %row.id, "identity created");
        Ok(row.into())
    }

    pub async fn find(&self, id: Uuid) -> AppResult<Option<Identity>> {
        Ok(self.store.find_identity(id).await?.map(Identity::from))
    }

    /// Mints a single-use sign-in token for `email`.
    #[instrument(skip(self))]
    pub async fn generate_magic_link(&self, email: &str) -> AppResult<MagicLink> {
        let email = normalize_email(email);
        let identity = self
            .store
            .find_identity_by_email(&email)
            .await
            .map_err(provider_error)?
            .ok_or_else(|| AppError::AuthProvider("User not found".into()))?;

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ONE_TIME_TOKEN_LEN)
            .map(char::from)
            .collect();
        let expires_at = OffsetDateTime::now_utc() + self.link_ttl;

        self.store
            .insert_one_time_token(&OneTimeToken {
                token: token.clone(),
                user_id: identity.id,
                expires_at,
            })
            .await
            .map_err(provider_error)?;

        debug!(identity_id = %identity.id, "one-time link generated");
        Ok(MagicLink {
            email,
            token,
            expires_at,
        })
    }

    /// Redeems a one-time token into a fresh session.
    #[instrument(skip(self, token))]
    pub async fn redeem_magic_link(&self, token: &str) -> AppResult<Session> {
        let user_id = self
            .store
            .consume_one_time_token(token, OffsetDateTime::now_utc())
            .await
            .map_err(provider_error)?
            .ok_or_else(|| AppError::AuthProvider("Token has expired or is invalid".into()))?;

        let identity = self
            .store
            .find_identity(user_id)
            .await
            .map_err(provider_error)?
            .ok_or_else(|| AppError::AuthProvider("User not found".into()))?;

        self.issue_session(identity.into())
            .await
            .map_err(|e| match e {
                AppError::Internal(e) => provider_error(e),
                other => other,
            })
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Session> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AppError::BadRequest("Invalid email".into()));
        }

        let Some(row) = self.store.find_identity_by_email(&email).await? else {
            warn!("login unknown email");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        };
        let Some(hash) = row.password_hash.as_deref() else {
            warn!(identity_id = %row.id, "login on identity without password");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        };
        if !verify_password(password, hash)? {
            warn!(identity_id = %row.id, "login invalid password");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        }

        let session = self.issue_session(row.into()).await?;
        info!(identity_id = %session.user.id, "identity signed in");
        Ok(session)
    }

    /// Rotates a refresh token: the old session is revoked, a new one issued.
    ///
    /// Revoking is the gate, so a refresh token mints at most one session.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<Session> {
        let claims = self
            .keys
            .verify_refresh(refresh_token)
            .map_err(|e| AppError::Unauthorized(e.to_string()))?;

        if !self.store.revoke_session(claims.sid).await? {
            warn!(session_id = %claims.sid, "refresh on inactive session");
            return Err(AppError::Unauthorized("Session has been revoked".into()));
        }

        let identity = self
            .store
            .find_identity(claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User not found".into()))?;

        self.issue_session(identity.into()).await
    }

    #[instrument(skip(self, claims), fields(session_id = %claims.sid))]
    pub async fn sign_out(&self, claims: &Claims) -> AppResult<()> {
        if !self.store.revoke_session(claims.sid).await? {
            debug!("session already revoked");
        }
        info!(identity_id = %claims.sub, "identity signed out");
        Ok(())
    }

    pub fn verify_access(&self, token: &str) -> AppResult<Claims> {
        self.keys.verify_access(token).map_err(|e| {
            debug!(error = %e, "access token rejected");
            AppError::Unauthorized("Invalid or expired token".into())
        })
    }

    pub async fn session_is_active(&self, session_id: Uuid) -> AppResult<bool> {
        Ok(self.store.session_is_active(session_id).await?)
    }

    /// Creates the configured admin identity unless the email already exists.
    pub async fn ensure_bootstrap_admin(&self, admin: &BootstrapAdmin) -> AppResult<()> {
        let email = normalize_email(&admin.email);
        if self.store.find_identity_by_email(&email).await?.is_some() {
            debug!(%email, "bootstrap admin already present");
            return Ok(());
        }
        self.create_identity(IdentityRequest {
            email,
            password: admin.password.clone(),
            roles: vec![Role::Admin],
            persona_id: None,
            display_name: Some("Administrator".into()),
        })
        .await?;
        info!("bootstrap admin created");
        Ok(())
    }

    async fn issue_session(&self, identity: Identity) -> AppResult<Session> {
        let session_id = self.store.insert_session(identity.id).await?;
        let access_token = self.keys.sign_access(identity.id, session_id)?;
        let refresh_token = self.keys.sign_refresh(identity.id, session_id)?;
        Ok(Session {
            access_token,
            refresh_token,
            token_type: "bearer",
            expires_in: self.keys.access_ttl_secs(),
            user: identity,
        })
    }
}

fn provider_error(e: anyhow::Error) -> AppError {
    error!(error = %e, "identity provider failure");
    AppError::AuthProvider(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FailPoint, MemoryDb};

    fn provider() -> (Arc<MemoryDb>, IdentityProvider) {
        let db = Arc::new(MemoryDb::default());
        let provider = IdentityProvider::new(db.clone(), &AppConfig::for_tests());
        (db, provider)
    }

    fn request(email: &str) -> IdentityRequest {
        IdentityRequest {
            email: email.into(),
            password: "Secur3P@ssw0rd!".into(),
            roles: vec![Role::Patient],
            persona_id: None,
            display_name: Some("Rosa Quispe".into()),
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("rosa.quispe@essalud.gob.pe"));
        assert!(!is_valid_email("rosa.quispe"));
        assert!(!is_valid_email("rosa @essalud.gob.pe"));
    }

    #[tokio::test]
    async fn create_identity_normalizes_email_and_rejects_duplicates() {
        let (_, provider) = provider();
        let created = provider
            .create_identity(request("  Rosa@EsSalud.gob.pe "))
            .await
            .unwrap();
        assert_eq!(created.email.as_deref(), Some("rosa@essalud.gob.pe"));
        assert_eq!(created.roles, vec![Role::Patient]);

        let err = provider
            .create_identity(request("rosa@essalud.gob.pe"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn magic_link_redeems_once() {
        let (_, provider) = provider();
        let identity = provider.create_identity(request("rosa@essalud.gob.pe")).await.unwrap();

        let link = provider.generate_magic_link("rosa@essalud.gob.pe").await.unwrap();
        let session = provider.redeem_magic_link(&link.token).await.unwrap();
        assert_eq!(session.user.id, identity.id);
        let claims = provider.verify_access(&session.access_token).unwrap();
        assert_eq!(claims.sub, identity.id);

        let err = provider.redeem_magic_link(&link.token).await.unwrap_err();
        assert!(matches!(err, AppError::AuthProvider(_)));
    }

    #[tokio::test]
    async fn magic_link_for_unknown_email_is_a_provider_error() {
        let (_, provider) = provider();
        let err = provider.generate_magic_link("nobody@essalud.gob.pe").await.unwrap_err();
        assert!(matches!(err, AppError::AuthProvider(_)));
    }

    #[tokio::test]
    async fn storage_failure_during_link_generation_is_opaque_provider_error() {
        let (db, provider) = provider();
        provider.create_identity(request("rosa@essalud.gob.pe")).await.unwrap();
        db.fail_on(FailPoint::InsertOneTimeToken).await;

        let err = provider.generate_magic_link("rosa@essalud.gob.pe").await.unwrap_err();
        assert!(matches!(err, AppError::AuthProvider(_)));
    }

    #[tokio::test]
    async fn password_sign_in_and_refresh_rotation() {
        let (_, provider) = provider();
        provider.create_identity(request("rosa@essalud.gob.pe")).await.unwrap();

        let err = provider
            .sign_in_with_password("rosa@essalud.gob.pe", "wrong-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let first = provider
            .sign_in_with_password("rosa@essalud.gob.pe", "Secur3P@ssw0rd!")
            .await
            .unwrap();
        let second = provider.refresh(&first.refresh_token).await.unwrap();
        assert_eq!(second.user.id, first.user.id);

        // the rotated-out refresh token is dead
        let err = provider.refresh(&first.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn concurrent_refreshes_with_one_token_mint_one_session() {
        let (_, provider) = provider();
        provider.create_identity(request("rosa@essalud.gob.pe")).await.unwrap();
        let session = provider
            .sign_in_with_password("rosa@essalud.gob.pe", "Secur3P@ssw0rd!")
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            provider.refresh(&session.refresh_token),
            provider.refresh(&session.refresh_token)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn sign_out_revokes_the_session() {
        let (_, provider) = provider();
        provider.create_identity(request("rosa@essalud.gob.pe")).await.unwrap();
        let session = provider
            .sign_in_with_password("rosa@essalud.gob.pe", "Secur3P@ssw0rd!")
            .await
            .unwrap();
        let claims = provider.verify_access(&session.access_token).unwrap();

        provider.sign_out(&claims).await.unwrap();
        assert!(!provider.session_is_active(claims.sid).await.unwrap());
        assert!(provider.refresh(&session.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn bootstrap_admin_is_idempotent() {
        let (_, provider) = provider();
        let admin = BootstrapAdmin {
            email: "admin@essalud.gob.pe".into(),
            password: "ChangeMe123!".into(),
        };
        provider.ensure_bootstrap_admin(&admin).await.unwrap();
        provider.ensure_bootstrap_admin(&admin).await.unwrap();

        let session = provider
            .sign_in_with_password("admin@essalud.gob.pe", "ChangeMe123!")
            .await
            .unwrap();
        assert_eq!(session.user.roles, vec![Role::Admin]);
    }
}
