use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use super::{claims::Claims, roles::Role};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

/// Authenticated caller, resolved per request from the access token.
///
/// Roles and the linked person are re-read from the identity store on every
/// request, so metadata changes apply without re-login.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub user_id: Uuid,
    #[serde(skip)]
    pub claims: Claims,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub persona_id: Option<Uuid>,
    pub display_name: Option<String>,
}

impl SessionContext {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Picks the role the caller acts under. Callers holding several roles
    /// must say which one.
    pub fn active_role(&self, requested: Option<Role>) -> AppResult<Role> {
        match (requested, self.roles.as_slice()) {
            (Some(role), _) if self.has_role(role) => Ok(role),
            (Some(role), _) => Err(AppError::Forbidden(format!("Role {role} not granted"))),
            (None, [only]) => Ok(*only),
            (None, []) => Err(AppError::Forbidden("No role assigned".into())),
            (None, _) => Err(AppError::BadRequest(
                "Multiple roles granted; pass ?role= to choose one".into(),
            )),
        }
    }

    pub fn require(&self, role: Role) -> AppResult<()> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("{role} role required")))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for SessionContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".into()))?;

        let claims = state.identity.verify_access(token)?;
        if !state.identity.session_is_active(claims.sid).await? {
            return Err(AppError::Unauthorized("Session has been revoked".into()));
        }

        let Some(identity) = state.identity.find(claims.sub).await? else {
            warn!(identity_id = %claims.sub, "token for missing identity");
            return Err(AppError::Unauthorized("User not found".into()));
        };

        Ok(SessionContext {
            user_id: identity.id,
            claims,
            email: identity.email,
            roles: identity.roles,
            persona_id: identity.persona_id,
            display_name: identity.display_name,
        })
    }
}
