use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::roles::Role;

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response returned after login, refresh or face authentication.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: PublicUser,
}

/// Public part of the identity returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: Option<String>,
}

/// Session context as seen by the client (`GET /me`).
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub persona_id: Option<Uuid>,
    pub display_name: Option<String>,
}

impl From<super::provider::Session> for AuthResponse {
    fn from(s: super::provider::Session) -> Self {
        Self {
            success: true,
            access_token: s.access_token,
            refresh_token: s.refresh_token,
            token_type: s.token_type,
            expires_in: s.expires_in,
            user: PublicUser {
                id: s.user.id,
                email: s.user.email,
            },
        }
    }
}
