use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use super::roles::Role;

/// Identity record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct IdentityRow {
    pub id: Uuid,
    pub email: Option<String>,
    pub password_hash: Option<String>, // Argon2 hash, never exposed
    pub roles: Vec<String>,
    pub persona_id: Option<Uuid>,
    pub display_name: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Values needed to insert an identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub roles: Vec<Role>,
    pub persona_id: Option<Uuid>,
    pub display_name: Option<String>,
}

/// One-time sign-in token, redeemable once before `expires_at`.
#[derive(Debug, Clone)]
pub struct OneTimeToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
}

/// Identity with typed roles, as handed to the rest of the crate.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub persona_id: Option<Uuid>,
    pub display_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        let mut roles: Vec<Role> = row
            .roles
            .iter()
            .filter_map(|r| match r.parse() {
                Ok(role) => Some(role),
                Err(e) => {
                    warn!(identity_id = %row.id, error = %e, "ignoring unknown role");
                    None
                }
            })
            .collect();
        roles.sort();
        roles.dedup();
        Self {
            id: row.id,
            email: row.email,
            roles,
            persona_id: row.persona_id,
            display_name: row.display_name,
            created_at: row.created_at,
        }
    }
}
