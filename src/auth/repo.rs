use anyhow::Context;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{IdentityRow, NewIdentity, OneTimeToken};
use crate::db::PgStore;

/// Persistence behind the identity provider.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert_identity(&self, new: &NewIdentity) -> anyhow::Result<IdentityRow>;
    async fn find_identity(&self, id: Uuid) -> anyhow::Result<Option<IdentityRow>>;
    async fn find_identity_by_email(&self, email: &str) -> anyhow::Result<Option<IdentityRow>>;

    async fn insert_one_time_token(&self, token: &OneTimeToken) -> anyhow::Result<()>;
    /// Marks the token used and returns its owner, if it was unused and unexpired.
    async fn consume_one_time_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>>;

    async fn insert_session(&self, user_id: Uuid) -> anyhow::Result<Uuid>;
    async fn session_is_active(&self, session_id: Uuid) -> anyhow::Result<bool>;
    async fn revoke_session(&self, session_id: Uuid) -> anyhow::Result<bool>;
}

const IDENTITY_COLUMNS: &str =
    "id, email, password_hash, roles, persona_id, display_name, created_at";

#[async_trait]
impl IdentityStore for PgStore {
    async fn insert_identity(&self, new: &NewIdentity) -> anyhow::Result<IdentityRow> {
        let roles: Vec<String> = new.roles.iter().map(|r| r.as_str().to_string()).collect();
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            r#"
            INSERT INTO identities (email, password_hash, roles, persona_id, display_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {IDENTITY_COLUMNS}
            "#
        ))
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&roles)
        .bind(new.persona_id)
        .bind(&new.display_name)
        .fetch_one(&self.db)
        .await
        .context("insert identity")?;
        Ok(row)
    }

    async fn find_identity(&self, id: Uuid) -> anyhow::Result<Option<IdentityRow>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find identity")?;
        Ok(row)
    }

    async fn find_identity_by_email(&self, email: &str) -> anyhow::Result<Option<IdentityRow>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find identity by email")?;
        Ok(row)
    }

    async fn insert_one_time_token(&self, token: &OneTimeToken) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO one_time_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.expires_at)
        .execute(&self.db)
        .await
        .context("insert one-time token")?;
        Ok(())
    }

    async fn consume_one_time_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>> {
        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE one_time_tokens
               SET consumed_at = $2
             WHERE token = $1
               AND consumed_at IS NULL
               AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("consume one-time token")?;
        Ok(user_id)
    }

    async fn insert_session(&self, user_id: Uuid) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO auth_sessions (user_id) VALUES ($1) RETURNING id",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .context("insert session")?;
        Ok(id)
    }

    async fn session_is_active(&self, session_id: Uuid) -> anyhow::Result<bool> {
        let active = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM auth_sessions WHERE id = $1 AND revoked_at IS NULL)",
        )
        .bind(session_id)
        .fetch_one(&self.db)
        .await
        .context("check session")?;
        Ok(active)
    }

    async fn revoke_session(&self, session_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE auth_sessions SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .execute(&self.db)
        .await
        .context("revoke session")?;
        Ok(res.rows_affected() > 0)
    }
}
