use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Which half of a session pair a token is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Token payload. `sid` ties both halves of a pair to one server-side
/// session, so revoking the session kills both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

impl Claims {
    pub fn for_session(
        identity_id: Uuid,
        session_id: Uuid,
        kind: TokenKind,
        issued_at: OffsetDateTime,
        ttl: Duration,
        issuer: &str,
        audience: &str,
    ) -> Self {
        Self {
            sub: identity_id,
            sid: session_id,
            iat: issued_at.unix_timestamp() as usize,
            exp: (issued_at + ttl).unix_timestamp() as usize,
            iss: issuer.to_string(),
            aud: audience.to_string(),
            kind,
        }
    }

    /// Passes the claims through only when they are of the `wanted` kind.
    pub fn expect_kind(self, wanted: TokenKind) -> anyhow::Result<Self> {
        if self.kind != wanted {
            anyhow::bail!("expected a {wanted:?} token, got {:?}", self.kind);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_claims_expire_after_ttl() {
        let now = OffsetDateTime::now_utc();
        let claims = Claims::for_session(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TokenKind::Refresh,
            now,
            Duration::minutes(30),
            "essalud-ehr",
            "essalud-clients",
        );
        assert_eq!(claims.exp - claims.iat, 30 * 60);
        assert!(claims.clone().expect_kind(TokenKind::Refresh).is_ok());
        assert!(claims.expect_kind(TokenKind::Access).is_err());
    }

    #[test]
    fn kind_is_serialized_lowercase() {
        assert_eq!(serde_json::to_string(&TokenKind::Access).unwrap(), "\"access\"");
    }
}
