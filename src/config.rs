use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceConfig {
    /// Euclidean distance below which a match is accepted.
    pub match_threshold: f32,
    pub descriptor_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub jwt: JwtConfig,
    pub magic_link_ttl_seconds: i64,
    pub face: FaceConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't touch the process env.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match get("STORE_BACKEND").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => anyhow::bail!("unknown STORE_BACKEND {other:?}"),
        };

        let database_url = get("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }

        let jwt = JwtConfig {
            secret: get("JWT_SECRET").context("JWT_SECRET is required")?,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "essalud-ehr".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "essalud-ehr-users".into()),
            ttl_minutes: parse_or(&get, "JWT_TTL_MINUTES", 60)?,
            refresh_ttl_minutes: parse_or(&get, "JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };

        let face = FaceConfig {
            match_threshold: parse_or(&get, "FACE_MATCH_THRESHOLD", 0.6)?,
            descriptor_len: parse_or(&get, "FACE_DESCRIPTOR_LEN", 128)?,
        };
        if !face.match_threshold.is_finite() || face.match_threshold <= 0.0 {
            anyhow::bail!("FACE_MATCH_THRESHOLD must be a positive number");
        }
        if face.descriptor_len == 0 {
            anyhow::bail!("FACE_DESCRIPTOR_LEN must be greater than zero");
        }

        let bootstrap_admin = match (get("BOOTSTRAP_ADMIN_EMAIL"), get("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            _ => anyhow::bail!(
                "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
            ),
        };

        Ok(Self {
            backend,
            database_url,
            max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            jwt,
            magic_link_ttl_seconds: parse_or(&get, "MAGIC_LINK_TTL_SECONDS", 300)?,
            face,
            bootstrap_admin,
        })
    }

    pub fn for_tests() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 1,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            magic_link_ttl_seconds: 60,
            face: FaceConfig {
                match_threshold: 0.6,
                descriptor_len: 128,
            },
            bootstrap_admin: None,
        }
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
