use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::AppConfig;

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pub db: PgPool,
}

impl PgStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set for the postgres backend")?;
        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .context("connect to database")?;
        info!(max_connections = config.max_connections, "database pool ready");
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        info!("migrations applied");
        Ok(())
    }
}
