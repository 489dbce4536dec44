use std::sync::Arc;

use tracing::info;

use crate::{
    auth::{provider::IdentityProvider, repo::IdentityStore},
    clinical::repo::ClinicalStore,
    config::{AppConfig, StoreBackend},
    db::PgStore,
    faces::repo::DescriptorStore,
    memory::MemoryDb,
    people::repo::PeopleStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: Arc<IdentityProvider>,
    pub faces: Arc<dyn DescriptorStore>,
    pub people: Arc<dyn PeopleStore>,
    pub clinical: Arc<dyn ClinicalStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let state = match config.backend {
            StoreBackend::Postgres => {
                let store = Arc::new(PgStore::connect(&config).await?);
                store.migrate().await?;
                Self::from_store(config, store)
            }
            StoreBackend::Memory => {
                info!("using in-memory store; data is lost on exit");
                Self::with_memory(config, Arc::new(MemoryDb::default()))
            }
        };

        if let Some(admin) = &state.config.bootstrap_admin {
            state.identity.ensure_bootstrap_admin(admin).await?;
        }
        Ok(state)
    }

    pub fn with_memory(config: AppConfig, db: Arc<MemoryDb>) -> Self {
        Self::from_store(config, db)
    }

    fn from_store<S>(config: AppConfig, store: Arc<S>) -> Self
    where
        S: IdentityStore + DescriptorStore + PeopleStore + ClinicalStore + 'static,
    {
        let identity = Arc::new(IdentityProvider::new(store.clone(), &config));
        Self {
            config: Arc::new(config),
            identity,
            faces: store.clone(),
            people: store.clone(),
            clinical: store,
        }
    }

    /// State over an empty in-memory store with test settings.
    pub fn fake() -> Self {
        Self::with_memory(AppConfig::for_tests(), Arc::new(MemoryDb::default()))
    }
}
