// Shared application state wiring config, storage and the orchestrator.
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::services::llm::{build_llm_client, LlmClient};
use crate::storage::{build_storage, StorageBackend};
use crate::user_store::UserStore;
use anyhow::Result;
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn StorageBackend>,
    pub user_store: UserStore,
    pub orchestrator: Orchestrator,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let storage = build_storage(&config.storage);
        storage.ensure_initialized()?;
        let http = reqwest::Client::new();
        let orchestrator = Orchestrator::new(config.clone(), storage.clone(), http.clone());
        let user_store = UserStore::new(storage.clone());
        Ok(Self {
            config,
            storage,
            user_store,
            orchestrator,
            http,
        })
    }

    /// Client for the resolved model config, `None` when nothing matches.
    pub fn llm_client(&self, selector: Option<&str>) -> Option<LlmClient> {
        self.config
            .llm
            .resolve_model(selector)
            .map(|(_, model_config)| build_llm_client(model_config, self.http.clone()))
    }
}
