use std::path::Path;
use std::sync::Arc;

use sti_core::StiResult;
use sti_engine::{AppConfig, LlmService};
use sti_storage::SqliteStore;

/// Shared state handed to every request handler.
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub config: AppConfig,
    pub llm: LlmService,
}

impl AppState {
    /// Open (or create) the database under the configured data directory.
    pub fn init(config: AppConfig) -> StiResult<Self> {
        let data_dir = Path::new(&config.data_dir);
        std::fs::create_dir_all(data_dir)
            .map_err(|e| sti_core::StiError::Config(format!("cannot create data dir: {e}")))?;
        let store = SqliteStore::open(&data_dir.join("sti.db"))?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn with_store(store: Arc<SqliteStore>, config: AppConfig) -> Self {
        let llm = LlmService::from_config(&config.llm);
        Self { store, config, llm }
    }
}
