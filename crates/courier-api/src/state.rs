//! Application state wiring the engine together.
//!
//! AppState holds the concrete engine used by every CLI command. The engine
//! is generic over its pause store; `AppStore` pins it to SQLite, or to the
//! in-memory store for `--ephemeral` runs.

use std::path::PathBuf;

use courier_core::repository::memory::InMemoryPauseStore;
use courier_core::repository::pause::PauseStore;
use courier_core::workflow::executor::WorkflowEngine;
use courier_infra::config::{database_url, default_data_dir, load_global_config};
use courier_infra::sqlite::pause::SqlitePauseStore;
use courier_infra::sqlite::pool::DatabasePool;
use courier_infra::workflow::default_registry;
use courier_types::error::RepositoryError;
use courier_types::workflow::{Conversation, ExecutionRecord, ExecutionUpdate, NewConversation};
use uuid::Uuid;

/// The pause store selected at startup.
pub enum AppStore {
    Sqlite(SqlitePauseStore),
    Memory(InMemoryPauseStore),
}

impl PauseStore for AppStore {
    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        match self {
            AppStore::Sqlite(s) => s.create_conversation(conversation).await,
            AppStore::Memory(s) => s.create_conversation(conversation).await,
        }
    }

    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        match self {
            AppStore::Sqlite(s) => s.get_conversation(id).await,
            AppStore::Memory(s) => s.get_conversation(id).await,
        }
    }

    async fn find_open_conversation(
        &self,
        phone: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        match self {
            AppStore::Sqlite(s) => s.find_open_conversation(phone).await,
            AppStore::Memory(s) => s.find_open_conversation(phone).await,
        }
    }

    async fn list_open_conversations(&self) -> Result<Vec<Conversation>, RepositoryError> {
        match self {
            AppStore::Sqlite(s) => s.list_open_conversations().await,
            AppStore::Memory(s) => s.list_open_conversations().await,
        }
    }

    async fn consume_conversation(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        match self {
            AppStore::Sqlite(s) => s.consume_conversation(id).await,
            AppStore::Memory(s) => s.consume_conversation(id).await,
        }
    }

    async fn update_execution_status(&self, update: &ExecutionUpdate) -> Result<(), RepositoryError> {
        match self {
            AppStore::Sqlite(s) => s.update_execution_status(update).await,
            AppStore::Memory(s) => s.update_execution_status(update).await,
        }
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, RepositoryError> {
        match self {
            AppStore::Sqlite(s) => s.get_execution(execution_id).await,
            AppStore::Memory(s) => s.get_execution(execution_id).await,
        }
    }
}

pub type ConcreteEngine = WorkflowEngine<AppStore>;

/// Shared application state for CLI commands.
pub struct AppState {
    pub engine: ConcreteEngine,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, open the store, and
    /// build the capability registry.
    pub async fn init(data_dir: Option<PathBuf>, ephemeral: bool) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let config = load_global_config(&data_dir).await;

        let store = if ephemeral {
            tracing::debug!("using in-memory pause store");
            AppStore::Memory(InMemoryPauseStore::new())
        } else {
            tokio::fs::create_dir_all(&data_dir).await?;
            let db_url = format!("{}?mode=rwc", database_url(&data_dir));
            let pool = DatabasePool::new(&db_url).await?;
            AppStore::Sqlite(SqlitePauseStore::new(pool))
        };

        let registry = default_registry(&config.http)?;
        let engine = WorkflowEngine::new(store, registry, config.execution);

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self { engine })
    }
}
