//! Pause store trait definition.
//!
//! Persists the two records that outlive a single engine invocation: open
//! conversations awaiting an answer, and the system-of-record status of each
//! execution. The infrastructure layer (courier-infra) implements this trait
//! with SQLite; [`InMemoryPauseStore`](super::memory::InMemoryPauseStore) is
//! the ephemeral implementation.

use courier_types::error::RepositoryError;
use courier_types::workflow::{Conversation, ExecutionRecord, ExecutionUpdate, NewConversation};
use uuid::Uuid;

/// Repository trait for pause state and execution records.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait PauseStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Persist a new open conversation and return it with its assigned ID.
    fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    fn get_conversation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// Most recently created open conversation for a normalized phone number.
    fn find_open_conversation(
        &self,
        phone: &str,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// All open conversations, newest first.
    fn list_open_conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;

    /// Mark an open conversation consumed. Returns `false` if it was not open,
    /// so concurrent resumers cannot both win.
    fn consume_conversation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Execution records
    // -----------------------------------------------------------------------

    /// Insert or update an execution record. Terminal statuses stamp
    /// `finished_at`.
    fn update_execution_status(
        &self,
        update: &ExecutionUpdate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        execution_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRecord>, RepositoryError>> + Send;
}
