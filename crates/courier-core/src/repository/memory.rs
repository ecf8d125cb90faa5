//! In-memory [`PauseStore`] backed by `DashMap`.
//!
//! Used for ephemeral CLI runs and tests. State is lost when the process
//! exits.

use chrono::Utc;
use courier_types::error::RepositoryError;
use courier_types::workflow::{
    Conversation, ConversationStatus, ExecutionRecord, ExecutionUpdate, NewConversation,
};
use dashmap::DashMap;
use uuid::Uuid;

use super::pause::PauseStore;

#[derive(Debug, Default)]
pub struct InMemoryPauseStore {
    conversations: DashMap<Uuid, Conversation>,
    executions: DashMap<String, ExecutionRecord>,
}

impl InMemoryPauseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations in any status.
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

impl PauseStore for InMemoryPauseStore {
    async fn create_conversation(
        &self,
        new: &NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        let conversation = Conversation {
            id: Uuid::now_v7(),
            workflow_id: new.workflow_id.clone(),
            phone: new.phone.clone(),
            resume_node_id: new.resume_node_id.clone(),
            variable_key: new.variable_key.clone(),
            variables: new.variables.clone(),
            execution_id: new.execution_id.clone(),
            status: ConversationStatus::Open,
            created_at: Utc::now(),
            consumed_at: None,
        };
        self.conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.get(id).map(|c| c.value().clone()))
    }

    async fn find_open_conversation(
        &self,
        phone: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .conversations
            .iter()
            .filter(|c| c.status == ConversationStatus::Open && c.phone == phone)
            .max_by_key(|c| (c.created_at, c.id))
            .map(|c| c.value().clone()))
    }

    async fn list_open_conversations(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let mut open: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.status == ConversationStatus::Open)
            .map(|c| c.value().clone())
            .collect();
        open.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(open)
    }

    async fn consume_conversation(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let Some(mut entry) = self.conversations.get_mut(id) else {
            return Ok(false);
        };
        if entry.status != ConversationStatus::Open {
            return Ok(false);
        }
        entry.status = ConversationStatus::Consumed;
        entry.consumed_at = Some(Utc::now());
        Ok(true)
    }

    async fn update_execution_status(&self, update: &ExecutionUpdate) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let finished_at = update.status.is_terminal().then_some(now);

        self.executions
            .entry(update.execution_id.clone())
            .and_modify(|record| {
                record.status = update.status;
                if update.workflow_id.is_some() {
                    record.workflow_id = update.workflow_id.clone();
                }
                if update.output.is_some() {
                    record.output = update.output.clone();
                }
                record.error = update.error.clone();
                record.finished_at = finished_at;
            })
            .or_insert_with(|| ExecutionRecord {
                execution_id: update.execution_id.clone(),
                workflow_id: update.workflow_id.clone(),
                status: update.status,
                output: update.output.clone(),
                error: update.error.clone(),
                started_at: now,
                finished_at,
            });
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, RepositoryError> {
        Ok(self.executions.get(execution_id).map(|r| r.value().clone()))
    }
}
