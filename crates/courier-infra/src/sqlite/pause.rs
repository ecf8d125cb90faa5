//! SQLite pause store implementation.
//!
//! Implements `PauseStore` from `courier-core` using sqlx with split
//! read/write pools. Conversation variables and execution output are stored
//! as JSON text; timestamps as RFC 3339.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use courier_core::repository::pause::PauseStore;
use courier_types::error::RepositoryError;
use courier_types::workflow::{
    Conversation, ConversationStatus, ExecutionRecord, ExecutionStatus, ExecutionUpdate,
    NewConversation,
};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `PauseStore`.
pub struct SqlitePauseStore {
    pool: DatabasePool,
}

impl SqlitePauseStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    workflow_id: String,
    phone: String,
    resume_node_id: String,
    variable_key: String,
    variables: String,
    execution_id: Option<String>,
    status: String,
    created_at: String,
    consumed_at: Option<String>,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            phone: row.try_get("phone")?,
            resume_node_id: row.try_get("resume_node_id")?,
            variable_key: row.try_get("variable_key")?,
            variables: row.try_get("variables")?,
            execution_id: row.try_get("execution_id")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            consumed_at: row.try_get("consumed_at")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        let status: ConversationStatus = parse_enum(&self.status, "conversation status")?;
        let variables: HashMap<String, Value> = serde_json::from_str(&self.variables)
            .map_err(|e| RepositoryError::Query(format!("invalid variables JSON: {e}")))?;

        Ok(Conversation {
            id: parse_uuid(&self.id)?,
            workflow_id: self.workflow_id,
            phone: self.phone,
            resume_node_id: self.resume_node_id,
            variable_key: self.variable_key,
            variables,
            execution_id: self.execution_id,
            status,
            created_at: parse_datetime(&self.created_at)?,
            consumed_at: self.consumed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct ExecutionRow {
    execution_id: String,
    workflow_id: Option<String>,
    status: String,
    output: Option<String>,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_record(self) -> Result<ExecutionRecord, RepositoryError> {
        let status: ExecutionStatus = parse_enum(&self.status, "execution status")?;
        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid execution output: {e}")))
            })
            .transpose()?;

        Ok(ExecutionRecord {
            execution_id: self.execution_id,
            workflow_id: self.workflow_id,
            status,
            output,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a snake_case status column through its serde representation.
fn parse_enum<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid {what}: {s}")))
}

fn status_str<T: serde::Serialize>(status: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(status) {
        Ok(Value::String(s)) => Ok(s),
        Ok(other) => Err(RepositoryError::Query(format!("unexpected status encoding: {other}"))),
        Err(e) => Err(RepositoryError::Query(e.to_string())),
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

const CONVERSATION_COLUMNS: &str = "id, workflow_id, phone, resume_node_id, variable_key, variables, execution_id, status, created_at, consumed_at";

// ---------------------------------------------------------------------------
// PauseStore impl
// ---------------------------------------------------------------------------

impl PauseStore for SqlitePauseStore {
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
        let variables_json = serde_json::to_string(&conversation.variables)
            .map_err(|e| RepositoryError::Query(format!("serialize variables: {e}")))?;

        sqlx::query(
            r#"INSERT INTO conversations
               (id, workflow_id, phone, resume_node_id, variable_key, variables, execution_id, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.workflow_id)
        .bind(&conversation.phone)
        .bind(&conversation.resume_node_id)
        .bind(&conversation.variable_key)
        .bind(&variables_json)
        .bind(&conversation.execution_id)
        .bind(status_str(&conversation.status)?)
        .bind(format_datetime(&conversation.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        tracing::debug!(
            conversation_id = %conversation.id,
            phone = %conversation.phone,
            resume_node_id = %conversation.resume_node_id,
            "conversation opened"
        );
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|row| {
            ConversationRow::from_row(&row)
                .map_err(query_err)?
                .into_conversation()
        })
        .transpose()
    }

    async fn find_open_conversation(
        &self,
        phone: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE phone = ? AND status = 'open'
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|row| {
            ConversationRow::from_row(&row)
                .map_err(query_err)?
                .into_conversation()
        })
        .transpose()
    }

    async fn list_open_conversations(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE status = 'open' ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ConversationRow::from_row(row).map_err(query_err)?;
            conversations.push(r.into_conversation()?);
        }
        Ok(conversations)
    }

    async fn consume_conversation(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET status = 'consumed', consumed_at = ? WHERE id = ? AND status = 'open'",
        )
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_execution_status(&self, update: &ExecutionUpdate) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let finished_at = update.status.is_terminal().then(|| now.clone());
        let output = update
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO executions (execution_id, workflow_id, status, output, error, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id) DO UPDATE SET
                 workflow_id = COALESCE(excluded.workflow_id, executions.workflow_id),
                 status = excluded.status,
                 output = COALESCE(excluded.output, executions.output),
                 error = excluded.error,
                 finished_at = excluded.finished_at"#,
        )
        .bind(&update.execution_id)
        .bind(&update.workflow_id)
        .bind(status_str(&update.status)?)
        .bind(&output)
        .bind(&update.error)
        .bind(&now)
        .bind(&finished_at)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT execution_id, workflow_id, status, output, error, started_at, finished_at
             FROM executions WHERE execution_id = ?",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|row| ExecutionRow::from_row(&row).map_err(query_err)?.into_record())
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_store() -> (SqlitePauseStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqlitePauseStore::new(pool), dir)
    }

    fn new_conversation(phone: &str) -> NewConversation {
        NewConversation {
            workflow_id: "wf-1".into(),
            phone: phone.into(),
            resume_node_id: "reply".into(),
            variable_key: "answer".into(),
            variables: HashMap::from([
                ("name".to_string(), json!("Ada")),
                ("score".to_string(), json!({ "value": 3 })),
            ]),
            execution_id: Some("exec-1".into()),
        }
    }

    #[tokio::test]
    async fn test_conversation_round_trip() {
        let (store, _dir) = test_store().await;
        let created = store.create_conversation(&new_conversation("+15550100")).await.unwrap();

        let loaded = store.get_conversation(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.variables, created.variables);
        assert_eq!(loaded.execution_id.as_deref(), Some("exec-1"));
        assert_eq!(loaded.status, ConversationStatus::Open);
        assert!(loaded.consumed_at.is_none());

        assert!(store.get_conversation(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_open_prefers_most_recent() {
        let (store, _dir) = test_store().await;
        let older = store.create_conversation(&new_conversation("+15550100")).await.unwrap();
        let newer = store.create_conversation(&new_conversation("+15550100")).await.unwrap();
        store.create_conversation(&new_conversation("+15550999")).await.unwrap();

        let found = store.find_open_conversation("+15550100").await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);

        assert!(store.consume_conversation(&newer.id).await.unwrap());
        let found = store.find_open_conversation("+15550100").await.unwrap().unwrap();
        assert_eq!(found.id, older.id);

        let open = store.list_open_conversations().await.unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|c| c.status == ConversationStatus::Open));
    }

    #[tokio::test]
    async fn test_consume_only_once() {
        let (store, _dir) = test_store().await;
        let created = store.create_conversation(&new_conversation("+15550100")).await.unwrap();

        assert!(store.consume_conversation(&created.id).await.unwrap());
        assert!(!store.consume_conversation(&created.id).await.unwrap());

        let loaded = store.get_conversation(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConversationStatus::Consumed);
        assert!(loaded.consumed_at.is_some());
        assert!(store.find_open_conversation("+15550100").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execution_upsert() {
        let (store, _dir) = test_store().await;
        let update = |status, output: Option<Value>, error: Option<&str>| ExecutionUpdate {
            execution_id: "exec-1".into(),
            workflow_id: Some("wf-1".into()),
            status,
            output,
            error: error.map(str::to_string),
        };

        store
            .update_execution_status(&update(ExecutionStatus::Running, None, None))
            .await
            .unwrap();
        let running = store.get_execution("exec-1").await.unwrap().unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);
        assert!(running.finished_at.is_none());

        store
            .update_execution_status(&update(
                ExecutionStatus::Waiting,
                Some(json!({ "variables": { "name": "Ada" } })),
                None,
            ))
            .await
            .unwrap();
        store
            .update_execution_status(&update(ExecutionStatus::Error, None, Some("1 node(s) did not succeed: x")))
            .await
            .unwrap();

        let done = store.get_execution("exec-1").await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Error);
        assert_eq!(done.started_at, running.started_at);
        assert!(done.finished_at.is_some());
        assert_eq!(done.output, Some(json!({ "variables": { "name": "Ada" } })), "output kept");
        assert_eq!(done.error.as_deref(), Some("1 node(s) did not succeed: x"));

        assert!(store.get_execution("missing").await.unwrap().is_none());
    }
}
