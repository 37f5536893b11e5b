//! Store trait definitions.
//!
//! These are the only persistence surfaces the orchestrator touches.
//! Concrete backends (embedded SQL, Redis, external ORM, S3) implement
//! the same traits behind the same idempotency contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use relay_domain::agent::{AgentConfig, AgentMode};
use relay_domain::error::Result;
use relay_domain::message::{AttachmentKind, ChatMessage};
use relay_domain::run::Run;
use relay_domain::thread::ChatThread;

use crate::blob::FileStoreMetadata;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A stored file reference: what attachments and image blocks resolve to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size: u64,
    pub kind: AttachmentKind,
    /// Resolvable URL, when the backend can mint one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A custom tool registered outside the built-in toolkits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolkit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlMethod {
    Get,
    Put,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stores
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Fetch the thread, creating it lazily on first use.
    async fn get_or_create(
        &self,
        thread_id: Uuid,
        tenant_id: Option<&str>,
        tags: &[String],
    ) -> Result<ChatThread>;

    async fn save(&self, thread: &ChatThread) -> Result<()>;

    /// The hosted-assistant handle for a thread, if one was recorded.
    async fn remote_handle(&self, thread_id: Uuid) -> Result<Option<String>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Idempotent upsert keyed by message id.
    async fn save(&self, message: &ChatMessage, thread_id: Uuid) -> Result<()>;

    async fn get(&self, message_id: Uuid) -> Result<Option<ChatMessage>>;

    /// Messages for a thread, ordered by created timestamp.
    async fn list(&self, thread_id: Uuid) -> Result<Vec<ChatMessage>>;

    /// Late image-URL splicing: patch every message in the thread that
    /// references `file_id` (image blocks or tool-call outputs) with the
    /// data source's URL. Returns the number of messages updated.
    async fn update_tool_calls(
        &self,
        thread_id: Uuid,
        file_id: &str,
        data_source: &DataSource,
    ) -> Result<usize>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Fetch the run, creating a fresh `started` record when absent.
    /// The boolean is true when the record was created by this call.
    async fn get_or_create(&self, run_id: Uuid, thread_id: Uuid) -> Result<(Run, bool)>;

    /// Initialize a run row for a new trigger. Idempotent: an existing
    /// record keeps its fields and is returned as-is.
    async fn init(
        &self,
        run_id: Uuid,
        thread_id: Uuid,
        tenant_id: Option<&str>,
        agent_id: Option<&str>,
        tags: &[String],
    ) -> Result<Run>;

    async fn save(&self, run: &Run) -> Result<()>;

    async fn get(&self, run_id: Uuid) -> Result<Option<Run>>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get(&self, agent_id: &str) -> Result<Option<AgentConfig>>;

    async fn list(&self, mode: Option<AgentMode>) -> Result<Vec<AgentConfig>>;
}

#[async_trait]
pub trait DataSourceStore: Send + Sync {
    /// Persist bytes and return the data source record.
    async fn save_file(
        &self,
        bytes: Vec<u8>,
        file_name: Option<String>,
        content_type: Option<String>,
        kind: AttachmentKind,
    ) -> Result<DataSource>;

    async fn get(&self, file_id: &str) -> Result<Option<(DataSource, Vec<u8>)>>;

    async fn list(&self) -> Result<Vec<DataSource>>;

    async fn delete(&self, file_id: &str) -> Result<()>;
}

/// Optional store for custom-registered tools.
#[async_trait]
pub trait ToolStore: Send + Sync {
    async fn get(&self, tool_id: &str) -> Result<Option<ToolSpec>>;

    async fn list(&self) -> Result<Vec<ToolSpec>>;
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn save(
        &self,
        bytes: &[u8],
        file_id: &str,
        name: Option<&str>,
    ) -> Result<FileStoreMetadata>;

    async fn get(&self, meta: &FileStoreMetadata) -> Result<Vec<u8>>;

    async fn delete(&self, meta: &FileStoreMetadata) -> Result<()>;

    /// A URL a client can use to fetch or upload the blob directly.
    async fn presigned_url(&self, file_id: &str, method: UrlMethod) -> Result<String>;
}
