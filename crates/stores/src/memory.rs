//! In-memory reference backends for every store trait.
//!
//! Keyed maps behind `parking_lot::RwLock` with clone-out snapshots;
//! locks are never held across an await. Upserts are idempotent by
//! primary key, which is what the orchestrator relies on.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use relay_domain::agent::{AgentConfig, AgentMode};
use relay_domain::error::Result;
use relay_domain::message::{AttachmentKind, ChatMessage, ContentBlock};
use relay_domain::run::Run;
use relay_domain::thread::ChatThread;

use crate::traits::{
    AgentStore, DataSource, DataSourceStore, MessageStore, RunStore, ThreadStore, ToolSpec,
    ToolStore,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Threads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryThreadStore {
    threads: RwLock<HashMap<Uuid, ChatThread>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn get_or_create(
        &self,
        thread_id: Uuid,
        tenant_id: Option<&str>,
        tags: &[String],
    ) -> Result<ChatThread> {
        let mut threads = self.threads.write();
        let thread = threads.entry(thread_id).or_insert_with(|| {
            let mut t = ChatThread::new(thread_id, tenant_id.map(String::from));
            t.tags = tags.to_vec();
            t
        });
        Ok(thread.clone())
    }

    async fn save(&self, thread: &ChatThread) -> Result<()> {
        self.threads.write().insert(thread.id, thread.clone());
        Ok(())
    }

    async fn remote_handle(&self, thread_id: Uuid) -> Result<Option<String>> {
        Ok(self
            .threads
            .read()
            .get(&thread_id)
            .and_then(|t| t.external_id.clone()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct MessageTable {
    /// Insertion-ordered ids per thread; insertion order matches the
    /// created-timestamp order the memory contract requires.
    by_thread: HashMap<Uuid, Vec<Uuid>>,
    by_id: HashMap<Uuid, ChatMessage>,
}

#[derive(Default)]
pub struct InMemoryMessageStore {
    inner: RwLock<MessageTable>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(&self, message: &ChatMessage, thread_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        let mut message = message.clone();
        message.thread_id = Some(thread_id);
        if !inner.by_id.contains_key(&message.id) {
            inner.by_thread.entry(thread_id).or_default().push(message.id);
        }
        inner.by_id.insert(message.id, message);
        Ok(())
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<ChatMessage>> {
        Ok(self.inner.read().by_id.get(&message_id).cloned())
    }

    async fn list(&self, thread_id: Uuid) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.read();
        let ids = inner.by_thread.get(&thread_id);
        Ok(ids
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_tool_calls(
        &self,
        thread_id: Uuid,
        file_id: &str,
        data_source: &DataSource,
    ) -> Result<usize> {
        let mut inner = self.inner.write();
        let ids = match inner.by_thread.get(&thread_id) {
            Some(ids) => ids.clone(),
            None => return Ok(0),
        };

        let mut updated = 0;
        for id in ids {
            let Some(message) = inner.by_id.get_mut(&id) else {
                continue;
            };
            let mut touched = false;

            for block in message.content.iter_mut() {
                if let ContentBlock::ImageRef { file_id: fid, url } = block {
                    if fid == file_id && url.is_none() {
                        *url = data_source.url.clone();
                        touched = true;
                    }
                }
            }

            if let Some(tool_calls) = message.metadata.tool_calls.as_mut() {
                for tc in tool_calls.iter_mut() {
                    let references_file = tc
                        .structured_output
                        .as_ref()
                        .map(|v| v.to_string().contains(file_id))
                        .unwrap_or(false);
                    if references_file {
                        if let Some(obj) =
                            tc.structured_output.as_mut().and_then(|v| v.as_object_mut())
                        {
                            if let Some(url) = &data_source.url {
                                obj.insert("url".into(), serde_json::json!(url));
                                touched = true;
                            }
                        }
                    }
                }
            }

            if touched {
                updated += 1;
            }
        }
        Ok(updated)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn get_or_create(&self, run_id: Uuid, thread_id: Uuid) -> Result<(Run, bool)> {
        let mut runs = self.runs.write();
        if let Some(run) = runs.get(&run_id) {
            return Ok((run.clone(), false));
        }
        let run = Run::new(run_id, thread_id);
        runs.insert(run_id, run.clone());
        Ok((run, true))
    }

    async fn init(
        &self,
        run_id: Uuid,
        thread_id: Uuid,
        tenant_id: Option<&str>,
        agent_id: Option<&str>,
        tags: &[String],
    ) -> Result<Run> {
        let mut runs = self.runs.write();
        if let Some(existing) = runs.get(&run_id) {
            return Ok(existing.clone());
        }
        let mut run = Run::new(run_id, thread_id);
        run.tenant_id = tenant_id.map(String::from);
        run.agent_id = agent_id.map(String::from);
        run.tags = tags.to_vec();
        runs.insert(run_id, run.clone());
        Ok(run)
    }

    async fn save(&self, run: &Run) -> Result<()> {
        self.runs.write().insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<Run>> {
        Ok(self.runs.read().get(&run_id).cloned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryAgentStore {
    agents: RwLock<HashMap<String, AgentConfig>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: AgentConfig) {
        self.agents.write().insert(config.id.clone(), config);
    }

    /// Seed from a config file's agent presets.
    pub fn with_presets(presets: impl IntoIterator<Item = AgentConfig>) -> Self {
        let store = Self::new();
        for preset in presets {
            store.insert(preset);
        }
        store
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn get(&self, agent_id: &str) -> Result<Option<AgentConfig>> {
        Ok(self.agents.read().get(agent_id).cloned())
    }

    async fn list(&self, mode: Option<AgentMode>) -> Result<Vec<AgentConfig>> {
        let agents = self.agents.read();
        let mut out: Vec<AgentConfig> = agents
            .values()
            .filter(|a| mode.map(|m| a.mode == m).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data sources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryDataSourceStore {
    files: RwLock<HashMap<String, (DataSource, Vec<u8>)>>,
}

impl InMemoryDataSourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataSourceStore for InMemoryDataSourceStore {
    async fn save_file(
        &self,
        bytes: Vec<u8>,
        file_name: Option<String>,
        content_type: Option<String>,
        kind: AttachmentKind,
    ) -> Result<DataSource> {
        let id = Uuid::new_v4().to_string();
        let source = DataSource {
            id: id.clone(),
            file_name,
            content_type,
            size: bytes.len() as u64,
            kind,
            url: Some(format!("/files/{id}")),
            created_at: Utc::now(),
        };
        self.files.write().insert(id, (source.clone(), bytes));
        Ok(source)
    }

    async fn get(&self, file_id: &str) -> Result<Option<(DataSource, Vec<u8>)>> {
        Ok(self.files.read().get(file_id).cloned())
    }

    async fn list(&self) -> Result<Vec<DataSource>> {
        let files = self.files.read();
        let mut out: Vec<DataSource> = files.values().map(|(ds, _)| ds.clone()).collect();
        out.sort_by_key(|ds| ds.created_at);
        Ok(out)
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        self.files.write().remove(file_id);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryToolStore {
    tools: RwLock<HashMap<String, ToolSpec>>,
}

impl InMemoryToolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, spec: ToolSpec) {
        self.tools.write().insert(spec.id.clone(), spec);
    }
}

#[async_trait]
impl ToolStore for InMemoryToolStore {
    async fn get(&self, tool_id: &str) -> Result<Option<ToolSpec>> {
        Ok(self.tools.read().get(tool_id).cloned())
    }

    async fn list(&self) -> Result<Vec<ToolSpec>> {
        let tools = self.tools.read();
        let mut out: Vec<ToolSpec> = tools.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
