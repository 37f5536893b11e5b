//! Store interfaces the orchestrator consumes, plus the reference
//! backends: in-memory for structured stores, local filesystem for blobs.
//!
//! All operations are idempotent on primary key. Not-found returns
//! `Ok(None)`; transport failures surface as errors the orchestrator
//! treats as fatal for the run.

pub mod blob;
pub mod memory;
pub mod traits;

pub use blob::{FileStoreMetadata, FsDataSourceStore, LocalBlobStorage};
pub use memory::{
    InMemoryAgentStore, InMemoryDataSourceStore, InMemoryMessageStore, InMemoryRunStore,
    InMemoryThreadStore, InMemoryToolStore,
};
pub use traits::{
    AgentStore, BlobStorage, DataSource, DataSourceStore, MessageStore, RunStore, ThreadStore,
    ToolSpec, ToolStore, UrlMethod,
};

use std::sync::Arc;

/// The store bundle a run context carries.
#[derive(Clone)]
pub struct Stores {
    pub threads: Arc<dyn ThreadStore>,
    pub messages: Arc<dyn MessageStore>,
    pub runs: Arc<dyn RunStore>,
    pub agents: Arc<dyn AgentStore>,
    pub data_sources: Arc<dyn DataSourceStore>,
    pub tools: Option<Arc<dyn ToolStore>>,
}

impl Stores {
    /// Reference configuration: every store in memory.
    pub fn in_memory() -> Self {
        Self {
            threads: Arc::new(InMemoryThreadStore::new()),
            messages: Arc::new(InMemoryMessageStore::new()),
            runs: Arc::new(InMemoryRunStore::new()),
            agents: Arc::new(InMemoryAgentStore::new()),
            data_sources: Arc::new(InMemoryDataSourceStore::new()),
            tools: None,
        }
    }
}
