//! Runtime message memory — the per-thread ordered buffer the next LLM
//! request is built from, backed by the message store.
//!
//! One memory instance exists per thread per run; the event handler
//! holds a shared reference to the same instance. All operations are
//! idempotent by message id: a message is in memory exactly when it
//! will be visible to the next model request.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use relay_domain::error::Result;
use relay_domain::message::ChatMessage;
use relay_stores::MessageStore;

#[derive(Default)]
struct MemoryInner {
    messages: Vec<ChatMessage>,
    seen: HashSet<Uuid>,
    loaded: bool,
}

pub struct RuntimeMemory {
    thread_id: Uuid,
    store: Arc<dyn MessageStore>,
    // tokio Mutex: persistence happens while the lock is held, so the
    // load/put order stays serial within a run.
    inner: Mutex<MemoryInner>,
}

impl RuntimeMemory {
    pub fn new(thread_id: Uuid, store: Arc<dyn MessageStore>) -> Self {
        Self {
            thread_id,
            store,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }

    /// Populate from the message store. Later calls are no-ops.
    pub async fn load(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.loaded {
            return Ok(());
        }
        let messages = self.store.list(self.thread_id).await?;
        inner.seen = messages.iter().map(|m| m.id).collect();
        inner.messages = messages;
        inner.loaded = true;
        Ok(())
    }

    /// Append a message if its id is unseen; optionally persist. A
    /// duplicate id is a no-op.
    pub async fn put(&self, message: ChatMessage, persist: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.seen.insert(message.id) {
            return Ok(());
        }
        if persist {
            self.store.save(&message, self.thread_id).await?;
        }
        inner.messages.push(message);
        Ok(())
    }

    /// Ordered retrieval, optionally filtered to one run.
    pub async fn list(&self, run_id: Option<Uuid>) -> Vec<ChatMessage> {
        let inner = self.inner.lock().await;
        match run_id {
            Some(run_id) => inner
                .messages
                .iter()
                .filter(|m| m.run_id == Some(run_id))
                .cloned()
                .collect(),
            None => inner.messages.clone(),
        }
    }

    pub async fn last(&self) -> Option<ChatMessage> {
        self.inner.lock().await.messages.last().cloned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use relay_stores::InMemoryMessageStore;

    fn memory() -> (RuntimeMemory, Arc<InMemoryMessageStore>) {
        let store = Arc::new(InMemoryMessageStore::new());
        (RuntimeMemory::new(Uuid::new_v4(), store.clone()), store)
    }

    #[tokio::test]
    async fn put_is_idempotent_by_id() {
        let (memory, _) = memory();
        memory.load().await.unwrap();
        let msg = ChatMessage::user("hi");
        memory.put(msg.clone(), true).await.unwrap();
        memory.put(msg, true).await.unwrap();
        assert_eq!(memory.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn put_persists_to_store() {
        let (memory, store) = memory();
        memory.load().await.unwrap();
        let msg = ChatMessage::user("hi");
        memory.put(msg.clone(), true).await.unwrap();
        assert!(store.get(msg.id).await.unwrap().is_some());

        let transient = ChatMessage::assistant("draft");
        memory.put(transient.clone(), false).await.unwrap();
        assert!(store.get(transient.id).await.unwrap().is_none());
        assert_eq!(memory.list(None).await.len(), 2);
    }

    #[tokio::test]
    async fn load_pulls_existing_thread_messages() {
        let store = Arc::new(InMemoryMessageStore::new());
        let thread_id = Uuid::new_v4();
        let earlier = ChatMessage::user("from a previous run");
        store.save(&earlier, thread_id).await.unwrap();

        let memory = RuntimeMemory::new(thread_id, store);
        memory.load().await.unwrap();
        assert_eq!(memory.list(None).await.len(), 1);

        // Re-loading does not duplicate.
        memory.load().await.unwrap();
        assert_eq!(memory.list(None).await.len(), 1);

        // A message loaded from the store is not re-appended by put.
        memory.put(earlier, true).await.unwrap();
        assert_eq!(memory.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn list_filters_by_run_id() {
        let (memory, _) = memory();
        memory.load().await.unwrap();
        let run_a = Uuid::new_v4();
        memory.put(ChatMessage::user("a").with_run(run_a), false).await.unwrap();
        memory.put(ChatMessage::user("b"), false).await.unwrap();

        assert_eq!(memory.list(Some(run_a)).await.len(), 1);
        assert_eq!(memory.list(None).await.len(), 2);
    }

    #[tokio::test]
    async fn last_returns_most_recent() {
        let (memory, _) = memory();
        memory.load().await.unwrap();
        assert!(memory.last().await.is_none());
        memory.put(ChatMessage::user("one"), false).await.unwrap();
        memory.put(ChatMessage::assistant("two"), false).await.unwrap();
        assert_eq!(memory.last().await.unwrap().text(), "two");
    }
}
