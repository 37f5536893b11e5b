//! Per-run context and ambient propagation.
//!
//! A [`RunContext`] is created at run start and destroyed at run end. It
//! travels two ways:
//! - ambiently, through a task-local scope established for the run's
//!   future (inherited by sub-futures of the same task), and
//! - through the process-wide [`ContextRegistry`], so actors that only
//!   know a run id (e.g. a cancellation issuer) can reach the scratch
//!   storage from another task.
//!
//! The registry has a single writer (the owning orchestrator) and many
//! readers. Neither slot is ever the sole container; the two are kept in
//! step by the orchestrator's register/deregister pair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use uuid::Uuid;

use relay_domain::agent::AgentConfig;
use relay_domain::message::{ChatMessage, ToolCall};
use relay_tools::CancelProbe;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scratch storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct ScratchInner {
    tool_calls: Vec<ToolCall>,
    errors: Vec<String>,
    messages: Vec<ChatMessage>,
    run_metadata: HashMap<String, Value>,
    tool_outputs: Vec<Value>,
}

/// Mutable per-run scratch storage. Mutations are visible only within
/// the owning run (and to registry readers holding the same context).
pub struct Scratch {
    inner: Mutex<ScratchInner>,
    stopped: Arc<AtomicBool>,
}

impl Default for Scratch {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ScratchInner::default()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Scratch {
    /// Buffer an enriched tool call for later splicing into its step.
    pub fn push_tool_call(&self, tool_call: ToolCall) {
        self.inner.lock().tool_calls.push(tool_call);
    }

    pub fn take_tool_calls(&self) -> Vec<ToolCall> {
        std::mem::take(&mut self.inner.lock().tool_calls)
    }

    pub fn push_error(&self, error: impl Into<String>) {
        self.inner.lock().errors.push(error.into());
    }

    pub fn errors(&self) -> Vec<String> {
        self.inner.lock().errors.clone()
    }

    pub fn push_message(&self, message: ChatMessage) {
        self.inner.lock().messages.push(message);
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    pub fn push_tool_output(&self, output: Value) {
        self.inner.lock().tool_outputs.push(output);
    }

    pub fn tool_outputs(&self) -> Vec<Value> {
        self.inner.lock().tool_outputs.clone()
    }

    pub fn set_meta(&self, key: &str, value: Value) {
        // Writing the stop key through the generic API must still trip
        // the fast-path flag the loop polls.
        if key.starts_with("run:stop:") {
            self.stopped.store(true, Ordering::Release);
        }
        self.inner.lock().run_metadata.insert(key.to_string(), value);
    }

    pub fn get_meta(&self, key: &str) -> Option<Value> {
        self.inner.lock().run_metadata.get(key).cloned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable per-run identifiers plus the mutable scratch storage.
pub struct RunContext {
    pub channel_id: String,
    pub run_id: Uuid,
    pub thread_id: Uuid,
    pub tenant_id: Option<String>,
    pub agent_config: AgentConfig,
    pub scratch: Scratch,
}

impl RunContext {
    pub fn new(
        channel_id: impl Into<String>,
        run_id: Uuid,
        thread_id: Uuid,
        tenant_id: Option<String>,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            run_id,
            thread_id,
            tenant_id,
            agent_config,
            scratch: Scratch::default(),
        }
    }

    /// The well-known cancellation key for a run.
    pub fn stop_key(run_id: Uuid) -> String {
        format!("run:stop:{run_id}")
    }

    /// Request cooperative cancellation of this run.
    pub fn request_stop(&self) {
        self.scratch
            .set_meta(&Self::stop_key(self.run_id), Value::Bool(true));
    }

    /// Polled by the orchestrator before each model request and before
    /// each tool dispatch.
    pub fn is_stop_requested(&self) -> bool {
        self.scratch.stopped.load(Ordering::Acquire)
    }

    /// A probe long-running tools can poll for cancellation.
    pub fn cancel_probe(&self) -> CancelProbe {
        CancelProbe::new(self.scratch.stopped.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process-wide registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps `run_id → RunContext` for cross-task lookup.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: RwLock<HashMap<Uuid, Arc<RunContext>>>,
}

impl ContextRegistry {
    pub fn register(&self, ctx: Arc<RunContext>) {
        self.contexts.write().insert(ctx.run_id, ctx);
    }

    pub fn deregister(&self, run_id: Uuid) {
        self.contexts.write().remove(&run_id);
    }

    pub fn get(&self, run_id: Uuid) -> Option<Arc<RunContext>> {
        self.contexts.read().get(&run_id).cloned()
    }

    /// Set the stop flag for a run. Returns false when the run is not
    /// (or no longer) registered.
    pub fn request_stop(&self, run_id: Uuid) -> bool {
        match self.get(run_id) {
            Some(ctx) => {
                ctx.request_stop();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.contexts.read().len()
    }
}

/// The process-wide registry instance.
pub fn registry() -> &'static ContextRegistry {
    static REGISTRY: OnceLock<ContextRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ContextRegistry::default)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ambient slot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

tokio::task_local! {
    static CURRENT_RUN: Arc<RunContext>;
}

/// Run `fut` with `ctx` as the ambient run context. The slot is
/// distinct per logical execution, inherited by sub-futures, and
/// cleared when the scope ends.
pub async fn with_run_context<F>(ctx: Arc<RunContext>, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_RUN.scope(ctx, fut).await
}

/// The ambient run context, when the caller executes inside a run scope.
pub fn current() -> Option<Arc<RunContext>> {
    CURRENT_RUN.try_with(|c| c.clone()).ok()
}

/// The "current run id" of the executing task.
pub fn current_run_id() -> Option<Uuid> {
    CURRENT_RUN.try_with(|c| c.run_id).ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Arc<RunContext> {
        Arc::new(RunContext::new(
            "ch1",
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            AgentConfig::default_agent(),
        ))
    }

    #[test]
    fn stop_flag_roundtrip() {
        let ctx = ctx();
        assert!(!ctx.is_stop_requested());
        ctx.request_stop();
        assert!(ctx.is_stop_requested());
        // The well-known key is visible in scratch metadata.
        let key = RunContext::stop_key(ctx.run_id);
        assert_eq!(ctx.scratch.get_meta(&key), Some(Value::Bool(true)));
    }

    #[test]
    fn stop_via_generic_meta_write_trips_flag() {
        let ctx = ctx();
        ctx.scratch
            .set_meta(&RunContext::stop_key(ctx.run_id), Value::Bool(true));
        assert!(ctx.is_stop_requested());
    }

    #[test]
    fn cancel_probe_shares_flag() {
        let ctx = ctx();
        let probe = ctx.cancel_probe();
        assert!(!probe.is_cancelled());
        ctx.request_stop();
        assert!(probe.is_cancelled());
    }

    #[test]
    fn registry_register_lookup_deregister() {
        let registry = ContextRegistry::default();
        let ctx = ctx();
        let run_id = ctx.run_id;

        registry.register(ctx);
        assert!(registry.get(run_id).is_some());
        assert!(registry.request_stop(run_id));
        assert!(registry.get(run_id).unwrap().is_stop_requested());

        registry.deregister(run_id);
        assert!(registry.get(run_id).is_none());
        assert!(!registry.request_stop(run_id));
    }

    #[test]
    fn scratch_tool_call_buffer_drains() {
        let ctx = ctx();
        ctx.scratch
            .push_tool_call(ToolCall::function("c1", "t", "{}"));
        ctx.scratch
            .push_tool_call(ToolCall::function("c2", "t", "{}"));
        assert_eq!(ctx.scratch.take_tool_calls().len(), 2);
        assert!(ctx.scratch.take_tool_calls().is_empty());
    }

    #[tokio::test]
    async fn ambient_scope_is_per_task() {
        let a = ctx();
        let a_id = a.run_id;

        let inner = with_run_context(a, async move {
            assert_eq!(current_run_id(), Some(a_id));
            // A sub-future of the same task inherits the slot.
            let nested = async { current_run_id() }.await;
            assert_eq!(nested, Some(a_id));
            current().unwrap().run_id
        })
        .await;
        assert_eq!(inner, a_id);

        // Outside the scope the slot is cleared.
        assert_eq!(current_run_id(), None);
    }

    #[tokio::test]
    async fn concurrent_runs_see_distinct_contexts() {
        let a = ctx();
        let b = ctx();
        let (a_id, b_id) = (a.run_id, b.run_id);

        let ta = tokio::spawn(with_run_context(a, async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            current_run_id()
        }));
        let tb = tokio::spawn(with_run_context(b, async move {
            current_run_id()
        }));

        assert_eq!(ta.await.unwrap(), Some(a_id));
        assert_eq!(tb.await.unwrap(), Some(b_id));
    }
}
