//! Entry dispatch — resolves the agent config, persists the initial
//! run, opens the ambient context, chooses the flavor, and guarantees
//! the exit contract: exactly one terminal frame, one persisted final
//! run with aggregated usage and credits, and a released context.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use relay_domain::agent::{AgentConfig, AgentMode, RuntimeConfig};
use relay_domain::config::PricingTable;
use relay_domain::error::{Error, Result};
use relay_domain::message::ChatMessage;
use relay_domain::run::{Run, RunStatus};
use relay_providers::{AssistantService, ProviderRegistry};
use relay_stores::{AgentStore, RunStore, Stores, ThreadStore};
use relay_tools::ToolRegistry;

use crate::connection::ConnectionManager;
use crate::context::{registry, with_run_context, RunContext};
use crate::dispatch::Dispatcher;
use crate::events::EventHandler;
use crate::memory::RuntimeMemory;
use crate::tenant;

use super::{AssistantRunner, LocalRunner, LoopOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trigger and environment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One request to run an agent against a user message.
#[derive(Clone)]
pub struct TriggerRun {
    pub channel_id: String,
    pub message: ChatMessage,
    /// Generated when absent.
    pub run_id: Option<Uuid>,
    /// Generated when absent (fresh conversation).
    pub thread_id: Option<Uuid>,
    pub tenant_id: Option<String>,
    /// Looked up in the agent store; falls back to the default preset.
    pub agent_id: Option<String>,
    /// Explicit config wins over the store lookup.
    pub agent_config: Option<AgentConfig>,
    pub tags: Vec<String>,
    pub runtime_config: Option<RuntimeConfig>,
    /// Optional per-step wall-clock bound; expiry behaves like
    /// cancellation.
    pub step_timeout: Option<Duration>,
}

impl TriggerRun {
    pub fn new(channel_id: impl Into<String>, message: ChatMessage) -> Self {
        Self {
            channel_id: channel_id.into(),
            message,
            run_id: None,
            thread_id: None,
            tenant_id: None,
            agent_id: None,
            agent_config: None,
            tags: Vec::new(),
            runtime_config: None,
            step_timeout: None,
        }
    }
}

/// The collaborators a run executes against.
#[derive(Clone)]
pub struct RunEnvironment {
    pub stores: Stores,
    pub manager: Arc<dyn ConnectionManager>,
    pub providers: Arc<ProviderRegistry>,
    /// Required for hosted-assistant agents.
    pub assistant: Option<Arc<dyn AssistantService>>,
    pub tools: ToolRegistry,
    pub pricing: PricingTable,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one run to completion and return the final persisted `Run`.
///
/// Configuration errors (unknown provider, missing assistant service)
/// surface as `Err` before any run row exists. Once the run row is
/// persisted, every outcome — success, failure, cancellation — returns
/// `Ok(run)` with the terminal status recorded and exactly one terminal
/// frame emitted.
pub async fn start_run(trigger: TriggerRun, env: &RunEnvironment) -> Result<Run> {
    // Runs are commonly spawned from background tasks, so the tenant
    // slot is established from the trigger, never inherited.
    let tenant_id = trigger.tenant_id.clone();
    tenant::with_tenant(tenant_id, start_run_inner(trigger, env)).await
}

async fn start_run_inner(trigger: TriggerRun, env: &RunEnvironment) -> Result<Run> {
    // ── Resolve and validate the agent config (pre-run) ─────────────
    let config = resolve_agent_config(&trigger, env).await?;
    match config.mode {
        AgentMode::Local => {
            env.providers.default_provider()?;
        }
        AgentMode::Assistant => {
            if env.assistant.is_none() {
                return Err(Error::Config(
                    "agent mode 'assistant' requires an assistant service".into(),
                ));
            }
        }
    }

    // ── Thread and run rows ─────────────────────────────────────────
    let thread_id = trigger.thread_id.unwrap_or_else(Uuid::new_v4);
    let run_id = trigger.run_id.unwrap_or_else(Uuid::new_v4);
    let tags: Vec<String> = if trigger.tags.is_empty() {
        vec!["chat".into(), "agent".into()]
    } else {
        trigger.tags.clone()
    };

    env.stores
        .threads
        .get_or_create(thread_id, trigger.tenant_id.as_deref(), &tags)
        .await?;
    let mut run = env
        .stores
        .runs
        .init(
            run_id,
            thread_id,
            trigger.tenant_id.as_deref(),
            Some(config.id.as_str()),
            &tags,
        )
        .await?;

    // ── Context and collaborators ───────────────────────────────────
    let ctx = Arc::new(RunContext::new(
        &trigger.channel_id,
        run_id,
        thread_id,
        trigger.tenant_id.clone(),
        config.clone(),
    ));
    registry().register(ctx.clone());

    let dispatcher = Arc::new(Dispatcher::new(&ctx, env.manager.clone()));
    let memory = Arc::new(RuntimeMemory::new(thread_id, env.stores.messages.clone()));
    let handler = Arc::new(EventHandler::new(
        ctx.clone(),
        dispatcher.clone(),
        memory.clone(),
        env.stores.data_sources.clone(),
        env.stores.messages.clone(),
        env.assistant.clone(),
    ));

    run.transition(RunStatus::InProgress);
    env.stores.runs.save(&run).await?;

    // ── Execute under the ambient context ───────────────────────────
    let span = tracing::info_span!("run", %run_id, %thread_id, agent_id = %config.id);
    let outcome = tracing::Instrument::instrument(
        with_run_context(
            ctx.clone(),
            execute_flavor(&trigger, env, ctx.clone(), handler.clone(), memory.clone()),
        ),
        span,
    )
    .await;

    // ── Finalize: one terminal frame, one persisted final run ───────
    let final_run = finalize(run, outcome, env, &ctx, &handler, &dispatcher).await;
    registry().deregister(run_id);
    final_run
}

async fn resolve_agent_config(trigger: &TriggerRun, env: &RunEnvironment) -> Result<AgentConfig> {
    let mut config = match &trigger.agent_config {
        Some(config) => config.clone(),
        None => match &trigger.agent_id {
            Some(agent_id) => env
                .stores
                .agents
                .get(agent_id)
                .await?
                .unwrap_or_else(AgentConfig::default_agent),
            None => AgentConfig::default_agent(),
        },
    };
    if let Some(rc) = &trigger.runtime_config {
        config.apply_runtime_config(rc.clone());
    }
    Ok(config)
}

/// The run body: memory setup, trigger validation, flavor dispatch.
/// Returns the loop outcome plus the remote run id for hosted runs.
async fn execute_flavor(
    trigger: &TriggerRun,
    env: &RunEnvironment,
    ctx: Arc<RunContext>,
    handler: Arc<EventHandler>,
    memory: Arc<RuntimeMemory>,
) -> Result<(LoopOutcome, Option<String>)> {
    memory.load().await?;

    // Validation happens pre-loop; the run row already exists, so a
    // malformed trigger becomes a failed run with one error terminal.
    let mut user_message = trigger.message.clone();
    user_message.thread_id = Some(ctx.thread_id);
    user_message.run_id = Some(ctx.run_id);
    if user_message.text().trim().is_empty() && user_message.metadata.attachments.is_empty() {
        return Err(Error::Validation("trigger message has no content".into()));
    }
    memory.put(user_message.clone(), true).await?;

    match ctx.agent_config.mode {
        AgentMode::Local => {
            let runner = LocalRunner {
                ctx: ctx.clone(),
                provider: env.providers.default_provider()?,
                registry: env.tools.clone(),
                handler,
                memory,
                step_timeout: trigger.step_timeout,
            };
            runner.execute().await.map(|outcome| (outcome, None))
        }
        AgentMode::Assistant => {
            let service = env
                .assistant
                .clone()
                .ok_or_else(|| Error::Config("assistant service missing".into()))?;
            let runner = AssistantRunner {
                ctx: ctx.clone(),
                service,
                registry: env.tools.clone(),
                handler,
                threads: env.stores.threads.clone(),
                data_sources: env.stores.data_sources.clone(),
            };
            runner.execute(&user_message).await
        }
    }
}

/// Collect steps, aggregate usage, write credits and the cached event
/// log, persist, and emit the single terminal frame.
async fn finalize(
    mut run: Run,
    outcome: Result<(LoopOutcome, Option<String>)>,
    env: &RunEnvironment,
    ctx: &RunContext,
    handler: &EventHandler,
    dispatcher: &Dispatcher,
) -> Result<Run> {
    run.steps = handler.steps();
    run.recompute_usage();

    // The hosted service reports run-level usage; when its step events
    // carried none, stamp the report onto the final step so the run
    // total stays equal to the step sum.
    let terminal = handler.terminal();
    if run.usage.total_tokens == 0 {
        if let Some(reported) = terminal.reported_usage {
            if let Some(last) = run.steps.last_mut() {
                last.usage = reported;
                run.recompute_usage();
            }
        }
    }

    run.metadata.events = dispatcher.actions();
    run.metadata.tool_outputs = ctx.scratch.tool_outputs();

    let outcome = match outcome {
        Ok((outcome, external_id)) => {
            run.external_id = external_id;
            outcome
        }
        Err(e) => {
            ctx.scratch.push_error(e.to_string());
            run.metadata.error = Some(e.to_string());
            run.transition(RunStatus::Failed);
            env.stores.runs.save(&run).await?;
            dispatcher.send_error(&e.to_string()).await;
            tracing::warn!(run_id = %run.id, error = %e, "run failed");
            return Ok(run);
        }
    };

    match outcome {
        LoopOutcome::Completed => {
            run.transition(RunStatus::Completed);
            run.metadata.credits = Some(env.pricing.credits_for(
                &ctx.agent_config.model,
                run.usage.prompt_tokens,
                run.usage.completion_tokens,
            ));
            env.stores.runs.save(&run).await?;
            dispatcher.send_close().await;
            tracing::debug!(run_id = %run.id, total_tokens = run.usage.total_tokens, "run completed");
        }
        LoopOutcome::Cancelled => {
            run.transition(RunStatus::Cancelled);
            env.stores.runs.save(&run).await?;
            dispatcher.send_error("cancelled").await;
            tracing::debug!(run_id = %run.id, "run cancelled");
        }
    }
    Ok(run)
}
