//! The run orchestrator: two flavors behind one contract.
//!
//! [`start_run`] is the entry dispatch — it resolves the agent config,
//! persists the initial run, opens the ambient context, and hands off to
//! the local step loop or the hosted delegated loop. Both flavors end
//! with exactly one terminal frame and one persisted final run.

mod assistant;
mod entry;
mod local;

pub use entry::{start_run, RunEnvironment, TriggerRun};

pub(crate) use assistant::AssistantRunner;
pub(crate) use local::LocalRunner;

/// How a flavor's loop ended; failures travel as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopOutcome {
    /// Message phase reached or an `end_run` sentinel fired.
    Completed,
    /// Stop flag observed, step budget exhausted, or step timeout hit.
    Cancelled,
}
