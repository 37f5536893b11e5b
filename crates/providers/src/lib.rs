//! LLM backend adapters.
//!
//! Two backend shapes feed the orchestrator:
//! - [`LlmProvider`] — a stateless chat-completions API (local flavor),
//! - [`AssistantService`] — a stateful hosted-assistant service that
//!   owns threads and runs remotely (hosted flavor).
//!
//! Both are normalized into the domain event taxonomy at this boundary;
//! nothing provider-specific leaks past this crate.

pub mod assistant;
pub mod openai_compat;
pub mod registry;
pub mod sse;
pub mod traits;
mod util;

pub use assistant::{AssistantService, OpenAiAssistantService, RemoteEvent, RemoteRunParams};
pub use openai_compat::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
