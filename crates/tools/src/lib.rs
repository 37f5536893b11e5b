//! Tools and toolkits.
//!
//! A tool is a named callable with a JSON-schema parameter surface:
//! `{name, schema, invoke(args) → output}`. Toolkits are labeled bundles
//! of tools with a shared config schema. The orchestrator treats every
//! tool as opaque; polymorphism is by capability, not inheritance.

pub mod builtin;
pub mod tool;
pub mod toolkit;
pub mod web_browser;

pub use builtin::{code_interpreter_toolkit, end_run_toolkit, file_search_toolkit, EndRunTool};
pub use tool::{CancelProbe, Tool, ToolInvocation, ToolOutput, END_RUN_TOOL};
pub use toolkit::{ToolRegistry, Toolkit};
pub use web_browser::{web_browser_toolkit, WebBrowserTool};
