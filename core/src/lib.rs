//! # Toolsmith Core
//!
//! This crate implements the tool lifecycle for LLM-driven agents. It
//! enables an agent to:
//!
//! - **Create Tools**: Generate small Lua tools from a task description
//! - **Store Tools**: Persist tools with versions, error history, and a
//!   semantic index for reuse
//! - **Execute Tools**: Run tools in a resource-limited sandbox that
//!   never takes the host down with it
//! - **Repair Tools**: Feed execution faults back to the model for a
//!   bounded number of automatic fixes
//! - **Improve Tools**: Revise a tool on explicit instructions
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       Tool Lifecycle                       │
//! ├────────────────────────────────────────────────────────────┤
//! │  ToolManager ──► ChatBackend (LlmGateway)                  │
//! │       │                                                    │
//! │       ├──────► ToolStore (LocalToolStore + embeddings)     │
//! │       │                                                    │
//! │       └──────► SandboxExecutor (Lua VM per call)           │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod executor;
pub mod gateway;
pub mod manager;
pub mod prompts;
pub mod store;
pub mod tool;

pub use error::{Fault, FaultKind, Result, StorageError, ToolError};
pub use executor::{Execution, SandboxConfig, SandboxExecutor};
pub use gateway::{
    ChatBackend, ChatProvider, ChatRequest, GatewayConfig, LlmGateway, extract_json,
    parse_structured,
};
pub use manager::{ExecutionOutcome, ResolveOptions, ToolManager};
pub use store::{LocalToolStore, ScoredTool, ToolStore};
pub use tool::{ErrorRecord, Tool, ToolParameter, ToolRevision};
