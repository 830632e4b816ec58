//! Local tool registry.
//!
//! The remote side may ask the client to run a named function mid-response.
//! Tools are registered explicitly at startup and looked up by exact name;
//! an unregistered name never runs anything and produces an error output
//! instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rtvoice::core::realtime::ToolRegistry;
//!
//! let mut registry = ToolRegistry::new();
//! registry.register_fn(
//!     "echo",
//!     "Repeat the given text",
//!     serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
//!     |args| async move { Ok(args["text"].as_str().unwrap_or_default().to_string()) },
//! )?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::openai::{ConversationItem, ToolDef};

/// Default bound on a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors produced while dispatching a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under this name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments were not valid JSON or did not match the tool's expectations
    #[error("Invalid arguments for {name}: {reason}")]
    InvalidArguments { name: String, reason: String },

    /// The tool ran and failed
    #[error("Tool {name} failed: {reason}")]
    Failed { name: String, reason: String },

    /// The tool did not finish in time
    #[error("Tool {0} timed out")]
    Timeout(String),

    /// A tool with this name is already registered
    #[error("Tool already registered: {0}")]
    Duplicate(String),
}

impl ToolError {
    /// Shorthand for a failure inside a tool.
    pub fn failed(name: &str, reason: impl std::fmt::Display) -> Self {
        ToolError::Failed {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A capability the remote side may invoke.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Name, description and JSON parameter schema.
    fn definition(&self) -> ToolDef;

    /// Run with parsed JSON arguments and return the output text.
    async fn invoke(&self, arguments: Value) -> Result<String, ToolError>;
}

/// Boxed async tool body.
pub type ToolFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>> + Send + Sync>;

struct FnTool {
    definition: ToolDef,
    body: ToolFn,
}

#[async_trait]
impl LocalTool for FnTool {
    fn definition(&self) -> ToolDef {
        self.definition.clone()
    }

    async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
        (self.body)(arguments).await
    }
}

// =============================================================================
// Calls and Outcomes
// =============================================================================

/// A tool call requested by a `response.done` output item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub name: String,
    /// Raw JSON argument text
    pub arguments: String,
}

impl PendingToolCall {
    /// Extract a call from a `function_call` item. Items without a call ID or
    /// name yield `None`.
    pub fn from_item(item: &ConversationItem) -> Option<Self> {
        if !item.is_function_call() {
            return None;
        }
        Some(Self {
            call_id: item.call_id.clone()?,
            name: item.name.clone()?,
            arguments: item.arguments.clone().unwrap_or_default(),
        })
    }
}

/// Result of dispatching one call; always sent back to the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub is_error: bool,
}

// =============================================================================
// Registry
// =============================================================================

/// Name-keyed table of local tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn LocalTool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its definition's name.
    pub fn register<T: LocalTool + 'static>(&mut self, tool: T) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn LocalTool>) -> Result<(), ToolError> {
        let name = tool.definition().name;
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        tracing::debug!("Registered tool: {}", name);
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Register an async closure as a tool.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: &str,
        description: &str,
        parameters: Value,
        body: F,
    ) -> Result<(), ToolError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let body: ToolFn = Arc::new(move |args| Box::pin(body(args)));
        self.register(FnTool {
            definition: ToolDef::function(name, description, parameters),
            body,
        })
    }

    /// Definitions in registration order, for `session.update`.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LocalTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run `call` with a bounded wait.
    ///
    /// Never fails: unknown names, unparseable arguments, tool errors and
    /// timeouts all become an outcome whose output is `{"error": "..."}`.
    pub async fn dispatch(&self, call: &PendingToolCall, timeout: Duration) -> ToolOutcome {
        match self.run(call, timeout).await {
            Ok(output) => {
                tracing::debug!("Tool {} ({}) completed", call.name, call.call_id);
                ToolOutcome {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    output,
                    is_error: false,
                }
            }
            Err(e) => {
                tracing::warn!("Tool call {} failed: {}", call.call_id, e);
                ToolOutcome {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    output: serde_json::json!({ "error": e.to_string() }).to_string(),
                    is_error: true,
                }
            }
        }
    }

    async fn run(&self, call: &PendingToolCall, timeout: Duration) -> Result<String, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.arguments).map_err(|e| ToolError::InvalidArguments {
                name: call.name.clone(),
                reason: e.to_string(),
            })?
        };

        tokio::time::timeout(timeout, tool.invoke(arguments))
            .await
            .map_err(|_| ToolError::Timeout(call.name.clone()))?
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
