//! Command dispatch. The table is owned by the AgentCore instance and
//! built once at construction, so independent agents (and tests) never
//! share handler state.

use crate::agent::hop::{HopHandler, HopSlot};
use crate::config::ChannelConfig;
use crate::protocol::{self, Task, TaskResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub type HandlerRef = Arc<dyn CommandHandler>;

/// What a handler sees of the agent. `active` is a snapshot taken at
/// dispatch time; handlers stage channel changes through `hops` and
/// never touch the network themselves.
pub struct CommandContext {
    pub identity: Uuid,
    pub active: ChannelConfig,
    pub hops: Arc<HopSlot>,
}

/// Marshalled handler output on its way into a TaskResult.
#[derive(Debug, Default)]
pub struct CommandOutput {
    pub data: Value,
    pub file_sha256: Option<String>,
}

impl CommandOutput {
    pub fn data(data: Value) -> Self {
        Self {
            data,
            file_sha256: None,
        }
    }

    /// Output describing file content, stamped with its hash so the
    /// controller can verify the transfer.
    pub fn file(data: Value, content: &[u8]) -> Self {
        Self {
            data,
            file_sha256: Some(protocol::sha256_hex(content)),
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, ctx: &CommandContext, task: &Task) -> crate::Result<CommandOutput>;
}

/// Maps command names to handlers. Misses synthesize a failure result
/// rather than erroring the loop.
pub struct CommandDispatcher {
    handlers: HashMap<String, HandlerRef>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
        };
        dispatcher.register("ping", Arc::new(PingHandler));
        dispatcher.register("hop", Arc::new(HopHandler));
        dispatcher
    }

    pub fn register(&mut self, name: impl Into<String>, handler: HandlerRef) {
        self.handlers.insert(name.into(), handler);
    }

    pub async fn dispatch(&self, ctx: &CommandContext, task: &Task) -> TaskResult {
        let Some(handler) = self.handlers.get(&task.command) else {
            warn!(task_id = %task.id, command = %task.command, "dispatch miss");
            return TaskResult::unknown_command(&task.id, &task.command);
        };

        match handler.execute(ctx, task).await {
            Ok(output) => {
                let mut result = TaskResult::completed(&task.id, output.data);
                if let Some(hash) = output.file_sha256 {
                    result = result.with_file_sha256(hash);
                }
                result
            }
            Err(e) => TaskResult::failed(&task.id, e.to_string()),
        }
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness echo.
struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn execute(&self, ctx: &CommandContext, _task: &Task) -> crate::Result<CommandOutput> {
        Ok(CommandOutput::data(json!({
            "pong": true,
            "agent_id": ctx.identity.to_string(),
            "transport": ctx.active.transport.as_str(),
            "time": chrono::Utc::now().to_rfc3339(),
        })))
    }
}
