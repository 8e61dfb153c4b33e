//! Duplex-family run loop: Connect → ReadLoop, reconnecting on read
//! failure. The controller pushes tasks over the held socket; check-in
//! is a no-op by contract. Heartbeats and malformed frames are ignored;
//! a read error tears the socket down and re-enters Connect unless stop
//! already fired.

use crate::agent::hop::HopOutcome;
use crate::agent::{AgentCore, LoopExit};
use crate::protocol::TaskEnvelope;
use tracing::{info, warn};

enum ReadExit {
    Stopped,
    Reconnect,
    FamilyChanged,
}

impl AgentCore {
    pub(crate) async fn run_duplex_loop(&mut self) -> crate::Result<LoopExit> {
        info!(transport = %self.transport(), "entering duplex loop");

        // The family selector routed here, so the capability must be
        // present; a mismatch is a wiring bug, not a recoverable state.
        if self.communicator.duplex().is_none() {
            return Err(crate::AgentError::Transport(format!(
                "transport {} lacks the duplex capability",
                self.transport()
            )));
        }

        loop {
            if self.stop.is_cancelled() {
                return Ok(LoopExit::Stopped);
            }

            if let Some(HopOutcome::Committed { family_changed }) =
                self.check_pending_hop().await
            {
                if family_changed {
                    return Ok(LoopExit::FamilyChanged);
                }
                continue;
            }

            let connected = tokio::select! {
                _ = self.stop.cancelled() => return Ok(LoopExit::Stopped),
                result = self.communicator.connect() => result,
            };
            if let Err(e) = connected {
                warn!(error = %e, "duplex connect failed");
                if self.idle_sleep().await {
                    return Ok(LoopExit::Stopped);
                }
                continue;
            }

            match self.read_messages().await? {
                ReadExit::Stopped => return Ok(LoopExit::Stopped),
                ReadExit::FamilyChanged => return Ok(LoopExit::FamilyChanged),
                ReadExit::Reconnect => continue,
            }
        }
    }

    async fn read_messages(&mut self) -> crate::Result<ReadExit> {
        loop {
            if self.stop.is_cancelled() {
                return Ok(ReadExit::Stopped);
            }

            if let Some(HopOutcome::Committed { family_changed }) =
                self.check_pending_hop().await
            {
                if family_changed {
                    return Ok(ReadExit::FamilyChanged);
                }
                // Same-family commit: the sequencer already handshook
                // the new socket; keep reading from it.
                continue;
            }

            let message = {
                let Some(duplex) = self.communicator.duplex() else {
                    return Err(crate::AgentError::Transport(format!(
                        "transport {} lacks the duplex capability",
                        self.transport()
                    )));
                };
                tokio::select! {
                    _ = self.stop.cancelled() => return Ok(ReadExit::Stopped),
                    message = duplex.read_message() => message,
                }
            };

            match message {
                // Heartbeat or otherwise ignorable frame.
                Ok(None) => continue,
                Ok(Some(text)) => match serde_json::from_str::<TaskEnvelope>(&text) {
                    Err(e) => {
                        warn!(error = %e, "discarding malformed duplex payload");
                    }
                    Ok(envelope) => {
                        if let Some(task) = envelope.into_task() {
                            self.execute_task(task).await;
                        }
                    }
                },
                Err(e) => {
                    if self.stop.is_cancelled() {
                        return Ok(ReadExit::Stopped);
                    }
                    warn!(error = %e, "duplex read failed, reconnecting");
                    let _ = self.communicator.disconnect().await;
                    return Ok(ReadExit::Reconnect);
                }
            }
        }
    }
}
