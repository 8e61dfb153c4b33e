//! Wire records exchanged with the controller. Everything on the wire is
//! a single JSON text record: an HTTP body for the poll family, one
//! WebSocket text frame for the duplex family.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// POST check-in body. Only sent when padding is enabled; the padding is
/// traffic-shape perturbation with no semantic payload.
#[derive(Debug, Serialize)]
pub struct CheckInBody {
    pub padding: String,
}

/// Check-in response / duplex task push as the controller sends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl TaskEnvelope {
    /// An envelope with no work in it.
    pub fn empty() -> Self {
        Self {
            task_available: false,
            task_id: None,
            command: None,
            data: Value::Null,
        }
    }

    /// Extract the task, if the envelope actually carries one. Envelopes
    /// flagged available but missing an id or command are treated as
    /// empty rather than dispatched half-formed.
    pub fn into_task(self) -> Option<Task> {
        if !self.task_available {
            return None;
        }
        match (self.task_id, self.command) {
            (Some(id), Some(command)) => Some(Task {
                id,
                command,
                data: self.data,
            }),
            _ => None,
        }
    }
}

/// One unit of tasking; consumed exactly once by the dispatcher.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub command: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
    UnknownCommand,
}

/// Result submission record. Sent over whichever Communicator is active
/// when the handler finishes, which may differ from the one the task
/// arrived on if a hop committed mid-task; the agent id, not the channel,
/// correlates task and result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
}

impl TaskResult {
    pub fn completed(task_id: impl Into<String>, output: Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: ResultStatus::Completed,
            output: Some(output),
            error: None,
            file_sha256: None,
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: ResultStatus::Failed,
            output: None,
            error: Some(error.into()),
            file_sha256: None,
        }
    }

    pub fn unknown_command(task_id: impl Into<String>, command: &str) -> Self {
        Self {
            task_id: task_id.into(),
            status: ResultStatus::UnknownCommand,
            output: None,
            error: Some(format!("unknown command: {command}")),
            file_sha256: None,
        }
    }

    pub fn with_file_sha256(mut self, hash: impl Into<String>) -> Self {
        self.file_sha256 = Some(hash.into());
        self
    }
}

/// Hex SHA-256 of file content carried in a result.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_without_work_yields_no_task() {
        assert!(TaskEnvelope::empty().into_task().is_none());

        // Flagged available but half-formed: still no task.
        let envelope = TaskEnvelope {
            task_available: true,
            task_id: Some("t-1".into()),
            command: None,
            data: Value::Null,
        };
        assert!(envelope.into_task().is_none());
    }

    #[test]
    fn envelope_with_work_yields_task() {
        let envelope: TaskEnvelope = serde_json::from_str(
            r#"{"task_available":true,"task_id":"t-7","command":"ping","data":{"x":1}}"#,
        )
        .unwrap();
        let task = envelope.into_task().unwrap();
        assert_eq!(task.id, "t-7");
        assert_eq!(task.command, "ping");
        assert_eq!(task.data, json!({"x": 1}));
    }

    #[test]
    fn result_serialization_skips_absent_fields() {
        let result = TaskResult::completed("t-1", json!("ok"));
        let wire = serde_json::to_string(&result).unwrap();
        assert!(wire.contains(r#""status":"completed""#));
        assert!(!wire.contains("error"));
        assert!(!wire.contains("file_sha256"));

        let result = TaskResult::unknown_command("t-2", "frobnicate");
        let wire = serde_json::to_string(&result).unwrap();
        assert!(wire.contains(r#""status":"unknown_command""#));
        assert!(wire.contains("unknown command: frobnicate"));
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
