// ABOUTME: Script status enum and its transition table.
// ABOUTME: Persists as the legacy strings; unknown values are kept verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

const RUNNING: &str = "Running";
const PAUSED: &str = "Paused";
const STOPPED: &str = "Stopped";
const ERROR: &str = "Error";
const ERROR_FILE_MISSING: &str = "Error: File Missing";
const PROCESS_LOST: &str = "Stopped (Process Lost)";

/// Recorded lifecycle state of a hosted script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScriptStatus {
    Running,
    Paused,
    Stopped,
    Error,
    ErrorFileMissing,
    /// Legacy marker written by older hosts; normalized to `Stopped` at boot.
    ProcessLost,
    /// Anything else found in the store.
    Unknown(String),
}

/// Events that move a script between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// A process is about to be launched.
    Start,
    Pause,
    /// The process exited on its own.
    Exited,
    SpawnFailed,
    FileMissing,
    /// An error status is cleared ahead of a restart.
    ClearError,
    /// Boot-time repair of legacy markers.
    Normalize,
}

impl ScriptStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ScriptStatus::Running => RUNNING,
            ScriptStatus::Paused => PAUSED,
            ScriptStatus::Stopped => STOPPED,
            ScriptStatus::Error => ERROR,
            ScriptStatus::ErrorFileMissing => ERROR_FILE_MISSING,
            ScriptStatus::ProcessLost => PROCESS_LOST,
            ScriptStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ScriptStatus::Error | ScriptStatus::ErrorFileMissing)
    }

    /// Status after `event`, or `None` when the table has no such edge.
    pub fn apply(&self, event: StatusEvent) -> Option<ScriptStatus> {
        use ScriptStatus::*;
        use StatusEvent::*;

        match (self, event) {
            (Running | Paused | Stopped, Start) => Some(Running),
            (Running, Pause) => Some(Paused),
            (Running, Exited) => Some(Stopped),
            (Running | Paused | Stopped, SpawnFailed) => Some(Error),
            (Running | Paused | Stopped, FileMissing) => Some(ErrorFileMissing),
            (Error | ErrorFileMissing, ClearError) => Some(Stopped),
            (ProcessLost, Normalize) => Some(Stopped),
            _ => None,
        }
    }
}

impl From<String> for ScriptStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            RUNNING => ScriptStatus::Running,
            PAUSED => ScriptStatus::Paused,
            STOPPED => ScriptStatus::Stopped,
            ERROR => ScriptStatus::Error,
            ERROR_FILE_MISSING => ScriptStatus::ErrorFileMissing,
            PROCESS_LOST => ScriptStatus::ProcessLost,
            _ => ScriptStatus::Unknown(raw),
        }
    }
}

impl From<ScriptStatus> for String {
    fn from(status: ScriptStatus) -> Self {
        match status {
            ScriptStatus::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusEvent::Start => "start",
            StatusEvent::Pause => "pause",
            StatusEvent::Exited => "exit",
            StatusEvent::SpawnFailed => "spawn failure",
            StatusEvent::FileMissing => "missing file",
            StatusEvent::ClearError => "error reset",
            StatusEvent::Normalize => "normalize",
        };
        f.write_str(name)
    }
}
