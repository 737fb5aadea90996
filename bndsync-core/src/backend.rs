use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::event::EventEnvelope;

/// Commands the front-end can send to the build engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "cmd", content = "args", rename_all = "snake_case")]
pub enum Command {
    /// Run a free-form bndbuild command line
    ExecuteManualTask { task: String },
    /// Flush the engine's captured stdout/stderr as events
    EmptyGags {},
    /// Build one target of the loaded graph
    ExecuteTarget { tgt: String },
    /// Load a build script and render its graph
    LoadBuildFile { fname: String },
    /// Reload the current build script
    ReloadFile {},
    /// Work from a directory instead of a build script
    SelectCwd { dname: String },
    /// Clean generated files, optionally for a single tool
    ClearApp { soft: Option<String> },
    /// Show the engine's context menu for a target
    OpenContextualMenuForTarget { tgt: String },
    /// Rebuild the engine's menu (recent files, reload entry)
    UpdateMenu {},
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ExecuteManualTask { .. } => "execute_manual_task",
            Command::EmptyGags {} => "empty_gags",
            Command::ExecuteTarget { .. } => "execute_target",
            Command::LoadBuildFile { .. } => "load_build_file",
            Command::ReloadFile {} => "reload_file",
            Command::SelectCwd { .. } => "select_cwd",
            Command::ClearApp { .. } => "clear_app",
            Command::OpenContextualMenuForTarget { .. } => "open_contextual_menu_for_target",
            Command::UpdateMenu {} => "update_menu",
        }
    }

    /// Argument object as sent on the wire
    pub fn args(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("args").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// Why a command did not complete
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The engine ran the command and reported a failure
    #[error("{0}")]
    Rejected(String),
    /// The engine could not be reached
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// The invocation was superseded by a newer one
    #[error("cancelled")]
    Cancelled,
}

pub type CommandResult = Result<Value, CommandError>;

/// A build engine the front-end can drive.
///
/// Implementations:
/// - `FakeBackend` (cli): simulated builds for demos
/// - `StdioBackend` (cli): an engine process speaking JSON lines
/// - test doubles
#[async_trait]
pub trait Backend: Send + Sync {
    /// Invoke one command and wait for its outcome.
    async fn invoke(&self, command: Command) -> CommandResult;

    /// Subscribe to the engine's event stream
    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope>;

    /// Get the name of this backend implementation
    fn name(&self) -> &'static str;
}
