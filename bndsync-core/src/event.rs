//! Inbound events emitted by the build engine.
//!
//! The wire format is one JSON object per event, `{"event": <name>, "payload": ...}`,
//! using the channel names the engine emits (`event-start_rule`, `file-loaded`,
//! `request-open`, ...). Several payloads historically come either as a bare
//! string or as an object; both shapes are accepted.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

pub type RuleName = String;

/// Task identifier. The engine sends numbers, replays may carry strings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawTaskId", into = "String")]
pub struct TaskId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTaskId {
    Number(u64),
    Text(String),
}

impl From<RawTaskId> for TaskId {
    fn from(raw: RawTaskId) -> Self {
        match raw {
            RawTaskId::Number(n) => TaskId(n.to_string()),
            RawTaskId::Text(s) => TaskId(s),
        }
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl From<u64> for TaskId {
    fn from(n: u64) -> Self {
        TaskId(n.to_string())
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRule {
    pub rule: RuleName,
    /// Position of the rule in the schedule, informational only
    #[serde(default)]
    pub nb: Option<usize>,
    pub out_of: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRuleRef")]
pub struct RuleRef {
    pub rule: RuleName,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRuleRef {
    Name(String),
    Object { rule: String },
}

impl From<RawRuleRef> for RuleRef {
    fn from(raw: RawRuleRef) -> Self {
        match raw {
            RawRuleRef::Name(rule) | RawRuleRef::Object { rule } => RuleRef { rule },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStart {
    #[serde(default)]
    pub rule: Option<RuleName>,
    pub cmd: String,
    pub task_id: TaskId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStop {
    #[serde(default)]
    pub rule: Option<RuleName>,
    pub task_id: TaskId,
    pub duration_milliseconds: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(default)]
    pub rule: Option<RuleName>,
    pub task_id: TaskId,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawOutput")]
pub struct Output {
    pub content: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOutput {
    Text(String),
    Object { content: String },
}

impl From<RawOutput> for Output {
    fn from(raw: RawOutput) -> Self {
        match raw {
            RawOutput::Text(content) | RawOutput::Object { content } => Output { content },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLoaded {
    pub svg: String,
    pub fname: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawClearScope")]
pub struct ClearScope {
    pub soft: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawClearScope {
    Soft(Option<String>),
    Object { soft: Option<String> },
}

impl From<RawClearScope> for ClearScope {
    fn from(raw: RawClearScope) -> Self {
        match raw {
            RawClearScope::Soft(soft) | RawClearScope::Object { soft } => ClearScope { soft },
        }
    }
}

/// Everything the engine can push to the front-end.
///
/// `Request*` variants are not progress notifications: they are commands the
/// engine (typically its menu) asks the front-end to carry out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum BackendEvent {
    #[serde(rename = "event-start_rule")]
    StartRule(StartRule),
    #[serde(rename = "event-stop_rule")]
    StopRule(RuleRef),
    #[serde(rename = "event-failed_rule")]
    FailedRule(RuleRef),
    #[serde(rename = "event-task_start")]
    TaskStart(TaskStart),
    #[serde(rename = "event-task_stop")]
    TaskStop(TaskStop),
    #[serde(rename = "event-task_stdout")]
    TaskStdout(TaskOutput),
    #[serde(rename = "event-task_stderr")]
    TaskStderr(TaskOutput),
    #[serde(rename = "event-stdout")]
    Stdout(Output),
    #[serde(rename = "event-stderr")]
    Stderr(Output),
    #[serde(rename = "file-loaded")]
    FileLoaded(FileLoaded),
    #[serde(rename = "request-execute_target")]
    RequestExecuteTarget(String),
    #[serde(rename = "request-load_build_file")]
    RequestLoadBuildFile(String),
    #[serde(rename = "request-reload")]
    RequestReload,
    #[serde(rename = "request-select_cwd")]
    RequestSelectCwd,
    #[serde(rename = "request-open")]
    RequestOpen,
    #[serde(rename = "request-clear")]
    RequestClear(ClearScope),
}

impl BackendEvent {
    /// Parse one line of the JSON wire format
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            BackendEvent::RequestExecuteTarget(_)
                | BackendEvent::RequestLoadBuildFile(_)
                | BackendEvent::RequestReload
                | BackendEvent::RequestSelectCwd
                | BackendEvent::RequestOpen
                | BackendEvent::RequestClear(_)
        )
    }

    /// Wire name of the event, used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            BackendEvent::StartRule(_) => "event-start_rule",
            BackendEvent::StopRule(_) => "event-stop_rule",
            BackendEvent::FailedRule(_) => "event-failed_rule",
            BackendEvent::TaskStart(_) => "event-task_start",
            BackendEvent::TaskStop(_) => "event-task_stop",
            BackendEvent::TaskStdout(_) => "event-task_stdout",
            BackendEvent::TaskStderr(_) => "event-task_stderr",
            BackendEvent::Stdout(_) => "event-stdout",
            BackendEvent::Stderr(_) => "event-stderr",
            BackendEvent::FileLoaded(_) => "file-loaded",
            BackendEvent::RequestExecuteTarget(_) => "request-execute_target",
            BackendEvent::RequestLoadBuildFile(_) => "request-load_build_file",
            BackendEvent::RequestReload => "request-reload",
            BackendEvent::RequestSelectCwd => "request-select_cwd",
            BackendEvent::RequestOpen => "request-open",
            BackendEvent::RequestClear(_) => "request-clear",
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub seq: u64,
    pub at: SystemTime,
    pub event: BackendEvent,
}

impl EventEnvelope {
    pub fn new(seq: u64, event: BackendEvent) -> Self {
        Self {
            seq,
            at: SystemTime::now(),
            event,
        }
    }
}
