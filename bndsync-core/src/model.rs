use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::event::{RuleName, TaskId};

/// Name of the synthetic rule that collects tasks started outside any rule
pub const UNASSIGNED_RULE: &str = "(unassigned)";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleState {
    Active,
    Failed,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Finished { duration: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleTransition {
    Fail,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskTransition {
    Stop { duration: Duration },
    Output,
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Failed => write!(f, "failed"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Finished { .. } => write!(f, "finished"),
        }
    }
}

/// Events that cannot be applied to the current view.
///
/// None of them is fatal: the dispatcher drops the offending event and
/// keeps going.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("rule not found: {rule}")]
    UnknownRule { rule: RuleName },
    #[error("task not found: {task}")]
    UnknownTask { task: TaskId },
    #[error("task already started: {task}")]
    DuplicateTask { task: TaskId },
    #[error("rule {rule} cannot {transition:?} while {state}")]
    InvalidRuleTransition {
        rule: RuleName,
        state: RuleState,
        transition: RuleTransition,
    },
    #[error("task {task} cannot {transition:?} while {state}")]
    InvalidTaskTransition {
        task: TaskId,
        state: TaskState,
        transition: TaskTransition,
    },
    #[error("view for {what} was cleared")]
    StaleHandle { what: String },
}

impl RuleState {
    pub fn apply(self, rule: &str, transition: RuleTransition) -> Result<RuleState, ProtocolError> {
        match (self, transition) {
            (RuleState::Active, RuleTransition::Fail) => Ok(RuleState::Failed),
            (RuleState::Active | RuleState::Failed, RuleTransition::Stop) => Ok(RuleState::Done),
            (state, transition) => Err(ProtocolError::InvalidRuleTransition {
                rule: rule.to_string(),
                state,
                transition,
            }),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, RuleState::Active | RuleState::Failed)
    }
}

impl TaskState {
    pub fn apply(self, task: &TaskId, transition: TaskTransition) -> Result<TaskState, ProtocolError> {
        match (self, transition) {
            (TaskState::Running, TaskTransition::Stop { duration }) => {
                Ok(TaskState::Finished { duration })
            }
            // late output after stop still belongs to the task
            (state, TaskTransition::Output) => Ok(state),
            (state, transition) => Err(ProtocolError::InvalidTaskTransition {
                task: task.clone(),
                state,
                transition,
            }),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            TaskState::Running => None,
            TaskState::Finished { duration } => Some(*duration),
        }
    }
}

/// Human readable task duration, in seconds: `120` ms gives `"0.12 s"`.
pub fn duration_label(duration: Duration) -> String {
    let secs = duration.as_millis() as f64 / 1000.0;
    format!("{} s", secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_transitions() {
        assert_eq!(RuleState::Active.apply("a", RuleTransition::Fail), Ok(RuleState::Failed));
        assert_eq!(RuleState::Active.apply("a", RuleTransition::Stop), Ok(RuleState::Done));
        assert_eq!(RuleState::Failed.apply("a", RuleTransition::Stop), Ok(RuleState::Done));
        assert!(matches!(
            RuleState::Failed.apply("a", RuleTransition::Fail),
            Err(ProtocolError::InvalidRuleTransition { .. })
        ));
        assert!(RuleState::Done.apply("a", RuleTransition::Stop).is_err());
    }

    #[test]
    fn test_task_transitions() {
        let id = TaskId::from(1);
        let d = Duration::from_millis(5);
        let finished = TaskState::Running
            .apply(&id, TaskTransition::Stop { duration: d })
            .unwrap();
        assert_eq!(finished.duration(), Some(d));
        assert_eq!(finished.apply(&id, TaskTransition::Output), Ok(finished));
        assert!(finished.apply(&id, TaskTransition::Stop { duration: d }).is_err());
    }

    #[test]
    fn test_duration_label() {
        assert_eq!(duration_label(Duration::from_millis(120)), "0.12 s");
        assert_eq!(duration_label(Duration::from_millis(1000)), "1 s");
        assert_eq!(duration_label(Duration::from_millis(1500)), "1.5 s");
    }
}
