//! Registries correlating engine events to their view sections.

use std::collections::BTreeMap;

use crate::event::{RuleName, TaskId};
use crate::model::{
    ProtocolError, RuleState, RuleTransition, TaskState, TaskTransition, UNASSIGNED_RULE,
};
use crate::view::{RuleHandle, TaskHandle, Transcript};

#[derive(Clone, Debug)]
pub struct RuleSlot {
    pub handle: RuleHandle,
    pub state: RuleState,
    /// Tasks started under this rule, in start order
    pub tasks: Vec<TaskId>,
    /// How many overlapping `start_rule` share this name
    pub occurrences: usize,
}

#[derive(Clone, Debug)]
pub struct TaskSlot {
    pub handle: TaskHandle,
    pub rule: RuleName,
    pub cmd: String,
    pub state: TaskState,
}

#[derive(Debug, Default)]
pub struct IdentityMaps {
    rules: BTreeMap<RuleName, RuleSlot>,
    tasks: BTreeMap<TaskId, TaskSlot>,
}

impl IdentityMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(&self, name: &str) -> Option<&RuleSlot> {
        self.rules.get(name)
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskSlot> {
        self.tasks.get(id)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Register a rule. Returns `false` if a live rule with the same name was
    /// already registered; the existing slot is then reused.
    pub fn insert_rule(&mut self, name: &str, handle: RuleHandle) -> bool {
        match self.rules.get_mut(name) {
            Some(slot) => {
                slot.occurrences += 1;
                false
            }
            None => {
                self.rules.insert(
                    name.to_string(),
                    RuleSlot {
                        handle,
                        state: RuleState::Active,
                        tasks: Vec::new(),
                        occurrences: 1,
                    },
                );
                true
            }
        }
    }

    pub fn fail_rule(&mut self, name: &str) -> Result<RuleHandle, ProtocolError> {
        let slot = self
            .rules
            .get_mut(name)
            .ok_or_else(|| ProtocolError::UnknownRule {
                rule: name.to_string(),
            })?;
        slot.state = slot.state.apply(name, RuleTransition::Fail)?;
        Ok(slot.handle)
    }

    /// Tear a rule down together with the tasks it owns.
    ///
    /// Returns the removed slot, or `None` while other occurrences of the same
    /// name are still running.
    pub fn stop_rule(&mut self, name: &str) -> Result<Option<RuleSlot>, ProtocolError> {
        let slot = self
            .rules
            .get_mut(name)
            .ok_or_else(|| ProtocolError::UnknownRule {
                rule: name.to_string(),
            })?;
        let next = slot.state.apply(name, RuleTransition::Stop)?;

        slot.occurrences = slot.occurrences.saturating_sub(1);
        if slot.occurrences > 0 {
            return Ok(None);
        }

        slot.state = next;
        let Some(slot) = self.rules.remove(name) else {
            return Ok(None);
        };
        for id in &slot.tasks {
            self.tasks.remove(id);
        }
        Ok(Some(slot))
    }

    pub fn insert_task(
        &mut self,
        id: &TaskId,
        rule: &str,
        cmd: &str,
        handle: TaskHandle,
    ) -> Result<(), ProtocolError> {
        if self.tasks.contains_key(id) {
            return Err(ProtocolError::DuplicateTask { task: id.clone() });
        }
        let slot = self
            .rules
            .get_mut(rule)
            .ok_or_else(|| ProtocolError::UnknownRule {
                rule: rule.to_string(),
            })?;
        slot.tasks.push(id.clone());
        self.tasks.insert(
            id.clone(),
            TaskSlot {
                handle,
                rule: rule.to_string(),
                cmd: cmd.to_string(),
                state: TaskState::Running,
            },
        );
        Ok(())
    }

    /// Apply a task transition and hand back the task's view handle
    pub fn advance_task(
        &mut self,
        id: &TaskId,
        transition: TaskTransition,
    ) -> Result<TaskHandle, ProtocolError> {
        let slot = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| ProtocolError::UnknownTask { task: id.clone() })?;
        slot.state = slot.state.apply(id, transition)?;
        Ok(slot.handle)
    }

    /// Forget finished ownerless tasks. The `(unassigned)` slot itself goes
    /// once none of its tasks is running. Returns how many tasks were dropped.
    pub fn retire_unassigned(&mut self) -> usize {
        let Some(slot) = self.rules.get_mut(UNASSIGNED_RULE) else {
            return 0;
        };
        let tasks = &mut self.tasks;
        let before = slot.tasks.len();
        slot.tasks.retain(|id| {
            let running = matches!(tasks.get(id).map(|t| &t.state), Some(TaskState::Running));
            if !running {
                tasks.remove(id);
            }
            running
        });
        let retired = before - slot.tasks.len();
        if slot.tasks.is_empty() {
            self.rules.remove(UNASSIGNED_RULE);
        }
        retired
    }

    /// Recreate empty sections for everything still live after the
    /// transcript was cleared, so output of a running build keeps landing
    /// somewhere visible.
    pub fn rebind(&mut self, transcript: &mut Transcript) {
        for (name, slot) in self.rules.iter_mut() {
            slot.handle = transcript.add_rule(name);
            if slot.state == RuleState::Failed {
                if let Some(section) = transcript.rule_mut(slot.handle) {
                    section.failed = true;
                }
            }
            for id in &slot.tasks {
                let Some(task) = self.tasks.get_mut(id) else {
                    continue;
                };
                if let Some(handle) = transcript.add_task(slot.handle, id, &task.cmd) {
                    task.handle = handle;
                    if let Some(section) = transcript.task_mut(handle) {
                        section.duration = task.state.duration();
                    }
                }
            }
        }
    }
}
