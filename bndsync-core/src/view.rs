//! The transcript: what a user sees of the current session.
//!
//! Rule and task sections live in arenas and are addressed through handles.
//! Clearing the transcript bumps a generation counter so handles taken
//! before the clear stop resolving instead of pointing at reused slots.

use std::time::Duration;

use crate::event::{RuleName, TaskId};
use crate::log_sink::{LogBuffer, LogStream, escape_html};
use crate::model::duration_label;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuleHandle {
    generation: u64,
    index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskHandle {
    generation: u64,
    index: usize,
}

#[derive(Clone, Debug)]
pub struct RuleSection {
    pub name: RuleName,
    pub failed: bool,
    pub tasks: Vec<usize>,
}

impl RuleSection {
    pub fn header(&self) -> String {
        if self.failed {
            format!("Rule: {} [failure]", self.name)
        } else {
            format!("Rule: {}", self.name)
        }
    }
}

#[derive(Clone, Debug)]
pub struct TaskSection {
    pub id: TaskId,
    pub cmd: String,
    pub duration: Option<Duration>,
    pub log: LogBuffer,
}

impl TaskSection {
    pub fn duration_label(&self) -> Option<String> {
        self.duration.map(duration_label)
    }

    pub fn header(&self) -> String {
        match self.duration_label() {
            Some(label) => format!("{} {}", self.cmd, label),
            None => self.cmd.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Transcript {
    generation: u64,
    log_cap: usize,
    console: LogBuffer,
    rules: Vec<RuleSection>,
    tasks: Vec<TaskSection>,
}

impl Transcript {
    pub fn new(log_cap: usize) -> Self {
        Self {
            generation: 0,
            log_cap,
            console: LogBuffer::new(log_cap),
            rules: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.console.clear();
        self.rules.clear();
        self.tasks.clear();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn console(&self) -> &LogBuffer {
        &self.console
    }

    pub fn log_console(&mut self, stream: LogStream, text: &str) {
        self.console.push(stream, text);
    }

    pub fn add_rule(&mut self, name: &str) -> RuleHandle {
        self.rules.push(RuleSection {
            name: name.to_string(),
            failed: false,
            tasks: Vec::new(),
        });
        RuleHandle {
            generation: self.generation,
            index: self.rules.len() - 1,
        }
    }

    /// Allocate a task section under its owning rule section.
    /// Returns `None` when the rule handle predates a clear.
    pub fn add_task(&mut self, owner: RuleHandle, id: &TaskId, cmd: &str) -> Option<TaskHandle> {
        if owner.generation != self.generation {
            return None;
        }
        let index = self.tasks.len();
        let rule = self.rules.get_mut(owner.index)?;
        rule.tasks.push(index);
        self.tasks.push(TaskSection {
            id: id.clone(),
            cmd: cmd.to_string(),
            duration: None,
            log: LogBuffer::new(self.log_cap),
        });
        Some(TaskHandle {
            generation: self.generation,
            index,
        })
    }

    pub fn rule_mut(&mut self, handle: RuleHandle) -> Option<&mut RuleSection> {
        if handle.generation != self.generation {
            return None;
        }
        self.rules.get_mut(handle.index)
    }

    pub fn task_mut(&mut self, handle: TaskHandle) -> Option<&mut TaskSection> {
        if handle.generation != self.generation {
            return None;
        }
        self.tasks.get_mut(handle.index)
    }

    pub fn rules(&self) -> &[RuleSection] {
        &self.rules
    }

    pub fn tasks_of<'a>(&'a self, rule: &'a RuleSection) -> impl Iterator<Item = &'a TaskSection> + 'a {
        rule.tasks.iter().filter_map(|i| self.tasks.get(*i))
    }

    /// Most recent task section with this id
    pub fn find_task(&self, id: &TaskId) -> Option<&TaskSection> {
        self.tasks.iter().rev().find(|t| &t.id == id)
    }

    /// Plain-text rendering of the whole transcript
    pub fn render_plain(&self) -> String {
        let mut out = self.console.to_plain();
        for rule in &self.rules {
            out.push_str(&rule.header());
            out.push('\n');
            for task in self.tasks_of(rule) {
                out.push_str("  $ ");
                out.push_str(&task.header());
                out.push('\n');
                for line in task.log.lines() {
                    let marker = match line.stream {
                        LogStream::Stderr => "!",
                        _ => " ",
                    };
                    out.push_str("   ");
                    out.push_str(marker);
                    out.push(' ');
                    out.push_str(&line.text);
                    out.push('\n');
                }
            }
        }
        out
    }

    /// HTML rendering: console output then one `<div>` per rule
    pub fn render_html(&self) -> String {
        let mut out = self.console.to_html();
        for rule in &self.rules {
            out.push_str("<div><p>");
            out.push_str(&escape_html(&rule.header()));
            out.push_str("</p>");
            for task in self.tasks_of(rule) {
                out.push_str("<div><p><code>");
                out.push_str(&escape_html(&task.cmd));
                out.push_str("</code>");
                if let Some(label) = task.duration_label() {
                    out.push(' ');
                    out.push_str(&label);
                }
                out.push_str("</p><div>");
                out.push_str(&task.log.to_html());
                out.push_str("</div></div>");
            }
            out.push_str("</div>");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_go_stale_after_clear() {
        let mut t = Transcript::new(10);
        let rule = t.add_rule("A");
        let task = t.add_task(rule, &TaskId::from(1), "asm").unwrap();
        assert!(t.task_mut(task).is_some());

        t.clear();
        assert!(t.rule_mut(rule).is_none());
        assert!(t.task_mut(task).is_none());
        assert!(t.add_task(rule, &TaskId::from(2), "asm").is_none());
    }

    #[test]
    fn test_task_header_with_duration() {
        let mut t = Transcript::new(10);
        let rule = t.add_rule("A");
        let task = t.add_task(rule, &TaskId::from(1), "asm").unwrap();
        t.task_mut(task).unwrap().duration = Some(Duration::from_millis(120));
        assert_eq!(t.find_task(&TaskId::from(1)).unwrap().header(), "asm 0.12 s");
    }

    #[test]
    fn test_html_escapes_headers() {
        let mut t = Transcript::new(10);
        let rule = t.add_rule("<dsk>");
        t.add_task(rule, &TaskId::from(1), "echo a > b && cat b").unwrap();

        let html = t.render_html();
        assert!(html.contains("Rule: &lt;dsk&gt;"));
        assert!(html.contains("<code>echo a &gt; b &amp;&amp; cat b</code>"));
        assert!(!html.contains("<dsk>"));
    }
}
