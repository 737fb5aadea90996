//! Event dispatcher: applies engine events to the session view.
//!
//! The dispatcher is a plain state machine. It never talks to the engine
//! itself; engine-initiated requests come back out as [`Effect`]s and
//! command outcomes come in through [`Dispatcher::settle`].

use std::time::Duration;

use crate::backend::{Command, CommandError, CommandResult};
use crate::event::{BackendEvent, EventEnvelope, TaskId, TaskOutput};
use crate::graph::GraphView;
use crate::identity::IdentityMaps;
use crate::log_sink::{DEFAULT_LOG_CAP, LogStream};
use crate::model::{ProtocolError, TaskTransition, UNASSIGNED_RULE};
use crate::progress::{DEFAULT_LABEL_BUDGET, ProgressModel};
use crate::view::Transcript;

/// Title of every modal shown by the session
pub const MODAL_TITLE: &str = "BNDBuild";

/// Something the user, or the engine on the user's behalf, wants done
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    ExecuteTarget(String),
    LoadBuildFile(String),
    ReloadFile,
    SelectCwd(String),
    ClearApp { soft: Option<String> },
    ExecuteManualTask(String),
    OpenContextMenu(String),
    UpdateMenu,
    /// Local only: empty the transcript
    ClearLogs,
}

impl Action {
    /// Engine command carrying out this action, if any
    pub fn command(&self) -> Option<Command> {
        Some(match self {
            Action::ExecuteTarget(tgt) => Command::ExecuteTarget { tgt: tgt.clone() },
            Action::LoadBuildFile(fname) => Command::LoadBuildFile {
                fname: fname.clone(),
            },
            Action::ReloadFile => Command::ReloadFile {},
            Action::SelectCwd(dname) => Command::SelectCwd {
                dname: dname.clone(),
            },
            Action::ClearApp { soft } => Command::ClearApp { soft: soft.clone() },
            Action::ExecuteManualTask(task) => Command::ExecuteManualTask { task: task.clone() },
            Action::OpenContextMenu(tgt) => Command::OpenContextualMenuForTarget { tgt: tgt.clone() },
            Action::UpdateMenu => Command::UpdateMenu {},
            Action::ClearLogs => return None,
        })
    }
}

/// Work the dispatcher hands back to the session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Act(Action),
    PickBuildFile,
    PickWorkingDirectory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModalKind {
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modal {
    pub kind: ModalKind,
    pub title: String,
    pub message: String,
}

impl Modal {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: ModalKind::Info,
            title: MODAL_TITLE.to_string(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ModalKind::Error,
            title: MODAL_TITLE.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    maps: IdentityMaps,
    progress: ProgressModel,
    transcript: Transcript,
    graph: Option<GraphView>,
    status: String,
    loading: bool,
    last_seq: u64,
    anomalies: u64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAP, DEFAULT_LABEL_BUDGET)
    }
}

impl Dispatcher {
    pub fn new(log_cap: usize, label_budget: usize) -> Self {
        Self {
            maps: IdentityMaps::new(),
            progress: ProgressModel::new(label_budget),
            transcript: Transcript::new(log_cap),
            graph: None,
            status: String::new(),
            loading: false,
            last_seq: 0,
            anomalies: 0,
        }
    }

    pub fn maps(&self) -> &IdentityMaps {
        &self.maps
    }

    pub fn progress(&self) -> &ProgressModel {
        &self.progress
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn graph(&self) -> Option<&GraphView> {
        self.graph.as_ref()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Events dropped because they did not fit the current state
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn apply(&mut self, env: &EventEnvelope) -> Vec<Effect> {
        if env.seq != 0 && env.seq <= self.last_seq {
            tracing::debug!(seq = env.seq, last = self.last_seq, "event sequence went backwards");
        }
        self.last_seq = self.last_seq.max(env.seq);
        self.handle(&env.event)
    }

    pub fn handle(&mut self, event: &BackendEvent) -> Vec<Effect> {
        let result = match event {
            BackendEvent::StartRule(start) => {
                self.start_rule(&start.rule, start.out_of);
                Ok(())
            }
            BackendEvent::StopRule(r) => self.stop_rule(&r.rule),
            BackendEvent::FailedRule(r) => self.fail_rule(&r.rule),
            BackendEvent::TaskStart(start) => {
                self.start_task(start.rule.as_deref(), &start.task_id, &start.cmd)
            }
            BackendEvent::TaskStop(stop) => self.stop_task(
                &stop.task_id,
                Duration::from_millis(stop.duration_milliseconds),
            ),
            BackendEvent::TaskStdout(out) => self.task_output(out, LogStream::Stdout),
            BackendEvent::TaskStderr(out) => self.task_output(out, LogStream::Stderr),
            BackendEvent::Stdout(out) => {
                self.transcript.log_console(LogStream::Stdout, &out.content);
                Ok(())
            }
            BackendEvent::Stderr(out) => {
                self.transcript.log_console(LogStream::Stderr, &out.content);
                Ok(())
            }
            BackendEvent::FileLoaded(loaded) => {
                self.graph = Some(GraphView::from_markup(&loaded.fname, &loaded.svg));
                self.status = format!("Build file:{}", loaded.fname);
                self.loading = false;
                self.clear_logs();
                return vec![Effect::Act(Action::UpdateMenu)];
            }
            BackendEvent::RequestExecuteTarget(tgt) => {
                return vec![Effect::Act(Action::ExecuteTarget(tgt.clone()))];
            }
            BackendEvent::RequestLoadBuildFile(fname) => {
                return vec![Effect::Act(Action::LoadBuildFile(fname.clone()))];
            }
            BackendEvent::RequestReload => return vec![Effect::Act(Action::ReloadFile)],
            BackendEvent::RequestSelectCwd => return vec![Effect::PickWorkingDirectory],
            BackendEvent::RequestOpen => return vec![Effect::PickBuildFile],
            BackendEvent::RequestClear(scope) => {
                return vec![Effect::Act(Action::ClearApp {
                    soft: scope.soft.clone(),
                })];
            }
        };

        if let Err(err) = result {
            self.record_anomaly(event.name(), &err);
        }
        Vec::new()
    }

    /// Local side of an action, applied before its command is sent
    pub fn prepare(&mut self, action: &Action) {
        match action {
            Action::ExecuteTarget(_) | Action::ExecuteManualTask(_) | Action::ClearLogs => {
                self.clear_logs();
            }
            Action::LoadBuildFile(fname) => {
                self.clear_logs();
                self.status = format!("Loading {fname}");
                self.graph = None;
                self.loading = true;
            }
            Action::ReloadFile
            | Action::SelectCwd(_)
            | Action::ClearApp { .. }
            | Action::OpenContextMenu(_)
            | Action::UpdateMenu => {}
        }
    }

    /// Record the outcome of a command. Returns the modal to show, if any.
    pub fn settle(&mut self, action: &Action, result: &CommandResult) -> Option<Modal> {
        if let Err(CommandError::Cancelled) = result {
            tracing::debug!(?action, "command cancelled");
            if matches!(action, Action::LoadBuildFile(_)) {
                self.loading = false;
            }
            return None;
        }

        match (action, result) {
            (Action::ExecuteTarget(tgt), Ok(_)) => {
                tracing::info!(tgt = %tgt, "build success");
                Some(Modal::info("Build success"))
            }
            (Action::ExecuteTarget(tgt), Err(err)) => {
                tracing::info!(tgt = %tgt, error = %err, "build failed");
                self.log_failure(err);
                Some(Modal::error(err.to_string()))
            }
            (Action::LoadBuildFile(_), Ok(_)) => {
                self.loading = false;
                None
            }
            (Action::LoadBuildFile(fname), Err(err)) => {
                tracing::warn!(fname = %fname, error = %err, "load failed");
                self.loading = false;
                self.log_failure(err);
                Some(Modal::error(err.to_string()))
            }
            (Action::SelectCwd(dname), Ok(_)) => {
                // a working directory replaces any build script
                self.graph = None;
                self.status = format!("Work directory: {dname}");
                None
            }
            (Action::UpdateMenu | Action::OpenContextMenu(_), Err(err)) => {
                tracing::warn!(?action, error = %err, "menu command failed");
                None
            }
            (_, Err(err)) => {
                self.log_failure(err);
                None
            }
            (_, Ok(value)) => {
                tracing::trace!(?action, %value, "command done");
                None
            }
        }
    }

    /// The event receiver fell behind and lost `skipped` events
    pub fn note_lagged(&mut self, skipped: u64) {
        tracing::warn!(skipped, "event stream lagged, view may be incomplete");
        self.anomalies += skipped;
    }

    fn clear_logs(&mut self) {
        let retired = self.maps.retire_unassigned();
        if retired > 0 {
            tracing::debug!(retired, "forgot finished ownerless tasks");
        }
        self.progress.clear_completed();
        self.transcript.clear();
        self.maps.rebind(&mut self.transcript);
    }

    fn log_failure(&mut self, err: &CommandError) {
        let mut text = err.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.transcript.log_console(LogStream::Stderr, &text);
    }

    fn record_anomaly(&mut self, event: &str, err: &ProtocolError) {
        self.anomalies += 1;
        tracing::warn!(event, error = %err, "dropping event");
    }

    fn start_rule(&mut self, rule: &str, out_of: usize) {
        match self.maps.rule(rule).map(|slot| slot.handle) {
            Some(handle) => {
                tracing::warn!(rule, "rule started again while still running");
                self.maps.insert_rule(rule, handle);
            }
            None => {
                let handle = self.transcript.add_rule(rule);
                self.maps.insert_rule(rule, handle);
            }
        }
        self.progress.start_rule(rule, out_of);
    }

    fn stop_rule(&mut self, rule: &str) -> Result<(), ProtocolError> {
        self.maps.stop_rule(rule)?;
        if !self.progress.stop_rule(rule) {
            tracing::debug!(rule, "stopped rule was not counted as active");
        }
        Ok(())
    }

    fn fail_rule(&mut self, rule: &str) -> Result<(), ProtocolError> {
        let handle = self.maps.fail_rule(rule)?;
        let section = self
            .transcript
            .rule_mut(handle)
            .ok_or_else(|| ProtocolError::StaleHandle {
                what: format!("rule {rule}"),
            })?;
        section.failed = true;
        Ok(())
    }

    fn start_task(&mut self, rule: Option<&str>, id: &TaskId, cmd: &str) -> Result<(), ProtocolError> {
        if self.maps.task(id).is_some() {
            return Err(ProtocolError::DuplicateTask { task: id.clone() });
        }

        let owner = match rule {
            Some(rule) => rule,
            None => {
                if self.maps.rule(UNASSIGNED_RULE).is_none() {
                    let handle = self.transcript.add_rule(UNASSIGNED_RULE);
                    self.maps.insert_rule(UNASSIGNED_RULE, handle);
                }
                UNASSIGNED_RULE
            }
        };

        let rule_handle = self
            .maps
            .rule(owner)
            .map(|slot| slot.handle)
            .ok_or_else(|| ProtocolError::UnknownRule {
                rule: owner.to_string(),
            })?;
        let task_handle = self
            .transcript
            .add_task(rule_handle, id, cmd)
            .ok_or_else(|| ProtocolError::StaleHandle {
                what: format!("rule {owner}"),
            })?;
        self.maps.insert_task(id, owner, cmd, task_handle)
    }

    fn stop_task(&mut self, id: &TaskId, duration: Duration) -> Result<(), ProtocolError> {
        let handle = self.maps.advance_task(id, TaskTransition::Stop { duration })?;
        let section = self
            .transcript
            .task_mut(handle)
            .ok_or_else(|| ProtocolError::StaleHandle {
                what: format!("task {id}"),
            })?;
        section.duration = Some(duration);
        Ok(())
    }

    fn task_output(&mut self, out: &TaskOutput, stream: LogStream) -> Result<(), ProtocolError> {
        let handle = self.maps.advance_task(&out.task_id, TaskTransition::Output)?;
        if let (Some(claimed), Some(slot)) = (out.rule.as_deref(), self.maps.task(&out.task_id)) {
            if claimed != slot.rule {
                tracing::debug!(task = %out.task_id, claimed, owner = %slot.rule, "output names another rule");
            }
        }
        let section = self
            .transcript
            .task_mut(handle)
            .ok_or_else(|| ProtocolError::StaleHandle {
                what: format!("task {}", out.task_id),
            })?;
        section.log.push(stream, &out.content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ClearScope, FileLoaded, Output, RuleRef, StartRule, TaskStart, TaskStop};

    fn start(rule: &str, out_of: usize) -> BackendEvent {
        BackendEvent::StartRule(StartRule {
            rule: rule.into(),
            nb: None,
            out_of,
        })
    }

    fn stop(rule: &str) -> BackendEvent {
        BackendEvent::StopRule(RuleRef { rule: rule.into() })
    }

    fn task_start(rule: Option<&str>, id: u64, cmd: &str) -> BackendEvent {
        BackendEvent::TaskStart(TaskStart {
            rule: rule.map(Into::into),
            cmd: cmd.into(),
            task_id: id.into(),
        })
    }

    fn stdout(id: u64, content: &str) -> BackendEvent {
        BackendEvent::TaskStdout(TaskOutput {
            rule: None,
            task_id: id.into(),
            content: content.into(),
        })
    }

    fn stderr(id: u64, content: &str) -> BackendEvent {
        BackendEvent::TaskStderr(TaskOutput {
            rule: None,
            task_id: id.into(),
            content: content.into(),
        })
    }

    fn task_stop(id: u64, millis: u64) -> BackendEvent {
        BackendEvent::TaskStop(TaskStop {
            rule: None,
            task_id: id.into(),
            duration_milliseconds: millis,
        })
    }

    #[test]
    fn test_single_rule_scenario() {
        let mut d = Dispatcher::default();
        d.handle(&start("A", 2));
        d.handle(&task_start(Some("A"), 1, "asm"));
        d.handle(&stdout(1, "ok\n"));
        d.handle(&BackendEvent::TaskStop(TaskStop {
            rule: Some("A".into()),
            task_id: 1.into(),
            duration_milliseconds: 120,
        }));
        d.handle(&stop("A"));

        let p = d.progress();
        assert_eq!((p.completed, p.max, p.value), (1, 0, 0));
        let task = d.transcript().find_task(&TaskId::from(1)).unwrap();
        assert_eq!(task.log.stream_lines(LogStream::Stdout), vec!["ok"]);
        assert_eq!(task.duration_label().as_deref(), Some("0.12 s"));
        assert_eq!(d.anomalies(), 0);
        assert_eq!(d.maps().task_count(), 0);
    }

    #[test]
    fn test_unknown_task_output_is_dropped() {
        let mut d = Dispatcher::default();
        let effects = d.handle(&stdout(42, "lost\n"));
        assert!(effects.is_empty());
        assert_eq!(d.anomalies(), 1);
        assert!(d.transcript().console().is_empty());
    }

    #[test]
    fn test_interleaved_output_order() {
        let mut d = Dispatcher::default();
        d.handle(&start("A", 1));
        d.handle(&task_start(Some("A"), 7, "rasm"));
        d.handle(&stdout(7, "one\n"));
        d.handle(&stderr(7, "two\n"));
        d.handle(&stdout(7, "three\n"));

        let task = d.transcript().find_task(&TaskId::from(7)).unwrap();
        let got: Vec<_> = task.log.lines().map(|l| (l.stream, l.text.clone())).collect();
        assert_eq!(
            got,
            vec![
                (LogStream::Stdout, "one".to_string()),
                (LogStream::Stderr, "two".to_string()),
                (LogStream::Stdout, "three".to_string()),
            ]
        );
    }

    #[test]
    fn test_ownerless_task_goes_to_unassigned() {
        let mut d = Dispatcher::default();
        d.handle(&task_start(None, 3, "echo hi"));
        d.handle(&stdout(3, "hi\n"));

        assert_eq!(d.anomalies(), 0);
        assert_eq!(d.transcript().rules()[0].name, UNASSIGNED_RULE);
        assert!(d.progress().is_idle());
    }

    #[test]
    fn test_task_for_unknown_rule_is_anomaly() {
        let mut d = Dispatcher::default();
        d.handle(&task_start(Some("ghost"), 1, "asm"));
        assert_eq!(d.anomalies(), 1);
        assert_eq!(d.maps().task_count(), 0);
    }

    #[test]
    fn test_failed_rule_marks_header() {
        let mut d = Dispatcher::default();
        d.handle(&start("A", 1));
        d.handle(&BackendEvent::FailedRule(RuleRef { rule: "A".into() }));
        assert_eq!(d.transcript().rules()[0].header(), "Rule: A [failure]");

        d.handle(&BackendEvent::FailedRule(RuleRef { rule: "A".into() }));
        assert_eq!(d.anomalies(), 1);

        d.handle(&stop("A"));
        assert!(d.maps().rule("A").is_none());
        assert!(d.progress().is_idle());
    }

    #[test]
    fn test_stop_of_unknown_rule_leaves_progress() {
        let mut d = Dispatcher::default();
        d.handle(&start("A", 2));
        d.handle(&stop("B"));
        assert_eq!(d.anomalies(), 1);
        assert_eq!(d.progress().active(), ["A".to_string()]);
        assert_eq!(d.progress().value, 0);
    }

    #[test]
    fn test_progress_properties_over_many_rules() {
        let mut d = Dispatcher::default();
        let rules = ["a", "b", "c", "d"];
        for r in rules {
            d.handle(&start(r, rules.len()));
        }
        for (i, r) in rules.iter().enumerate() {
            let before = d.progress().value;
            d.handle(&stop(r));
            let p = d.progress();
            assert!(p.value <= p.max);
            if i + 1 < rules.len() {
                assert_eq!(p.value, before + 1);
            } else {
                assert_eq!((p.max, p.value), (0, 0));
            }
        }
        assert_eq!(d.progress().completed, 4);
    }

    #[test]
    fn test_clear_during_build_keeps_live_sections() {
        let mut d = Dispatcher::default();
        d.handle(&start("A", 1));
        d.handle(&task_start(Some("A"), 1, "asm"));
        d.handle(&stdout(1, "before\n"));
        d.prepare(&Action::ClearLogs);
        d.handle(&stdout(1, "after\n"));

        let task = d.transcript().find_task(&TaskId::from(1)).unwrap();
        assert_eq!(task.log.stream_lines(LogStream::Stdout), vec!["after"]);
        assert_eq!(d.anomalies(), 0);
    }

    #[test]
    fn test_file_loaded_replaces_graph() {
        let mut d = Dispatcher::default();
        d.handle(&BackendEvent::Stdout(Output {
            content: "noise\n".into(),
        }));
        let effects = d.handle(&BackendEvent::FileLoaded(FileLoaded {
            svg: r#"<svg><a xlink:title="build"></a></svg>"#.into(),
            fname: "bndbuild.yml".into(),
        }));
        assert_eq!(effects, vec![Effect::Act(Action::UpdateMenu)]);
        assert_eq!(d.graph().unwrap().targets, vec!["build"]);
        assert_eq!(d.status(), "Build file:bndbuild.yml");
        assert!(d.transcript().console().is_empty());

        d.handle(&BackendEvent::FileLoaded(FileLoaded {
            svg: r#"<svg><a xlink:title="clean"></a></svg>"#.into(),
            fname: "other.yml".into(),
        }));
        assert_eq!(d.graph().unwrap().targets, vec!["clean"]);
    }

    #[test]
    fn test_requests_become_effects() {
        let mut d = Dispatcher::default();
        assert_eq!(
            d.handle(&BackendEvent::RequestExecuteTarget("build".into())),
            vec![Effect::Act(Action::ExecuteTarget("build".into()))]
        );
        assert_eq!(d.handle(&BackendEvent::RequestOpen), vec![Effect::PickBuildFile]);
        assert_eq!(
            d.handle(&BackendEvent::RequestSelectCwd),
            vec![Effect::PickWorkingDirectory]
        );
        assert_eq!(d.anomalies(), 0);
    }

    #[test]
    fn test_settle_execute_target() {
        let mut d = Dispatcher::default();
        let action = Action::ExecuteTarget("build".into());
        d.prepare(&action);

        let modal = d.settle(&action, &Err(CommandError::Rejected("file not found".into())));
        assert_eq!(modal, Some(Modal::error("file not found")));
        assert_eq!(
            d.transcript().console().stream_lines(LogStream::Stderr),
            vec!["file not found"]
        );

        d.prepare(&action);
        let modal = d.settle(&action, &Ok(serde_json::Value::Null));
        assert_eq!(modal, Some(Modal::info("Build success")));
        assert!(d.transcript().console().is_empty());
    }

    #[test]
    fn test_load_and_select_cwd_status() {
        let mut d = Dispatcher::default();
        let load = Action::LoadBuildFile("a.yml".into());
        d.prepare(&load);
        assert_eq!(d.status(), "Loading a.yml");
        assert!(d.is_loading());
        assert_eq!(d.settle(&load, &Ok(serde_json::Value::Null)), None);
        assert!(!d.is_loading());

        let cwd = Action::SelectCwd("/tmp/project".into());
        assert_eq!(d.settle(&cwd, &Ok(serde_json::Value::Null)), None);
        assert_eq!(d.status(), "Work directory: /tmp/project");
        assert!(d.graph().is_none());
    }

    #[test]
    fn test_manual_task_id_reused_by_next_run() {
        let mut d = Dispatcher::default();
        d.prepare(&Action::ExecuteManualTask("basm a.asm".into()));
        d.handle(&task_start(None, 1, "basm a.asm"));
        d.handle(&stdout(1, "a ok\n"));
        d.handle(&task_stop(1, 5));

        d.prepare(&Action::ExecuteManualTask("basm b.asm".into()));
        d.handle(&task_start(None, 1, "basm b.asm"));
        d.handle(&stdout(1, "b ok\n"));
        d.handle(&task_stop(1, 7));

        assert_eq!(d.anomalies(), 0);
        assert_eq!(d.transcript().rules().len(), 1);
        let task = d.transcript().find_task(&TaskId::from(1)).unwrap();
        assert_eq!(task.header(), "basm b.asm 0.007 s");
        assert_eq!(task.log.stream_lines(LogStream::Stdout), vec!["b ok"]);
        assert_eq!(d.maps().task_count(), 1);
    }

    #[test]
    fn test_running_ownerless_task_survives_clear() {
        let mut d = Dispatcher::default();
        d.handle(&task_start(None, 2, "echo hi"));
        d.handle(&stdout(2, "before\n"));
        d.prepare(&Action::ClearLogs);
        d.handle(&stdout(2, "after\n"));

        assert_eq!(d.anomalies(), 0);
        assert_eq!(d.transcript().rules()[0].name, UNASSIGNED_RULE);
        let task = d.transcript().find_task(&TaskId::from(2)).unwrap();
        assert_eq!(task.log.stream_lines(LogStream::Stdout), vec!["after"]);

        d.handle(&task_stop(2, 10));
        d.prepare(&Action::ClearLogs);
        assert!(d.maps().rule(UNASSIGNED_RULE).is_none());
        assert_eq!(d.maps().task_count(), 0);
        assert!(d.transcript().rules().is_empty());
    }

    #[test]
    fn test_clear_restarts_completed_count() {
        let mut d = Dispatcher::default();
        d.handle(&start("A", 1));
        d.handle(&stop("A"));
        assert_eq!(d.progress().completed, 1);

        d.prepare(&Action::ClearLogs);
        let effects = d.handle(&BackendEvent::RequestClear(ClearScope { soft: None }));
        assert_eq!(effects, vec![Effect::Act(Action::ClearApp { soft: None })]);
        assert_eq!(d.progress().completed, 0);

        d.handle(&start("B", 1));
        d.handle(&stop("B"));
        d.handle(&BackendEvent::FileLoaded(FileLoaded {
            svg: "<svg></svg>".into(),
            fname: "bndbuild.yml".into(),
        }));
        assert_eq!(d.progress().completed, 0);
    }

    #[test]
    fn test_late_output_kept_until_rule_stops() {
        let mut d = Dispatcher::default();
        d.handle(&start("A", 1));
        d.handle(&task_start(Some("A"), 1, "asm"));
        d.handle(&task_stop(1, 120));
        d.handle(&stdout(1, "late\n"));

        assert_eq!(d.anomalies(), 0);
        let task = d.transcript().find_task(&TaskId::from(1)).unwrap();
        assert_eq!(task.log.stream_lines(LogStream::Stdout), vec!["late"]);

        d.handle(&stop("A"));
        d.handle(&stdout(1, "gone\n"));
        assert_eq!(d.anomalies(), 1);
    }

    #[test]
    fn test_lagged_events_count_as_anomalies() {
        let mut d = Dispatcher::default();
        d.note_lagged(3);
        d.note_lagged(2);
        assert_eq!(d.anomalies(), 5);
    }
}
