use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use bndsync_core::backend::{Backend, Command, CommandError, CommandResult};
use bndsync_core::event::{
    BackendEvent, EventEnvelope, FileLoaded, Output, RuleRef, StartRule, TaskId, TaskOutput,
    TaskStart, TaskStop,
};

/// Demo project: target, dependencies, command line
const PROJECT: &[(&str, &[&str], &str)] = &[
    ("all", &["dsk"], "echo done"),
    ("dsk", &["main.o", "font.o"], "dsk --add main.o font.o -o demo.dsk"),
    ("main.o", &[], "basm main.asm -o main.o"),
    ("font.o", &[], "basm font.asm -o font.o"),
    ("broken", &["main.o"], "basm broken.asm -o broken.o"),
    ("clean", &[], "rm -f *.o demo.dsk"),
];

#[derive(Default)]
struct FakeState {
    next_seq: u64,
    next_task: u64,
    loaded: Option<String>,
    /// Output captured since the last `empty_gags`
    gags: Vec<String>,
}

/// Simulated bndbuild engine.
///
/// Any build file loads the same demo graph unless its name starts with
/// `broken`. Building `broken` fails after its dependency succeeded.
pub struct FakeBackend {
    step: Duration,
    event_tx: broadcast::Sender<EventEnvelope>,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new(channel_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(channel_capacity);
        Self {
            step: Duration::from_millis(120),
            event_tx,
            state: Mutex::new(FakeState::default()),
        }
    }

    #[allow(dead_code)]
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: BackendEvent) {
        let seq = {
            let mut state = self.state();
            state.next_seq += 1;
            state.next_seq
        };
        let _ = self.event_tx.send(EventEnvelope::new(seq, event));
    }

    fn gag(&self, line: String) {
        self.state().gags.push(line);
    }

    fn next_task(&self) -> TaskId {
        let mut state = self.state();
        state.next_task += 1;
        TaskId::from(state.next_task)
    }

    fn graph_markup() -> String {
        let mut svg = String::from(r#"<svg xmlns:xlink="http://www.w3.org/1999/xlink">"#);
        for (i, (target, deps, _)) in PROJECT.iter().enumerate() {
            svg.push_str(&format!(
                r#"<g id="node{i}"><a xlink:href="{target}" xlink:title="{target}"><text>{target}</text></a></g>"#
            ));
            for dep in deps.iter() {
                svg.push_str(&format!(r#"<g class="edge"><title>{target}->{dep}</title></g>"#));
            }
        }
        svg.push_str("</svg>");
        svg
    }

    /// Rules needed for `target`, dependencies first
    fn schedule(target: &str) -> Option<Vec<&'static str>> {
        fn visit(target: &str, order: &mut Vec<&'static str>) -> bool {
            let Some((name, deps, _)) = PROJECT.iter().find(|(name, _, _)| *name == target) else {
                return false;
            };
            for dep in deps.iter() {
                if !visit(dep, order) {
                    return false;
                }
            }
            if !order.contains(name) {
                order.push(name);
            }
            true
        }

        let mut order = Vec::new();
        visit(target, &mut order).then_some(order)
    }

    fn load(&self, fname: &str) -> CommandResult {
        let base = fname.rsplit('/').next().unwrap_or(fname);
        if base.starts_with("broken") {
            return Err(CommandError::Rejected(format!("Unable to parse {fname}")));
        }
        self.state().loaded = Some(fname.to_string());
        self.emit(BackendEvent::FileLoaded(FileLoaded {
            svg: Self::graph_markup(),
            fname: fname.to_string(),
        }));
        Ok(Value::Null)
    }

    async fn build(&self, target: &str) -> CommandResult {
        if self.state().loaded.is_none() {
            return Err(CommandError::Rejected("No build file loaded".into()));
        }
        let Some(rules) = Self::schedule(target) else {
            return Err(CommandError::Rejected(format!("Unknown target {target}")));
        };

        let out_of = rules.len();
        for (nb, rule) in rules.iter().enumerate() {
            self.emit(BackendEvent::StartRule(StartRule {
                rule: rule.to_string(),
                nb: Some(nb + 1),
                out_of,
            }));

            let cmd = PROJECT
                .iter()
                .find(|(name, _, _)| name == rule)
                .map(|(_, _, cmd)| *cmd)
                .unwrap_or("true");
            let task_id = self.next_task();
            self.emit(BackendEvent::TaskStart(TaskStart {
                rule: Some(rule.to_string()),
                cmd: cmd.to_string(),
                task_id: task_id.clone(),
            }));

            tokio::time::sleep(self.step).await;
            let failed = *rule == "broken";
            let output = TaskOutput {
                rule: Some(rule.to_string()),
                task_id: task_id.clone(),
                content: if failed {
                    "broken.asm:3: unknown opcode 'mvo'\n".to_string()
                } else {
                    format!("{rule}: ok\n")
                },
            };
            self.emit(if failed {
                BackendEvent::TaskStderr(output)
            } else {
                BackendEvent::TaskStdout(output)
            });
            self.emit(BackendEvent::TaskStop(TaskStop {
                rule: Some(rule.to_string()),
                task_id,
                duration_milliseconds: self.step.as_millis() as u64,
            }));

            let rule_ref = RuleRef {
                rule: rule.to_string(),
            };
            if failed {
                self.emit(BackendEvent::FailedRule(rule_ref.clone()));
                self.emit(BackendEvent::StopRule(rule_ref));
                return Err(CommandError::Rejected(format!(
                    "Error while building {target}"
                )));
            }
            self.emit(BackendEvent::StopRule(rule_ref));
        }
        Ok(json!({ "built": target }))
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn invoke(&self, command: Command) -> CommandResult {
        match command {
            Command::EmptyGags {} => {
                let gags = std::mem::take(&mut self.state().gags);
                for line in gags {
                    self.emit(BackendEvent::Stdout(Output { content: line }));
                }
                Ok(Value::Null)
            }
            Command::LoadBuildFile { fname } => {
                tokio::time::sleep(self.step).await;
                self.load(&fname)
            }
            Command::ReloadFile {} => {
                let loaded = self.state().loaded.clone();
                match loaded {
                    Some(fname) => self.load(&fname),
                    None => Err(CommandError::Rejected("No build file loaded".into())),
                }
            }
            Command::ExecuteTarget { tgt } => self.build(&tgt).await,
            Command::ExecuteManualTask { task } => {
                tokio::time::sleep(self.step).await;
                self.gag(format!("$ {task}\n"));
                Ok(Value::Null)
            }
            Command::SelectCwd { dname } => {
                self.state().loaded = None;
                self.gag(format!("Working in {dname}\n"));
                Ok(Value::Null)
            }
            Command::ClearApp { soft } => {
                match soft {
                    Some(tool) => self.gag(format!("Cleared cache of {tool}\n")),
                    None => self.gag("Cleared all caches\n".to_string()),
                }
                Ok(Value::Null)
            }
            Command::OpenContextualMenuForTarget { tgt } => {
                self.gag(format!("No contextual actions for {tgt}\n"));
                Ok(Value::Null)
            }
            Command::UpdateMenu {} => Ok(Value::Null),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bndsync_core::dispatcher::Dispatcher;

    fn drain(rx: &mut broadcast::Receiver<EventEnvelope>, dispatcher: &mut Dispatcher) {
        while let Ok(env) = rx.try_recv() {
            dispatcher.apply(&env);
        }
    }

    #[test]
    fn test_schedule_puts_dependencies_first() {
        assert_eq!(
            FakeBackend::schedule("all").unwrap(),
            vec!["main.o", "font.o", "dsk", "all"]
        );
        assert!(FakeBackend::schedule("nope").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_drives_progress_to_completion() {
        let backend = FakeBackend::new(256);
        let mut rx = backend.subscribe();
        let mut dispatcher = Dispatcher::default();

        backend
            .invoke(Command::LoadBuildFile {
                fname: "demo.build".into(),
            })
            .await
            .unwrap();
        backend
            .invoke(Command::ExecuteTarget { tgt: "dsk".into() })
            .await
            .unwrap();
        drain(&mut rx, &mut dispatcher);

        assert_eq!(
            dispatcher.graph().map(|g| g.targets.len()),
            Some(PROJECT.len())
        );
        assert_eq!(dispatcher.progress().completed, 3);
        assert!(dispatcher.progress().is_idle());
        assert_eq!(dispatcher.transcript().rules().len(), 3);
        assert_eq!(dispatcher.anomalies(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_target_fails_its_rule() {
        let backend = FakeBackend::new(256);
        let mut rx = backend.subscribe();
        let mut dispatcher = Dispatcher::default();

        backend
            .invoke(Command::LoadBuildFile {
                fname: "demo.build".into(),
            })
            .await
            .unwrap();
        let err = backend
            .invoke(Command::ExecuteTarget {
                tgt: "broken".into(),
            })
            .await
            .unwrap_err();
        drain(&mut rx, &mut dispatcher);

        assert_eq!(err.to_string(), "Error while building broken");
        let headers: Vec<String> = dispatcher
            .transcript()
            .rules()
            .iter()
            .map(|r| r.header())
            .collect();
        assert_eq!(headers, ["Rule: main.o", "Rule: broken [failure]"]);
    }

    #[tokio::test]
    async fn test_gags_flush_as_stdout() {
        let backend = FakeBackend::new(16).with_step(Duration::ZERO);
        let mut rx = backend.subscribe();
        backend
            .invoke(Command::ClearApp {
                soft: Some("basm".into()),
            })
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        backend.invoke(Command::EmptyGags {}).await.unwrap();
        let env = rx.try_recv().unwrap();
        assert_eq!(
            env.event,
            BackendEvent::Stdout(Output {
                content: "Cleared cache of basm\n".into()
            })
        );
    }
}
