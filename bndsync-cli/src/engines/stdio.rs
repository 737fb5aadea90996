use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{broadcast, oneshot};

use bndsync_core::backend::{Backend, Command, CommandError, CommandResult};
use bndsync_core::event::{BackendEvent, EventEnvelope};

type Pending = Arc<Mutex<BTreeMap<u64, oneshot::Sender<CommandResult>>>>;

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    command: &'a Command,
}

/// Just enough of a line to tell a reply from an event
#[derive(Deserialize)]
struct ReplyId {
    reply: u64,
}

#[derive(Deserialize)]
struct Reply {
    reply: u64,
    #[serde(default)]
    ok: Option<Value>,
    #[serde(default)]
    err: Option<String>,
}

impl Reply {
    fn into_result(self) -> CommandResult {
        match self.err {
            Some(err) => Err(CommandError::Rejected(err)),
            None => Ok(self.ok.unwrap_or(Value::Null)),
        }
    }
}

/// An engine process speaking JSON lines on stdin/stdout.
///
/// Requests go out as `{"id", "cmd", "args"}`. Lines coming back are either
/// replies `{"reply": id, "ok" | "err"}` or engine events.
pub struct StdioBackend {
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    event_tx: broadcast::Sender<EventEnvelope>,
    next_id: Mutex<u64>,
    _child: Child,
}

impl StdioBackend {
    pub fn spawn(program: &str, args: &[String], channel_capacity: usize) -> std::io::Result<Self> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        tracing::info!(program, ?pid, "engine started");

        let missing = |what: &str| std::io::Error::other(format!("engine {what} not captured"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let (event_tx, _) = broadcast::channel(channel_capacity);
        let pending: Pending = Arc::new(Mutex::new(BTreeMap::new()));

        // Replies and events share stdout, so one reader keeps their order
        let tx = event_tx.clone();
        let pending_for_reader = pending.clone();
        tokio::spawn(async move {
            let mut segments = BufReader::new(stdout).split(b'\n');
            let mut seq = 0u64;
            loop {
                let segment = match segments.next_segment().await {
                    Ok(Some(segment)) => segment,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "reading engine output failed");
                        break;
                    }
                };
                let line = match std::str::from_utf8(&segment) {
                    Ok(line) => line.trim_end_matches('\r'),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping engine line that is not utf-8");
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                route_line(line, &pending_for_reader, &tx, &mut seq);
            }
            tracing::warn!("engine closed its output");
            // waiting invocations see their sender dropped
            lock(&pending_for_reader).clear();
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "engine", "{line}");
            }
        });

        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            event_tx,
            next_id: Mutex::new(0),
            _child: child,
        })
    }

    fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap_or_else(|p| p.into_inner());
        *id += 1;
        *id
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, BTreeMap<u64, oneshot::Sender<CommandResult>>> {
    pending.lock().unwrap_or_else(|p| p.into_inner())
}

fn route_line(
    line: &str,
    pending: &Pending,
    event_tx: &broadcast::Sender<EventEnvelope>,
    seq: &mut u64,
) {
    if let Ok(ReplyId { reply: id }) = serde_json::from_str::<ReplyId>(line) {
        let result = match serde_json::from_str::<Reply>(line) {
            Ok(reply) => reply.into_result(),
            Err(e) => {
                tracing::warn!(reply = id, error = %e, "malformed engine reply");
                Err(CommandError::Unavailable(format!("malformed reply: {e}")))
            }
        };
        match lock(pending).remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => tracing::debug!(reply = id, "reply for unknown request"),
        }
        return;
    }

    match BackendEvent::from_json(line) {
        Ok(event) => {
            *seq += 1;
            let _ = event_tx.send(EventEnvelope::new(*seq, event));
        }
        Err(e) => tracing::warn!(error = %e, line, "unreadable engine line"),
    }
}

#[async_trait]
impl Backend for StdioBackend {
    async fn invoke(&self, command: Command) -> CommandResult {
        let id = self.next_id();
        let mut line = serde_json::to_string(&Request {
            id,
            command: &command,
        })
        .map_err(|e| CommandError::Unavailable(e.to_string()))?;
        line.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(id, reply_tx);

        {
            let mut stdin = self.stdin.lock().await;
            let written = match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                lock(&self.pending).remove(&id);
                return Err(CommandError::Unavailable(e.to_string()));
            }
        }

        reply_rx
            .await
            .unwrap_or_else(|_| Err(CommandError::Unavailable("engine exited".into())))
    }

    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let command = Command::LoadBuildFile {
            fname: "demo.build".into(),
        };
        let value = serde_json::to_value(Request {
            id: 7,
            command: &command,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"id": 7, "cmd": "load_build_file", "args": {"fname": "demo.build"}})
        );
    }

    #[test]
    fn test_replies_resolve_waiters() {
        let pending: Pending = Arc::new(Mutex::new(BTreeMap::new()));
        let (event_tx, mut events) = broadcast::channel(4);
        let (ok_tx, mut ok_rx) = oneshot::channel();
        let (err_tx, mut err_rx) = oneshot::channel();
        lock(&pending).insert(1, ok_tx);
        lock(&pending).insert(2, err_tx);
        let mut seq = 0;

        route_line(r#"{"reply":2,"err":"Target build failed"}"#, &pending, &event_tx, &mut seq);
        route_line(r#"{"reply":1,"ok":{"built":true}}"#, &pending, &event_tx, &mut seq);

        assert_eq!(ok_rx.try_recv().unwrap(), Ok(json!({"built": true})));
        assert_eq!(
            err_rx.try_recv().unwrap(),
            Err(CommandError::Rejected("Target build failed".into()))
        );
        assert!(events.try_recv().is_err());
        assert!(lock(&pending).is_empty());
    }

    #[test]
    fn test_events_are_numbered() {
        let pending: Pending = Arc::new(Mutex::new(BTreeMap::new()));
        let (event_tx, mut events) = broadcast::channel(4);
        let mut seq = 0;

        route_line(r#"{"event":"event-stdout","payload":"hi\n"}"#, &pending, &event_tx, &mut seq);
        route_line("not json", &pending, &event_tx, &mut seq);
        route_line(r#"{"event":"request-open"}"#, &pending, &event_tx, &mut seq);

        assert_eq!(events.try_recv().unwrap().seq, 1);
        let second = events.try_recv().unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.event, BackendEvent::RequestOpen);
    }

    #[test]
    fn test_malformed_reply_still_resolves_waiter() {
        let pending: Pending = Arc::new(Mutex::new(BTreeMap::new()));
        let (event_tx, mut events) = broadcast::channel(4);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        lock(&pending).insert(3, reply_tx);
        let mut seq = 0;

        route_line(r#"{"reply":3,"err":{"code":2}}"#, &pending, &event_tx, &mut seq);

        assert!(matches!(
            reply_rx.try_recv().unwrap(),
            Err(CommandError::Unavailable(msg)) if msg.starts_with("malformed reply")
        ));
        assert!(events.try_recv().is_err());
        assert!(lock(&pending).is_empty());
    }

    #[tokio::test]
    async fn test_bad_output_line_does_not_stop_reader() {
        let script = r#"printf '\377\376\n{"event":"event-stdout","payload":"hi\\n"}\n'; sleep 1"#;
        let backend = StdioBackend::spawn("sh", &["-c".to_string(), script.to_string()], 8).unwrap();
        let mut events = backend.subscribe();

        let env = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.seq, 1);
        assert_eq!(env.event.name(), "event-stdout");
    }
}
