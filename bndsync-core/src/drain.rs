//! Periodic flush of the engine's captured output.
//!
//! The engine buffers stdout/stderr and only turns it into `event-stdout` /
//! `event-stderr` when asked via `empty_gags`. The drain timer asks on a
//! fixed period, independent of the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::{Backend, Command};

pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(10);

pub struct DrainTimer {
    backend: Arc<dyn Backend>,
    period: Duration,
    ticks: u64,
}

impl DrainTimer {
    pub fn new(backend: Arc<dyn Backend>, period: Duration) -> Self {
        Self {
            backend,
            period,
            ticks: 0,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick (happens immediately)
        interval.tick().await;

        loop {
            interval.tick().await;
            self.ticks += 1;
            // one invocation at a time; a slow engine delays the next tick
            if let Err(e) = self.backend.invoke(Command::EmptyGags {}).await {
                tracing::trace!(ticks = self.ticks, error = %e, "empty_gags failed");
            }
        }
    }
}

/// Start the drain timer. Abort the handle to stop it.
pub fn spawn_drain_timer(backend: Arc<dyn Backend>, period: Duration) -> JoinHandle<()> {
    let timer = DrainTimer::new(backend, period);
    tokio::spawn(timer.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CommandError, CommandResult};
    use crate::event::EventEnvelope;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    struct Counting {
        calls: Mutex<Vec<&'static str>>,
        events: broadcast::Sender<EventEnvelope>,
    }

    #[async_trait]
    impl Backend for Counting {
        async fn invoke(&self, command: Command) -> CommandResult {
            self.calls.lock().unwrap().push(command.name());
            Err(CommandError::Rejected("nothing to flush".into()))
        }

        fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
            self.events.subscribe()
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_on_every_tick_and_ignores_errors() {
        let backend = Arc::new(Counting {
            calls: Mutex::new(Vec::new()),
            events: broadcast::channel(4).0,
        });
        let handle = spawn_drain_timer(backend.clone(), DEFAULT_DRAIN_INTERVAL);

        tokio::time::sleep(Duration::from_millis(55)).await;
        handle.abort();

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|name| *name == "empty_gags"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_stops_draining() {
        let backend = Arc::new(Counting {
            calls: Mutex::new(Vec::new()),
            events: broadcast::channel(4).0,
        });
        let handle = spawn_drain_timer(backend.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(25)).await;
        handle.abort();
        let seen = backend.calls.lock().unwrap().len();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.calls.lock().unwrap().len(), seen);
        assert_eq!(seen, 1);
    }
}
