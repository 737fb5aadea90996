//! Command gateway: runs engine commands off the event loop.
//!
//! Every submitted action gets a request id and its own task. Outcomes come
//! back as [`Completion::Settled`] on the session's completion channel, so
//! the dispatcher is only ever touched from the loop that owns it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{Backend, CommandResult};
use crate::dispatcher::Action;
use crate::session::Completion;

pub type RequestId = u64;

#[derive(Clone, Debug)]
pub struct Settled {
    pub request: RequestId,
    pub action: Action,
    pub result: CommandResult,
}

pub struct Gateway {
    backend: Arc<dyn Backend>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    next_request: RequestId,
    in_flight: BTreeMap<RequestId, JoinHandle<()>>,
    current_load: Option<RequestId>,
}

impl Gateway {
    pub fn new(backend: Arc<dyn Backend>, completion_tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            backend,
            completion_tx,
            next_request: 1,
            in_flight: BTreeMap::new(),
            current_load: None,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Send the command behind `action`. Returns `None` for local-only actions.
    ///
    /// A new load supersedes the one still in flight: the older request is
    /// aborted and its outcome will never be settled.
    pub fn submit(&mut self, action: Action) -> Option<RequestId> {
        let command = action.command()?;

        let request = self.next_request;
        self.next_request += 1;

        if matches!(action, Action::LoadBuildFile(_)) {
            if let Some(stale) = self.current_load.replace(request) {
                if let Some(handle) = self.in_flight.remove(&stale) {
                    tracing::debug!(stale, request, "superseding in-flight load");
                    handle.abort();
                }
            }
        }

        tracing::debug!(request, cmd = command.name(), "invoking");
        let backend = Arc::clone(&self.backend);
        let tx = self.completion_tx.clone();
        let handle = tokio::spawn(async move {
            let result = backend.invoke(command).await;
            let _ = tx.send(Completion::Settled(Settled {
                request,
                action,
                result,
            }));
        });
        self.in_flight.insert(request, handle);
        Some(request)
    }

    /// Mark a settlement as consumed. Returns `false` for outcomes of
    /// requests that were superseded in the meantime.
    pub fn accept(&mut self, settled: &Settled) -> bool {
        if self.in_flight.remove(&settled.request).is_none() {
            tracing::debug!(request = settled.request, "ignoring stale outcome");
            return false;
        }
        if self.current_load == Some(settled.request) {
            self.current_load = None;
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in std::mem::take(&mut self.in_flight) {
            handle.abort();
        }
        self.current_load = None;
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
