//! A live session: one loop owning the dispatcher.
//!
//! Engine events, user actions and command/picker completions are all
//! funnelled into the same loop; nothing else mutates the view.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::backend::Backend;
use crate::dispatcher::{Action, Dispatcher, Effect, Modal};
use crate::event::EventEnvelope;
use crate::gateway::{Gateway, RequestId, Settled};

/// Shows modal notifications to the user
pub trait Notifier: Send + Sync {
    fn notify(&self, modal: &Modal);
}

/// Native file and directory dialogs. `None` means the user cancelled.
#[async_trait]
pub trait Picker: Send + Sync {
    async fn pick_build_file(&self, extensions: &[String]) -> Option<String>;

    async fn pick_directory(&self) -> Option<String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickKind {
    BuildFile,
    Directory,
}

#[derive(Clone, Debug)]
pub enum Completion {
    Settled(Settled),
    Picked { kind: PickKind, path: Option<String> },
}

/// Receiving side of a session's completion channel
pub struct Completions(mpsc::UnboundedReceiver<Completion>);

impl Completions {
    pub async fn recv(&mut self) -> Option<Completion> {
        self.0.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Completion> {
        self.0.try_recv().ok()
    }
}

pub struct Session {
    dispatcher: Dispatcher,
    gateway: Gateway,
    picker: Arc<dyn Picker>,
    notifier: Arc<dyn Notifier>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    extensions: Vec<String>,
    pending_picks: usize,
}

impl Session {
    pub fn new(
        dispatcher: Dispatcher,
        backend: Arc<dyn Backend>,
        picker: Arc<dyn Picker>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, Completions) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let session = Self {
            dispatcher,
            gateway: Gateway::new(backend, completion_tx.clone()),
            picker,
            notifier,
            completion_tx,
            extensions: crate::config::default_build_file_extensions(),
            pending_picks: 0,
        };
        (session, Completions(completion_rx))
    }

    /// File extensions offered by the open dialog
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn into_dispatcher(self) -> Dispatcher {
        self.dispatcher
    }

    /// Commands and dialogs not settled yet
    pub fn pending(&self) -> usize {
        self.gateway.in_flight() + self.pending_picks
    }

    pub fn handle_event(&mut self, env: &EventEnvelope) {
        for effect in self.dispatcher.apply(env) {
            self.run_effect(effect);
        }
    }

    pub fn note_lagged(&mut self, skipped: u64) {
        self.dispatcher.note_lagged(skipped);
    }

    /// Apply the local side of an action and send its command
    pub fn perform(&mut self, action: Action) -> Option<RequestId> {
        self.dispatcher.prepare(&action);
        self.gateway.submit(action)
    }

    /// Returns the request that was settled, unless the outcome was stale
    /// or the completion was a dialog answer.
    pub fn handle_completion(&mut self, completion: Completion) -> Option<RequestId> {
        match completion {
            Completion::Settled(settled) => {
                if !self.gateway.accept(&settled) {
                    return None;
                }
                if let Some(modal) = self.dispatcher.settle(&settled.action, &settled.result) {
                    self.notifier.notify(&modal);
                }
                Some(settled.request)
            }
            Completion::Picked { kind, path } => {
                self.pending_picks = self.pending_picks.saturating_sub(1);
                let Some(path) = path else {
                    tracing::debug!(?kind, "picker cancelled");
                    return None;
                };
                let action = match kind {
                    PickKind::BuildFile => Action::LoadBuildFile(path),
                    PickKind::Directory => Action::SelectCwd(path),
                };
                self.perform(action);
                None
            }
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Act(action) => {
                self.perform(action);
            }
            Effect::PickBuildFile => self.pick(PickKind::BuildFile),
            Effect::PickWorkingDirectory => self.pick(PickKind::Directory),
        }
    }

    /// Ask the picker for a path; the answer arrives as [`Completion::Picked`]
    pub fn pick(&mut self, kind: PickKind) {
        let picker = Arc::clone(&self.picker);
        let extensions = self.extensions.clone();
        let tx = self.completion_tx.clone();
        self.pending_picks += 1;
        tokio::spawn(async move {
            let path = match kind {
                PickKind::BuildFile => picker.pick_build_file(&extensions).await,
                PickKind::Directory => picker.pick_directory().await,
            };
            let _ = tx.send(Completion::Picked { kind, path });
        });
    }

    /// Drive the session until the event stream closes or the action
    /// channel is dropped, then wait up to `grace` for outstanding commands.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<EventEnvelope>,
        mut actions: mpsc::Receiver<Action>,
        mut completions: Completions,
        grace: Duration,
    ) -> Dispatcher {
        let mut actions_open = true;
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(env) => self.handle_event(&env),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => self.note_lagged(skipped),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(completion) = completions.recv() => {
                    self.handle_completion(completion);
                }
                action = actions.recv(), if actions_open => match action {
                    Some(action) => {
                        self.perform(action);
                    }
                    None => actions_open = false,
                },
            }
        }

        self.settle_pending(&mut completions, grace).await;
        self.dispatcher
    }

    /// Process completions until nothing is pending or `grace` elapsed
    pub async fn settle_pending(&mut self, completions: &mut Completions, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        while self.pending() > 0 {
            match tokio::time::timeout_at(deadline, completions.recv()).await {
                Ok(Some(completion)) => {
                    self.handle_completion(completion);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(pending = self.pending(), "giving up on outstanding commands");
                    break;
                }
            }
        }
    }
}
