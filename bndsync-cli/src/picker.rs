//! Dialog front-ends: path pickers and modal notifiers.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use bndsync_core::dispatcher::{Modal, ModalKind};
use bndsync_core::session::{Notifier, PickKind, Picker};

/// True if `path` has one of the accepted build file extensions
pub fn has_build_extension(path: &str, extensions: &[String]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e == ext))
}

/// A path question for the terminal UI
pub struct PromptRequest {
    pub kind: PickKind,
    pub extensions: Vec<String>,
    pub reply: oneshot::Sender<Option<String>>,
}

/// Picker answered by the terminal UI's input line
pub struct PromptPicker {
    tx: mpsc::UnboundedSender<PromptRequest>,
}

impl PromptPicker {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PromptRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    async fn ask(&self, kind: PickKind, extensions: &[String]) -> Option<String> {
        let (reply, answer) = oneshot::channel();
        let request = PromptRequest {
            kind,
            extensions: extensions.to_vec(),
            reply,
        };
        if self.tx.send(request).is_err() {
            tracing::debug!(?kind, "prompt closed");
            return None;
        }
        answer.await.ok().flatten()
    }
}

#[async_trait]
impl Picker for PromptPicker {
    async fn pick_build_file(&self, extensions: &[String]) -> Option<String> {
        self.ask(PickKind::BuildFile, extensions).await
    }

    async fn pick_directory(&self) -> Option<String> {
        self.ask(PickKind::Directory, &[]).await
    }
}

/// Fixed answers, for runs without a terminal
pub struct StaticPicker {
    pub build_file: Option<String>,
    pub directory: Option<String>,
}

#[async_trait]
impl Picker for StaticPicker {
    async fn pick_build_file(&self, extensions: &[String]) -> Option<String> {
        let path = self.build_file.clone()?;
        if !has_build_extension(&path, extensions) {
            tracing::warn!(path = %path, ?extensions, "default build file has an unexpected extension");
            return None;
        }
        Some(path)
    }

    async fn pick_directory(&self) -> Option<String> {
        self.directory.clone()
    }
}

/// Modals waiting to be shown by the terminal UI
#[derive(Default)]
pub struct ModalQueue {
    modals: Mutex<VecDeque<Modal>>,
}

impl ModalQueue {
    pub fn pop(&self) -> Option<Modal> {
        self.modals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
    }
}

impl Notifier for ModalQueue {
    fn notify(&self, modal: &Modal) {
        self.modals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(modal.clone());
    }
}

/// Prints modals to stderr and counts the errors
#[derive(Default)]
pub struct ConsoleNotifier {
    errors: AtomicUsize,
}

impl ConsoleNotifier {
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, modal: &Modal) {
        if modal.kind == ModalKind::Error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        eprintln!("[{}] {}", modal.title, modal.message);
    }
}
