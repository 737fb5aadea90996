//! Terminal front-end for a live session.

pub mod theme;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    Frame, Terminal,
    backend::Backend as TerminalBackend,
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Wrap},
};
use tokio::sync::{broadcast, mpsc, oneshot};

use bndsync_core::dispatcher::{Action, Modal};
use bndsync_core::event::EventEnvelope;
use bndsync_core::session::{Completions, PickKind, Session};
use bndsync_core::view::Transcript;

use crate::picker::{ModalQueue, PromptRequest, has_build_extension};
use theme::styles;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SCROLL_STEP: u16 = 10;

/// Everything the terminal loop drives
pub struct Tui {
    pub session: Session,
    pub completions: Completions,
    pub events: broadcast::Receiver<EventEnvelope>,
    pub prompts: mpsc::UnboundedReceiver<PromptRequest>,
    pub modals: Arc<ModalQueue>,
    pub backend_name: &'static str,
}

enum Input {
    ManualTask {
        buffer: String,
    },
    Path {
        kind: PickKind,
        extensions: Vec<String>,
        reply: oneshot::Sender<Option<String>>,
        buffer: String,
        error: Option<String>,
    },
}

#[derive(Default)]
struct UiState {
    selected: usize,
    list_state: ListState,
    /// Lines scrolled up from the bottom of the transcript
    scroll: u16,
    input: Option<Input>,
    modal: Option<Modal>,
    engine_closed: bool,
    quit: bool,
}

impl Tui {
    pub async fn run<B: TerminalBackend>(mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        let mut ui = UiState::default();

        loop {
            self.pump(&mut ui);

            terminal.draw(|f| draw(f, &self.session, self.backend_name, &mut ui))?;
            if ui.quit {
                break;
            }

            // let spawned commands make progress between frames
            tokio::task::yield_now().await;
            if !event::poll(POLL_INTERVAL)? {
                continue;
            }
            if let CEvent::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(key, &mut ui, &mut self.session);
                }
            }
        }
        Ok(())
    }

    /// Feed everything that arrived since the last frame into the session
    fn pump(&mut self, ui: &mut UiState) {
        loop {
            match self.events.try_recv() {
                Ok(env) => self.session.handle_event(&env),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.session.note_lagged(skipped)
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Closed) => {
                    if !ui.engine_closed {
                        tracing::warn!("engine event stream closed");
                    }
                    ui.engine_closed = true;
                    break;
                }
            }
        }

        while let Some(completion) = self.completions.try_recv() {
            self.session.handle_completion(completion);
        }

        if ui.input.is_none() {
            if let Ok(request) = self.prompts.try_recv() {
                ui.input = Some(Input::Path {
                    kind: request.kind,
                    extensions: request.extensions,
                    reply: request.reply,
                    buffer: String::new(),
                    error: None,
                });
            }
        }

        if ui.modal.is_none() {
            ui.modal = self.modals.pop();
        }
    }
}

fn selected_target(session: &Session, selected: usize) -> Option<String> {
    session
        .dispatcher()
        .graph()
        .and_then(|g| g.targets.get(selected).cloned())
}

fn handle_key(key: KeyEvent, ui: &mut UiState, session: &mut Session) {
    if ui.modal.is_some() {
        ui.modal = None;
        return;
    }

    if let Some(input) = ui.input.take() {
        ui.input = edit_input(key, input, session);
        return;
    }

    let target_count = session.dispatcher().graph().map_or(0, |g| g.targets.len());
    match key.code {
        KeyCode::Char('q') => ui.quit = true,
        KeyCode::Up | KeyCode::Char('k') => ui.selected = ui.selected.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') => {
            if ui.selected + 1 < target_count {
                ui.selected += 1;
            }
        }
        KeyCode::Enter => {
            if let Some(tgt) = selected_target(session, ui.selected) {
                ui.scroll = 0;
                session.perform(Action::ExecuteTarget(tgt));
            }
        }
        KeyCode::Char('m') => {
            if let Some(tgt) = selected_target(session, ui.selected) {
                session.perform(Action::OpenContextMenu(tgt));
            }
        }
        KeyCode::Char('o') => session.pick(PickKind::BuildFile),
        KeyCode::Char('d') => session.pick(PickKind::Directory),
        KeyCode::Char('r') => {
            session.perform(Action::ReloadFile);
        }
        KeyCode::Char('c') => {
            ui.scroll = 0;
            session.perform(Action::ClearLogs);
        }
        KeyCode::Char('x') => {
            session.perform(Action::ClearApp { soft: None });
        }
        KeyCode::Char(':') => {
            ui.input = Some(Input::ManualTask {
                buffer: String::new(),
            })
        }
        KeyCode::PageUp => ui.scroll = ui.scroll.saturating_add(SCROLL_STEP),
        KeyCode::PageDown => ui.scroll = ui.scroll.saturating_sub(SCROLL_STEP),
        KeyCode::End => ui.scroll = 0,
        _ => {}
    }
}

/// Apply one key to the input line. Returns the input if it stays open.
fn edit_input(key: KeyEvent, mut input: Input, session: &mut Session) -> Option<Input> {
    let buffer = match &mut input {
        Input::ManualTask { buffer } | Input::Path { buffer, .. } => buffer,
    };
    match key.code {
        KeyCode::Char(c) => {
            buffer.push(c);
            Some(input)
        }
        KeyCode::Backspace => {
            buffer.pop();
            Some(input)
        }
        KeyCode::Esc => {
            if let Input::Path { reply, .. } = input {
                let _ = reply.send(None);
            }
            None
        }
        KeyCode::Enter => submit_input(input, session),
        _ => Some(input),
    }
}

fn submit_input(input: Input, session: &mut Session) -> Option<Input> {
    match input {
        Input::ManualTask { buffer } => {
            let task = buffer.trim();
            if !task.is_empty() {
                session.perform(Action::ExecuteManualTask(task.to_string()));
            }
            None
        }
        Input::Path {
            kind,
            extensions,
            reply,
            buffer,
            ..
        } => {
            let path = buffer.trim().to_string();
            if path.is_empty() {
                return Some(Input::Path {
                    kind,
                    extensions,
                    reply,
                    buffer,
                    error: Some("path required".into()),
                });
            }
            if kind == PickKind::BuildFile && !has_build_extension(&path, &extensions) {
                let error = Some(format!("expected a .{} file", extensions.join(" / .")));
                return Some(Input::Path {
                    kind,
                    extensions,
                    reply,
                    buffer,
                    error,
                });
            }
            let _ = reply.send(Some(path));
            None
        }
    }
}

fn draw(f: &mut Frame, session: &Session, backend_name: &str, ui: &mut UiState) {
    let dispatcher = session.dispatcher();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(f.area());

    // header
    let status_style = if dispatcher.is_loading() {
        styles::warn()
    } else {
        styles::text_dim()
    };
    let mut header = vec![
        Span::styled(" bndsync ", styles::title()),
        Span::styled(format!("[{backend_name}] "), styles::text_dim()),
        Span::styled(dispatcher.status().to_string(), status_style),
    ];
    if dispatcher.anomalies() > 0 {
        header.push(Span::styled(
            format!("  {} dropped events", dispatcher.anomalies()),
            styles::warn(),
        ));
    }
    if ui.engine_closed {
        header.push(Span::styled("  engine gone", styles::warn()));
    }
    f.render_widget(Paragraph::new(Line::from(header)), chunks[0]);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(28), Constraint::Percentage(72)])
        .split(chunks[1]);

    // targets
    let (title, items): (String, Vec<ListItem>) = match dispatcher.graph() {
        Some(graph) => (
            format!("Targets ({})", graph.fname),
            graph
                .targets
                .iter()
                .map(|t| ListItem::new(t.as_str()))
                .collect(),
        ),
        None => (
            "Targets".to_string(),
            vec![ListItem::new(Span::styled(
                "no build file (o to open)",
                styles::text_dim(),
            ))],
        ),
    };
    let target_count = dispatcher.graph().map_or(0, |g| g.targets.len());
    if target_count == 0 {
        ui.selected = 0;
        ui.list_state.select(None);
    } else {
        ui.selected = ui.selected.min(target_count - 1);
        ui.list_state.select(Some(ui.selected));
    }
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(styles::border_focused()),
        )
        .highlight_style(styles::selection())
        .highlight_symbol("▶ ");
    f.render_stateful_widget(list, main[0], &mut ui.list_state);

    // transcript
    let lines = transcript_lines(dispatcher.transcript());
    let height = main[1].height.saturating_sub(2);
    let offset = scroll_offset(lines.len(), height, ui.scroll);
    let transcript = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Transcript")
                .border_style(styles::border_subtle()),
        )
        .scroll((offset, 0));
    f.render_widget(transcript, main[1]);

    // progress
    let progress = dispatcher.progress();
    let label = if progress.is_idle() {
        format!("idle, {} rules built", progress.completed)
    } else {
        format!("{}/{} {}", progress.value, progress.max, progress.label())
    };
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Progress")
                .border_style(styles::border_subtle()),
        )
        .gauge_style(styles::gauge(progress.is_idle()))
        .ratio(progress.ratio())
        .label(label);
    f.render_widget(gauge, chunks[2]);

    // footer: input line or key hints
    let footer = match &ui.input {
        Some(input) => input_line(input),
        None => {
            let mut spans = Vec::new();
            for (key, what) in [
                ("⏎", "build"),
                ("m", "menu"),
                ("o", "open"),
                ("d", "work dir"),
                ("r", "reload"),
                ("c", "clear logs"),
                ("x", "clean"),
                (":", "task"),
                ("q", "quit"),
            ] {
                spans.push(Span::styled(format!(" {key}"), styles::key_hint()));
                spans.push(Span::styled(format!(" {what} "), styles::text_dim()));
            }
            Line::from(spans)
        }
    };
    f.render_widget(Paragraph::new(footer), chunks[3]);

    if let Some(modal) = &ui.modal {
        let area = centered_rect(50, 20, f.area());
        f.render_widget(Clear, area);
        let popup = Paragraph::new(modal.message.as_str())
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" {} ", modal.title))
                    .border_style(styles::modal_border(modal.kind)),
            );
        f.render_widget(popup, area);
    }
}

fn input_line(input: &Input) -> Line<'static> {
    let (prompt, buffer, error) = match input {
        Input::ManualTask { buffer } => ("task".to_string(), buffer, None),
        Input::Path {
            kind: PickKind::BuildFile,
            buffer,
            error,
            ..
        } => ("build file".to_string(), buffer, error.as_ref()),
        Input::Path {
            kind: PickKind::Directory,
            buffer,
            error,
            ..
        } => ("work directory".to_string(), buffer, error.as_ref()),
    };
    let mut spans = vec![
        Span::styled(format!(" {prompt}: "), styles::key_hint()),
        Span::raw(format!("{buffer}_")),
    ];
    if let Some(error) = error {
        spans.push(Span::styled(format!("  {error}"), styles::warn()));
    }
    Line::from(spans)
}

/// Console output first, then one block per rule with its tasks
fn transcript_lines(transcript: &Transcript) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    for line in transcript.console().lines() {
        lines.push(Line::styled(line.text.as_str(), styles::stream(line.stream)));
    }
    for rule in transcript.rules() {
        lines.push(Line::styled(rule.header(), styles::rule(rule.failed)));
        for task in transcript.tasks_of(rule) {
            lines.push(Line::styled(
                format!("  $ {}", task.header()),
                styles::task(task.duration.is_some()),
            ));
            for line in task.log.lines() {
                lines.push(Line::styled(
                    format!("    {}", line.text),
                    styles::stream(line.stream),
                ));
            }
        }
    }
    lines
}

/// First visible line so that the view sticks to the bottom unless scrolled
fn scroll_offset(total: usize, height: u16, scrolled_up: u16) -> u16 {
    let bottom = total.saturating_sub(height as usize);
    let offset = bottom.saturating_sub(scrolled_up as usize);
    offset.min(u16::MAX as usize) as u16
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bndsync_core::event::TaskId;
    use bndsync_core::log_sink::LogStream;

    #[test]
    fn test_scroll_sticks_to_bottom() {
        assert_eq!(scroll_offset(100, 20, 0), 80);
        assert_eq!(scroll_offset(100, 20, 30), 50);
        assert_eq!(scroll_offset(100, 20, 500), 0);
        assert_eq!(scroll_offset(5, 20, 0), 0);
    }

    #[test]
    fn test_transcript_lines_order() {
        let mut t = Transcript::new(10);
        t.log_console(LogStream::Stdout, "loaded\n");
        let rule = t.add_rule("dsk");
        t.add_task(rule, &TaskId::from(1), "dsk --add main.o").unwrap();

        let text: Vec<String> = transcript_lines(&t)
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect();
        assert_eq!(text, ["loaded", "Rule: dsk", "  $ dsk --add main.o"]);
    }

    #[test]
    fn test_centered_rect_fits() {
        let area = Rect::new(0, 0, 100, 50);
        let popup = centered_rect(50, 20, area);
        assert_eq!(popup.width, 50);
        assert_eq!(popup.height, 10);
        assert!(popup.x >= 25 && popup.y >= 20);
    }
}
