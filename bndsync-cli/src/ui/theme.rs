//! UI Theme Module - Consistent color palette and style helpers
//!
//! Palette tokens instead of hard-coded colors, plus style helpers for
//! rule/task sections, log streams and modals.

use ratatui::style::{Color, Modifier, Style};

use bndsync_core::dispatcher::ModalKind;
use bndsync_core::log_sink::LogStream;

/// Color palette tokens for the theme
#[derive(Clone, Debug)]
pub struct Palette {
    /// Panel border color
    pub panel_border: Color,
    /// Primary text color
    pub text: Color,
    /// Dimmed text (secondary info)
    pub text_dim: Color,
    /// Muted text (tertiary info, disabled)
    pub text_muted: Color,
    /// Accent color (highlights, focus)
    pub accent: Color,
    /// Success state (build done, info modal)
    pub success: Color,
    /// Warning state (loading, stale view)
    pub warn: Color,
    /// Error state (failed rule, stderr)
    pub error: Color,
    /// Selection background
    pub selection_bg: Color,
    /// Selection foreground
    pub selection_fg: Color,
    /// Key hint text
    pub key_hint: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self::dark()
    }
}

impl Palette {
    /// VS Code-esque dark theme
    pub fn dark() -> Self {
        Self {
            panel_border: Color::Rgb(60, 60, 60),
            text: Color::Rgb(212, 212, 212),
            text_dim: Color::Rgb(150, 150, 150),
            text_muted: Color::Rgb(100, 100, 100),
            accent: Color::Rgb(79, 193, 255),      // Light blue
            success: Color::Rgb(78, 201, 176),     // Teal green
            warn: Color::Rgb(220, 180, 100),       // Amber
            error: Color::Rgb(244, 135, 113),      // Coral red
            selection_bg: Color::Rgb(38, 79, 120), // Dark blue
            selection_fg: Color::White,
            key_hint: Color::Rgb(206, 145, 120), // Soft orange
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Theme {
    pub palette: Palette,
}

impl Theme {
    /// Header of a rule section
    pub fn rule_style(&self, failed: bool) -> Style {
        let color = if failed {
            self.palette.error
        } else {
            self.palette.accent
        };
        Style::default().fg(color).add_modifier(Modifier::BOLD)
    }

    /// Header of a task section; finished tasks are dimmed
    pub fn task_style(&self, finished: bool) -> Style {
        if finished {
            Style::default().fg(self.palette.text_dim)
        } else {
            Style::default().fg(self.palette.text)
        }
    }

    pub fn stream_style(&self, stream: LogStream) -> Style {
        let color = match stream {
            LogStream::Stdout => self.palette.text,
            LogStream::Stderr => self.palette.error,
            LogStream::System => self.palette.text_muted,
        };
        Style::default().fg(color)
    }

    pub fn modal_border(&self, kind: ModalKind) -> Style {
        let color = match kind {
            ModalKind::Info => self.palette.success,
            ModalKind::Error => self.palette.error,
        };
        Style::default().fg(color)
    }

    pub fn gauge_style(&self, idle: bool) -> Style {
        if idle {
            Style::default().fg(self.palette.text_muted)
        } else {
            Style::default().fg(self.palette.success)
        }
    }

    pub fn key_hint_style(&self) -> Style {
        Style::default().fg(self.palette.key_hint)
    }

    pub fn subtle_border_style(&self) -> Style {
        Style::default().fg(self.palette.panel_border)
    }

    pub fn focused_border_style(&self) -> Style {
        Style::default().fg(self.palette.accent)
    }

    pub fn selection_style(&self) -> Style {
        Style::default()
            .bg(self.palette.selection_bg)
            .fg(self.palette.selection_fg)
            .add_modifier(Modifier::BOLD)
    }

    pub fn text_dim_style(&self) -> Style {
        Style::default().fg(self.palette.text_dim)
    }

    pub fn warn_style(&self) -> Style {
        Style::default().fg(self.palette.warn)
    }

    pub fn title_style(&self) -> Style {
        Style::default()
            .fg(self.palette.text)
            .add_modifier(Modifier::BOLD)
    }
}

static DEFAULT_THEME: std::sync::OnceLock<Theme> = std::sync::OnceLock::new();

pub fn theme() -> &'static Theme {
    DEFAULT_THEME.get_or_init(Theme::default)
}

/// Convenience re-exports for common use cases
pub mod styles {
    use super::*;

    pub fn rule(failed: bool) -> Style {
        theme().rule_style(failed)
    }

    pub fn task(finished: bool) -> Style {
        theme().task_style(finished)
    }

    pub fn stream(stream: LogStream) -> Style {
        theme().stream_style(stream)
    }

    pub fn modal_border(kind: ModalKind) -> Style {
        theme().modal_border(kind)
    }

    pub fn gauge(idle: bool) -> Style {
        theme().gauge_style(idle)
    }

    pub fn key_hint() -> Style {
        theme().key_hint_style()
    }

    pub fn border_subtle() -> Style {
        theme().subtle_border_style()
    }

    pub fn border_focused() -> Style {
        theme().focused_border_style()
    }

    pub fn selection() -> Style {
        theme().selection_style()
    }

    pub fn text_dim() -> Style {
        theme().text_dim_style()
    }

    pub fn warn() -> Style {
        theme().warn_style()
    }

    pub fn title() -> Style {
        theme().title_style()
    }
}
