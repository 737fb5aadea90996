//! Bounded, stream-tagged log buffers.
//!
//! Text is appended as received; a chunk without a trailing newline is kept
//! open and continued by the next chunk of the same stream. Escape sequences
//! are stored untouched.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of lines kept per container
pub const DEFAULT_LOG_CAP: usize = 2_000;

/// Which output stream a log line came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

impl LogStream {
    /// Presentation class, matching the `<span class=...>` of the HTML rendering
    pub fn class(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
            LogStream::System => "system",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
    /// Whether the line was terminated by a newline
    pub complete: bool,
}

#[derive(Clone, Debug)]
pub struct LogBuffer {
    cap: usize,
    lines: VecDeque<LogLine>,
    evicted: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAP)
    }
}

impl LogBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            lines: VecDeque::new(),
            evicted: 0,
        }
    }

    pub fn push(&mut self, stream: LogStream, text: &str) {
        for piece in text.split_inclusive('\n') {
            let (body, complete) = match piece.strip_suffix('\n') {
                Some(body) => (body.strip_suffix('\r').unwrap_or(body), true),
                None => (piece, false),
            };

            match self.lines.back_mut() {
                Some(last) if !last.complete && last.stream == stream => {
                    last.text.push_str(body);
                    last.complete = complete;
                }
                _ => {
                    self.lines.push_back(LogLine {
                        stream,
                        text: body.to_string(),
                        complete,
                    });
                }
            }
        }

        while self.lines.len() > self.cap {
            self.lines.pop_front();
            self.evicted += 1;
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines dropped because the cap was reached
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.evicted = 0;
    }

    /// Lines of the given stream, in arrival order
    pub fn stream_lines(&self, stream: LogStream) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.text.as_str())
            .collect()
    }

    /// HTML rendering: one span per line tagged with its stream class,
    /// newlines turned into `<br/>`.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str("<span class=\"");
            out.push_str(line.stream.class());
            out.push_str("\">");
            out.push_str(&escape_html(&line.text));
            if line.complete {
                out.push_str("<br/>");
            }
            out.push_str("</span>");
        }
        out
    }

    /// Plain text rendering, one entry per line
    pub fn to_plain(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
