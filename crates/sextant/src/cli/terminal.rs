//! Editor adapter that writes to the terminal.
//!
//! Results go to stdout, status and error messages to stderr. There is no
//! interactive input: input panels are cancelled and choice lists are
//! printed without a selection.

use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use sextant_protocol::{Note, NoteSeverity};

use crate::editor::{CancelCallback, ChoiceCallback, EditorAdapter, InputCallback};

/// Output settings for the terminal front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalStyle {
    /// Whether to use colors.
    pub use_colors: bool,
    /// Whether to print status messages.
    pub show_status: bool,
}

impl TerminalStyle {
    /// Read color settings from the environment.
    ///
    /// Colors are disabled by `NO_COLOR`, by `SEXTANT_COLOR=0` or `false`,
    /// and when stdout is not a terminal.
    #[must_use]
    pub fn from_env(show_status: bool) -> Self {
        let use_colors = env::var("NO_COLOR").is_err()
            && env::var("SEXTANT_COLOR")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true)
            && io::stdout().is_terminal();
        Self {
            use_colors,
            show_status,
        }
    }

    /// Plain output.
    #[must_use]
    pub fn plain() -> Self {
        Self {
            use_colors: false,
            show_status: false,
        }
    }

    pub(crate) fn accent(self, text: &str) -> String {
        if self.use_colors {
            text.cyan().to_string()
        } else {
            text.to_string()
        }
    }

    pub(crate) fn muted(self, text: &str) -> String {
        if self.use_colors {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }

    pub(crate) fn severity(self, severity: NoteSeverity) -> String {
        let label = match severity {
            NoteSeverity::Error => "error",
            NoteSeverity::Warn => "warning",
            NoteSeverity::Info => "info",
            NoteSeverity::Unknown => "note",
        };
        if !self.use_colors {
            return label.to_string();
        }
        match severity {
            NoteSeverity::Error => label.red().bold().to_string(),
            NoteSeverity::Warn => label.yellow().to_string(),
            NoteSeverity::Info | NoteSeverity::Unknown => label.cyan().to_string(),
        }
    }

    /// `file:line:col: severity: message`
    #[must_use]
    pub fn format_note(self, note: &Note) -> String {
        format!(
            "{}: {}: {}",
            self.accent(&format!("{}:{}:{}", note.file.display(), note.line, note.col)),
            self.severity(note.severity),
            note.msg
        )
    }
}

/// [`EditorAdapter`] for the command line.
#[derive(Debug)]
pub struct TerminalEditor {
    style: TerminalStyle,
    popup: AtomicBool,
}

impl TerminalEditor {
    /// Create an adapter with the given style.
    #[must_use]
    pub fn new(style: TerminalStyle) -> Self {
        Self {
            style,
            popup: AtomicBool::new(false),
        }
    }

    /// Output settings.
    #[must_use]
    pub fn style(&self) -> TerminalStyle {
        self.style
    }

    fn print(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            tracing::debug!(error = %e, "Failed to write to stdout");
        }
    }
}

impl EditorAdapter for TerminalEditor {
    fn view_count(&self) -> usize {
        0
    }

    fn save(&self, _file: &Path) -> io::Result<()> {
        // Files are read from disk, there is no buffer to flush
        Ok(())
    }

    fn show_input_panel(
        &self,
        prompt: &str,
        _initial: &str,
        _on_done: InputCallback,
        on_cancel: CancelCallback,
    ) {
        tracing::debug!(prompt, "Input panels are not supported on the terminal");
        on_cancel();
    }

    fn show_choices(&self, items: Vec<String>, on_select: ChoiceCallback) {
        for (index, item) in items.iter().enumerate() {
            self.print(&format!("{} {item}", self.style.muted(&format!("{:>3}.", index + 1))));
        }
        on_select(None);
    }

    fn show_popup(&self, text: &str) {
        self.popup.store(true, Ordering::Release);
        self.status_message(text);
    }

    fn hide_popup(&self) {
        self.popup.store(false, Ordering::Release);
    }

    fn is_popup_visible(&self) -> bool {
        self.popup.load(Ordering::Acquire)
    }

    fn status_message(&self, message: &str) {
        if self.style.show_status {
            eprintln!("{}", self.style.muted(message));
        }
    }

    fn error_message(&self, message: &str) {
        if self.style.use_colors {
            eprintln!("{} {message}", "error:".red().bold());
        } else {
            eprintln!("error: {message}");
        }
    }

    fn open_location(&self, file: &Path, offset: usize) {
        self.print(&format!("{}:{offset}", file.display()));
    }

    fn open_uri(&self, uri: &str) {
        self.print(uri);
    }

    fn apply_diff(&self, diff: &Path) {
        self.print(&format!("diff written to {}", diff.display()));
    }

    fn show_notes(&self, notes: &[Note]) {
        for note in notes {
            self.print(&self.style.format_note(note));
        }
    }

    fn hide_notes(&self) {}

    fn rerun_completion(&self) {}
}
