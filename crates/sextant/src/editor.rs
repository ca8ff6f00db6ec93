//! The seam between the client and the host editor.
//!
//! Everything the client shows or asks the user goes through
//! [`EditorAdapter`]. Buffer state is handed in as a [`ViewSnapshot`] taken
//! at the moment a command runs.

use std::path::{Path, PathBuf};

use sextant_protocol::{Note, SourceFileInfo};

/// Identifies one editor window. Each window owns at most one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Source languages the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Scala (`.scala`).
    Primary,
    /// Java (`.java`).
    Secondary,
}

impl SourceKind {
    /// Classify a path by extension. Anything else is not a source file.
    #[must_use]
    pub fn detect(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("scala") => Some(Self::Primary),
            Some("java") => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// A selected range in character offsets. `start == end` is a bare cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    /// Start offset.
    pub start: usize,
    /// End offset, never before `start`.
    pub end: usize,
}

impl Selection {
    /// A range, normalised so that `start <= end`.
    #[must_use]
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// A bare cursor.
    #[must_use]
    pub fn cursor(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The state of an editor view at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewSnapshot {
    /// File backing the view, `None` for scratch buffers.
    pub file: Option<PathBuf>,
    /// Full buffer text.
    pub text: String,
    /// Whether the buffer has unsaved changes.
    pub dirty: bool,
    /// Selections, primary first.
    pub selections: Vec<Selection>,
}

impl ViewSnapshot {
    /// Snapshot of a saved file with a single cursor.
    pub fn new(file: impl Into<PathBuf>, text: impl Into<String>, cursor: usize) -> Self {
        Self {
            file: Some(file.into()),
            text: text.into(),
            dirty: false,
            selections: vec![Selection::cursor(cursor)],
        }
    }

    /// Mark the buffer as modified.
    #[must_use]
    pub fn dirty(mut self) -> Self {
        self.dirty = true;
        self
    }

    /// Replace the selections.
    #[must_use]
    pub fn with_selections(mut self, selections: Vec<Selection>) -> Self {
        self.selections = selections;
        self
    }

    /// Source kind of the backing file.
    #[must_use]
    pub fn source_kind(&self) -> Option<SourceKind> {
        self.file.as_deref().and_then(SourceKind::detect)
    }

    /// Buffer contents to send with a request: only when unsaved.
    #[must_use]
    pub fn buffer_override(&self) -> Option<String> {
        self.dirty.then(|| self.text.clone())
    }

    /// File reference carrying the buffer override.
    #[must_use]
    pub fn source_file_info(&self) -> Option<SourceFileInfo> {
        self.file
            .as_ref()
            .map(|file| SourceFileInfo::with_contents(file.clone(), self.buffer_override()))
    }

    /// Offset of the primary cursor. The end of the first selection.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.selections.first().map_or(0, |s| s.end)
    }

    /// Range of the identifier around `offset`, if any.
    #[must_use]
    pub fn word_at(&self, offset: usize) -> Option<Selection> {
        let chars: Vec<char> = self.text.chars().collect();
        let offset = offset.min(chars.len());

        let mut start = offset;
        while start > 0 && is_word_char(chars[start - 1]) {
            start -= 1;
        }
        let mut end = offset;
        while end < chars.len() && is_word_char(chars[end]) {
            end += 1;
        }

        (start < end).then_some(Selection { start, end })
    }

    /// Text inside a range.
    #[must_use]
    pub fn text_in(&self, range: Selection) -> String {
        self.text
            .chars()
            .skip(range.start)
            .take(range.end - range.start)
            .collect()
    }

    /// Identifier characters immediately before `offset`.
    #[must_use]
    pub fn prefix_at(&self, offset: usize) -> String {
        self.word_at(offset)
            .map(|word| self.text_in(Selection::new(word.start, offset.max(word.start))))
            .unwrap_or_default()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Called with the text the user entered.
pub type InputCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// Called when the user dismisses an input panel.
pub type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

/// Called with the index of the chosen item, `None` if the list was dismissed.
pub type ChoiceCallback = Box<dyn FnOnce(Option<usize>) + Send + 'static>;

/// Operations the client needs from the host editor.
///
/// Implementations must be callable from any task; replies are presented
/// from the connection's receive loop.
pub trait EditorAdapter: Send + Sync {
    /// Number of open views in the window.
    fn view_count(&self) -> usize;

    /// Save the buffer backing `file`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the buffer cannot be written.
    fn save(&self, file: &Path) -> std::io::Result<()>;

    /// Ask the user for a line of text.
    fn show_input_panel(
        &self,
        prompt: &str,
        initial: &str,
        on_done: InputCallback,
        on_cancel: CancelCallback,
    );

    /// Let the user pick one item.
    fn show_choices(&self, items: Vec<String>, on_select: ChoiceCallback);

    /// Show a transient popup near the cursor.
    fn show_popup(&self, text: &str);

    /// Hide the popup, if visible.
    fn hide_popup(&self);

    /// Whether a popup is currently visible.
    fn is_popup_visible(&self) -> bool;

    /// Show a status-bar message.
    fn status_message(&self, message: &str);

    /// Show an error to the user.
    fn error_message(&self, message: &str);

    /// Open `file` with the cursor at `offset`.
    fn open_location(&self, file: &Path, offset: usize);

    /// Open a URI in the browser.
    fn open_uri(&self, uri: &str);

    /// Apply the unified diff stored at `diff` to the open buffers.
    fn apply_diff(&self, diff: &Path);

    /// Draw diagnostics.
    fn show_notes(&self, notes: &[Note]);

    /// Remove all drawn diagnostics.
    fn hide_notes(&self);

    /// Trigger the completion popup again.
    fn rerun_completion(&self);
}
