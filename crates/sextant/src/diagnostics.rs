//! Compiler notes pushed by the server.
//!
//! Notes arrive as events per language. A full batch replaces every earlier
//! note of its language, a partial batch adds to them and a clear event drops
//! them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sextant_protocol::{Note, NoteList, NoteSeverity, ServerEvent};
use tracing::debug;

use crate::editor::SourceKind;

/// Note counts by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoteCounts {
    /// Errors.
    pub errors: usize,
    /// Warnings.
    pub warnings: usize,
    /// Everything else.
    pub infos: usize,
}

/// Current notes of one session.
#[derive(Debug, Default)]
pub struct Diagnostics {
    notes: Mutex<HashMap<SourceKind, Vec<Note>>>,
    show_errors: AtomicBool,
}

impl Diagnostics {
    /// Empty store with drawing disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SourceKind, Vec<Note>>> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a server event. Returns `true` if the notes changed.
    pub fn apply(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::NewScalaNotes(list) => self.add(SourceKind::Primary, list),
            ServerEvent::NewJavaNotes(list) => self.add(SourceKind::Secondary, list),
            ServerEvent::ClearAllScalaNotes => self.clear_kind(SourceKind::Primary),
            ServerEvent::ClearAllJavaNotes => self.clear_kind(SourceKind::Secondary),
            _ => false,
        }
    }

    fn add(&self, kind: SourceKind, list: &NoteList) -> bool {
        let mut notes = self.lock();
        let entry = notes.entry(kind).or_default();
        if list.is_full {
            entry.clear();
        }
        entry.extend(list.notes.iter().cloned());
        debug!(?kind, full = list.is_full, added = list.notes.len(), total = entry.len(), "Notes updated");
        true
    }

    fn clear_kind(&self, kind: SourceKind) -> bool {
        self.lock().remove(&kind).is_some_and(|notes| !notes.is_empty())
    }

    /// Drop every note.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Every note, ordered by file and position.
    #[must_use]
    pub fn all(&self) -> Vec<Note> {
        let mut all: Vec<Note> = self.lock().values().flatten().cloned().collect();
        all.sort_by(|a, b| a.file.cmp(&b.file).then(a.beg.cmp(&b.beg)));
        all
    }

    /// Notes for one file, ordered by position.
    #[must_use]
    pub fn notes_for(&self, file: &Path) -> Vec<Note> {
        let mut notes: Vec<Note> = self
            .lock()
            .values()
            .flatten()
            .filter(|note| note.file == file)
            .cloned()
            .collect();
        notes.sort_by_key(|note| note.beg);
        notes
    }

    /// Totals by severity.
    #[must_use]
    pub fn counts(&self) -> NoteCounts {
        let mut counts = NoteCounts::default();
        for note in self.lock().values().flatten() {
            match note.severity {
                NoteSeverity::Error => counts.errors += 1,
                NoteSeverity::Warn => counts.warnings += 1,
                NoteSeverity::Info | NoteSeverity::Unknown => counts.infos += 1,
            }
        }
        counts
    }

    /// Whether the editor should draw notes.
    #[must_use]
    pub fn show_errors(&self) -> bool {
        self.show_errors.load(Ordering::Acquire)
    }

    /// Flip drawing on or off. Returns the new value.
    pub fn toggle_show_errors(&self) -> bool {
        !self.show_errors.fetch_xor(true, Ordering::AcqRel)
    }
}
