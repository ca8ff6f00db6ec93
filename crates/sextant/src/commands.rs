//! Editor commands and event hooks.
//!
//! Every command has an `is_enabled` check for the editor's menus and a `run`
//! that repeats the check, because readiness may change between the two.
//! A failed check at run time is returned as [`Error::NotConnected`] or
//! [`Error::NotReady`] and nothing is sent.
//!
//! User mistakes (several cursors, an empty selection, a blank name) are
//! reported with a status message and never reach the server.

use std::path::PathBuf;
use std::sync::Arc;

use sextant_protocol::{Request, SourceFileInfo};
use sextant_protocol::request::DEFAULT_SEARCH_RESULTS;
use tracing::debug;

use crate::completion::CompletionOutcome;
use crate::editor::{SourceKind, ViewSnapshot};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::outcome::Origin;
use crate::readiness::Subsystem;

const MULTIPLE_CURSORS: &str = "Multiple cursors are not supported by this command";

/// Check that the environment exists, is connected and has `subsystem` ready.
fn gate(env: Option<&Arc<Environment>>, subsystem: Subsystem) -> Result<&Arc<Environment>> {
    let env = env.ok_or(Error::NotConnected)?;
    if !env.is_connected() {
        return Err(Error::NotConnected);
    }
    env.readiness().require(subsystem)?;
    Ok(env)
}

/// The file with the buffer contents when they are unsaved.
fn file_info(view: &ViewSnapshot, file: PathBuf) -> SourceFileInfo {
    SourceFileInfo::with_contents(file, view.buffer_override())
}

/// Report a user mistake and stop.
fn refuse(env: &Environment, message: &str) -> Result<()> {
    debug!(window = %env.window(), message, "Command refused");
    env.status_message(message);
    Ok(())
}

/// Commands that act on a whole window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCommand {
    /// Connect to an analysis server.
    Startup,
    /// Disconnect and stop the server.
    Shutdown,
    /// Show or hide compiler notes.
    ToggleErrors,
    /// Search the classpath for a symbol.
    ClasspathSearch,
}

impl WindowCommand {
    /// Command name as registered with the editor.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Startup => "sextant_startup",
            Self::Shutdown => "sextant_shutdown",
            Self::ToggleErrors => "sextant_toggle_errors",
            Self::ClasspathSearch => "sextant_classpath_search",
        }
    }

    /// Whether the command is available right now.
    #[must_use]
    pub fn is_enabled(self, env: Option<&Arc<Environment>>) -> bool {
        let Some(env) = env else {
            return false;
        };
        match self {
            Self::Startup => !env.is_running(),
            Self::Shutdown => env.is_running(),
            Self::ToggleErrors => {
                env.editor().view_count() > 0 && env.is_ready(Subsystem::Analyzer)
            }
            Self::ClasspathSearch => env.is_ready(Subsystem::Indexer),
        }
    }

    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns the gating error if the command is not available, or the
    /// startup error for [`WindowCommand::Startup`].
    pub async fn run(self, env: Option<&Arc<Environment>>) -> Result<()> {
        debug!(command = self.name(), "Running window command");
        match self {
            Self::Startup => {
                let env = env.ok_or(Error::NotConnected)?;
                env.startup().await
            }
            Self::Shutdown => {
                let env = env.ok_or(Error::NotConnected)?;
                env.shutdown().await;
                Ok(())
            }
            Self::ToggleErrors => {
                let env = gate(env, Subsystem::Analyzer)?;
                env.toggle_errors();
                Ok(())
            }
            Self::ClasspathSearch => {
                let env = gate(env, Subsystem::Indexer)?;
                let weak = Arc::downgrade(env);
                env.editor().show_input_panel(
                    "Search: ",
                    "",
                    Box::new(move |terms| {
                        let Some(env) = weak.upgrade() else {
                            return;
                        };
                        if let Err(e) = classpath_search(&env, &terms) {
                            env.status_message(&e.to_string());
                        }
                    }),
                    Box::new(|| {}),
                );
                Ok(())
            }
        }
    }
}

/// Issue a symbol search for space-separated `terms`.
///
/// # Errors
///
/// Returns [`Error::NotReady`] while the indexer is busy and
/// [`Error::NotConnected`] without a connection.
pub fn classpath_search(env: &Arc<Environment>, terms: &str) -> Result<()> {
    let keywords: Vec<&str> = terms.split_whitespace().collect();
    if keywords.is_empty() {
        return refuse(env, "Enter at least one search term");
    }
    gate(Some(env), Subsystem::Indexer)?;
    env.run_in(
        Request::PublicSymbolSearch {
            keywords: keywords.into_iter().map(str::to_string).collect(),
            max_results: DEFAULT_SEARCH_RESULTS,
        },
        Origin::ClasspathSearch,
    )?;
    Ok(())
}

/// Commands that act on the text of one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCommand {
    /// Jump to the declaration of the symbol at point.
    GoToDefinition,
    /// Suggest imports for the word at point.
    AddImport,
    /// Organise the file's imports.
    OrganiseImports,
    /// Rename the selected symbol.
    Rename,
    /// Inline the local value at point.
    InlineLocal,
    /// Show the type at point.
    ShowType,
    /// Open documentation for the symbol at point.
    BrowseDocAtPoint,
}

impl TextCommand {
    /// Command name as registered with the editor.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::GoToDefinition => "sextant_go_to_definition",
            Self::AddImport => "sextant_add_import",
            Self::OrganiseImports => "sextant_organise_imports",
            Self::Rename => "sextant_rename",
            Self::InlineLocal => "sextant_inline_local",
            Self::ShowType => "sextant_show_type",
            Self::BrowseDocAtPoint => "sextant_browse_doc_at_point",
        }
    }

    /// Most selections the command accepts.
    fn max_selections(self) -> Option<usize> {
        match self {
            Self::GoToDefinition => Some(2),
            Self::ShowType | Self::BrowseDocAtPoint => Some(1),
            _ => None,
        }
    }

    /// Whether the command is available right now.
    #[must_use]
    pub fn is_enabled(self, env: Option<&Arc<Environment>>, view: &ViewSnapshot) -> bool {
        view.file.is_some() && gate(env, Subsystem::Indexer).is_ok()
    }

    /// Run the command against `view`.
    ///
    /// `target` overrides the position of the primary selection, as when the
    /// command is invoked from a mouse binding.
    ///
    /// # Errors
    ///
    /// Returns the gating error if the command is not available, an I/O error
    /// if saving the buffer fails, and encoding errors from the request.
    pub fn run(
        self,
        env: Option<&Arc<Environment>>,
        view: &ViewSnapshot,
        target: Option<usize>,
    ) -> Result<()> {
        let env = gate(env, Subsystem::Indexer)?;
        let Some(file) = view.file.clone() else {
            return refuse(env, "This buffer has no file");
        };
        if self
            .max_selections()
            .is_some_and(|max| view.selections.len() > max)
        {
            return refuse(env, MULTIPLE_CURSORS);
        }

        let pos = target
            .or_else(|| view.selections.first().map(|s| s.start))
            .unwrap_or(0);
        debug!(command = self.name(), file = %file.display(), pos, "Running text command");

        match self {
            Self::GoToDefinition => {
                env.run_in(
                    Request::SymbolAtPoint {
                        file: file_info(view, file),
                        offset: pos,
                    },
                    Origin::GoToDefinition,
                )?;
            }
            Self::ShowType => {
                env.run_in(
                    Request::TypeAtPoint {
                        file: file_info(view, file),
                        offset: pos,
                    },
                    Origin::ShowType,
                )?;
            }
            Self::BrowseDocAtPoint => {
                env.run_in(
                    Request::DocUriAtPoint {
                        file: file_info(view, file),
                        offset: pos,
                    },
                    Origin::BrowseDoc,
                )?;
            }
            Self::AddImport => {
                let Some(word) = view.word_at(pos) else {
                    return refuse(env, "Place the cursor on a name to import");
                };
                if view.dirty {
                    env.editor().save(&file)?;
                }
                env.run_in(
                    Request::ImportSuggestions {
                        file: file.clone(),
                        offset: pos,
                        names: vec![view.text_in(word)],
                        max_results: DEFAULT_SEARCH_RESULTS,
                    },
                    Origin::ImportSuggestions { file },
                )?;
            }
            Self::OrganiseImports => {
                if view.dirty {
                    env.editor().save(&file)?;
                }
                env.run_in(Request::OrganiseImports { file }, Origin::Refactor)?;
            }
            Self::Rename => {
                let [selection] = view.selections.as_slice() else {
                    return refuse(env, "Select a single region to rename");
                };
                if selection.is_empty() {
                    return refuse(env, "Select the symbol to rename");
                }
                let (start, end) = (selection.start, selection.end);
                let initial = view.text_in(*selection);
                let weak = Arc::downgrade(env);
                env.editor().show_input_panel(
                    "Rename to: ",
                    &initial,
                    Box::new(move |new_name| {
                        let Some(env) = weak.upgrade() else {
                            return;
                        };
                        if let Err(e) = rename(&env, file, start, end, &new_name) {
                            env.status_message(&e.to_string());
                        }
                    }),
                    Box::new(|| {}),
                );
            }
            Self::InlineLocal => {
                let Some(word) = view.word_at(pos) else {
                    return refuse(env, "Place the cursor on a local value to inline");
                };
                env.run_in(
                    Request::InlineLocalRefactor {
                        start: word.start,
                        end: word.end,
                        file,
                    },
                    Origin::Refactor,
                )?;
            }
        }
        Ok(())
    }
}

/// Issue a rename once the user has entered the new name.
///
/// # Errors
///
/// Returns the gating error if the indexer became unavailable.
pub fn rename(
    env: &Arc<Environment>,
    file: PathBuf,
    start: usize,
    end: usize,
    new_name: &str,
) -> Result<()> {
    let new_name = new_name.trim();
    if new_name.is_empty() {
        return refuse(env, "The new name is empty");
    }
    gate(Some(env), Subsystem::Indexer)?;
    env.run_in(
        Request::RenameRefactor {
            new_name: new_name.to_string(),
            start,
            end,
            file,
        },
        Origin::Refactor,
    )?;
    Ok(())
}

/// Type-check a freshly opened source file. Returns `true` if a check was sent.
///
/// # Errors
///
/// Returns encoding or connection errors from the submission.
pub fn on_load(env: Option<&Arc<Environment>>, view: &ViewSnapshot) -> Result<bool> {
    type_check(env, view)
}

/// Type-check a source file after it was saved. Returns `true` if a check was
/// sent.
///
/// # Errors
///
/// Returns encoding or connection errors from the submission.
pub fn on_post_save(env: Option<&Arc<Environment>>, view: &ViewSnapshot) -> Result<bool> {
    type_check(env, view)
}

fn type_check(env: Option<&Arc<Environment>>, view: &ViewSnapshot) -> Result<bool> {
    let Some(file) = view.file.as_ref() else {
        return Ok(false);
    };
    if SourceKind::detect(file).is_none() {
        return Ok(false);
    }
    let Ok(env) = gate(env, Subsystem::Analyzer) else {
        return Ok(false);
    };
    env.run_in(Request::type_check(file.clone()), Origin::TypeCheck)?;
    Ok(true)
}

/// Completion hook. `None` means the editor should complete on its own.
///
/// # Errors
///
/// Returns connection errors from the fast query.
pub async fn on_query_completions(
    env: Option<&Arc<Environment>>,
    view: &ViewSnapshot,
) -> Result<Option<CompletionOutcome>> {
    if view.source_kind().is_none() {
        return Ok(None);
    }
    let Ok(env) = gate(env, Subsystem::Indexer) else {
        return Ok(None);
    };
    env.complete(view).await.map(Some)
}
