//! Two-phase code completion.
//!
//! A fresh prefix first gets a small, fast synchronous query. When that
//! returns several candidates, an unlimited query runs in the background and
//! the editor is asked to re-run completion once it lands; the re-run for the
//! same prefix returns the refined list.
//!
//! After every call exactly one of these holds:
//! - `ignore_prefix` is set: the server had nothing for this root, so longer
//!   prefixes are answered locally with an empty list
//! - `current_prefix` is set: a refinement may be in flight
//! - neither is set
//!
//! A refinement carries the `(epoch, prefix)` it was started for and is
//! dropped on arrival if the session has moved on.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sextant_protocol::CompletionInfo;
use tracing::{debug, info, warn};

use crate::editor::{EditorAdapter, ViewSnapshot};
use crate::error::{Error, Result};

/// Popup shown while the refinement is in flight.
pub const WAIT_MESSAGE: &str = "Please wait while we query for more suggestions.";

/// Where completion was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionQuery {
    /// File being edited.
    pub file: PathBuf,
    /// Unsaved buffer contents, if any.
    pub contents: Option<String>,
    /// Cursor offset.
    pub offset: usize,
    /// Identifier text before the cursor.
    pub prefix: String,
}

impl CompletionQuery {
    /// Query for the primary cursor of a view. `None` for scratch buffers.
    #[must_use]
    pub fn from_view(view: &ViewSnapshot) -> Option<Self> {
        let file = view.file.clone()?;
        let offset = view.cursor();
        Some(Self {
            file,
            contents: view.buffer_override(),
            offset,
            prefix: view.prefix_at(offset),
        })
    }
}

/// Called with the result of a background query.
pub type RefinementCallback = Box<dyn FnOnce(Result<Vec<CompletionInfo>>) + Send + 'static>;

/// Fetches completion candidates from the server.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Fetch at most `max_results` candidates and wait for them.
    ///
    /// # Errors
    ///
    /// Returns the request error, including [`Error::Timeout`].
    async fn fetch(
        &self,
        query: &CompletionQuery,
        max_results: usize,
    ) -> Result<Vec<CompletionInfo>>;

    /// Start an unlimited fetch; `done` runs when it resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be submitted, in which case
    /// `done` is never called.
    fn fetch_in_background(&self, query: &CompletionQuery, done: RefinementCallback) -> Result<()>;
}

/// What the editor should show.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionOutcome {
    /// Candidates, best first.
    pub items: Vec<CompletionInfo>,
    /// Suppress the editor's own word and snippet completions.
    pub inhibit_default: bool,
    /// Close any visible wait popup.
    pub close_popup: bool,
}

impl CompletionOutcome {
    fn passthrough() -> Self {
        Self::default()
    }

    fn inhibiting(items: Vec<CompletionInfo>) -> Self {
        Self {
            items,
            inhibit_default: true,
            close_popup: false,
        }
    }
}

/// Completion bookkeeping of one session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionState {
    /// Prefix whose refinement may still be in flight.
    pub current_prefix: Option<String>,
    /// Root prefix the server had nothing for.
    pub ignore_prefix: Option<String>,
    /// Latest candidates.
    pub suggestions: Vec<CompletionInfo>,
    /// Bumped on every server query; refinements from older epochs are stale.
    pub epoch: u64,
}

/// Serialises completion requests of one session.
#[derive(Debug, Default)]
pub struct CompletionSession {
    gate: tokio::sync::Mutex<()>,
    state: Arc<Mutex<CompletionState>>,
}

fn lock(state: &Mutex<CompletionState>) -> MutexGuard<'_, CompletionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CompletionSession {
    /// Empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CompletionState {
        lock(&self.state).clone()
    }

    /// Forget everything. In-flight refinements become stale.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        let epoch = state.epoch + 1;
        *state = CompletionState {
            epoch,
            ..CompletionState::default()
        };
    }

    /// Answer a completion request.
    ///
    /// # Errors
    ///
    /// Returns connection-level errors from the fast query. A timeout or a
    /// server-side failure counts as "no candidates" instead.
    pub async fn complete(
        &self,
        backend: &dyn CompletionBackend,
        editor: Arc<dyn EditorAdapter>,
        query: CompletionQuery,
        fast_results: usize,
    ) -> Result<CompletionOutcome> {
        let _gate = self.gate.lock().await;
        let prefix = query.prefix.clone();

        let epoch = {
            let mut state = lock(&self.state);

            let extends_ignored = state
                .ignore_prefix
                .as_deref()
                .is_some_and(|ignore| prefix.starts_with(ignore));
            if extends_ignored {
                debug!(%prefix, "Prefix extends one with no completions");
                return Ok(CompletionOutcome::passthrough());
            }
            state.ignore_prefix = None;

            if state.current_prefix.as_deref() == Some(prefix.as_str()) {
                state.current_prefix = None;
                let items = state.suggestions.clone();
                drop(state);
                if editor.is_popup_visible() {
                    editor.hide_popup();
                }
                info!("Search for more suggestions either completed or was cancelled");
                return Ok(CompletionOutcome {
                    items,
                    inhibit_default: false,
                    close_popup: true,
                });
            }

            // A different prefix supersedes any refinement in flight
            state.current_prefix = None;
            state.epoch += 1;
            state.epoch
        };

        debug!(%prefix, offset = query.offset, epoch, "Querying fast completions");
        let items = match backend.fetch(&query, fast_results).await {
            Ok(items) => items,
            Err(e @ (Error::Timeout { .. } | Error::Server(_) | Error::UnexpectedReply { .. })) => {
                warn!(%prefix, error = %e, "Fast completion query failed");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut state = lock(&self.state);
        if state.epoch != epoch {
            debug!(%prefix, epoch, current_epoch = state.epoch, "Session reset during fast query");
            return Ok(CompletionOutcome::inhibiting(items));
        }
        if items.is_empty() {
            // An empty root would swallow every later prefix
            state.ignore_prefix = (!prefix.is_empty()).then_some(prefix);
            state.suggestions.clear();
            return Ok(CompletionOutcome::inhibiting(Vec::new()));
        }

        state.suggestions.clone_from(&items);
        if items.len() == 1 {
            return Ok(CompletionOutcome::inhibiting(items));
        }

        state.current_prefix = Some(prefix.clone());
        drop(state);

        let refine = refinement(Arc::clone(&self.state), Arc::clone(&editor), epoch, prefix);
        match backend.fetch_in_background(&query, refine) {
            Ok(()) => editor.show_popup(WAIT_MESSAGE),
            Err(e) => {
                warn!(error = %e, "Could not start completion refinement");
                let mut state = lock(&self.state);
                if state.epoch == epoch {
                    state.current_prefix = None;
                }
            }
        }
        Ok(CompletionOutcome::inhibiting(items))
    }
}

/// Continuation applying a refinement if it is still current.
fn refinement(
    state: Arc<Mutex<CompletionState>>,
    editor: Arc<dyn EditorAdapter>,
    epoch: u64,
    prefix: String,
) -> RefinementCallback {
    Box::new(move |result| {
        let items = match result {
            Ok(items) => items,
            Err(e) => {
                debug!(%prefix, epoch, error = %e, "Completion refinement failed");
                return;
            }
        };

        {
            let mut state = lock(&state);
            let fresh = state.epoch == epoch && state.current_prefix.as_deref() == Some(prefix.as_str());
            if !fresh {
                debug!(%prefix, epoch, current_epoch = state.epoch, "Dropping stale completion refinement");
                return;
            }
            debug!(%prefix, count = items.len(), "Completion refinement applied");
            state.suggestions = items;
        }
        editor.rerun_completion();
    })
}
