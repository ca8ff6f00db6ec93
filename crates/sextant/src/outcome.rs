//! Presenting replies of fire-and-forget commands.
//!
//! Commands submitted with [`Environment::run_in`] never hand a value back to
//! their caller. Their replies land here, on the receive loop, and are shown
//! through the editor according to the [`Origin`] of the request.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use sextant_protocol::{Request, ResponsePayload, SymbolSearchResult};
use tracing::{debug, trace, warn};

use crate::environment::Environment;
use crate::error::{Error, Result};

/// Which command a reply belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A type-check; notes arrive later as events.
    TypeCheck,
    /// Jump to the declaration of the symbol at point.
    GoToDefinition,
    /// Show the type at point.
    ShowType,
    /// Open the documentation for the symbol at point.
    BrowseDoc,
    /// Offer imports for a name in `file`.
    ImportSuggestions {
        /// File that receives the chosen import.
        file: PathBuf,
    },
    /// Offer classpath symbols to jump to.
    ClasspathSearch,
    /// Apply the edits of a refactoring.
    Refactor,
}

/// Show a reply, or the error that replaced it.
pub fn present(env: &Arc<Environment>, origin: &Origin, result: Result<ResponsePayload>) {
    let payload = match result {
        Ok(payload) => payload,
        Err(Error::ConnectionLost) => {
            debug!(window = %env.window(), ?origin, "Reply lost with the connection");
            return;
        }
        Err(e) => {
            env.error_message(&e.to_string());
            return;
        }
    };

    match (origin, payload) {
        (Origin::TypeCheck, payload) => {
            trace!(typehint = payload.typehint(), "Type-check accepted");
        }

        (Origin::GoToDefinition, ResponsePayload::Symbol(symbol)) => match symbol.decl_pos {
            Some(pos) => env.editor().open_location(&pos.file, pos.offset),
            None => env.status_message(&format!("No definition found for {}", symbol.name)),
        },
        (Origin::GoToDefinition, ResponsePayload::False) => {
            env.status_message("No definition found");
        }

        (Origin::ShowType, ResponsePayload::Type(info)) => {
            let shown = if info.full_name.is_empty() {
                info.name
            } else {
                info.full_name
            };
            env.status_message(&shown);
        }
        (Origin::ShowType, ResponsePayload::False) => env.status_message("No type found"),

        (Origin::BrowseDoc, ResponsePayload::Text { text }) => env.editor().open_uri(&text),
        (Origin::BrowseDoc, ResponsePayload::False) => {
            env.status_message("No documentation found");
        }

        (Origin::ImportSuggestions { file }, ResponsePayload::ImportSuggestions(suggestions)) => {
            let candidates: Vec<SymbolSearchResult> =
                suggestions.sym_lists.into_iter().flatten().collect();
            offer_imports(env, file.clone(), candidates);
        }

        (Origin::ClasspathSearch, ResponsePayload::SymbolSearch(results)) => {
            offer_symbols(env, results.syms);
        }

        (Origin::Refactor, ResponsePayload::RefactorDiff(effect)) => {
            debug!(proc_id = effect.proc_id, diff = %effect.diff.display(), "Applying refactoring");
            env.editor().apply_diff(&effect.diff);
            env.status_message("Refactoring applied");
        }
        (Origin::Refactor, ResponsePayload::RefactorFailure(failure)) => {
            env.error_message(&format!("Refactoring failed: {}", failure.reason));
        }
        (Origin::Refactor, ResponsePayload::Void | ResponsePayload::True) => {
            env.status_message("Refactoring applied");
        }

        (origin, payload) => {
            warn!(?origin, typehint = payload.typehint(), "Ignoring unexpected reply");
        }
    }
}

/// One line per search hit: `name (kind)`.
fn describe(result: &SymbolSearchResult) -> String {
    match &result.decl_as {
        Some(kind) => format!("{} ({kind})", result.name),
        None => result.name.clone(),
    }
}

fn offer_imports(env: &Arc<Environment>, file: PathBuf, candidates: Vec<SymbolSearchResult>) {
    if candidates.is_empty() {
        env.status_message("No import suggestions found");
        return;
    }

    let items = candidates.iter().map(describe).collect();
    let weak: Weak<Environment> = Arc::downgrade(env);
    env.editor().show_choices(
        items,
        Box::new(move |choice| {
            let (Some(index), Some(env)) = (choice, weak.upgrade()) else {
                return;
            };
            let Some(chosen) = candidates.into_iter().nth(index) else {
                return;
            };
            let request = Request::AddImport {
                file,
                qualified_name: chosen.name,
            };
            if let Err(e) = env.run_in(request, Origin::Refactor) {
                env.error_message(&e.to_string());
            }
        }),
    );
}

fn offer_symbols(env: &Arc<Environment>, symbols: Vec<SymbolSearchResult>) {
    if symbols.is_empty() {
        env.status_message("No symbols found");
        return;
    }

    let items = symbols.iter().map(describe).collect();
    let weak: Weak<Environment> = Arc::downgrade(env);
    env.editor().show_choices(
        items,
        Box::new(move |choice| {
            let (Some(index), Some(env)) = (choice, weak.upgrade()) else {
                return;
            };
            let Some(chosen) = symbols.into_iter().nth(index) else {
                return;
            };
            match chosen.pos {
                Some(pos) => env.editor().open_location(&pos.file, pos.offset),
                None => env.status_message(&format!("No source available for {}", chosen.name)),
            }
        }),
    );
}
