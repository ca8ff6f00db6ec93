//! The closed catalog of requests the client can send.
//!
//! Each variant knows its wire shape. Refactorings share a single
//! `RefactorReq` envelope on the wire and are distinguished by the
//! `typehint` of their `params` object.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// `maxResults` value that asks the server for an unbounded result set.
pub const UNLIMITED_RESULTS: usize = 0;

/// Default cap for symbol search and import suggestion lists.
pub const DEFAULT_SEARCH_RESULTS: usize = 10;

/// A source file reference with an optional in-memory override of its contents.
///
/// `contents` is set only when the editor buffer has unsaved changes; the
/// server reads the file from disk otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileInfo {
    /// Absolute path of the file.
    pub file: PathBuf,
    /// Unsaved buffer contents, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

impl SourceFileInfo {
    /// Reference a file on disk.
    pub fn on_disk(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            contents: None,
        }
    }

    /// Reference a file with an explicit buffer override.
    pub fn with_contents(file: impl Into<PathBuf>, contents: Option<String>) -> Self {
        Self {
            file: file.into(),
            contents,
        }
    }
}

/// Every request kind the client knows how to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask the analyzer to type-check files. Results arrive later as note events.
    TypeCheckFiles {
        /// Files to check.
        files: Vec<PathBuf>,
    },
    /// Look up the symbol under the cursor.
    SymbolAtPoint {
        /// File (and optional buffer override).
        file: SourceFileInfo,
        /// Character offset of the cursor.
        offset: usize,
    },
    /// Suggest imports for an unresolved name.
    ImportSuggestions {
        /// File being edited.
        file: PathBuf,
        /// Offset of the name.
        offset: usize,
        /// Names to resolve.
        names: Vec<String>,
        /// Maximum suggestions per name.
        max_results: usize,
    },
    /// Organise the imports of a file.
    OrganiseImports {
        /// File to organise.
        file: PathBuf,
    },
    /// Rename the symbol covering a range.
    RenameRefactor {
        /// Replacement identifier.
        new_name: String,
        /// Range start offset.
        start: usize,
        /// Range end offset.
        end: usize,
        /// File containing the symbol.
        file: PathBuf,
    },
    /// Inline a local value.
    InlineLocalRefactor {
        /// Range start offset.
        start: usize,
        /// Range end offset.
        end: usize,
        /// File containing the value.
        file: PathBuf,
    },
    /// Add an import for a fully qualified name.
    AddImport {
        /// File to edit.
        file: PathBuf,
        /// Name to import, e.g. `scala.collection.mutable.ListBuffer`.
        qualified_name: String,
    },
    /// Completion candidates at a point.
    Completions {
        /// File (and optional buffer override).
        file: SourceFileInfo,
        /// Character offset of the cursor.
        offset: usize,
        /// Result cap; `None` asks for everything.
        max_results: Option<usize>,
    },
    /// Type of the expression at a point.
    TypeAtPoint {
        /// File (and optional buffer override).
        file: SourceFileInfo,
        /// Character offset of the cursor.
        offset: usize,
    },
    /// Documentation URI for the symbol at a point.
    DocUriAtPoint {
        /// File (and optional buffer override).
        file: SourceFileInfo,
        /// Character offset of the cursor.
        offset: usize,
    },
    /// Search the indexed classpath for public symbols.
    PublicSymbolSearch {
        /// Search terms, matched in order.
        keywords: Vec<String>,
        /// Maximum number of results.
        max_results: usize,
    },
    /// Startup handshake: asks the server to identify itself.
    ConnectionInfo,
}

impl Request {
    /// Type-check a single file.
    pub fn type_check(file: impl Into<PathBuf>) -> Self {
        Self::TypeCheckFiles {
            files: vec![file.into()],
        }
    }

    /// Completions with an optional buffer override.
    pub fn completions(
        file: impl Into<PathBuf>,
        contents: Option<String>,
        offset: usize,
        max_results: Option<usize>,
    ) -> Self {
        Self::Completions {
            file: SourceFileInfo::with_contents(file, contents),
            offset,
            max_results,
        }
    }

    /// Public symbol search with the default result cap.
    pub fn symbol_search<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::PublicSymbolSearch {
            keywords: keywords.into_iter().map(Into::into).collect(),
            max_results: DEFAULT_SEARCH_RESULTS,
        }
    }

    /// Name of the request kind, used in logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TypeCheckFiles { .. } => "TypeCheckFiles",
            Self::SymbolAtPoint { .. } => "SymbolAtPoint",
            Self::ImportSuggestions { .. } => "ImportSuggestions",
            Self::OrganiseImports { .. } => "OrganiseImports",
            Self::RenameRefactor { .. } => "RenameRefactor",
            Self::InlineLocalRefactor { .. } => "InlineLocalRefactor",
            Self::AddImport { .. } => "AddImport",
            Self::Completions { .. } => "Completions",
            Self::TypeAtPoint { .. } => "TypeAtPoint",
            Self::DocUriAtPoint { .. } => "DocUriAtPoint",
            Self::PublicSymbolSearch { .. } => "PublicSymbolSearch",
            Self::ConnectionInfo => "ConnectionInfo",
        }
    }

    /// Build the JSON body of the `req` field.
    ///
    /// `call_id` doubles as the refactoring procedure id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] when a required field is missing or empty.
    pub fn to_wire(&self, call_id: u64) -> Result<Value> {
        let kind = self.kind();
        let value = match self {
            Self::TypeCheckFiles { files } => {
                if files.is_empty() {
                    return Err(Error::encode(kind, "no files given"));
                }
                for file in files {
                    require_path(kind, file)?;
                }
                let files: Vec<SourceFileInfo> =
                    files.iter().map(SourceFileInfo::on_disk).collect();
                json!({ "typehint": "TypecheckFilesReq", "files": files })
            }
            Self::SymbolAtPoint { file, offset } => {
                require_path(kind, &file.file)?;
                json!({ "typehint": "SymbolAtPointReq", "file": file, "point": offset })
            }
            Self::ImportSuggestions {
                file,
                offset,
                names,
                max_results,
            } => {
                require_path(kind, file)?;
                if names.iter().all(|n| n.trim().is_empty()) {
                    return Err(Error::encode(kind, "no symbol to resolve"));
                }
                json!({
                    "typehint": "ImportSuggestionsReq",
                    "file": file,
                    "point": offset,
                    "names": names,
                    "maxResults": max_results,
                })
            }
            Self::OrganiseImports { file } => {
                require_path(kind, file)?;
                refactor(
                    call_id,
                    json!({ "typehint": "OrganiseImportsRefactorDesc", "file": file }),
                )
            }
            Self::RenameRefactor {
                new_name,
                start,
                end,
                file,
            } => {
                require_path(kind, file)?;
                require_range(kind, *start, *end)?;
                if new_name.trim().is_empty() {
                    return Err(Error::encode(kind, "new name is empty"));
                }
                refactor(
                    call_id,
                    json!({
                        "typehint": "RenameRefactorDesc",
                        "newName": new_name,
                        "start": start,
                        "end": end,
                        "file": file,
                    }),
                )
            }
            Self::InlineLocalRefactor { start, end, file } => {
                require_path(kind, file)?;
                require_range(kind, *start, *end)?;
                refactor(
                    call_id,
                    json!({
                        "typehint": "InlineLocalRefactorDesc",
                        "file": file,
                        "start": start,
                        "end": end,
                    }),
                )
            }
            Self::AddImport {
                file,
                qualified_name,
            } => {
                require_path(kind, file)?;
                if qualified_name.trim().is_empty() {
                    return Err(Error::encode(kind, "qualified name is empty"));
                }
                refactor(
                    call_id,
                    json!({
                        "typehint": "AddImportRefactorDesc",
                        "qualifiedName": qualified_name,
                        "file": file,
                    }),
                )
            }
            Self::Completions {
                file,
                offset,
                max_results,
            } => {
                require_path(kind, &file.file)?;
                json!({
                    "typehint": "CompletionsReq",
                    "fileInfo": file,
                    "point": offset,
                    "maxResults": max_results.unwrap_or(UNLIMITED_RESULTS),
                    "caseSens": false,
                    "reload": true,
                })
            }
            Self::TypeAtPoint { file, offset } => {
                require_path(kind, &file.file)?;
                json!({
                    "typehint": "TypeAtPointReq",
                    "file": file,
                    "range": { "from": offset, "to": offset },
                })
            }
            Self::DocUriAtPoint { file, offset } => {
                require_path(kind, &file.file)?;
                json!({
                    "typehint": "DocUriAtPointReq",
                    "file": file,
                    "point": { "from": offset, "to": offset },
                })
            }
            Self::PublicSymbolSearch {
                keywords,
                max_results,
            } => {
                let keywords: Vec<&str> = keywords
                    .iter()
                    .map(|k| k.trim())
                    .filter(|k| !k.is_empty())
                    .collect();
                if keywords.is_empty() {
                    return Err(Error::encode(kind, "no search terms"));
                }
                json!({
                    "typehint": "PublicSymbolSearchReq",
                    "keywords": keywords,
                    "maxResults": max_results,
                })
            }
            Self::ConnectionInfo => json!({ "typehint": "ConnectionInfoReq" }),
        };
        Ok(value)
    }
}

fn refactor(proc_id: u64, params: Value) -> Value {
    json!({
        "typehint": "RefactorReq",
        "procId": proc_id,
        "params": params,
        "interactive": false,
    })
}

fn require_path(kind: &'static str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::encode(kind, "file path is empty"));
    }
    Ok(())
}

fn require_range(kind: &'static str, start: usize, end: usize) -> Result<()> {
    if start > end {
        return Err(Error::encode(
            kind,
            format!("range start {start} is after end {end}"),
        ));
    }
    Ok(())
}
