//! Reply payloads and unsolicited server events.
//!
//! Both are discriminated by a `typehint` field. Unknown object fields are
//! ignored and unknown typehints decode to an `Unrecognized` variant, so a
//! newer server can add messages without breaking older clients.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A position inside a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    /// File containing the position.
    pub file: PathBuf,
    /// Character offset within the file.
    #[serde(default)]
    pub offset: usize,
}

/// Description of a type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInfo {
    /// Short name, e.g. `List[Int]`.
    pub name: String,
    /// Fully qualified name.
    #[serde(default)]
    pub full_name: String,
    /// Declaration kind (`class`, `trait`, `object`, ...).
    #[serde(default)]
    pub decl_as: Option<String>,
}

/// Information about the symbol under the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    /// Fully qualified name.
    pub name: String,
    /// Name as written at the use site.
    #[serde(default)]
    pub local_name: String,
    /// Type of the symbol.
    #[serde(default, rename = "type")]
    pub type_info: Option<TypeInfo>,
    /// Where the symbol is declared, when the source is available.
    #[serde(default)]
    pub decl_pos: Option<SourcePosition>,
    /// Whether the symbol is a method.
    #[serde(default)]
    pub is_callable: bool,
}

/// One completion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionInfo {
    /// Identifier shown to the user.
    pub name: String,
    /// Type of the candidate.
    #[serde(default)]
    pub type_info: Option<TypeInfo>,
    /// Server-side ranking, higher is better.
    #[serde(default)]
    pub relevance: i32,
    /// Text to insert when it differs from `name`.
    #[serde(default)]
    pub to_insert: Option<String>,
    /// Whether the candidate is an infix operator.
    #[serde(default)]
    pub is_infix: bool,
}

impl CompletionInfo {
    /// Candidate with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_info: None,
            relevance: 0,
            to_insert: None,
            is_infix: false,
        }
    }

    /// Text the editor should insert.
    #[must_use]
    pub fn insert_text(&self) -> &str {
        self.to_insert.as_deref().unwrap_or(&self.name)
    }
}

/// Completion candidates for a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionInfoList {
    /// The prefix the server completed.
    #[serde(default)]
    pub prefix: String,
    /// Candidates, best first.
    #[serde(default)]
    pub completions: Vec<CompletionInfo>,
}

/// One symbol search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSearchResult {
    /// Fully qualified name.
    pub name: String,
    /// Unqualified name.
    #[serde(default)]
    pub local_name: String,
    /// Declaration kind.
    #[serde(default)]
    pub decl_as: Option<String>,
    /// Declaration site, when known.
    #[serde(default)]
    pub pos: Option<SourcePosition>,
}

/// Result of a public symbol search.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SymbolSearchResults {
    /// Matches, best first.
    #[serde(default)]
    pub syms: Vec<SymbolSearchResult>,
}

/// Import candidates, one list per requested name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSuggestions {
    /// Candidates for each name in request order.
    #[serde(default)]
    pub sym_lists: Vec<Vec<SymbolSearchResult>>,
}

/// A refactoring that succeeded; the edits are in a unified diff file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactorDiffEffect {
    /// Procedure id (the call id of the request).
    pub proc_id: u64,
    /// Which refactoring produced the diff.
    #[serde(default)]
    pub refactor_type: String,
    /// Path of the diff file written by the server.
    pub diff: PathBuf,
}

/// A refactoring the server refused or could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactorFailure {
    /// Procedure id (the call id of the request).
    pub proc_id: u64,
    /// Human-readable reason.
    pub reason: String,
}

/// Server implementation details.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImplementationInfo {
    /// Server name.
    pub name: String,
}

/// Reply to the startup handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Server process id, if reported.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Server implementation.
    #[serde(default)]
    pub implementation: ImplementationInfo,
    /// Protocol version string.
    #[serde(default)]
    pub version: String,
}

/// Payload of a reply correlated to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typehint")]
pub enum ResponsePayload {
    /// Request accepted, nothing to return.
    #[serde(rename = "VoidResponse")]
    Void,
    /// Boolean true.
    #[serde(rename = "TrueResponse")]
    True,
    /// Boolean false; also used for "nothing found".
    #[serde(rename = "FalseResponse")]
    False,
    /// A bare string (e.g. a documentation URI).
    #[serde(rename = "StringResponse")]
    Text {
        /// The string value.
        text: String,
    },
    /// Symbol at point.
    #[serde(rename = "SymbolInfo")]
    Symbol(SymbolInfo),
    /// Type at point.
    #[serde(rename = "BasicTypeInfo", alias = "ArrowTypeInfo")]
    Type(TypeInfo),
    /// Completion candidates.
    #[serde(rename = "CompletionInfoList")]
    Completions(CompletionInfoList),
    /// Import candidates.
    #[serde(rename = "ImportSuggestions")]
    ImportSuggestions(ImportSuggestions),
    /// Symbol search hits.
    #[serde(rename = "SymbolSearchResults")]
    SymbolSearch(SymbolSearchResults),
    /// A successful refactoring.
    #[serde(rename = "RefactorDiffEffect")]
    RefactorDiff(RefactorDiffEffect),
    /// A failed refactoring.
    #[serde(rename = "RefactorFailure")]
    RefactorFailure(RefactorFailure),
    /// Handshake reply.
    #[serde(rename = "ConnectionInfo")]
    ConnectionInfo(ConnectionInfo),
    /// The server failed to process the request.
    #[serde(rename = "EnsimeServerError")]
    ServerError {
        /// What went wrong.
        description: String,
    },
    /// A payload this client does not know about.
    #[serde(other)]
    Unrecognized,
}

impl ResponsePayload {
    /// Wire name of the payload.
    #[must_use]
    pub fn typehint(&self) -> &'static str {
        match self {
            Self::Void => "VoidResponse",
            Self::True => "TrueResponse",
            Self::False => "FalseResponse",
            Self::Text { .. } => "StringResponse",
            Self::Symbol(_) => "SymbolInfo",
            Self::Type(_) => "BasicTypeInfo",
            Self::Completions(_) => "CompletionInfoList",
            Self::ImportSuggestions(_) => "ImportSuggestions",
            Self::SymbolSearch(_) => "SymbolSearchResults",
            Self::RefactorDiff(_) => "RefactorDiffEffect",
            Self::RefactorFailure(_) => "RefactorFailure",
            Self::ConnectionInfo(_) => "ConnectionInfo",
            Self::ServerError { .. } => "EnsimeServerError",
            Self::Unrecognized => "Unrecognized",
        }
    }
}

/// Severity of a compiler note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typehint")]
pub enum NoteSeverity {
    /// Compilation error.
    #[serde(rename = "NoteError")]
    Error,
    /// Warning.
    #[serde(rename = "NoteWarn")]
    Warn,
    /// Informational.
    #[serde(rename = "NoteInfo")]
    Info,
    /// Severity this client does not know about.
    #[serde(other)]
    Unknown,
}

/// A compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// File the note applies to.
    pub file: PathBuf,
    /// Message text.
    pub msg: String,
    /// Severity.
    pub severity: NoteSeverity,
    /// Start offset.
    #[serde(default)]
    pub beg: usize,
    /// End offset.
    #[serde(default)]
    pub end: usize,
    /// 1-based line.
    #[serde(default)]
    pub line: u32,
    /// 1-based column.
    #[serde(default)]
    pub col: u32,
}

/// A batch of notes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteList {
    /// Whether this batch replaces every earlier note of its language.
    #[serde(default)]
    pub is_full: bool,
    /// The notes.
    #[serde(default)]
    pub notes: Vec<Note>,
}

/// Unsolicited events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typehint")]
pub enum ServerEvent {
    /// The presentation compiler can answer type queries.
    #[serde(rename = "AnalyzerReadyEvent")]
    AnalyzerReady,
    /// The classpath index can answer search queries.
    #[serde(rename = "IndexerReadyEvent")]
    IndexerReady,
    /// A full type-check finished.
    #[serde(rename = "FullTypeCheckCompleteEvent")]
    FullTypeCheckComplete,
    /// The presentation compiler restarted.
    #[serde(rename = "CompilerRestartedEvent")]
    CompilerRestarted,
    /// Drop all Scala notes.
    #[serde(rename = "ClearAllScalaNotesEvent")]
    ClearAllScalaNotes,
    /// Drop all Java notes.
    #[serde(rename = "ClearAllJavaNotesEvent")]
    ClearAllJavaNotes,
    /// New Scala notes.
    #[serde(rename = "NewScalaNotesEvent")]
    NewScalaNotes(NoteList),
    /// New Java notes.
    #[serde(rename = "NewJavaNotesEvent")]
    NewJavaNotes(NoteList),
    /// A message intended for the user.
    #[serde(rename = "SendBackgroundMessageEvent")]
    BackgroundMessage {
        /// Message text.
        #[serde(default)]
        detail: String,
        /// Message code.
        #[serde(default)]
        code: i32,
    },
    /// An event this client does not know about.
    #[serde(other)]
    Unrecognized,
}
