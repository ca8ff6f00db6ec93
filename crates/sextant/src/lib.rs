//! Sextant - editor-side client for a Scala/Java analysis server.
//!
//! The crate connects an editor window to a long-running analysis server
//! and keeps the bookkeeping that makes the asynchronous protocol usable
//! from synchronous editor hooks: request ids and pending calls, subsystem
//! readiness, compiler notes and the two-phase completion flow.
//!
//! The host editor is reached only through [`EditorAdapter`], and the server
//! is started through [`ServerLauncher`], so both can be replaced in tests.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sextant::{CommandLauncher, EditorAdapter, EnvironmentRegistry, WindowId};
//!
//! # async fn example(editor: Arc<dyn EditorAdapter>) -> sextant::Result<()> {
//! let registry = EnvironmentRegistry::new();
//! let env = registry.create(
//!     WindowId(1),
//!     std::path::Path::new("/work/project/src"),
//!     editor,
//!     Arc::new(CommandLauncher),
//! );
//! env.startup().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod editor;
pub mod environment;
pub mod error;
pub mod launcher;
pub mod outcome;
pub mod readiness;
pub mod registry;
pub mod supervisor;

// Terminal front-end used by the binary
pub mod cli;

pub use commands::{TextCommand, WindowCommand};
pub use completion::{CompletionBackend, CompletionOutcome, CompletionQuery, CompletionSession};
pub use config::{ClientSettings, ProjectConfig, ServerConfig, TransportKind};
pub use editor::{EditorAdapter, Selection, SourceKind, ViewSnapshot, WindowId};
pub use environment::{Environment, EnvironmentRegistry};
pub use error::{Error, Result};
pub use launcher::{CommandLauncher, LaunchedServer, ServerLauncher};
pub use readiness::{Readiness, Subsystem};
pub use supervisor::{ConnectionState, Supervisor};
