//! Command-line front-end.
//!
//! Each invocation starts an analysis server for the project, waits for the
//! subsystem the query needs, runs one query and shuts the server down.
//!
//! # Commands
//!
//! - `status`: Start the server and report what it is and what is ready
//! - `typecheck`: Type-check files and print the compiler notes
//! - `type-at`: Show the type at an offset
//! - `complete`: List completions at an offset
//! - `search`: Search the classpath for public symbols
//! - `definition`: Print where the symbol at an offset is declared
//! - `doc-uri`: Print the documentation URI for the symbol at an offset
//!
//! # Example
//!
//! ```bash
//! sextant typecheck src/main/scala/App.scala
//! sextant type-at src/main/scala/App.scala 120
//! sextant search ListBuffer --max 5
//! ```

mod execute;
pub mod terminal;

use std::path::PathBuf;

use anyhow::Result;
use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use sextant_protocol::request::DEFAULT_SEARCH_RESULTS;

/// Sextant - query a Scala/Java analysis server from the terminal
///
/// The project is found by walking up from `--project` (or the first file
/// argument) to the nearest `.sextant.yaml`.
#[derive(Parser, Debug)]
#[command(name = "sextant")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format for programmatic use
    #[arg(long, global = true)]
    pub json: bool,

    /// Print status messages from the server on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory to start project discovery from
    #[arg(long, global = true, value_name = "DIR")]
    pub project: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server and report its identity and readiness
    Status,

    /// Type-check files and print compiler notes
    ///
    /// Exits with an error if any note is an error.
    Typecheck(TypecheckArgs),

    /// Show the type at an offset
    TypeAt(PointArgs),

    /// List completions at an offset
    Complete(CompleteArgs),

    /// Search the classpath for public symbols
    Search(SearchArgs),

    /// Print where the symbol at an offset is declared
    Definition(PointArgs),

    /// Print the documentation URI for the symbol at an offset
    DocUri(PointArgs),
}

/// A position in a source file.
#[derive(Args, Debug, Clone)]
pub struct PointArgs {
    /// Source file
    pub file: PathBuf,

    /// Character offset into the file
    pub offset: usize,
}

/// Arguments for the typecheck command
#[derive(Args, Debug, Clone)]
pub struct TypecheckArgs {
    /// Source files to check
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Seconds to wait for the check to finish
    #[arg(long, default_value_t = 120, value_parser = clap::value_parser!(u64).range(1..))]
    pub wait: u64,
}

/// Arguments for the complete command
#[derive(Args, Debug, Clone)]
pub struct CompleteArgs {
    /// Position to complete at
    #[command(flatten)]
    pub point: PointArgs,

    /// Maximum number of candidates
    #[arg(long, default_value_t = 30, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub max: usize,
}

/// Arguments for the search command
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search terms; every term must match
    #[arg(required = true)]
    pub terms: Vec<String>,

    /// Maximum number of results
    #[arg(long, default_value_t = DEFAULT_SEARCH_RESULTS, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub max: usize,
}

impl Cli {
    /// Parse CLI arguments from command line
    #[must_use]
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse CLI arguments from an iterator (for testing)
    ///
    /// # Errors
    ///
    /// Returns the clap error for invalid arguments.
    pub fn try_parse_from<I, T>(iter: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }

    /// Directory project discovery starts from.
    fn start_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.project {
            return Ok(dir.clone());
        }
        let first_file = match &self.command {
            Commands::Typecheck(args) => args.files.first(),
            Commands::TypeAt(point) | Commands::Definition(point) | Commands::DocUri(point) => {
                Some(&point.file)
            }
            Commands::Complete(args) => Some(&args.point.file),
            Commands::Status | Commands::Search(_) => None,
        };
        match first_file.and_then(|f| f.parent()) {
            Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
            _ => Ok(std::env::current_dir()?),
        }
    }

    /// Execute the CLI command
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be started or the query fails.
    pub async fn execute(&self) -> Result<()> {
        let session = execute::Session::open(self).await?;
        let result = match &self.command {
            Commands::Status => execute::execute_status(&session).await,
            Commands::Typecheck(args) => execute::execute_typecheck(&session, args).await,
            Commands::TypeAt(point) => execute::execute_type_at(&session, point).await,
            Commands::Complete(args) => execute::execute_complete(&session, args).await,
            Commands::Search(args) => execute::execute_search(&session, args).await,
            Commands::Definition(point) => execute::execute_definition(&session, point).await,
            Commands::DocUri(point) => execute::execute_doc_uri(&session, point).await,
        };
        session.close().await;
        result
    }
}
