//! Command execution logic.
//!
//! Queries are sent with [`Environment::call`] and printed here rather than
//! through the presentation path editors use, so results can be rendered as
//! JSON and failures turn into a non-zero exit status.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sextant_protocol::{Request, ResponsePayload, SourceFileInfo};

use super::terminal::{TerminalEditor, TerminalStyle};
use super::{Cli, CompleteArgs, PointArgs, SearchArgs, TypecheckArgs};
use crate::config::ServerConfig;
use crate::editor::{EditorAdapter, WindowId};
use crate::environment::Environment;
use crate::error::Error;
use crate::launcher::CommandLauncher;
use crate::readiness::Subsystem;

/// A connected environment for the duration of one command.
pub(super) struct Session {
    env: Arc<Environment>,
    editor: Arc<TerminalEditor>,
    json: bool,
}

impl Session {
    /// Discover the project and connect to its server.
    pub(super) async fn open(cli: &Cli) -> Result<Self> {
        let editor = Arc::new(TerminalEditor::new(TerminalStyle::from_env(cli.verbose)));
        let adapter: Arc<dyn EditorAdapter> = Arc::clone(&editor) as Arc<dyn EditorAdapter>;
        let env = Arc::new(Environment::new(
            WindowId(0),
            cli.start_dir()?,
            adapter,
            Arc::new(CommandLauncher),
        ));
        env.startup().await?;
        Ok(Self {
            env,
            editor,
            json: cli.json,
        })
    }

    /// Stop the server.
    pub(super) async fn close(self) {
        self.env.shutdown().await;
    }

    fn style(&self) -> TerminalStyle {
        self.editor.style()
    }

    fn startup_timeout(&self) -> Duration {
        self.env.config().map_or_else(
            || Duration::from_millis(ServerConfig::default().startup_timeout_ms),
            |c| c.startup_timeout(),
        )
    }

    async fn ready(&self, subsystem: Subsystem) -> Result<()> {
        tracing::debug!(%subsystem, "Waiting for readiness");
        self.env
            .readiness()
            .wait_for(subsystem, self.startup_timeout())
            .await?;
        Ok(())
    }

    async fn call(&self, request: &Request) -> Result<ResponsePayload> {
        Ok(self.env.call(request).await?)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn absolute(path: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))
}

fn unexpected(request: &'static str, payload: &ResponsePayload) -> anyhow::Error {
    Error::UnexpectedReply {
        request,
        typehint: payload.typehint(),
    }
    .into()
}

/// Execute the status command
pub(super) async fn execute_status(session: &Session) -> Result<()> {
    // Readiness is reported, not required
    let _ = session.ready(Subsystem::Analyzer).await;
    let _ = session.ready(Subsystem::Indexer).await;

    let env = &session.env;
    let info = env.supervisor().server_info();
    let readiness = env.readiness().snapshot();
    let config = env.config();

    if session.json {
        return print_json(&serde_json::json!({
            "project": config.as_ref().map(|c| c.name.clone()),
            "root": config.as_ref().map(|c| c.root.display().to_string()),
            "server": info,
            "analyzer_ready": readiness.analyzer_ready,
            "indexer_ready": readiness.indexer_ready,
        }));
    }

    let style = session.style();
    if let Some(config) = &config {
        println!("Project:  {} ({})", style.accent(&config.name), config.root.display());
    }
    if let Some(info) = &info {
        let pid = info.pid.map(|p| format!(" pid {p}")).unwrap_or_default();
        println!("Server:   {} {}{pid}", info.implementation.name, info.version);
    }
    let flag = |ready: bool| if ready { "ready" } else { "not ready" };
    println!("Analyzer: {}", flag(readiness.analyzer_ready));
    println!("Indexer:  {}", flag(readiness.indexer_ready));
    Ok(())
}

/// Execute the typecheck command
pub(super) async fn execute_typecheck(session: &Session, args: &TypecheckArgs) -> Result<()> {
    let mut files = Vec::with_capacity(args.files.len());
    for file in &args.files {
        files.push(absolute(file).await?);
    }
    session.ready(Subsystem::Analyzer).await?;

    let seen = session.env.type_checks_completed();
    session.call(&Request::TypeCheckFiles { files }).await?;
    session
        .env
        .wait_for_type_check(seen, Duration::from_secs(args.wait))
        .await?;

    let notes = session.env.diagnostics().all();
    let counts = session.env.diagnostics().counts();
    if session.json {
        print_json(&notes)?;
    } else {
        session.editor.show_notes(&notes);
        println!(
            "{}",
            session.style().muted(&format!(
                "{} errors, {} warnings",
                counts.errors, counts.warnings
            ))
        );
    }

    if counts.errors > 0 {
        bail!("type-check found {} errors", counts.errors);
    }
    Ok(())
}

/// Execute the type-at command
pub(super) async fn execute_type_at(session: &Session, point: &PointArgs) -> Result<()> {
    let file = absolute(&point.file).await?;
    session.ready(Subsystem::Analyzer).await?;

    let request = Request::TypeAtPoint {
        file: SourceFileInfo::on_disk(file),
        offset: point.offset,
    };
    match session.call(&request).await? {
        ResponsePayload::Type(info) if session.json => print_json(&info),
        ResponsePayload::Type(info) => {
            let shown = if info.full_name.is_empty() {
                &info.name
            } else {
                &info.full_name
            };
            match &info.decl_as {
                Some(kind) => println!("{shown} {}", session.style().muted(kind)),
                None => println!("{shown}"),
            }
            Ok(())
        }
        ResponsePayload::False => bail!("no type found at offset {}", point.offset),
        other => Err(unexpected(request.kind(), &other)),
    }
}

/// Execute the complete command
pub(super) async fn execute_complete(session: &Session, args: &CompleteArgs) -> Result<()> {
    let file = absolute(&args.point.file).await?;
    session.ready(Subsystem::Indexer).await?;

    let request = Request::completions(file, None, args.point.offset, Some(args.max));
    let completions = match session.call(&request).await? {
        ResponsePayload::Completions(list) => list.completions,
        ResponsePayload::False => Vec::new(),
        other => return Err(unexpected(request.kind(), &other)),
    };

    if session.json {
        return print_json(&completions);
    }
    for candidate in &completions {
        match &candidate.type_info {
            Some(ty) => println!("{} {}", candidate.name, session.style().muted(&ty.name)),
            None => println!("{}", candidate.name),
        }
    }
    Ok(())
}

/// Execute the search command
pub(super) async fn execute_search(session: &Session, args: &SearchArgs) -> Result<()> {
    session.ready(Subsystem::Indexer).await?;

    let request = Request::PublicSymbolSearch {
        keywords: args.terms.clone(),
        max_results: args.max,
    };
    let results = match session.call(&request).await? {
        ResponsePayload::SymbolSearch(results) => results.syms,
        other => return Err(unexpected(request.kind(), &other)),
    };

    if session.json {
        return print_json(&results);
    }
    let style = session.style();
    for hit in &results {
        let kind = hit.decl_as.as_deref().unwrap_or("symbol");
        match &hit.pos {
            Some(pos) => println!(
                "{} {} {}",
                style.accent(&hit.name),
                style.muted(kind),
                style.muted(&format!("{}:{}", pos.file.display(), pos.offset))
            ),
            None => println!("{} {}", style.accent(&hit.name), style.muted(kind)),
        }
    }
    Ok(())
}

/// Execute the definition command
pub(super) async fn execute_definition(session: &Session, point: &PointArgs) -> Result<()> {
    let file = absolute(&point.file).await?;
    session.ready(Subsystem::Indexer).await?;

    let request = Request::SymbolAtPoint {
        file: SourceFileInfo::on_disk(file),
        offset: point.offset,
    };
    match session.call(&request).await? {
        ResponsePayload::Symbol(symbol) if session.json => print_json(&symbol),
        ResponsePayload::Symbol(symbol) => match symbol.decl_pos {
            Some(pos) => {
                session.editor.open_location(&pos.file, pos.offset);
                Ok(())
            }
            None => bail!("no source available for {}", symbol.name),
        },
        ResponsePayload::False => bail!("no symbol found at offset {}", point.offset),
        other => Err(unexpected(request.kind(), &other)),
    }
}

/// Execute the doc-uri command
pub(super) async fn execute_doc_uri(session: &Session, point: &PointArgs) -> Result<()> {
    let file = absolute(&point.file).await?;
    session.ready(Subsystem::Indexer).await?;

    let request = Request::DocUriAtPoint {
        file: SourceFileInfo::on_disk(file),
        offset: point.offset,
    };
    match session.call(&request).await? {
        ResponsePayload::Text { text } if session.json => {
            print_json(&serde_json::json!({ "uri": text }))
        }
        ResponsePayload::Text { text } => {
            session.editor.open_uri(&text);
            Ok(())
        }
        ResponsePayload::False => bail!("no documentation found at offset {}", point.offset),
        other => Err(unexpected(request.kind(), &other)),
    }
}
