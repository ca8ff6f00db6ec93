//! Per-window session facade.
//!
//! An [`Environment`] binds a project configuration, a [`Supervisor`] and an
//! editor adapter for one editor window. Command entry points look it up in
//! the [`EnvironmentRegistry`]; a missing entry means there is no project
//! context for that window.
//!
//! # Lock Ordering
//!
//! Registry lock, then the environment's config lock. Neither is held across
//! an `.await` or while calling into the editor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use sextant_protocol::{CompletionInfo, Request, ResponsePayload, ServerEvent};
use tokio::sync::Notify;
use tracing::{Instrument, Span, debug, error, info, info_span};

use crate::completion::{
    CompletionBackend, CompletionOutcome, CompletionQuery, CompletionSession, RefinementCallback,
};
use crate::config::{ClientSettings, ProjectConfig, discover_project};
use crate::diagnostics::Diagnostics;
use crate::editor::{EditorAdapter, ViewSnapshot, WindowId};
use crate::error::{Error, Result};
use crate::launcher::ServerLauncher;
use crate::outcome::{self, Origin};
use crate::readiness::{Readiness, Subsystem};
use crate::registry::CallId;
use crate::supervisor::{Connection, EventSink, Supervisor};

/// Session state of one editor window.
pub struct Environment {
    window: WindowId,
    span: Span,
    start_dir: PathBuf,
    config: RwLock<Option<Arc<ProjectConfig>>>,
    editor: Arc<dyn EditorAdapter>,
    launcher: Arc<dyn ServerLauncher>,
    supervisor: Supervisor,
    completion: CompletionSession,
    diagnostics: Diagnostics,
    type_checks: AtomicU64,
    type_check_done: Notify,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("window", &self.window)
            .field("start_dir", &self.start_dir)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Create a stopped environment for a window.
    ///
    /// `start_dir` is where project discovery begins, usually the directory
    /// of the first file opened in the window.
    pub fn new(
        window: WindowId,
        start_dir: impl Into<PathBuf>,
        editor: Arc<dyn EditorAdapter>,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Self {
        let start_dir = start_dir.into();
        Self {
            window,
            span: info_span!("environment", %window),
            start_dir,
            config: RwLock::new(None),
            editor,
            launcher,
            supervisor: Supervisor::new(),
            completion: CompletionSession::new(),
            diagnostics: Diagnostics::new(),
            type_checks: AtomicU64::new(0),
            type_check_done: Notify::new(),
        }
    }

    /// Create an environment with an already loaded configuration.
    pub fn with_config(
        window: WindowId,
        config: ProjectConfig,
        editor: Arc<dyn EditorAdapter>,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Self {
        let env = Self::new(window, config.root.clone(), editor, launcher);
        *env.config.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(config));
        env
    }

    /// The window this environment belongs to.
    #[must_use]
    pub fn window(&self) -> WindowId {
        self.window
    }

    /// Span covering work done on behalf of this window.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The editor adapter.
    #[must_use]
    pub fn editor(&self) -> &Arc<dyn EditorAdapter> {
        &self.editor
    }

    /// The connection supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Readiness of the current connection.
    #[must_use]
    pub fn readiness(&self) -> &Readiness {
        self.supervisor.readiness()
    }

    /// Completion bookkeeping.
    #[must_use]
    pub fn completion(&self) -> &CompletionSession {
        &self.completion
    }

    /// Compiler notes.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The current configuration, if one has been loaded.
    #[must_use]
    pub fn config(&self) -> Option<Arc<ProjectConfig>> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True unless the supervisor is stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// True when requests can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    /// Whether a subsystem of the connected server is ready.
    #[must_use]
    pub fn is_ready(&self, subsystem: Subsystem) -> bool {
        self.is_connected() && self.readiness().is_ready(subsystem)
    }

    /// Show a status-bar message.
    pub fn status_message(&self, message: &str) {
        self.editor.status_message(message);
    }

    /// Show an error to the user.
    pub fn error_message(&self, message: &str) {
        error!(window = %self.window, "{message}");
        self.editor.error_message(message);
    }

    /// Re-read the project configuration.
    ///
    /// On failure the error is shown once and the previous configuration,
    /// and any live connection, are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no valid configuration is found.
    pub async fn recalc(&self) -> Result<Arc<ProjectConfig>> {
        let loaded = match discover_project(&self.start_dir) {
            Ok(root) => {
                ProjectConfig::load(&root)
                    .instrument(self.span.clone())
                    .await
            }
            Err(e) => Err(e),
        };

        match loaded {
            Ok(config) => {
                let config = Arc::new(config);
                *self.config.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&config));
                debug!(window = %self.window, root = %config.root.display(), "Configuration loaded");
                Ok(config)
            }
            Err(e) => {
                self.error_message(&e.to_string());
                Err(e)
            }
        }
    }

    /// Load the configuration if needed and connect to a server.
    ///
    /// # Errors
    ///
    /// Returns the configuration, launch or handshake error; it has already
    /// been shown to the user.
    pub async fn startup(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            self.status_message("Analysis server is already running");
            return Err(Error::AlreadyRunning);
        }

        let config = match self.config() {
            Some(config) => config,
            None => self.recalc().await?,
        };

        self.status_message(&format!("Starting analysis server for {}", config.name));
        let sink: Arc<dyn EventSink> = Arc::new(EnvironmentSink {
            env: Arc::downgrade(self),
        });
        match self
            .supervisor
            .start(self.launcher.as_ref(), &config, sink)
            .instrument(self.span.clone())
            .await
        {
            Ok(info) => {
                self.status_message(&format!(
                    "Connected to {} {} for {}",
                    info.implementation.name, info.version, config.name
                ));
                Ok(())
            }
            Err(e) => {
                self.error_message(&format!("Could not start the analysis server: {e}"));
                Err(e)
            }
        }
    }

    /// Disconnect and stop the server. Safe to call when already stopped.
    pub async fn shutdown(&self) {
        self.supervisor
            .shutdown()
            .instrument(self.span.clone())
            .await;
        self.completion.reset();
    }

    /// Handle for the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when there is none.
    pub fn connection(&self) -> Result<Connection> {
        self.supervisor.connection()
    }

    fn request_timeout(&self) -> Duration {
        self.config()
            .map(|c| c.client.request_timeout())
            .unwrap_or_else(|| ClientSettings::default().request_timeout())
    }

    /// Send a request and present its reply when it arrives.
    ///
    /// Returns the call id. Nothing is sent when this fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a connection and
    /// [`Error::Protocol`] if the request cannot be encoded.
    pub fn run_in(self: &Arc<Self>, request: Request, origin: Origin) -> Result<CallId> {
        let connection = self.connection()?;
        let weak = Arc::downgrade(self);
        connection.submit_with(&request, move |result| {
            if let Some(env) = weak.upgrade() {
                outcome::present(&env, &origin, result);
            }
        })
    }

    /// Send a request and invoke `callback` with its reply.
    ///
    /// # Errors
    ///
    /// See [`Environment::run_in`].
    pub fn submit_with<F>(&self, request: &Request, callback: F) -> Result<CallId>
    where
        F: FnOnce(Result<ResponsePayload>) + Send + 'static,
    {
        self.connection()?.submit_with(request, callback)
    }

    /// Send a request and wait for the reply with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`], [`Error::Timeout`],
    /// [`Error::ConnectionLost`] or the server's error.
    pub async fn call(&self, request: &Request) -> Result<ResponsePayload> {
        self.call_with_timeout(request, self.request_timeout()).await
    }

    /// Send a request and wait for the reply up to `timeout`.
    ///
    /// # Errors
    ///
    /// See [`Environment::call`].
    pub async fn call_with_timeout(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<ResponsePayload> {
        let connection = self.connection()?;
        connection.call(request, timeout).await
    }

    /// Answer a completion request for the primary cursor of `view`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] or [`Error::NotReady`] when completion
    /// is unavailable, and connection errors from the fast query.
    pub async fn complete(&self, view: &ViewSnapshot) -> Result<CompletionOutcome> {
        self.connection()?;
        self.readiness().require(Subsystem::Indexer)?;
        let Some(query) = CompletionQuery::from_view(view) else {
            return Ok(CompletionOutcome::default());
        };
        let fast_results = self
            .config()
            .map_or(ClientSettings::default().completion_fast_results, |c| {
                c.client.completion_fast_results
            });

        self.completion
            .complete(self, Arc::clone(&self.editor), query, fast_results)
            .await
    }

    /// Number of full type-checks the server has reported as complete.
    #[must_use]
    pub fn type_checks_completed(&self) -> u64 {
        self.type_checks.load(Ordering::Acquire)
    }

    /// Wait until more than `seen` full type-checks have completed.
    ///
    /// Take `seen` from [`Environment::type_checks_completed`] before sending
    /// the type-check request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when no type-check completes in time and
    /// [`Error::ConnectionLost`] if the connection goes away while waiting.
    pub async fn wait_for_type_check(&self, seen: u64, timeout: Duration) -> Result<()> {
        let wait = async {
            loop {
                let notified = self.type_check_done.notified();
                if self.type_checks_completed() > seen {
                    return Ok(());
                }
                if !self.is_connected() {
                    return Err(Error::ConnectionLost);
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout {
                request: "TypeCheckFiles",
                timeout,
            })?
    }

    fn redraw_notes(&self) {
        if self.diagnostics.show_errors() {
            self.editor.show_notes(&self.diagnostics.all());
        }
    }

    /// Flip drawing of compiler notes. Returns the new value.
    pub fn toggle_errors(&self) -> bool {
        let shown = self.diagnostics.toggle_show_errors();
        if shown {
            self.redraw_notes();
        } else {
            self.editor.hide_notes();
        }
        shown
    }

    fn handle_event(&self, event: &ServerEvent) {
        if self.diagnostics.apply(event) {
            self.redraw_notes();
            return;
        }
        match event {
            ServerEvent::AnalyzerReady => self.status_message("Analyzer ready"),
            ServerEvent::IndexerReady => self.status_message("Indexer ready"),
            ServerEvent::FullTypeCheckComplete => {
                self.type_checks.fetch_add(1, Ordering::AcqRel);
                self.type_check_done.notify_waiters();
                let counts = self.diagnostics.counts();
                self.status_message(&format!(
                    "Type-check complete: {} errors, {} warnings",
                    counts.errors, counts.warnings
                ));
            }
            ServerEvent::CompilerRestarted => self.status_message("Compiler restarted"),
            ServerEvent::BackgroundMessage { detail, .. } => self.status_message(detail),
            _ => debug!(window = %self.window, ?event, "Ignoring server event"),
        }
    }

    fn handle_disconnect(&self) {
        self.completion.reset();
        self.diagnostics.clear();
        self.editor.hide_notes();
        self.type_check_done.notify_waiters();
        self.status_message("Disconnected from the analysis server");
    }
}

fn expect_completions(result: Result<ResponsePayload>) -> Result<Vec<CompletionInfo>> {
    match result? {
        ResponsePayload::Completions(list) => Ok(list.completions),
        ResponsePayload::False => Ok(Vec::new()),
        other => Err(Error::UnexpectedReply {
            request: "Completions",
            typehint: other.typehint(),
        }),
    }
}

#[async_trait]
impl CompletionBackend for Environment {
    async fn fetch(
        &self,
        query: &CompletionQuery,
        max_results: usize,
    ) -> Result<Vec<CompletionInfo>> {
        let request = Request::completions(
            query.file.clone(),
            query.contents.clone(),
            query.offset,
            Some(max_results),
        );
        let timeout = self
            .config()
            .map(|c| c.client.completion_timeout())
            .unwrap_or_else(|| ClientSettings::default().completion_timeout());
        expect_completions(self.call_with_timeout(&request, timeout).await)
    }

    fn fetch_in_background(&self, query: &CompletionQuery, done: RefinementCallback) -> Result<()> {
        let request =
            Request::completions(query.file.clone(), query.contents.clone(), query.offset, None);
        self.submit_with(&request, move |result| done(expect_completions(result)))?;
        Ok(())
    }
}

/// Routes connection events back into the environment.
struct EnvironmentSink {
    env: Weak<Environment>,
}

impl EventSink for EnvironmentSink {
    fn on_event(&self, event: &ServerEvent) {
        if let Some(env) = self.env.upgrade() {
            env.handle_event(event);
        }
    }

    fn on_disconnect(&self) {
        if let Some(env) = self.env.upgrade() {
            env.handle_disconnect();
        }
    }
}

/// Environments by window.
#[derive(Debug, Default)]
pub struct EnvironmentRegistry {
    environments: RwLock<HashMap<WindowId, Arc<Environment>>>,
}

impl EnvironmentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The environment of `window`, creating it if needed.
    pub fn create(
        &self,
        window: WindowId,
        start_dir: &Path,
        editor: Arc<dyn EditorAdapter>,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Arc<Environment> {
        let mut environments = self
            .environments
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(environments.entry(window).or_insert_with(|| {
            debug!(%window, start_dir = %start_dir.display(), "Creating environment");
            Arc::new(Environment::new(window, start_dir, editor, launcher))
        }))
    }

    /// Register a pre-built environment, replacing any previous one.
    pub fn insert(&self, env: Arc<Environment>) -> Option<Arc<Environment>> {
        self.environments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(env.window(), env)
    }

    /// The environment of `window`, if any.
    #[must_use]
    pub fn get(&self, window: WindowId) -> Option<Arc<Environment>> {
        self.environments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&window)
            .cloned()
    }

    /// Remove the environment of `window` and shut it down.
    pub async fn destroy(&self, window: WindowId) -> bool {
        let removed = self
            .environments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&window);
        match removed {
            Some(env) => {
                info!(%window, "Destroying environment");
                env.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Number of registered environments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.environments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no environment is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
