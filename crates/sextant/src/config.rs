//! Project configuration.
//!
//! A project is the directory containing a `.sextant.yaml` file. The file
//! says how to start the analysis server and tunes client-side timeouts:
//!
//! ```yaml
//! name: shop
//! server:
//!   command: java
//!   jvm-args: ["-Xmx2g"]
//!   classpath: ["lib/ensime-server.jar"]
//!   transport: port-file
//! client:
//!   request-timeout-ms: 10000
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the project configuration file.
pub const CONFIG_FILE_NAME: &str = ".sextant.yaml";

/// Name of the file the server writes its TCP port into.
pub const PORT_FILE_NAME: &str = "port";

/// How the client reaches the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Frames over the child's stdin/stdout.
    #[default]
    Stdio,
    /// The server writes a port number to a file; the client connects over TCP.
    PortFile,
}

/// How to launch the analysis server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    /// Executable to run.
    pub command: String,
    /// Flags placed before the classpath.
    pub jvm_args: Vec<String>,
    /// Classpath entries, relative to the project root unless absolute.
    pub classpath: Vec<PathBuf>,
    /// Entry point class. Empty when `command` is a wrapper script.
    pub main_class: String,
    /// Arguments after the main class.
    pub args: Vec<String>,
    /// Transport used to talk to the server.
    pub transport: TransportKind,
    /// Server cache directory, relative to the project root.
    pub cache_dir: PathBuf,
    /// Deadline for the server to come up and answer the handshake.
    pub startup_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "java".to_string(),
            jvm_args: Vec::new(),
            classpath: Vec::new(),
            main_class: "org.ensime.server.Server".to_string(),
            args: Vec::new(),
            transport: TransportKind::Stdio,
            cache_dir: PathBuf::from(".ensime_cache"),
            startup_timeout_ms: 60_000,
        }
    }
}

/// Client-side tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClientSettings {
    /// Deadline for synchronous requests.
    pub request_timeout_ms: u64,
    /// Result cap of the fast completion query.
    pub completion_fast_results: usize,
    /// Deadline for the fast completion query.
    pub completion_timeout_ms: u64,
    /// Consecutive undecodable messages tolerated before disconnecting.
    pub max_protocol_errors: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            completion_fast_results: 5,
            completion_timeout_ms: 3_000,
            max_protocol_errors: 3,
        }
    }
}

impl ClientSettings {
    /// Deadline for synchronous requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Deadline for the fast completion query.
    #[must_use]
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

/// A loaded `.sextant.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    /// Project root. Set from the file's location, never read from it.
    #[serde(skip)]
    pub root: PathBuf,
    /// Display name; defaults to the root directory name.
    #[serde(default)]
    pub name: String,
    /// Server launch settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Client tuning.
    #[serde(default)]
    pub client: ClientSettings,
}

impl ProjectConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut config = Self::unnamed(root.into());
        config.fill_name();
        config
    }

    fn unnamed(root: PathBuf) -> Self {
        Self {
            root,
            name: String::new(),
            server: ServerConfig::default(),
            client: ClientSettings::default(),
        }
    }

    fn fill_name(&mut self) {
        if self.name.trim().is_empty() {
            self.name = self
                .root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string());
        }
    }

    /// Parse a configuration document for the project at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the YAML is malformed or fails
    /// validation.
    pub fn from_yaml(root: impl Into<PathBuf>, yaml: &str) -> Result<Self> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::unnamed(PathBuf::new())
        } else {
            serde_yaml::from_str(yaml).map_err(|e| Error::Configuration(e.to_string()))?
        };
        config.root = root.into();
        config.fill_name();
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration of the project at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file is missing, unreadable, or
    /// invalid.
    pub async fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        let content = fs::read_to_string(&path).await.map_err(|e| {
            Error::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml(root, &content)?;
        debug!(
            root = %config.root.display(),
            name = %config.name,
            transport = ?config.server.transport,
            "Loaded project config"
        );
        Ok(config)
    }

    /// Check the settings for values the client cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first bad setting.
    pub fn validate(&self) -> Result<()> {
        if self.server.command.trim().is_empty() {
            return Err(Error::Configuration("server.command is empty".to_string()));
        }
        if self.server.startup_timeout_ms == 0 {
            return Err(Error::Configuration(
                "server.startup-timeout-ms must be positive".to_string(),
            ));
        }
        if self.client.request_timeout_ms == 0 || self.client.completion_timeout_ms == 0 {
            return Err(Error::Configuration(
                "client timeouts must be positive".to_string(),
            ));
        }
        if self.client.completion_fast_results == 0 {
            return Err(Error::Configuration(
                "client.completion-fast-results must be at least 1".to_string(),
            ));
        }
        if self.client.max_protocol_errors == 0 {
            return Err(Error::Configuration(
                "client.max-protocol-errors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Deadline for startup and the handshake.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.server.startup_timeout_ms)
    }

    /// Absolute server cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.server.cache_dir)
    }

    /// File the server writes its port into.
    #[must_use]
    pub fn port_file(&self) -> PathBuf {
        self.cache_dir().join(PORT_FILE_NAME)
    }

    /// Classpath entries resolved against the project root.
    #[must_use]
    pub fn resolved_classpath(&self) -> Vec<PathBuf> {
        self.server
            .classpath
            .iter()
            .map(|entry| self.root.join(entry))
            .collect()
    }

    /// The classpath joined with the platform separator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if an entry contains the separator.
    pub fn classpath_arg(&self) -> Result<Option<OsString>> {
        let entries = self.resolved_classpath();
        if entries.is_empty() {
            return Ok(None);
        }
        std::env::join_paths(entries)
            .map(Some)
            .map_err(|e| Error::Configuration(format!("invalid classpath entry: {e}")))
    }

    /// Whether `path` lies inside this project.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}

/// Find the project containing `start` by walking up to the nearest
/// directory that holds a [`CONFIG_FILE_NAME`].
///
/// `start` may be a file or a directory. Returns the canonical project root.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if no configuration file is found.
pub fn discover_project(start: &Path) -> Result<PathBuf> {
    let mut current = if start.is_file() {
        start.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        start.to_path_buf()
    };

    loop {
        if current.join(CONFIG_FILE_NAME).is_file() {
            // Canonicalize to resolve symlinks (e.g., /var -> /private/var on macOS)
            return current.canonicalize().map_err(|e| {
                Error::Configuration(format!("cannot resolve {}: {e}", current.display()))
            });
        }

        if !current.pop() {
            break;
        }
    }

    Err(Error::Configuration(format!(
        "no {CONFIG_FILE_NAME} found in {} or any parent directory",
        start.display()
    )))
}
