//! Starting the analysis server and opening a transport to it.
//!
//! [`ServerLauncher`] is the process-lifecycle seam: the supervisor asks it
//! for a [`LaunchedServer`] and owns everything from there on. The default
//! [`CommandLauncher`] spawns the configured JVM command; tests plug in
//! in-memory launchers.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::{ProjectConfig, TransportKind};
use crate::error::{Error, Result};

/// Interval between checks for the port file.
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read half of a server transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a server transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A running server and the byte streams connected to it.
pub struct LaunchedServer {
    /// Frames from the server.
    pub reader: BoxedReader,
    /// Frames to the server.
    pub writer: BoxedWriter,
    /// The server process, when the launcher spawned one.
    pub process: Option<Child>,
}

impl LaunchedServer {
    /// Wrap a bidirectional stream with no owned process.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        }
    }
}

impl std::fmt::Debug for LaunchedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedServer")
            .field("pid", &self.process.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// Starts a server for a project.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use sextant::config::ProjectConfig;
/// use sextant::launcher::{LaunchedServer, ServerLauncher};
///
/// struct Loopback;
///
/// #[async_trait]
/// impl ServerLauncher for Loopback {
///     async fn launch(&self, _config: &ProjectConfig) -> sextant::Result<LaunchedServer> {
///         let (client, _server) = tokio::io::duplex(1024);
///         Ok(LaunchedServer::from_stream(client))
///     }
/// }
/// ```
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Start the server and connect to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Spawn`] if the process cannot be
    /// started and [`Error::StartupFailed`] if the transport never comes up.
    async fn launch(&self, config: &ProjectConfig) -> Result<LaunchedServer>;
}

/// Spawns the command from the project configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

impl CommandLauncher {
    /// Installation hint shown when the server command is not found.
    pub const INSTALL_HINT: &'static str =
        "Install a JDK and make sure `java` is on your PATH, or set server.command in .sextant.yaml.";

    /// Program and arguments for a configuration:
    /// `command jvm-args [-classpath cp] [main-class] args`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the classpath cannot be joined.
    pub fn command_line(config: &ProjectConfig) -> Result<(String, Vec<OsString>)> {
        let server = &config.server;
        let mut args: Vec<OsString> = server.jvm_args.iter().map(OsString::from).collect();
        if let Some(classpath) = config.classpath_arg()? {
            args.push("-classpath".into());
            args.push(classpath);
        }
        if !server.main_class.is_empty() {
            args.push(server.main_class.clone().into());
        }
        args.extend(server.args.iter().map(OsString::from));
        Ok((server.command.clone(), args))
    }
}

#[async_trait]
impl ServerLauncher for CommandLauncher {
    async fn launch(&self, config: &ProjectConfig) -> Result<LaunchedServer> {
        let (program, args) = Self::command_line(config)?;
        let transport = config.server.transport;

        debug!(
            command = %program,
            args = ?args,
            root = %config.root.display(),
            ?transport,
            "Starting analysis server"
        );

        if transport == TransportKind::PortFile {
            tokio::fs::create_dir_all(config.cache_dir()).await?;
            // A port file from an earlier run would point at a dead server
            match tokio::fs::remove_file(config.port_file()).await {
                Ok(()) => debug!("Removed stale port file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&config.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command.stdin(match transport {
            TransportKind::Stdio => Stdio::piped(),
            TransportKind::PortFile => Stdio::null(),
        });

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(&program, Self::INSTALL_HINT)
            } else {
                Error::spawn_failed(&program, e)
            }
        })?;
        info!(pid = ?child.id(), command = %program, "Analysis server process started");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        match transport {
            TransportKind::Stdio => {
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| Error::StartupFailed("server stdin unavailable".to_string()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| Error::StartupFailed("server stdout unavailable".to_string()))?;
                Ok(LaunchedServer {
                    reader: Box::new(stdout),
                    writer: Box::new(stdin),
                    process: Some(child),
                })
            }
            TransportKind::PortFile => {
                if let Some(stdout) = child.stdout.take() {
                    tokio::spawn(forward_output(stdout, "stdout"));
                }
                let port_file = config.port_file();
                let port = tokio::time::timeout(
                    config.startup_timeout(),
                    wait_for_port(&port_file, &mut child),
                )
                .await
                .map_err(|_| {
                    Error::StartupFailed(format!(
                        "server did not write {} within {:?}",
                        port_file.display(),
                        config.startup_timeout()
                    ))
                })??;

                debug!(port, "Connecting to analysis server");
                let stream = TcpStream::connect(("127.0.0.1", port)).await.map_err(|e| {
                    Error::StartupFailed(format!("cannot connect to port {port}: {e}"))
                })?;
                let (reader, writer) = stream.into_split();
                Ok(LaunchedServer {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    process: Some(child),
                })
            }
        }
    }
}

/// Poll for the port file until it holds a port or the process exits.
async fn wait_for_port(port_file: &Path, child: &mut Child) -> Result<u16> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(Error::StartupFailed(format!(
                "server exited with {status} before writing its port"
            )));
        }
        if let Some(port) = tokio::fs::read_to_string(port_file)
            .await
            .ok()
            .and_then(|content| parse_port(&content))
        {
            return Ok(port);
        }
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}

/// Parse the port file. A partially written file parses as `None`.
fn parse_port(content: &str) -> Option<u16> {
    content.trim().parse().ok().filter(|port| *port != 0)
}

/// Forward server output lines to the log.
async fn forward_output<R>(stream: R, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stream = name, "server: {line}");
    }
}
