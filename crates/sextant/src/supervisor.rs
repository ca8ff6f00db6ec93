//! Connection lifecycle: launch, handshake, receive loop and teardown.
//!
//! A [`Supervisor`] moves through
//! `Stopped → Starting → Running → ShuttingDown → Stopped`. Each successful
//! launch opens a new *generation*; background tasks carry the generation
//! they belong to so a late teardown from an old connection never touches a
//! newer one.
//!
//! Per connection there are up to three tasks:
//! - the receive loop, which decodes frames and routes replies to the
//!   [`RequestRegistry`] and events to [`Readiness`] and the [`EventSink`]
//! - the writer, which drains the outbound channel into the transport
//! - the exit watcher, which owns the server process and reaps it
//!
//! Teardown, whatever its cause, drains the registry with
//! [`Error::ConnectionLost`], resets readiness, stops the tasks and kills the
//! process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sextant_protocol::{
    ConnectionInfo, FrameReader, FrameWriter, Inbound, Request, ResponsePayload, ServerEvent,
    codec,
};
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ProjectConfig;
use crate::error::{Error, Result};
use crate::launcher::{BoxedReader, BoxedWriter, ServerLauncher};
use crate::readiness::Readiness;
use crate::registry::{CallId, Outbound, RequestRegistry};

/// How long shutdown waits for the server process to be reaped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No server.
    Stopped,
    /// Launching and waiting for the handshake.
    Starting,
    /// Connected and serving requests.
    Running,
    /// Tearing down.
    ShuttingDown,
}

/// Receives unsolicited server traffic.
///
/// Called on the receive loop; implementations must not block.
pub trait EventSink: Send + Sync {
    /// A server event, after readiness has been updated.
    fn on_event(&self, event: &ServerEvent);

    /// The connection is gone and pending calls have been failed.
    fn on_disconnect(&self) {}
}

/// Handle for sending requests over the live connection.
#[derive(Clone)]
pub struct Connection {
    generation: u64,
    outbound: Outbound,
    registry: Arc<RequestRegistry>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Generation this handle belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Send a request and wait for its reply. See [`RequestRegistry::call`].
    ///
    /// # Errors
    ///
    /// Fails on encode errors, timeout, connection loss or a server error.
    pub async fn call(&self, request: &Request, timeout: Duration) -> Result<ResponsePayload> {
        self.registry.call(&self.outbound, request, timeout).await
    }

    /// Send a request without waiting. See [`RequestRegistry::submit_with`].
    ///
    /// # Errors
    ///
    /// Fails on encode errors or if the connection is already closed.
    pub fn submit_with<F>(&self, request: &Request, callback: F) -> Result<CallId>
    where
        F: FnOnce(Result<ResponsePayload>) + Send + 'static,
    {
        self.registry.submit_with(&self.outbound, request, callback)
    }
}

struct ActiveConnection {
    outbound: Outbound,
    receiver: JoinHandle<()>,
    writer: JoinHandle<()>,
    kill: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    active: Option<ActiveConnection>,
    sink: Option<Arc<dyn EventSink>>,
    server_info: Option<ConnectionInfo>,
}

struct Shared {
    inner: Mutex<Inner>,
    registry: Arc<RequestRegistry>,
    readiness: Arc<Readiness>,
}

/// Owns the connection to one analysis server.
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Supervisor")
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// A stopped supervisor with a fresh registry and readiness.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Stopped,
                    generation: 0,
                    active: None,
                    sink: None,
                    server_info: None,
                }),
                registry: Arc::new(RequestRegistry::new()),
                readiness: Arc::new(Readiness::new()),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Generation of the latest launch. 0 before the first start.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// True unless stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() != ConnectionState::Stopped
    }

    /// True when running with an open outbound channel.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let inner = self.shared.lock();
        inner.state == ConnectionState::Running
            && inner
                .active
                .as_ref()
                .is_some_and(|active| !active.outbound.is_closed())
    }

    /// The session's request registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.shared.registry
    }

    /// The session's readiness flags.
    #[must_use]
    pub fn readiness(&self) -> &Arc<Readiness> {
        &self.shared.readiness
    }

    /// What the server reported in the handshake, while connected.
    #[must_use]
    pub fn server_info(&self) -> Option<ConnectionInfo> {
        self.shared.lock().server_info.clone()
    }

    /// A handle to the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the state is `Running`.
    pub fn connection(&self) -> Result<Connection> {
        let inner = self.shared.lock();
        match (&inner.state, &inner.active) {
            (ConnectionState::Running, Some(active)) => Ok(Connection {
                generation: inner.generation,
                outbound: active.outbound.clone(),
                registry: Arc::clone(&self.shared.registry),
            }),
            _ => Err(Error::NotConnected),
        }
    }

    /// Launch the server, wire up the background tasks and perform the
    /// handshake.
    ///
    /// On any failure the supervisor is back in `Stopped` when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] unless stopped, the launcher's error
    /// if the process cannot be started, and [`Error::StartupFailed`] if the
    /// handshake does not complete within the startup timeout.
    pub async fn start(
        &self,
        launcher: &dyn ServerLauncher,
        config: &ProjectConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<ConnectionInfo> {
        let generation = {
            let mut inner = self.shared.lock();
            if inner.state != ConnectionState::Stopped {
                return Err(Error::AlreadyRunning);
            }
            inner.state = ConnectionState::Starting;
            inner.generation += 1;
            inner.sink = Some(sink);
            inner.server_info = None;
            inner.generation
        };
        info!(generation, project = %config.name, "Starting analysis server");

        let launched = match launcher.launch(config).await {
            Ok(launched) => launched,
            Err(e) => {
                error!(generation, error = %e, "Failed to launch analysis server");
                self.shared.teardown(generation, "launch failed");
                return Err(e);
            }
        };

        let connection = Shared::attach(
            &self.shared,
            generation,
            launched.reader,
            launched.writer,
            launched.process,
            config.client.max_protocol_errors,
        )?;

        let timeout = config.startup_timeout();
        let info = match connection.call(&Request::ConnectionInfo, timeout).await {
            Ok(ResponsePayload::ConnectionInfo(info)) => info,
            Ok(other) => {
                self.shared.teardown(generation, "unexpected handshake reply");
                return Err(Error::UnexpectedReply {
                    request: "ConnectionInfo",
                    typehint: other.typehint(),
                });
            }
            Err(Error::Timeout { .. }) => {
                self.shared.teardown(generation, "handshake timed out");
                return Err(Error::StartupFailed(format!(
                    "no handshake reply within {timeout:?}"
                )));
            }
            Err(e) => {
                self.shared.teardown(generation, "handshake failed");
                return Err(e);
            }
        };

        {
            let mut inner = self.shared.lock();
            if inner.generation != generation || inner.state != ConnectionState::Starting {
                return Err(Error::ConnectionLost);
            }
            inner.state = ConnectionState::Running;
            inner.server_info = Some(info.clone());
        }
        info!(
            generation,
            server = %info.implementation.name,
            version = %info.version,
            pid = ?info.pid,
            "Connected to analysis server"
        );
        Ok(info)
    }

    /// Disconnect and stop the server. Safe to call in any state.
    pub async fn shutdown(&self) {
        let generation = {
            let inner = self.shared.lock();
            if inner.state == ConnectionState::Stopped {
                debug!("Shutdown requested while stopped");
                return;
            }
            inner.generation
        };

        let Some(watcher) = self.shared.teardown(generation, "shutdown requested") else {
            return;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, watcher).await.is_err() {
            warn!(generation, "Analysis server was not reaped in time");
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the connection tasks for a freshly launched server.
    fn attach(
        shared: &Arc<Self>,
        generation: u64,
        reader: BoxedReader,
        writer: BoxedWriter,
        process: Option<Child>,
        max_protocol_errors: u32,
    ) -> Result<Connection> {
        let mut inner = shared.lock();
        if inner.generation != generation || inner.state != ConnectionState::Starting {
            // Shut down while launching; dropping the child kills it
            debug!(generation, "Discarding server launched for a stale start");
            return Err(Error::ConnectionLost);
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(receive_loop(
            Arc::clone(shared),
            generation,
            reader,
            max_protocol_errors,
        ));
        let writer = tokio::spawn(write_loop(
            Arc::clone(shared),
            generation,
            writer,
            outbound_rx,
        ));

        let (kill, watcher) = match process {
            Some(child) => {
                let (kill_tx, kill_rx) = oneshot::channel();
                let watcher = tokio::spawn(watch_process(
                    Arc::clone(shared),
                    generation,
                    child,
                    kill_rx,
                ));
                (Some(kill_tx), Some(watcher))
            }
            None => (None, None),
        };

        inner.active = Some(ActiveConnection {
            outbound: outbound.clone(),
            receiver,
            writer,
            kill,
            watcher,
        });

        Ok(Connection {
            generation,
            outbound,
            registry: Arc::clone(&shared.registry),
        })
    }

    /// Tear down `generation` if it is still the live one.
    ///
    /// Returns the exit watcher so the caller may wait for the process to be
    /// reaped.
    fn teardown(&self, generation: u64, reason: &'static str) -> Option<JoinHandle<()>> {
        let (active, sink) = {
            let mut inner = self.lock();
            let live = matches!(
                inner.state,
                ConnectionState::Starting | ConnectionState::Running
            );
            if inner.generation != generation || !live {
                debug!(generation, reason, "Ignoring stale teardown");
                return None;
            }
            inner.state = ConnectionState::ShuttingDown;
            inner.server_info = None;
            (inner.active.take(), inner.sink.clone())
        };
        info!(generation, reason, "Disconnecting from analysis server");

        let mut watcher = None;
        if let Some(active) = active {
            // Stop the writer first so no frame is accepted after the drain
            active.writer.abort();
            active.receiver.abort();
            drop(active.outbound);
            if let Some(kill) = active.kill {
                let _ = kill.send(());
            }
            watcher = active.watcher;
        }

        self.registry.fail_all();
        self.readiness.reset();
        if let Some(sink) = sink {
            sink.on_disconnect();
        }

        let mut inner = self.lock();
        if inner.generation == generation {
            inner.state = ConnectionState::Stopped;
        }
        watcher
    }

    fn dispatch_event(&self, generation: u64, event: &ServerEvent) {
        let sink = {
            // Readiness is applied under the lock so it cannot land after a teardown reset
            let inner = self.lock();
            let live = inner.generation == generation
                && matches!(
                    inner.state,
                    ConnectionState::Starting | ConnectionState::Running
                );
            if !live {
                debug!(generation, ?event, "Ignoring event from a closed connection");
                return;
            }
            if let Some(subsystem) = self.readiness.apply(event) {
                info!(generation, %subsystem, "Server subsystem ready");
            }
            inner.sink.clone()
        };
        if let Some(sink) = sink {
            sink.on_event(event);
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    generation: u64,
    reader: BoxedReader,
    max_protocol_errors: u32,
) {
    let mut frames = FrameReader::new(BufReader::new(reader));
    let mut consecutive_errors = 0u32;

    let reason = loop {
        match frames.read_frame().await {
            Ok(Some(body)) => match codec::decode(&body) {
                Ok(Inbound::Reply { call_id, payload }) => {
                    consecutive_errors = 0;
                    shared.registry.complete(call_id, payload);
                }
                Ok(Inbound::Event(event)) => {
                    consecutive_errors = 0;
                    debug!(generation, ?event, "Server event");
                    shared.dispatch_event(generation, &event);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        generation,
                        error = %e,
                        consecutive_errors,
                        "Discarding undecodable message"
                    );
                    if let Some(call_id) = e.call_id() {
                        shared.registry.fail(call_id, Error::Protocol(e));
                    }
                    if consecutive_errors >= max_protocol_errors {
                        break "too many protocol errors";
                    }
                }
            },
            Ok(None) => break "server closed the connection",
            Err(e) => {
                error!(generation, error = %e, "Failed to read from analysis server");
                break "read failure";
            }
        }
    };

    shared.teardown(generation, reason);
}

async fn write_loop(
    shared: Arc<Shared>,
    generation: u64,
    writer: BoxedWriter,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut frames = FrameWriter::new(writer);
    while let Some(body) = outbound.recv().await {
        if let Err(e) = frames.write_frame(&body).await {
            error!(generation, error = %e, "Failed to write to analysis server");
            shared.teardown(generation, "write failure");
            return;
        }
    }
    let _ = frames.shutdown().await;
}

async fn watch_process(
    shared: Arc<Shared>,
    generation: u64,
    mut child: Child,
    kill: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => info!(generation, %status, "Analysis server exited"),
                Err(e) => warn!(generation, error = %e, "Failed to wait for analysis server"),
            }
            shared.teardown(generation, "server process exited");
        }
        _ = kill => {
            match child.kill().await {
                Ok(()) => debug!(generation, "Analysis server stopped"),
                Err(e) => warn!(generation, error = %e, "Failed to kill analysis server"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::LaunchedServer;
    use async_trait::async_trait;
    use sextant_protocol::codec::{encode_event, encode_reply};
    use sextant_protocol::response::ImplementationInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{DuplexStream, duplex};

    /// Hands out one pre-made client stream per launch.
    struct DuplexLauncher {
        streams: Mutex<Vec<DuplexStream>>,
    }

    impl DuplexLauncher {
        fn new(count: usize) -> (Self, Vec<DuplexStream>) {
            let mut clients = Vec::new();
            let mut servers = Vec::new();
            for _ in 0..count {
                let (client, server) = duplex(64 * 1024);
                clients.push(client);
                servers.push(server);
            }
            clients.reverse();
            (
                Self {
                    streams: Mutex::new(clients),
                },
                servers,
            )
        }
    }

    #[async_trait]
    impl ServerLauncher for DuplexLauncher {
        async fn launch(&self, _config: &ProjectConfig) -> Result<LaunchedServer> {
            let stream = self
                .streams
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::StartupFailed("no more streams".into()))?;
            Ok(LaunchedServer::from_stream(stream))
        }
    }

    #[derive(Default)]
    struct CountingSink {
        events: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl EventSink for CountingSink {
        fn on_event(&self, _event: &ServerEvent) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> ProjectConfig {
        let mut config = ProjectConfig::new("/work/shop");
        config.server.startup_timeout_ms = 2_000;
        config
    }

    /// Answer the handshake, then send `events`, then hold the stream open.
    fn serve_handshake(server: DuplexStream, events: Vec<ServerEvent>) -> JoinHandle<DuplexStream> {
        tokio::spawn(async move {
            let (read, write) = tokio::io::split(server);
            let mut reader = FrameReader::new(BufReader::new(read));
            let mut writer = FrameWriter::new(write);

            let body = reader.read_frame().await.unwrap().unwrap();
            let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
            let call_id = request["callId"].as_u64().unwrap();
            let info = ConnectionInfo {
                pid: Some(42),
                implementation: ImplementationInfo {
                    name: "fake".into(),
                },
                version: "1.0".into(),
            };
            writer
                .write_frame(&encode_reply(call_id, &ResponsePayload::ConnectionInfo(info)).unwrap())
                .await
                .unwrap();
            for event in events {
                writer
                    .write_frame(&encode_event(&event).unwrap())
                    .await
                    .unwrap();
            }
            reader.into_inner().into_inner().unsplit(writer.into_inner())
        })
    }

    #[tokio::test]
    async fn start_performs_handshake() {
        let (launcher, mut servers) = DuplexLauncher::new(1);
        let server = serve_handshake(servers.remove(0), vec![ServerEvent::AnalyzerReady]);
        let supervisor = Supervisor::new();
        let sink = Arc::new(CountingSink::default());

        let info = supervisor
            .start(&launcher, &config(), sink.clone())
            .await
            .unwrap();
        let _stream = server.await.unwrap();

        assert_eq!(info.implementation.name, "fake");
        assert_eq!(supervisor.state(), ConnectionState::Running);
        assert!(supervisor.is_connected());
        assert_eq!(supervisor.generation(), 1);
        assert!(supervisor.connection().is_ok());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (launcher, mut servers) = DuplexLauncher::new(1);
        let server = serve_handshake(servers.remove(0), vec![]);
        let supervisor = Supervisor::new();
        let sink = Arc::new(CountingSink::default());

        supervisor.start(&launcher, &config(), sink.clone()).await.unwrap();
        let _stream = server.await.unwrap();

        let err = supervisor.start(&launcher, &config(), sink).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));
    }

    #[tokio::test]
    async fn silent_server_fails_startup_and_stops() {
        let (launcher, _servers) = DuplexLauncher::new(1);
        let supervisor = Supervisor::new();
        let mut config = config();
        config.server.startup_timeout_ms = 50;

        let err = supervisor
            .start(&launcher, &config, Arc::new(CountingSink::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StartupFailed(_)), "got {err:?}");
        assert_eq!(supervisor.state(), ConnectionState::Stopped);
        assert_eq!(supervisor.registry().pending_count(), 0);
    }

    #[tokio::test]
    async fn launch_failure_leaves_stopped() {
        let (launcher, _servers) = DuplexLauncher::new(0);
        let supervisor = Supervisor::new();

        let err = supervisor
            .start(&launcher, &config(), Arc::new(CountingSink::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StartupFailed(_)));
        assert!(!supervisor.is_running());
        assert!(matches!(supervisor.connection(), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn server_eof_tears_down_once() {
        let (launcher, mut servers) = DuplexLauncher::new(1);
        let server = serve_handshake(servers.remove(0), vec![ServerEvent::IndexerReady]);
        let supervisor = Supervisor::new();
        let sink = Arc::new(CountingSink::default());

        supervisor.start(&launcher, &config(), sink.clone()).await.unwrap();
        let stream = server.await.unwrap();
        supervisor
            .readiness()
            .wait_for(crate::readiness::Subsystem::Indexer, Duration::from_secs(2))
            .await
            .unwrap();
        drop(stream);

        tokio::time::timeout(Duration::from_secs(2), async {
            while supervisor.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(!supervisor.readiness().indexer_ready());
        assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(sink.events.load(Ordering::SeqCst), 1);

        // A second shutdown is a no-op
        supervisor.shutdown().await;
        assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn events_after_teardown_leave_readiness_unset() {
        let (launcher, mut servers) = DuplexLauncher::new(1);
        let server = serve_handshake(servers.remove(0), vec![]);
        let supervisor = Supervisor::new();
        let sink = Arc::new(CountingSink::default());

        supervisor.start(&launcher, &config(), sink.clone()).await.unwrap();
        let _stream = server.await.unwrap();
        supervisor.shutdown().await;

        // A receive loop that was mid-dispatch when the teardown ran
        supervisor.shared.dispatch_event(1, &ServerEvent::AnalyzerReady);
        supervisor.shared.dispatch_event(1, &ServerEvent::IndexerReady);

        assert_eq!(supervisor.state(), ConnectionState::Stopped);
        assert!(!supervisor.readiness().analyzer_ready());
        assert!(!supervisor.readiness().indexer_ready());
        assert_eq!(sink.events.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn restart_after_shutdown_opens_new_generation() {
        let (launcher, mut servers) = DuplexLauncher::new(2);
        let second = servers.pop().unwrap();
        let first = servers.pop().unwrap();
        let supervisor = Supervisor::new();
        let sink = Arc::new(CountingSink::default());

        let server = serve_handshake(first, vec![]);
        supervisor.start(&launcher, &config(), sink.clone()).await.unwrap();
        let _old = server.await.unwrap();
        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), ConnectionState::Stopped);

        let server = serve_handshake(second, vec![]);
        supervisor.start(&launcher, &config(), sink.clone()).await.unwrap();
        let _new = server.await.unwrap();

        assert_eq!(supervisor.generation(), 2);
        assert!(supervisor.is_connected());
        assert_eq!(supervisor.connection().unwrap().generation(), 2);
    }
}
