//! Common test utilities shared across integration tests.
//!
//! [`FakeLauncher`] starts an in-process server over `tokio::io::duplex`
//! that answers the handshake, records every request and answers the rest
//! from a script. [`RecordingEditor`] records everything the client asks the
//! editor to do.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sextant::editor::{CancelCallback, ChoiceCallback, InputCallback};
use sextant::{
    EditorAdapter, Environment, LaunchedServer, ProjectConfig, ServerLauncher, WindowId,
};
use sextant_protocol::codec::{encode_event, encode_reply};
use sextant_protocol::response::ImplementationInfo;
use sextant_protocol::{
    ConnectionInfo, FrameReader, FrameWriter, Note, ResponsePayload, ServerEvent,
};
use tokio::io::{BufReader, DuplexStream, duplex};
use tokio::sync::mpsc;

/// Something the fake server writes to the client.
#[derive(Debug, Clone)]
pub enum Push {
    /// A reply to `call_id`.
    Reply(u64, ResponsePayload),
    /// An unsolicited event.
    Event(ServerEvent),
    /// A raw frame body, written as-is.
    Raw(Vec<u8>),
    /// Close the stream.
    Close,
}

/// Decides what the server sends back for a request: `(call_id, req)`.
pub type Responder = Arc<dyn Fn(u64, &Value) -> Vec<Push> + Send + Sync>;

/// Typehint of a recorded request.
pub fn typehint(request: &Value) -> &str {
    request["req"]["typehint"].as_str().unwrap_or_default()
}

/// A responder that never answers.
pub fn silent() -> Responder {
    Arc::new(|_, _| Vec::new())
}

/// A responder that answers every request with the same payload.
pub fn always(payload: ResponsePayload) -> Responder {
    Arc::new(move |call_id, _| vec![Push::Reply(call_id, payload.clone())])
}

/// Handle on one running fake server.
#[derive(Clone)]
pub struct ServerHandle {
    requests: Arc<Mutex<Vec<Value>>>,
    control: mpsc::UnboundedSender<Push>,
}

impl ServerHandle {
    /// Every request received after the handshake.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// Typehints of every request received after the handshake.
    pub fn typehints(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| typehint(r).to_string())
            .collect()
    }

    /// Send something to the client.
    pub fn push(&self, push: Push) {
        let _ = self.control.send(push);
    }

    /// Send an event to the client.
    pub fn event(&self, event: ServerEvent) {
        self.push(Push::Event(event));
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        self.push(Push::Close);
    }

    /// Wait until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            let requests = self.requests();
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} requests, got {:?}",
            self.typehints()
        );
    }
}

/// Launcher for in-process fake servers.
pub struct FakeLauncher {
    responder: Responder,
    initial_events: Vec<ServerEvent>,
    answer_handshake: bool,
    servers: Mutex<Vec<ServerHandle>>,
}

impl FakeLauncher {
    /// A server that reports both subsystems ready and answers with `responder`.
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            initial_events: vec![ServerEvent::AnalyzerReady, ServerEvent::IndexerReady],
            answer_handshake: true,
            servers: Mutex::new(Vec::new()),
        }
    }

    /// Events sent right after the handshake.
    pub fn with_initial_events(mut self, events: Vec<ServerEvent>) -> Self {
        self.initial_events = events;
        self
    }

    /// A server that never answers the handshake.
    pub fn unresponsive() -> Self {
        let mut launcher = Self::new(silent());
        launcher.answer_handshake = false;
        launcher
    }

    /// Number of servers launched so far.
    pub fn launches(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    /// The most recently launched server.
    pub fn server(&self) -> ServerHandle {
        self.servers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no server launched")
    }
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
    async fn launch(&self, _config: &ProjectConfig) -> sextant::Result<LaunchedServer> {
        let (client, server) = duplex(256 * 1024);
        let (control, inbox) = mpsc::unbounded_channel();
        let handle = ServerHandle {
            requests: Arc::new(Mutex::new(Vec::new())),
            control,
        };
        tokio::spawn(serve(
            server,
            Arc::clone(&self.responder),
            self.initial_events.clone(),
            self.answer_handshake,
            Arc::clone(&handle.requests),
            inbox,
        ));
        self.servers.lock().unwrap().push(handle);
        Ok(LaunchedServer::from_stream(client))
    }
}

async fn serve(
    stream: DuplexStream,
    responder: Responder,
    initial_events: Vec<ServerEvent>,
    answer_handshake: bool,
    requests: Arc<Mutex<Vec<Value>>>,
    mut inbox: mpsc::UnboundedReceiver<Push>,
) {
    let (read, write) = tokio::io::split(stream);
    let mut reader = FrameReader::new(BufReader::new(read));
    let mut writer = FrameWriter::new(write);

    loop {
        let pushes = tokio::select! {
            frame = reader.read_frame() => {
                let Ok(Some(body)) = frame else {
                    return;
                };
                let request: Value = serde_json::from_slice(&body).unwrap();
                let call_id = request["callId"].as_u64().unwrap();
                if typehint(&request) == "ConnectionInfoReq" {
                    if !answer_handshake {
                        continue;
                    }
                    let mut pushes = vec![Push::Reply(call_id, ResponsePayload::ConnectionInfo(info()))];
                    pushes.extend(initial_events.iter().cloned().map(Push::Event));
                    pushes
                } else {
                    requests.lock().unwrap().push(request.clone());
                    responder(call_id, &request)
                }
            }
            Some(push) = inbox.recv() => vec![push],
        };

        for push in pushes {
            let body = match push {
                Push::Reply(call_id, payload) => encode_reply(call_id, &payload).unwrap(),
                Push::Event(event) => encode_event(&event).unwrap(),
                Push::Raw(body) => body,
                Push::Close => return,
            };
            if writer.write_frame(&body).await.is_err() {
                return;
            }
        }
    }
}

fn info() -> ConnectionInfo {
    ConnectionInfo {
        pid: Some(4242),
        implementation: ImplementationInfo {
            name: "fake-ensime".into(),
        },
        version: "1.0.0".into(),
    }
}

/// A call made on the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorCall {
    Save(PathBuf),
    InputPanel { prompt: String, initial: String },
    Choices(Vec<String>),
    ShowPopup(String),
    HidePopup,
    Status(String),
    Error(String),
    OpenLocation(PathBuf, usize),
    OpenUri(String),
    ApplyDiff(PathBuf),
    ShowNotes(usize),
    HideNotes,
    RerunCompletion,
}

/// Editor adapter that records calls and answers prompts from presets.
#[derive(Default)]
pub struct RecordingEditor {
    calls: Mutex<Vec<EditorCall>>,
    popup: Mutex<bool>,
    /// Text entered into the next input panel; `None` cancels it.
    pub input: Mutex<Option<String>>,
    /// Item picked from the next choice list; `None` dismisses it.
    pub choice: Mutex<Option<usize>>,
}

impl RecordingEditor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answering(input: Option<&str>, choice: Option<usize>) -> Arc<Self> {
        let editor = Self::default();
        *editor.input.lock().unwrap() = input.map(str::to_string);
        *editor.choice.lock().unwrap() = choice;
        Arc::new(editor)
    }

    fn record(&self, call: EditorCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<EditorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EditorCall::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EditorCall::Error(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn has_status(&self, needle: &str) -> bool {
        self.statuses().iter().any(|s| s.contains(needle))
    }

    /// Poll until `predicate` holds for the recorded calls.
    pub async fn wait_until(&self, predicate: impl Fn(&[EditorCall]) -> bool) {
        for _ in 0..200 {
            if predicate(&self.calls()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met; calls: {:#?}", self.calls());
    }
}

impl EditorAdapter for RecordingEditor {
    fn view_count(&self) -> usize {
        1
    }

    fn save(&self, file: &Path) -> std::io::Result<()> {
        self.record(EditorCall::Save(file.to_path_buf()));
        Ok(())
    }

    fn show_input_panel(
        &self,
        prompt: &str,
        initial: &str,
        on_done: InputCallback,
        on_cancel: CancelCallback,
    ) {
        self.record(EditorCall::InputPanel {
            prompt: prompt.to_string(),
            initial: initial.to_string(),
        });
        match self.input.lock().unwrap().take() {
            Some(text) => on_done(text),
            None => on_cancel(),
        }
    }

    fn show_choices(&self, items: Vec<String>, on_select: ChoiceCallback) {
        self.record(EditorCall::Choices(items));
        let choice = self.choice.lock().unwrap().take();
        on_select(choice);
    }

    fn show_popup(&self, text: &str) {
        *self.popup.lock().unwrap() = true;
        self.record(EditorCall::ShowPopup(text.to_string()));
    }

    fn hide_popup(&self) {
        *self.popup.lock().unwrap() = false;
        self.record(EditorCall::HidePopup);
    }

    fn is_popup_visible(&self) -> bool {
        *self.popup.lock().unwrap()
    }

    fn status_message(&self, message: &str) {
        self.record(EditorCall::Status(message.to_string()));
    }

    fn error_message(&self, message: &str) {
        self.record(EditorCall::Error(message.to_string()));
    }

    fn open_location(&self, file: &Path, offset: usize) {
        self.record(EditorCall::OpenLocation(file.to_path_buf(), offset));
    }

    fn open_uri(&self, uri: &str) {
        self.record(EditorCall::OpenUri(uri.to_string()));
    }

    fn apply_diff(&self, diff: &Path) {
        self.record(EditorCall::ApplyDiff(diff.to_path_buf()));
    }

    fn show_notes(&self, notes: &[Note]) {
        self.record(EditorCall::ShowNotes(notes.len()));
    }

    fn hide_notes(&self) {
        self.record(EditorCall::HideNotes);
    }

    fn rerun_completion(&self) {
        self.record(EditorCall::RerunCompletion);
    }
}

/// Project configuration with short timeouts.
pub fn config() -> ProjectConfig {
    let mut config = ProjectConfig::new("/work/shop");
    config.server.startup_timeout_ms = 2_000;
    config.client.request_timeout_ms = 1_000;
    config.client.completion_timeout_ms = 200;
    config
}

/// A stopped environment wired to `launcher` and `editor`.
pub fn environment(launcher: &Arc<FakeLauncher>, editor: &Arc<RecordingEditor>) -> Arc<Environment> {
    let launcher: Arc<dyn ServerLauncher> = Arc::clone(launcher) as Arc<dyn ServerLauncher>;
    let editor: Arc<dyn EditorAdapter> = Arc::clone(editor) as Arc<dyn EditorAdapter>;
    Arc::new(Environment::with_config(WindowId(1), config(), editor, launcher))
}

/// An environment connected to a fake server, waiting for whichever
/// subsystems the launcher reports ready.
pub async fn connected(
    launcher: &Arc<FakeLauncher>,
    editor: &Arc<RecordingEditor>,
) -> Arc<Environment> {
    let env = environment(launcher, editor);
    env.startup().await.unwrap();
    let wait = Duration::from_secs(2);
    if launcher.initial_events.contains(&ServerEvent::AnalyzerReady) {
        env.readiness()
            .wait_for(sextant::Subsystem::Analyzer, wait)
            .await
            .unwrap();
    }
    if launcher.initial_events.contains(&ServerEvent::IndexerReady) {
        env.readiness()
            .wait_for(sextant::Subsystem::Indexer, wait)
            .await
            .unwrap();
    }
    env
}

/// Wait until the environment has fully stopped.
pub async fn wait_stopped(env: &Environment) {
    for _ in 0..200 {
        if !env.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("environment is still running: {env:?}");
}

/// Give in-flight tasks a moment to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
