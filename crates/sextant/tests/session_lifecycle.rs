//! Integration tests for connecting, disconnecting and reconnecting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sextant::{ConnectionState, Error, Subsystem};
use sextant_protocol::{Request, ResponsePayload, ServerEvent};

mod common;
use common::{
    EditorCall, FakeLauncher, Push, RecordingEditor, connected, environment, settle, silent,
    wait_stopped,
};

#[tokio::test]
async fn startup_reports_server_identity() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    assert!(env.is_connected());
    assert_eq!(env.supervisor().state(), ConnectionState::Running);
    let info = env.supervisor().server_info().unwrap();
    assert_eq!(info.implementation.name, "fake-ensime");
    assert!(editor.has_status("Connected to fake-ensime 1.0.0"));
    assert!(env.is_ready(Subsystem::Analyzer));
    assert!(env.is_ready(Subsystem::Indexer));
}

#[tokio::test]
async fn second_startup_is_refused() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let err = env.startup().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning));
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn unresponsive_server_fails_startup() {
    let launcher = Arc::new(FakeLauncher::unresponsive());
    let editor = RecordingEditor::new();
    let env = environment(&launcher, &editor);

    let err = env.startup().await.unwrap_err();
    assert!(matches!(err, Error::StartupFailed(_)), "got {err:?}");
    assert!(!env.is_running());
    assert_eq!(editor.errors().len(), 1);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    env.shutdown().await;
    env.shutdown().await;
    env.shutdown().await;

    assert!(!env.is_running());
    let disconnects = editor
        .calls()
        .iter()
        .filter(|c| matches!(c, EditorCall::Status(s) if s.contains("Disconnected")))
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn shutdown_while_stopped_does_nothing() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = environment(&launcher, &editor);

    env.shutdown().await;
    assert!(editor.calls().is_empty());
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn connection_loss_resolves_each_pending_call_once() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let resolved = Arc::new(AtomicUsize::new(0));
    for offset in 0..3 {
        let counter = Arc::clone(&resolved);
        env.submit_with(
            &Request::TypeAtPoint {
                file: sextant_protocol::SourceFileInfo::on_disk("/work/shop/A.scala"),
                offset,
            },
            move |result| {
                assert!(matches!(result, Err(Error::ConnectionLost)));
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
    }
    let waiting = {
        let env = Arc::clone(&env);
        tokio::spawn(async move {
            env.call(&Request::symbol_search(["List"])).await
        })
    };
    launcher.server().wait_for_requests(4).await;

    launcher.server().close();
    let result = waiting.await.unwrap();
    assert!(matches!(result, Err(Error::ConnectionLost)), "got {result:?}");

    wait_stopped(&env).await;
    assert_eq!(resolved.load(Ordering::SeqCst), 3);
    assert_eq!(env.supervisor().registry().pending_count(), 0);
    assert!(!env.is_running());
}

#[tokio::test]
async fn readiness_resets_on_disconnect() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;
    assert!(env.readiness().analyzer_ready());

    launcher.server().close();
    editor
        .wait_until(|calls| {
            calls
                .iter()
                .any(|c| matches!(c, EditorCall::Status(s) if s.contains("Disconnected")))
        })
        .await;

    assert!(!env.readiness().analyzer_ready());
    assert!(!env.readiness().indexer_ready());
    assert!(!env.is_ready(Subsystem::Analyzer));
}

#[tokio::test]
async fn repeated_decode_errors_drop_the_connection() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let server = launcher.server();
    server.push(Push::Raw(b"not json".to_vec()));
    server.push(Push::Raw(b"{\"payload\": 7}".to_vec()));
    settle().await;
    assert!(env.is_connected(), "isolated errors are tolerated");

    server.push(Push::Raw(b"still not json".to_vec()));
    wait_stopped(&env).await;
    assert!(editor.calls().contains(&EditorCall::HideNotes));
}

#[tokio::test]
async fn undecodable_reply_fails_its_caller() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let call_id = env
        .submit_with(&Request::type_check("/work/shop/A.scala"), move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    launcher.server().wait_for_requests(1).await;

    let body = format!(r#"{{"callId":{call_id},"payload":{{"typehint":"StringResponse","text":5}}}}"#);
    launcher.server().push(Push::Raw(body.into_bytes()));

    let result = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("callback was not resolved")
        .unwrap();
    assert!(
        matches!(result, Err(Error::Protocol(sextant_protocol::Error::BadReply { .. }))),
        "got {result:?}"
    );
    assert!(!env.supervisor().registry().is_pending(call_id));
    assert_eq!(env.supervisor().registry().pending_count(), 0);
    assert!(env.is_connected());
}

#[tokio::test]
async fn decode_error_streak_is_broken_by_valid_messages() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let server = launcher.server();
    for _ in 0..3 {
        server.push(Push::Raw(b"garbage".to_vec()));
        server.push(Push::Raw(b"garbage".to_vec()));
        server.event(ServerEvent::CompilerRestarted);
    }
    settle().await;
    assert!(env.is_connected());
}

#[tokio::test]
async fn restart_after_server_exit_uses_fresh_connection() {
    let launcher = Arc::new(FakeLauncher::new(common::always(ResponsePayload::True)));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;
    let first_generation = env.supervisor().generation();

    launcher.server().close();
    wait_stopped(&env).await;

    env.startup().await.unwrap();
    assert_eq!(launcher.launches(), 2);
    assert_eq!(env.supervisor().generation(), first_generation + 1);

    let reply = env
        .call(&Request::symbol_search(["Option"]))
        .await
        .unwrap();
    assert_eq!(reply, ResponsePayload::True);
}

#[tokio::test]
async fn background_messages_reach_the_status_bar() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let _env = connected(&launcher, &editor).await;

    launcher.server().event(ServerEvent::BackgroundMessage {
        detail: "Indexing 40%".into(),
        code: 105,
    });
    editor
        .wait_until(|calls| calls.contains(&EditorCall::Status("Indexing 40%".into())))
        .await;
}
