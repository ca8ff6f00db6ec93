//! End-to-end tests for two-phase completion against a fake server.

use std::sync::Arc;

use serde_json::Value;
use sextant::ViewSnapshot;
use sextant::commands::on_query_completions;
use sextant::completion::WAIT_MESSAGE;
use sextant_protocol::{CompletionInfo, CompletionInfoList, ResponsePayload};

mod common;
use common::{EditorCall, FakeLauncher, Push, RecordingEditor, Responder, connected, settle, silent};

const SOURCE: &str = "object A { val x = fo";

fn completions(count: usize) -> ResponsePayload {
    ResponsePayload::Completions(CompletionInfoList {
        prefix: "fo".into(),
        completions: (0..count)
            .map(|i| CompletionInfo::named(format!("foo{i}")))
            .collect(),
    })
}

/// Answers fast queries with three candidates and unlimited ones with eight.
fn two_phase() -> Responder {
    Arc::new(|call_id, request: &Value| {
        let unlimited = request["req"]["maxResults"] == 0;
        vec![Push::Reply(call_id, completions(if unlimited { 8 } else { 3 }))]
    })
}

fn view(text: &str) -> ViewSnapshot {
    ViewSnapshot::new("/work/shop/src/A.scala", text, text.chars().count())
}

#[tokio::test]
async fn refined_suggestions_replace_fast_ones() {
    let launcher = Arc::new(FakeLauncher::new(two_phase()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let first = on_query_completions(Some(&env), &view(SOURCE))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.items.len(), 3);
    assert!(first.inhibit_default);

    editor
        .wait_until(|calls| calls.contains(&EditorCall::RerunCompletion))
        .await;
    assert!(
        editor
            .calls()
            .contains(&EditorCall::ShowPopup(WAIT_MESSAGE.into()))
    );

    let second = on_query_completions(Some(&env), &view(SOURCE))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.items.len(), 8);
    assert!(second.close_popup);
    assert!(env.completion().snapshot().current_prefix.is_none());

    let requests = launcher.server().requests();
    let limits: Vec<&Value> = requests.iter().map(|r| &r["req"]["maxResults"]).collect();
    assert_eq!(limits, vec![&Value::from(5), &Value::from(0)]);
}

#[tokio::test]
async fn empty_root_answers_longer_prefixes_locally() {
    let launcher = Arc::new(FakeLauncher::new(common::always(completions(0))));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let empty = on_query_completions(Some(&env), &view("object A { val x = zz"))
        .await
        .unwrap()
        .unwrap();
    assert!(empty.items.is_empty());
    assert!(empty.inhibit_default);
    assert_eq!(
        env.completion().snapshot().ignore_prefix.as_deref(),
        Some("zz")
    );

    let longer = on_query_completions(Some(&env), &view("object A { val x = zzq"))
        .await
        .unwrap()
        .unwrap();
    assert!(longer.items.is_empty());
    assert!(!longer.inhibit_default);
    assert_eq!(launcher.server().requests().len(), 1);
}

#[tokio::test]
async fn slow_server_counts_as_no_candidates() {
    let launcher = Arc::new(FakeLauncher::new(silent()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let outcome = on_query_completions(Some(&env), &view(SOURCE))
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.items.is_empty());
    assert_eq!(env.supervisor().registry().pending_count(), 0);
    assert!(env.is_connected());
}

#[tokio::test]
async fn single_candidate_needs_no_refinement() {
    let launcher = Arc::new(FakeLauncher::new(common::always(completions(1))));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let outcome = on_query_completions(Some(&env), &view(SOURCE))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.items.len(), 1);
    settle().await;
    assert_eq!(launcher.server().requests().len(), 1);
    assert!(!editor.calls().contains(&EditorCall::RerunCompletion));
}

#[tokio::test]
async fn disconnect_drops_refinement_in_flight() {
    let fast_only: Responder = Arc::new(|call_id, request: &Value| {
        if request["req"]["maxResults"] == 0 {
            Vec::new()
        } else {
            vec![Push::Reply(call_id, completions(3))]
        }
    });
    let launcher = Arc::new(FakeLauncher::new(fast_only));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    on_query_completions(Some(&env), &view(SOURCE))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        env.completion().snapshot().current_prefix.as_deref(),
        Some("fo")
    );

    env.shutdown().await;
    let state = env.completion().snapshot();
    assert!(state.current_prefix.is_none());
    assert!(state.suggestions.is_empty());
    assert!(!editor.calls().contains(&EditorCall::RerunCompletion));
}

#[tokio::test]
async fn non_source_buffers_use_editor_completion() {
    let launcher = Arc::new(FakeLauncher::new(two_phase()));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    let notes = ViewSnapshot::new("/work/shop/NOTES.md", "fo", 2);
    assert!(on_query_completions(Some(&env), &notes).await.unwrap().is_none());
    assert!(on_query_completions(None, &view(SOURCE)).await.unwrap().is_none());
    assert!(launcher.server().requests().is_empty());
}

#[tokio::test]
async fn unsaved_buffer_is_sent_with_the_query() {
    let launcher = Arc::new(FakeLauncher::new(common::always(completions(1))));
    let editor = RecordingEditor::new();
    let env = connected(&launcher, &editor).await;

    on_query_completions(Some(&env), &view(SOURCE).dirty())
        .await
        .unwrap();
    let request = &launcher.server().requests()[0];
    assert_eq!(request["req"]["fileInfo"]["contents"], SOURCE);
    assert_eq!(request["req"]["point"], 21);
}
