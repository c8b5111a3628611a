//! End-to-end tests of the indexing and conversation pipelines.
//!
//! Each test builds a [`Runtime`] over a temp SQLite database and a
//! filesystem source, with the embedding and generation providers replaced
//! by deterministic fakes from `common`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use rca_harness::chat::ChatEvent;
use rca_harness::connector_fs::FilesystemSource;
use rca_harness::prompts::INCOMPLETE_NOTICE;
use rca_harness::runtime::Runtime;
use rca_harness::sources::{DocumentSource, SourceListing};
use rca_harness_core::error::SyncError;
use rca_harness_core::models::{document_id_for, Role};
use rca_harness_core::store::VectorIndex;
use tempfile::TempDir;

use common::*;

// ─── Sync ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sync_is_idempotent() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    write_rca(&root, "incident-7.txt", "Cache stampede after deploy.\n");
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;

    let first = rt.indexer.sync().await.unwrap();
    assert_eq!(first.documents_updated, 2);
    assert_eq!(first.documents_failed, 0);

    let second = rt.indexer.sync().await.unwrap();
    assert_eq!(second.documents_updated, 0);
    assert_eq!(second.documents_deleted, 0);
    assert_eq!(second.documents_unchanged, 2);
    assert_eq!(second.chunks_written, 0);

    let docs = rt.index.documents().await.unwrap();
    let uris: Vec<&str> = docs.iter().map(|d| d.source_uri.as_str()).collect();
    assert_eq!(uris, vec!["incident-42.md", "incident-7.txt"]);
}

#[tokio::test]
async fn test_changed_document_replaces_its_chunks() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;

    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_updated, 1);
    assert_eq!(report.chunks_written, 3);

    let doc_id = document_id_for("incident-42.md");
    let v1 = rt.index.entries(&doc_id).await.unwrap();
    assert_eq!(v1.len(), 3);
    let v1_hash = rt.index.documents().await.unwrap()[0].content_hash.clone();

    write_rca(&root, "incident-42.md", INCIDENT_42_V2);
    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_updated, 1);
    assert_eq!(report.chunks_written, 1);

    let v2 = rt.index.entries(&doc_id).await.unwrap();
    assert_eq!(v2.len(), 1);
    assert_eq!(v2[0].chunk.text, INCIDENT_42_V2);
    assert!(v2.iter().all(|e| !e.chunk.text.contains("Symptoms")));

    let docs = rt.index.documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, doc_id);
    assert_eq!(docs[0].chunk_count, 1);
    assert_ne!(docs[0].content_hash, v1_hash);
}

#[tokio::test]
async fn test_deleted_file_is_removed_from_index() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    write_rca(&root, "incident-7.txt", "Cache stampede after deploy.\n");
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;
    rt.indexer.sync().await.unwrap();

    std::fs::remove_file(root.join("rcas/incident-7.txt")).unwrap();
    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_deleted, 1);
    assert_eq!(report.documents_unchanged, 1);

    let gone = document_id_for("incident-7.txt");
    assert!(rt.index.entries(&gone).await.unwrap().is_empty());
    assert_eq!(rt.index.documents().await.unwrap().len(), 1);
}

/// Pauses inside `list_documents` until released.
struct GatedSource {
    inner: FilesystemSource,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl DocumentSource for GatedSource {
    fn name(&self) -> &str {
        "gated"
    }

    async fn list_documents(&self) -> Result<SourceListing> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.list_documents().await
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        self.inner.fetch(uri).await
    }
}

#[tokio::test]
async fn test_concurrent_sync_is_rejected() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    let config = test_config(&root);
    let source = Arc::new(GatedSource {
        inner: fs_source_for(&config),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let rt = runtime_with(
        &config,
        source.clone(),
        Arc::new(ScriptedModel::new(GENERAL, &[])),
    )
    .await;

    let indexer = rt.indexer.clone();
    let running = tokio::spawn(async move { indexer.sync().await });
    source.entered.notified().await;

    let second = rt.indexer.sync().await;
    assert!(matches!(second, Err(SyncError::InProgress)));

    source.release.notify_one();
    let first = running.await.unwrap().unwrap();
    assert_eq!(first.documents_updated, 1);

    // The lock is released once the first run finishes.
    source.release.notify_one();
    let third = rt.indexer.sync().await.unwrap();
    assert_eq!(third.documents_unchanged, 1);
}

#[tokio::test]
async fn test_unreadable_document_does_not_abort_sync() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    std::fs::write(root.join("rcas/broken.docx"), b"not a zip archive").unwrap();
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;

    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_updated, 1);
    assert_eq!(report.documents_failed, 1);
    assert_eq!(report.failures[0].uri, "broken.docx");

    // Still unrecorded, so the next run retries it.
    let again = rt.indexer.sync().await.unwrap();
    assert_eq!(again.documents_failed, 1);
    assert_eq!(again.documents_unchanged, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unlistable_document_keeps_its_previous_version() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    write_rca(&root, "incident-7.txt", "Cache stampede after deploy.\n");
    let mut config = test_config(&root);
    if let rca_harness::config::SourceConfig::Filesystem(fs) = &mut config.source {
        fs.follow_symlinks = true;
    }
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;
    assert_eq!(rt.indexer.sync().await.unwrap().documents_updated, 2);
    let doc_id = document_id_for("incident-42.md");
    let before = rt.index.entries(&doc_id).await.unwrap();

    // The report becomes a dangling link; the listing cannot stat it.
    let path = root.join("rcas/incident-42.md");
    std::fs::remove_file(&path).unwrap();
    std::os::unix::fs::symlink(root.join("rcas/moved-away.md"), &path).unwrap();

    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_failed, 1);
    assert_eq!(report.failures[0].uri, "incident-42.md");
    assert_eq!(report.documents_unchanged, 1);
    assert_eq!(report.documents_deleted, 0);
    assert_eq!(rt.index.entries(&doc_id).await.unwrap(), before);
    assert_eq!(rt.index.documents().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_sync_records_report_summaries() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    let config = test_config(&root);
    let model = ScriptedModel::new(GENERAL, &[]).with_summary(CHECKOUT_SUMMARY);
    let rt = test_runtime(&config, Arc::new(model)).await;
    rt.indexer.sync().await.unwrap();

    let docs = rt.index.documents().await.unwrap();
    let summary = docs[0].summary.as_ref().unwrap();
    assert_eq!(summary.project_name, "Checkout");
    assert_eq!(summary.root_causes, vec!["leaked transaction exhausted the pool"]);
}

#[tokio::test]
async fn test_sync_without_summaries_still_indexes() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    let config = test_config(&root);
    // No summary reply configured: every summary call fails.
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;

    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_updated, 1);
    assert_eq!(report.documents_failed, 0);
    assert_eq!(rt.index.documents().await.unwrap()[0].summary, None);
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_search_finds_matching_incident() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    write_rca(
        &root,
        "incident-7.txt",
        "Incident 7: cache stampede. Redis evictions spiked after a deploy.\n",
    );
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;
    rt.indexer.sync().await.unwrap();

    let result = rt
        .retrieval
        .search("checkout returned HTTP 500 errors")
        .await;
    assert!(!result.is_empty());
    assert_eq!(result.hits[0].source_uri, "incident-42.md");
    assert!(result.hits.windows(2).all(|w| w[0].score >= w[1].score));

    let nothing = rt.retrieval.retrieve("", 5, 0.0).await;
    assert!(nothing.is_empty());
}

// ─── Chat ───────────────────────────────────────────────────────────

async fn synced_runtime(model: Arc<ScriptedModel>) -> (TempDir, Runtime) {
    let (tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    let config = test_config(&root);
    let rt = test_runtime(&config, model).await;
    rt.indexer.sync().await.unwrap();
    (tmp, rt)
}

#[tokio::test]
async fn test_chat_turn_is_grounded_and_persisted() {
    let model = Arc::new(ScriptedModel::new(
        SPECIALIST,
        &["Restart ", "the connection ", "pool."],
    ));
    let (_tmp, rt) = synced_runtime(model.clone()).await;
    let session = rt.sessions.create_session(None).await.unwrap();

    let turn = rt.chat.start_turn(
        &session.id,
        "checkout is returning HTTP 500 errors",
        CancellationToken::new(),
    );
    let events: Vec<ChatEvent> = turn.collect().await;
    let prompts = model.streamed_prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(
        events,
        vec![
            ChatEvent::Evidence(prompts[0].evidence.clone()),
            ChatEvent::Fragment("Restart ".into()),
            ChatEvent::Fragment("the connection ".into()),
            ChatEvent::Fragment("pool.".into()),
        ]
    );

    assert!(prompts[0].system.contains("KNOWLEDGE BASE EVIDENCE"));
    assert!(prompts[0].system.contains("incident-42.md"));
    assert!(!prompts[0].evidence.is_empty());

    let messages = rt.sessions.messages(&session.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "checkout is returning HTTP 500 errors");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Restart the connection pool.");
    let stored: Vec<&str> = messages[1].evidence.iter().map(|e| e.chunk_id.as_str()).collect();
    let used: Vec<&str> = prompts[0].evidence.iter().map(|e| e.chunk_id.as_str()).collect();
    assert_eq!(stored, used);
    assert_eq!(messages[1].evidence[0].source_uri, "incident-42.md");
}

#[tokio::test]
async fn test_specialist_prompt_carries_report_summary() {
    let model = Arc::new(
        ScriptedModel::new(SPECIALIST, &["Restart the pool."]).with_summary(CHECKOUT_SUMMARY),
    );
    let (_tmp, rt) = synced_runtime(model.clone()).await;
    let session = rt.sessions.create_session(None).await.unwrap();

    let reply = rt
        .chat
        .start_turn(&session.id, "checkout is returning HTTP 500 errors", CancellationToken::new())
        .collect_reply()
        .await;
    assert!(reply.complete);
    assert!(!reply.evidence.is_empty());

    let system = &model.streamed_prompts()[0].system;
    assert!(system.contains("Project: Checkout"));
    assert!(system.contains("Identified root causes: leaked transaction exhausted the pool"));
    assert_eq!(system.matches("Project: Checkout").count(), 1);
}

#[tokio::test]
async fn test_general_prompt_has_no_report_summary() {
    let model = Arc::new(
        ScriptedModel::new(GENERAL, &["Three incidents."]).with_summary(CHECKOUT_SUMMARY),
    );
    let (_tmp, rt) = synced_runtime(model.clone()).await;
    let session = rt.sessions.create_session(None).await.unwrap();

    rt.chat
        .start_turn(&session.id, "list the checkout incidents", CancellationToken::new())
        .collect_reply()
        .await;
    let system = &model.streamed_prompts()[0].system;
    assert!(!system.contains("Project: Checkout"));
}

#[tokio::test]
async fn test_second_turn_sees_history() {
    let model = Arc::new(ScriptedModel::new(GENERAL, &["Noted."]));
    let (_tmp, rt) = synced_runtime(model.clone()).await;
    let session = rt.sessions.create_session(None).await.unwrap();

    for message in ["how many incidents are there?", "and which one was worst?"] {
        let reply = rt
            .chat
            .start_turn(&session.id, message, CancellationToken::new())
            .collect_reply()
            .await;
        assert!(reply.complete);
        assert_eq!(reply.response, "Noted.");
    }

    let prompts = model.streamed_prompts();
    assert_eq!(prompts.len(), 2);
    let second = &prompts[1];
    let contents: Vec<&str> = second.messages.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"how many incidents are there?"));
    assert!(contents.contains(&"Noted."));
    assert_eq!(rt.sessions.messages(&session.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_interrupted_stream_keeps_partial_answer() {
    let model = Arc::new(ScriptedModel::new(SPECIALIST, &["Restart ", "the pool"]).breaking());
    let (_tmp, rt) = synced_runtime(model).await;
    let session = rt.sessions.create_session(None).await.unwrap();

    let turn = rt.chat.start_turn(
        &session.id,
        "checkout is returning HTTP 500 errors",
        CancellationToken::new(),
    );
    let events: Vec<ChatEvent> = turn.collect().await;
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], ChatEvent::Evidence(_)));
    assert_eq!(events[1], ChatEvent::Fragment("Restart ".into()));
    assert_eq!(events[2], ChatEvent::Fragment("the pool".into()));
    assert_eq!(
        events[3],
        ChatEvent::Incomplete {
            notice: INCOMPLETE_NOTICE
        }
    );
    assert!(!events[3].clone().into_text().contains("connection reset"));

    let messages = rt.sessions.messages(&session.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Restart the pool");
}

#[tokio::test]
async fn test_dropping_turn_cancels_and_keeps_partial() {
    let fragments: Vec<String> = (0..50).map(|i| format!("step{} ", i)).collect();
    let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
    let full: String = fragments.concat();
    let model = Arc::new(
        ScriptedModel::new(SPECIALIST, &refs).with_delay(Duration::from_millis(10)),
    );
    let (_tmp, rt) = synced_runtime(model).await;
    let session = rt.sessions.create_session(None).await.unwrap();

    let mut turn = rt.chat.start_turn(
        &session.id,
        "checkout is returning HTTP 500 errors",
        CancellationToken::new(),
    );
    assert!(matches!(turn.next().await, Some(ChatEvent::Evidence(_))));
    let mut received = String::new();
    for _ in 0..3 {
        match turn.next().await {
            Some(ChatEvent::Fragment(text)) => received.push_str(&text),
            other => panic!("unexpected event: {:?}", other),
        }
    }
    drop(turn);

    let sessions = rt.sessions.clone();
    let id = session.id.clone();
    eventually(|| {
        let sessions = sessions.clone();
        let id = id.clone();
        async move { sessions.messages(&id).await.unwrap().len() == 2 }
    })
    .await;

    let messages = rt.sessions.messages(&session.id).await.unwrap();
    let stored = &messages[1].content;
    assert_eq!(stored, &received);
    assert!(stored.len() < full.len());
}

#[tokio::test]
async fn test_cancel_token_stops_turn() {
    let fragments: Vec<String> = (0..50).map(|i| format!("step{} ", i)).collect();
    let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
    let model = Arc::new(
        ScriptedModel::new(GENERAL, &refs).with_delay(Duration::from_millis(10)),
    );
    let (_tmp, rt) = synced_runtime(model).await;
    let session = rt.sessions.create_session(None).await.unwrap();

    let cancel = CancellationToken::new();
    let mut turn = rt
        .chat
        .start_turn(&session.id, "list the incidents", cancel.clone());
    assert!(matches!(turn.next().await, Some(ChatEvent::Evidence(_))));
    let received = match turn.next().await {
        Some(ChatEvent::Fragment(text)) => text,
        other => panic!("unexpected event: {:?}", other),
    };
    cancel.cancel();

    let mut after_cancel = 0;
    while turn.next().await.is_some() {
        after_cancel += 1;
    }
    assert_eq!(after_cancel, 0);

    let sessions = rt.sessions.clone();
    let id = session.id.clone();
    eventually(|| {
        let sessions = sessions.clone();
        let id = id.clone();
        async move { sessions.messages(&id).await.unwrap().len() == 2 }
    })
    .await;
    let messages = rt.sessions.messages(&session.id).await.unwrap();
    assert_eq!(messages[1].content, received);
}

#[tokio::test]
async fn test_turns_in_one_session_are_serialized() {
    let model = Arc::new(
        ScriptedModel::new(GENERAL, &["a", "b", "c"]).with_delay(Duration::from_millis(5)),
    );
    let (_tmp, rt) = synced_runtime(model).await;
    let session = rt.sessions.create_session(None).await.unwrap();

    let first = rt
        .chat
        .start_turn(&session.id, "first question", CancellationToken::new());
    let second = rt
        .chat
        .start_turn(&session.id, "second question", CancellationToken::new());
    let (a, b) = tokio::join!(first.collect_reply(), second.collect_reply());
    assert_eq!(a.response, "abc");
    assert_eq!(b.response, "abc");

    let messages = rt.sessions.messages(&session.id).await.unwrap();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}
