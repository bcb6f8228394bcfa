mod common;

use std::time::Duration;

use common::*;
use pagegen_core::error::{BackendError, EngineError};
use pagegen_core::model::UnitStatus;
use pagegen_engine::{EngineEvent, ScriptedStatus};

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_coalesce_into_one_write() {
    let (ctx, backend, mut events) = engine(&["u1"]);

    for n in 1..=5 {
        let value = format!("t{n}");
        ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", value.as_str())]))
            .await
            .unwrap();
    }
    ctx.enqueue_edit(&unit_id("u1"), patch(&[("body", "b")]))
        .await
        .unwrap();

    // optimistic: local already shows the latest value, nothing written
    let doc = ctx.document().await;
    assert_eq!(text(&doc, "u1", "title").as_deref(), Some("t5"));
    assert_eq!(backend.update_count(), 0);
    assert!(ctx.has_pending_edit(&unit_id("u1")).await);

    advance(1_000).await;

    assert_eq!(backend.update_count(), 1);
    let calls = backend.update_calls_for(&unit_id("u1"));
    assert_eq!(calls[0].fields, patch(&[("title", "t5"), ("body", "b")]));
    assert_eq!(text(&backend.document(), "u1", "title").as_deref(), Some("t5"));
    assert!(!ctx.has_pending_edit(&unit_id("u1")).await);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::EditFlushed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_debounce_window_restarts_on_each_edit() {
    let (ctx, backend, _events) = engine(&["u1"]);

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "a")]))
        .await
        .unwrap();
    advance(600).await;
    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "b")]))
        .await
        .unwrap();
    advance(600).await; // 1200ms after the first edit, 600 after the last

    assert_eq!(backend.update_count(), 0);
    assert!(ctx.has_pending_edit(&unit_id("u1")).await);

    advance(400).await; // the second edit's window closes
    assert_eq!(backend.update_count(), 1);
    assert_eq!(
        backend.update_calls_for(&unit_id("u1"))[0].fields,
        patch(&[("title", "b")])
    );
}

#[tokio::test(start_paused = true)]
async fn test_units_debounce_independently() {
    let (ctx, backend, _events) = engine(&["u1", "u2"]);

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "one")]))
        .await
        .unwrap();
    advance(500).await;
    ctx.enqueue_edit(&unit_id("u2"), patch(&[("title", "two")]))
        .await
        .unwrap();

    advance(500).await; // closes u1's window only
    assert_eq!(backend.update_calls_for(&unit_id("u1")).len(), 1);
    assert_eq!(backend.update_calls_for(&unit_id("u2")).len(), 0);

    advance(500).await;
    assert_eq!(backend.update_calls_for(&unit_id("u2")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_forced_flush_writes_immediately_and_disarms_timer() {
    let (ctx, backend, _events) = engine(&["u1"]);

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "saved")]))
        .await
        .unwrap();
    ctx.flush_unit(&unit_id("u1")).await.unwrap();

    assert_eq!(backend.update_count(), 1);
    assert!(!ctx.has_pending_edit(&unit_id("u1")).await);

    advance(1_000).await; // the debounce timer must not fire a second write
    assert_eq!(backend.update_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_flush_keeps_intent_for_retry() {
    let (ctx, backend, mut events) = engine(&["u1"]);
    backend.fail_next_update(BackendError::api(500, "rejected"));

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "draft")]))
        .await
        .unwrap();
    advance(1_000).await;

    assert_eq!(backend.update_count(), 1);
    assert!(ctx.has_pending_edit(&unit_id("u1")).await);
    assert_eq!(
        text(&ctx.document().await, "u1", "title").as_deref(),
        Some("draft"),
        "the optimistic value stays while the write is unconfirmed"
    );
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::EditFlushFailed { .. })));

    // a forced save retries the same intent
    ctx.flush_unit(&unit_id("u1")).await.unwrap();
    assert_eq!(backend.update_count(), 2);
    assert!(!ctx.has_pending_edit(&unit_id("u1")).await);
    assert_eq!(
        text(&backend.document(), "u1", "title").as_deref(),
        Some("draft")
    );
}

#[tokio::test(start_paused = true)]
async fn test_edit_enqueued_during_flush_survives_it() {
    let (ctx, backend, _events) = engine(&["u1"]);
    backend.set_update_delay(Duration::from_millis(500));

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "draft")]))
        .await
        .unwrap();
    advance(1_000).await; // flush starts, write held in flight

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("notes", "later")]))
        .await
        .unwrap();
    advance(500).await; // first write lands

    assert_eq!(backend.update_count(), 1);
    assert!(
        ctx.has_pending_edit(&unit_id("u1")).await,
        "the newer edit must survive the completed flush"
    );
    let doc = ctx.document().await;
    assert_eq!(text(&doc, "u1", "notes").as_deref(), Some("later"));

    advance(500).await; // the second edit's own debounce window closes
    advance(500).await; // and its delayed write lands
    assert_eq!(backend.update_count(), 2);
    assert!(!ctx.has_pending_edit(&unit_id("u1")).await);
    assert_eq!(
        text(&backend.document(), "u1", "notes").as_deref(),
        Some("later")
    );
}

#[tokio::test(start_paused = true)]
async fn test_sync_preserves_unflushed_fields_only() {
    let (ctx, backend, _events) = engine(&["u1"]);

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "local")]))
        .await
        .unwrap();
    backend.set_server_field(&unit_id("u1"), "title", serde_json::json!("server"));
    backend.set_server_field(&unit_id("u1"), "subtitle", serde_json::json!("from-server"));

    let report = ctx.sync_document().await.unwrap();
    assert_eq!(report.fields_preserved, 1);
    let doc = ctx.document().await;
    assert_eq!(text(&doc, "u1", "title").as_deref(), Some("local"));
    assert_eq!(text(&doc, "u1", "subtitle").as_deref(), Some("from-server"));

    advance(1_000).await; // flush lands; the carve-out ends with it
    backend.set_server_field(&unit_id("u1"), "title", serde_json::json!("server-again"));
    ctx.sync_document().await.unwrap();
    assert_eq!(
        text(&ctx.document().await, "u1", "title").as_deref(),
        Some("server-again")
    );
}

#[tokio::test(start_paused = true)]
async fn test_sync_applies_server_membership_and_order() {
    let (ctx, backend, _events) = engine(&["u1", "u2"]);
    backend.remove_server_unit(&unit_id("u2"));

    let report = ctx.sync_document().await.unwrap();
    assert_eq!(report.units_removed, 1);
    assert!(ctx.document().await.unit(&unit_id("u2")).is_none());

    // an unchanged second sync is a no-op
    let revision = ctx.revision().await;
    let report = ctx.sync_document().await.unwrap();
    assert!(!report.changed);
    assert_eq!(ctx.revision().await, revision);
}

#[tokio::test(start_paused = true)]
async fn test_reorder_persists_and_rolls_back_on_rejection() {
    let (ctx, backend, _events) = engine(&["u1", "u2", "u3"]);

    let order = vec![unit_id("u3"), unit_id("u1"), unit_id("u2")];
    ctx.reorder_units(&order).await.unwrap();
    assert_eq!(ctx.document().await.unit_ids(), order);
    assert_eq!(backend.last_reorder(), Some(order.clone()));
    assert_eq!(backend.document().unit_ids(), order);

    backend.fail_next_reorder(BackendError::api(500, "nope"));
    let err = ctx
        .reorder_units(&[unit_id("u2"), unit_id("u3"), unit_id("u1")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Backend(_)));
    // rolled back to the order the server last accepted
    assert_eq!(ctx.document().await.unit_ids(), order);
}

#[tokio::test(start_paused = true)]
async fn test_clear_artifact_refused_while_job_active() {
    let (ctx, backend, _events) = engine(&["u1"]);
    backend.queue_job_script(vec![
        ScriptedStatus::pending(1, 0),
        ScriptedStatus::completed(),
    ]);
    ctx.submit_generation(&[unit_id("u1")], None)
        .await
        .unwrap();
    settle().await;

    let err = ctx.clear_artifact(&unit_id("u1")).await.unwrap_err();
    assert!(matches!(err, EngineError::UnitBusy(id) if id == unit_id("u1")));

    advance(2_000).await; // job completes
    assert_eq!(
        ctx.document()
            .await
            .unit(&unit_id("u1"))
            .unwrap()
            .artifact_ref
            .as_deref(),
        Some("art://u1.png")
    );

    ctx.clear_artifact(&unit_id("u1")).await.unwrap();
    assert_eq!(
        ctx.document().await.unit(&unit_id("u1")).unwrap().artifact_ref,
        None
    );
    assert_eq!(
        backend.document().unit(&unit_id("u1")).unwrap().artifact_ref,
        None
    );
    assert_eq!(ctx.unit_status(&unit_id("u1")).await, Some(UnitStatus::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_clear_artifact_unknown_unit() {
    let (ctx, _backend, _events) = engine(&["u1"]);
    let err = ctx.clear_artifact(&unit_id("ghost")).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownUnit(_)));
}

#[tokio::test(start_paused = true)]
async fn test_flush_all_writes_every_pending_unit() {
    let (ctx, backend, _events) = engine(&["u1", "u2", "u3"]);

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "one")]))
        .await
        .unwrap();
    ctx.enqueue_edit(&unit_id("u3"), patch(&[("title", "three")]))
        .await
        .unwrap();

    ctx.flush_all().await.unwrap();

    assert_eq!(backend.update_count(), 2);
    assert!(ctx.pending_edit_units().await.is_empty());
    assert_eq!(text(&backend.document(), "u1", "title").as_deref(), Some("one"));
    assert_eq!(
        text(&backend.document(), "u3", "title").as_deref(),
        Some("three")
    );

    advance(1_000).await; // disarmed timers stay quiet
    assert_eq!(backend.update_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_revision_watch_signals_observable_changes() {
    let (ctx, _backend, _events) = engine(&["u1"]);
    let mut revisions = ctx.subscribe_revision();
    assert!(!revisions.has_changed().unwrap());

    ctx.enqueue_edit(&unit_id("u1"), patch(&[("title", "x")]))
        .await
        .unwrap();
    assert!(revisions.has_changed().unwrap());
    revisions.borrow_and_update();

    // a sync that changes nothing does not wake renderers
    ctx.sync_document().await.unwrap();
    assert!(!revisions.has_changed().unwrap());
}
