//! Subscriptions, local edits and teardown.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use recsync::{
    ClientId, ConnectionStatus, RecordEngine, RecordVersion, operation::text::TextOp,
};

use crate::{context::TestContext, helpers::fast_config};

#[tokio::test]
async fn test_local_edit_is_visible_immediately() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;

    alice.insert(0, "hello").await;
    let state = alice.state().await;
    assert_eq!(state.value, "hello");

    let confirmed = alice.wait_for(|r| r.version == RecordVersion::new(1)).await;
    assert_eq!(confirmed.value, "hello");
    assert_eq!(ctx.service.snapshot(&ctx.record).unwrap().value, "hello");
}

#[tokio::test]
async fn test_subscriber_sees_existing_content() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    alice.commit(vec![TextOp::insert(0, "shared")]).await;

    let bob = ctx.peer("bob").await;
    let state = bob.wait_for(|r| r.value == "shared").await;
    assert_eq!(state.version, RecordVersion::new(1));
    assert_eq!(state.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_invalid_operation_leaves_record_unchanged() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    alice.commit(vec![TextOp::insert(0, "abc")]).await;
    let before = alice.state().await;

    let err = alice
        .apply(vec![TextOp::insert(1, "x"), TextOp::delete(2, "zz")])
        .await
        .unwrap_err();
    assert!(err.is_invalid_operation());

    let after = alice.state().await;
    assert_eq!(after.value, before.value);
    assert_eq!(after.version, before.version);
}

#[tokio::test]
async fn test_resubscribing_shares_one_session() {
    let ctx = TestContext::new();
    let engine = RecordEngine::new(ctx.service.clone(), fast_config());
    let calls = Arc::new(AtomicUsize::new(0));

    let first = {
        let calls = calls.clone();
        engine
            .subscribe(ctx.record.clone(), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap()
    };
    let second = engine.subscribe(ctx.record.clone(), |_| {}).await.unwrap();
    assert_eq!(engine.active_records().await.len(), 1);
    assert!(calls.load(Ordering::SeqCst) >= 1);

    first.close().await;
    assert_eq!(engine.active_records().await.len(), 1);
    second.close().await;
    assert!(engine.active_records().await.is_empty());

    // A new subscription starts a fresh session.
    let third = engine.subscribe(ctx.record.clone(), |_| {}).await.unwrap();
    assert_eq!(engine.active_records().await.len(), 1);
    third.close().await;
}

#[tokio::test]
async fn test_no_updates_after_close_during_in_flight_submit() {
    let ctx = TestContext::new();
    let mut alice = ctx.peer("alice").await;
    ctx.service.respond_after(Some(Duration::from_millis(200)));

    alice.insert(0, "in flight").await;
    alice.close().await;
    let seen = alice.update_count();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(alice.update_count(), seen);
    assert!(alice.engine.active_records().await.is_empty());

    // The submission that was already sent still completes on the service.
    assert_eq!(ctx.service.version(&ctx.record), RecordVersion::new(1));
}

#[tokio::test]
async fn test_dropping_subscription_detaches() {
    let ctx = TestContext::new();
    let engine = RecordEngine::new(ctx.service.clone(), fast_config());
    let subscription = engine.subscribe(ctx.record.clone(), |_| {}).await.unwrap();
    drop(subscription);

    let closed = async {
        while !engine.active_records().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .expect("session was not closed after drop");
}

#[tokio::test]
async fn test_local_clients_share_a_session() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let carol = ClientId::new("carol");

    alice.commit(vec![TextOp::insert(0, "abc")]).await;
    alice
        .engine
        .apply(&alice.record, &carol, vec![TextOp::insert(0, ">")])
        .await
        .unwrap();
    assert_eq!(alice.value().await, ">abc");

    // Undo only reverts the acting client's own change.
    alice.undo().await.unwrap();
    assert_eq!(alice.value().await, ">");
    alice.engine.undo(&alice.record, &carol).await.unwrap();
    assert_eq!(alice.value().await, "");

    ctx.settle(&[&alice]).await;
    assert_eq!(ctx.service.snapshot(&ctx.record).unwrap().value, "");
}
