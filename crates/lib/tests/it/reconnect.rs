//! Lost connections, missed deltas and recovery.

use std::time::Duration;

use recsync::{ConnectionStatus, RecordVersion, operation::text::TextOp};

use crate::{context::TestContext, helpers::fast_config};

#[tokio::test]
async fn test_offline_edits_are_sent_after_reconnect() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;
    alice.commit(vec![TextOp::insert(0, "online")]).await;

    ctx.service.set_offline(true);
    alice
        .wait_for(|r| matches!(r.status, ConnectionStatus::Reconnecting { .. }))
        .await;

    alice.insert(0, "[1]").await;
    alice.insert(3, "[2]").await;
    let state = alice.state().await;
    assert_eq!(state.value, "[1][2]online");
    assert_eq!(state.version, RecordVersion::new(1));

    ctx.service.set_offline(false);
    alice.wait_connected().await;
    bob.wait_connected().await;
    assert_eq!(ctx.settle(&[&alice, &bob]).await, "[1][2]online");
}

#[tokio::test]
async fn test_gives_up_after_max_reconnect_attempts() {
    let config = fast_config().with_max_reconnect_attempts(Some(2));
    let ctx = TestContext::new().with_config(config);
    let alice = ctx.peer("alice").await;

    ctx.service.set_offline(true);
    alice.wait_status(ConnectionStatus::Disconnected).await;

    // Local edits keep working.
    alice.insert(0, "still here").await;
    assert_eq!(alice.value().await, "still here");

    ctx.service.set_offline(false);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let state = alice.state().await;
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(ctx.service.version(&ctx.record), RecordVersion::ZERO);
}

#[tokio::test]
async fn test_revoked_access_is_terminal() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    alice.commit(vec![TextOp::insert(0, "secret")]).await;

    ctx.service.revoke(&ctx.record);
    let state = alice.wait_status(ConnectionStatus::Unauthorized).await;
    assert_eq!(state.value, "secret");

    let err = alice
        .apply(vec![TextOp::insert(0, "more")])
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert!(alice.undo().await.unwrap_err().is_unauthorized());
    assert_eq!(alice.value().await, "secret");
}

#[tokio::test]
async fn test_missed_delta_triggers_catch_up() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    ctx.service.drop_next_delta(&ctx.record);
    bob.commit(vec![TextOp::insert(0, "x")]).await;
    bob.commit(vec![TextOp::insert(1, "y")]).await;

    let state = alice.wait_for(|r| r.version == RecordVersion::new(2)).await;
    assert_eq!(state.value, "xy");
    assert_eq!(state.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_truncated_history_falls_back_to_snapshot() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    alice.commit(vec![TextOp::insert(0, "base")]).await;
    bob.wait_for(|r| r.value == "base").await;

    ctx.service.drop_next_delta(&ctx.record);
    bob.commit(vec![TextOp::insert(4, "x")]).await;
    ctx.service.truncate_history(&ctx.record);
    bob.commit(vec![TextOp::insert(5, "y")]).await;

    let state = alice.wait_for(|r| r.version == RecordVersion::new(3)).await;
    assert_eq!(state.value, "basexy");

    // The undo history did not survive the reload.
    alice.undo().await.unwrap();
    assert_eq!(alice.value().await, "basexy");
    assert_eq!(ctx.settle(&[&alice, &bob]).await, "basexy");
}

#[tokio::test]
async fn test_timed_out_submission_is_not_applied_twice() {
    let config = fast_config().with_submit_timeout(Duration::from_millis(100));
    let ctx = TestContext::new().with_config(config);
    let alice = ctx.peer("alice").await;

    // The change lands, but neither the answer nor the broadcast reaches alice in time.
    ctx.service.set_paused(true);
    ctx.service.respond_after(Some(Duration::from_millis(300)));
    alice.insert(0, "once").await;

    let state = alice.wait_for(|r| r.version == RecordVersion::new(1)).await;
    assert_eq!(state.value, "once");
    assert_eq!(ctx.service.version(&ctx.record), RecordVersion::new(1));

    ctx.service.respond_after(None);
    ctx.service.set_paused(false);
    assert_eq!(ctx.settle(&[&alice]).await, "once");
    assert_eq!(ctx.service.version(&ctx.record), RecordVersion::new(1));
}

#[tokio::test]
async fn test_dropped_connection_reconnects() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    ctx.service.drop_connections();
    alice.insert(0, "a").await;
    bob.insert(0, "b").await;

    alice.wait_connected().await;
    bob.wait_connected().await;
    let value = ctx.settle(&[&alice, &bob]).await;
    assert_eq!(value.len(), 2);
    assert!(value.contains('a') && value.contains('b'));
}
