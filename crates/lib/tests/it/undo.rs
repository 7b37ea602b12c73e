//! Client-side and service-side undo/redo.

use recsync::{EngineConfig, RecordVersion, UndoMode, operation::text::TextOp};

use crate::{context::TestContext, helpers::fast_config};

#[tokio::test]
async fn test_undo_twice_then_redo_once() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;

    alice.commit(vec![TextOp::insert(0, "a")]).await;
    alice.commit(vec![TextOp::insert(1, "b")]).await;

    alice.undo().await.unwrap();
    assert_eq!(alice.value().await, "a");
    alice.undo().await.unwrap();
    assert_eq!(alice.value().await, "");
    alice.redo().await.unwrap();
    assert_eq!(alice.value().await, "a");

    assert_eq!(ctx.settle(&[&alice]).await, "a");
}

#[tokio::test]
async fn test_undo_redo_around_disjoint_remote_edit() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    alice.commit(vec![TextOp::insert(0, "abc def")]).await;
    alice.commit(vec![TextOp::insert(7, "!")]).await;
    bob.wait_for(|r| r.value == "abc def!").await;

    bob.commit(vec![TextOp::insert(0, "X")]).await;
    alice.wait_for(|r| r.value == "Xabc def!").await;

    alice.undo().await.unwrap();
    assert_eq!(alice.value().await, "Xabc def");
    alice.redo().await.unwrap();
    assert_eq!(alice.value().await, "Xabc def!");

    assert_eq!(ctx.settle(&[&alice, &bob]).await, "Xabc def!");
}

#[tokio::test]
async fn test_undo_never_reverts_other_clients() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    alice.commit(vec![TextOp::insert(0, "abc")]).await;
    bob.wait_for(|r| r.value == "abc").await;
    bob.commit(vec![TextOp::insert(0, ">>")]).await;
    alice.wait_for(|r| r.value == ">>abc").await;

    alice.undo().await.unwrap();
    assert_eq!(alice.value().await, ">>");

    // Bob's own insert can still be undone.
    bob.wait_for(|r| r.value == ">>").await;
    bob.undo().await.unwrap();
    assert_eq!(ctx.settle(&[&alice, &bob]).await, "");
}

#[tokio::test]
async fn test_remote_edit_between_undo_and_redo() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    alice.commit(vec![TextOp::insert(0, "abc def")]).await;
    alice.commit(vec![TextOp::insert(7, "!")]).await;

    alice.undo().await.unwrap();
    assert_eq!(ctx.settle(&[&alice, &bob]).await, "abc def");

    bob.commit(vec![TextOp::insert(0, "X")]).await;
    alice.wait_for(|r| r.value == "Xabc def").await;

    alice.redo().await.unwrap();
    assert_eq!(alice.value().await, "Xabc def!");
    assert_eq!(ctx.settle(&[&alice, &bob]).await, "Xabc def!");
}

#[tokio::test]
async fn test_undo_with_empty_history_is_noop() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;

    alice.undo().await.unwrap();
    alice.redo().await.unwrap();
    let state = alice.state().await;
    assert_eq!(state.value, "");
    assert_eq!(state.version, RecordVersion::ZERO);
    assert_eq!(ctx.service.version(&ctx.record), RecordVersion::ZERO);
}

#[tokio::test]
async fn test_new_edit_clears_redo() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;

    alice.commit(vec![TextOp::insert(0, "a")]).await;
    alice.undo().await.unwrap();
    alice.insert(0, "b").await;
    alice.redo().await.unwrap();

    assert_eq!(alice.value().await, "b");
    assert_eq!(ctx.settle(&[&alice]).await, "b");
}

#[tokio::test]
async fn test_service_side_undo() {
    let config: EngineConfig = fast_config().with_undo_mode(UndoMode::Server);
    let ctx = TestContext::new().with_config(config);
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    alice.commit(vec![TextOp::insert(0, "hello")]).await;
    bob.wait_for(|r| r.value == "hello").await;
    bob.commit(vec![TextOp::insert(5, "!")]).await;

    alice.undo().await.unwrap();
    alice.wait_for(|r| r.value == "!").await;
    assert_eq!(ctx.settle(&[&alice, &bob]).await, "!");

    alice.redo().await.unwrap();
    alice.wait_for(|r| r.value == "hello!").await;
    assert_eq!(ctx.settle(&[&alice, &bob]).await, "hello!");
}
