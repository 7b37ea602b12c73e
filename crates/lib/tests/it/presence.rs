//! Selections of other clients.

use recsync::{Selection, operation::text::TextOp};

use crate::context::TestContext;

#[tokio::test]
async fn test_selection_is_shared_with_other_clients() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;
    alice.commit(vec![TextOp::insert(0, "hello world")]).await;
    bob.wait_for(|r| r.value == "hello world").await;

    alice.select(Some(Selection::new(0, 5))).await;

    let state = bob
        .wait_for(|r| r.selection_of(&alice.client) == Some(Selection::new(0, 5)))
        .await;
    let view = state.view(&bob.client);
    assert_eq!(view.selection, None);
    assert_eq!(view.cursors.get(&alice.client), Some(&Selection::new(0, 5)));

    // A client's own selection is kept apart from the others.
    let own = alice.state().await;
    let view = own.view(&alice.client);
    assert_eq!(view.selection, Some(Selection::new(0, 5)));
    assert!(view.cursors.is_empty());
}

#[tokio::test]
async fn test_remote_edit_shifts_selections() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;
    alice.commit(vec![TextOp::insert(0, "hello world")]).await;
    bob.wait_for(|r| r.value == "hello world").await;

    bob.select(Some(Selection::new(6, 11))).await;
    alice
        .wait_for(|r| r.selection_of(&bob.client).is_some())
        .await;

    alice.commit(vec![TextOp::insert(0, ">> ")]).await;

    let shifted = Selection::new(9, 14);
    alice
        .wait_for(|r| r.selection_of(&bob.client) == Some(shifted))
        .await;
    let state = bob
        .wait_for(|r| r.value == ">> hello world")
        .await;
    assert_eq!(state.selection_of(&bob.client), Some(shifted));
}

#[tokio::test]
async fn test_departed_client_loses_cursor() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let mut bob = ctx.peer("bob").await;

    bob.select(Some(Selection::caret(0))).await;
    alice
        .wait_for(|r| r.selection_of(&bob.client).is_some())
        .await;

    bob.close().await;
    alice
        .wait_for(|r| r.selection_of(&bob.client).is_none())
        .await;
}

#[tokio::test]
async fn test_rejoined_client_cursor_is_shown_again() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let mut bob = ctx.peer("bob").await;

    bob.select(Some(Selection::caret(0))).await;
    alice
        .wait_for(|r| r.selection_of(&bob.client).is_some())
        .await;
    bob.close().await;
    alice
        .wait_for(|r| r.selection_of(&bob.client).is_none())
        .await;

    // Same client id, fresh engine and session.
    let bob = ctx.peer("bob").await;
    bob.select(Some(Selection::caret(0))).await;
    let state = alice
        .wait_for(|r| r.selection_of(&bob.client).is_some())
        .await;
    assert_eq!(state.selection_of(&bob.client), Some(Selection::caret(0)));
}

#[tokio::test]
async fn test_clearing_selection() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    alice.select(Some(Selection::caret(0))).await;
    bob.wait_for(|r| r.selection_of(&alice.client).is_some())
        .await;

    alice.select(None).await;
    bob.wait_for(|r| r.selection_of(&alice.client).is_none())
        .await;
    assert!(alice.state().await.cursors.is_empty());
}

#[tokio::test]
async fn test_late_subscriber_sees_existing_selection() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    alice.select(Some(Selection::caret(0))).await;

    let carol = ctx.peer("carol").await;
    let state = carol
        .wait_for(|r| r.selection_of(&alice.client).is_some())
        .await;
    assert_eq!(state.selection_of(&alice.client), Some(Selection::caret(0)));
}
