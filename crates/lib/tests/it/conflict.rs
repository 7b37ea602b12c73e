//! Concurrent edits, rejected submissions and convergence.

use std::time::Duration;

use recsync::{
    Operation, RecordVersion, Side,
    operation::{apply_all, text::TextOp},
};

use crate::context::TestContext;

#[tokio::test]
async fn test_rejected_insert_is_rebased_over_overlapping_delete() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    for (pos, text) in [(0, "he"), (2, "llo"), (5, " "), (6, "wor"), (9, "ld")] {
        alice.commit(vec![TextOp::insert(pos, text)]).await;
    }
    let base = ctx.settle(&[&alice, &bob]).await;
    assert_eq!(base, "hello world");
    assert_eq!(ctx.service.version(&ctx.record), RecordVersion::new(5));

    // Alice will not hear about Bob's delete before submitting.
    ctx.service.set_paused(true);
    let delete = TextOp::delete(5, " wor");
    bob.apply(vec![delete.clone()]).await.unwrap();
    bob.wait_for(|r| r.version == RecordVersion::new(6)).await;

    let insert = TextOp::insert(8, "XX");
    alice.apply(vec![insert.clone()]).await.unwrap();
    let rebased = alice.wait_for(|r| r.version == RecordVersion::new(7)).await;

    let expected = apply_all(
        &insert.transform(&delete, Side::Right),
        &delete.apply(&base).unwrap(),
    )
    .unwrap();
    assert_eq!(rebased.value, expected);
    assert_eq!(rebased.value, "helloXXld");

    ctx.service.set_paused(false);
    let value = ctx.settle(&[&alice, &bob]).await;
    assert_eq!(value, "helloXXld");
}

#[tokio::test]
async fn test_concurrent_edits_are_never_lost() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;

    for i in 0..10 {
        alice.insert(0, &format!("[a{i}]")).await;
        bob.insert(0, &format!("[b{i}]")).await;
        if i % 3 == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    let value = ctx.settle(&[&alice, &bob]).await;
    for i in 0..10 {
        assert_eq!(value.matches(&format!("[a{i}]")).count(), 1, "{value}");
        assert_eq!(value.matches(&format!("[b{i}]")).count(), 1, "{value}");
    }
    // Each client's later tokens stay in front of its earlier ones.
    for prefix in ["a", "b"] {
        let positions: Vec<usize> = (0..10)
            .map(|i| value.find(&format!("[{prefix}{i}]")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] > w[1]), "{value}");
    }
}

#[tokio::test]
async fn test_stream_echo_confirms_before_response() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    ctx.service.respond_after(Some(Duration::from_millis(300)));

    alice.insert(0, "quick").await;
    alice.wait_for(|r| r.version == RecordVersion::new(1)).await;

    // The late response is a no-op.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let state = alice.state().await;
    assert_eq!(state.version, RecordVersion::new(1));
    assert_eq!(state.value, "quick");
    assert_eq!(ctx.service.version(&ctx.record), RecordVersion::new(1));
}

#[tokio::test]
async fn test_edits_while_awaiting_ack_are_batched_in_order() {
    let ctx = TestContext::new();
    let alice = ctx.peer("alice").await;
    let bob = ctx.peer("bob").await;
    ctx.service.respond_after(Some(Duration::from_millis(100)));
    ctx.service.set_paused(true);

    alice.insert(0, "a").await;
    alice.insert(1, "b").await;
    alice.insert(2, "c").await;
    assert_eq!(alice.value().await, "abc");

    ctx.service.set_paused(false);
    ctx.service.respond_after(None);
    let value = ctx.settle(&[&alice, &bob]).await;
    assert_eq!(value, "abc");
    // The queued edits went out together as one change.
    assert_eq!(ctx.service.version(&ctx.record), RecordVersion::new(2));
}
