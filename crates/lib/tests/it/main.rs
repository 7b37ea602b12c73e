/*! Integration tests for recsync.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * Every test runs one or more engines against a shared in-process
 * `MemoryService`:
 * - engine: subscriptions, local edits, invalid operations, teardown
 * - conflict: rejected submissions, rebasing, convergence
 * - undo: client-side and server-side undo/redo
 * - reconnect: offline buffering, backoff, gaps, snapshots, timeouts
 * - presence: selections and departures
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("recsync=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod conflict;
mod context;
mod engine;
mod helpers;
mod presence;
mod reconnect;
mod undo;
