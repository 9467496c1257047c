//! Tests for the stage run flag

use super::*;
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn test_new_state_is_running() {
    let state = RunState::new();
    assert!(state.should_continue());
}

#[test]
fn test_stop_is_visible_through_clones() {
    let state = RunState::new();
    let observer = state.clone();

    state.stop();

    assert!(!observer.should_continue());
}

#[tokio::test]
async fn test_stopped_resolves_immediately_when_already_stopped() {
    let state = RunState::new();
    state.stop();

    tokio::time::timeout(Duration::from_millis(10), state.stopped())
        .await
        .expect("stopped() should resolve");
}

#[tokio::test(start_paused = true)]
async fn test_stopped_wakes_on_stop() {
    let state = RunState::new();
    let waiter = state.clone();
    let handle = tokio::spawn(async move { waiter.stopped().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!handle.is_finished());

    state.stop();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sleep_runs_full_delay_when_not_stopped() {
    let state = RunState::new();
    let start = Instant::now();

    assert!(state.sleep(Duration::from_secs(3)).await);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_sleep_is_cut_short_by_stop() {
    let state = RunState::new();
    let stopper = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        stopper.stop();
    });

    let start = Instant::now();
    assert!(!state.sleep(Duration::from_secs(30)).await);
    assert!(start.elapsed() < Duration::from_secs(2));
}
