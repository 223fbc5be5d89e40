//! Integration tests for remote sources.
//!
//! Polling tests run on tokio's paused clock, so intervals advance
//! deterministically.

use figi::{ErrorKind, Figi, RemoteLoader, SourceTag};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Loader that counts fetches and reports the count.
fn counting_loader(counter: &Arc<AtomicUsize>) -> impl RemoteLoader + 'static {
    let counter = Arc::clone(counter);
    move || -> anyhow::Result<Value> {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "remote": { "fetches": n } }))
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_runs_one_loop() {
    let figi = Figi::new();
    let fetches = Arc::new(AtomicUsize::new(0));
    figi.add_remote("kv", counting_loader(&fetches), Some(Duration::from_millis(100)))
        .unwrap();

    figi.start_remote("kv").await.unwrap();
    figi.start_remote("kv").await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    figi.stop_remote("kv").unwrap();

    // One loop ticks at 0, 100, 200, 300ms. Two loops would double that.
    let count = fetches.load(Ordering::SeqCst);
    assert!((3..=5).contains(&count), "unexpected fetch count {}", count);
    assert!(!figi.is_remote_running("kv"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_fetching() {
    let figi = Figi::new();
    let fetches = Arc::new(AtomicUsize::new(0));
    figi.add_remote("kv", counting_loader(&fetches), Some(Duration::from_millis(100)))
        .unwrap();

    figi.start_remote("kv").await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(figi.is_remote_running("kv"));
    figi.stop_remote("kv").unwrap();
    let stopped_at = fetches.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), stopped_at);
}

#[tokio::test(start_paused = true)]
async fn test_polled_value_visible_to_readers() {
    let figi = Figi::new();
    let fetches = Arc::new(AtomicUsize::new(0));
    figi.add_remote("kv", counting_loader(&fetches), Some(Duration::from_millis(100)))
        .unwrap();

    figi.start_remote("kv").await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    figi.stop_remote("kv").unwrap();

    let seen = figi.get_int("remote.fetches", 0).unwrap();
    assert_eq!(seen as usize, fetches.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_refresh_propagates_fetch_error() {
    let figi = Figi::new();
    figi.add_remote(
        "down",
        || -> anyhow::Result<Value> { anyhow::bail!("503 from config service") },
        None,
    )
    .unwrap();

    let err = figi.refresh_remote("down").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteError);
    assert_eq!(figi.start_remote("down").await.unwrap_err().kind(), ErrorKind::RemoteError);
}

#[tokio::test]
async fn test_refresh_all_attempts_every_source() {
    let figi = Figi::new();
    let fetches = Arc::new(AtomicUsize::new(0));
    figi.add_remote(
        "a_failing",
        || -> anyhow::Result<Value> { anyhow::bail!("unreachable") },
        None,
    )
    .unwrap();
    figi.add_remote("b_ok", counting_loader(&fetches), None).unwrap();

    let err = figi.refresh_all_remotes().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteError);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(figi.get_int("remote.fetches", 0).unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_remote() {
    let figi = Figi::new();
    let err = figi.refresh_remote("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(figi.remote_names().is_empty());
}

#[tokio::test]
async fn test_replacing_remote_keeps_one_entry() {
    let figi = Figi::new();
    figi.add_remote("kv", || -> anyhow::Result<Value> { Ok(json!({"v": 1})) }, None)
        .unwrap();
    figi.refresh_remote("kv").await.unwrap();
    figi.add_remote("kv", || -> anyhow::Result<Value> { Ok(json!({"v": 2})) }, None)
        .unwrap();
    figi.refresh_remote("kv").await.unwrap();

    assert_eq!(figi.remote_names(), vec!["kv".to_string()]);
    assert_eq!(figi.get_int("v", 0).unwrap(), 2);
}

#[test]
fn test_zero_interval_rejected() {
    let figi = Figi::new();
    let err = figi
        .add_remote(
            "kv",
            || -> anyhow::Result<Value> { Ok(json!({})) },
            Some(Duration::ZERO),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

/// Loader that blocks its worker for `delay` before answering, so a test can
/// act while a fetch is in flight.
fn slow_loader(delay: Duration, started: &Arc<AtomicUsize>) -> impl RemoteLoader + 'static {
    let started = Arc::clone(started);
    move || -> anyhow::Result<Value> {
        started.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(delay);
        Ok(json!({ "stale": true }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_discards_in_flight_fetch() {
    let figi = Figi::new();
    let started = Arc::new(AtomicUsize::new(0));
    figi.add_remote(
        "slow",
        slow_loader(Duration::from_millis(300), &started),
        Some(Duration::from_secs(60)),
    )
    .unwrap();
    figi.start_remote("slow").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);

    figi.reset();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    figi.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(figi.all_settings(), json!({}));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(figi.remote_names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_discards_in_flight_fetch() {
    let figi = Figi::new();
    let started = Arc::new(AtomicUsize::new(0));
    figi.add_remote(
        "slow",
        slow_loader(Duration::from_millis(300), &started),
        Some(Duration::from_secs(60)),
    )
    .unwrap();
    figi.start_remote("slow").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(figi.remove_remote("slow"));
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(figi.all_settings(), json!({}));
    assert!(figi.source_entries(SourceTag::Remote).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_discards_in_flight_fetch() {
    let figi = Figi::new();
    let started = Arc::new(AtomicUsize::new(0));
    figi.add_remote(
        "slow",
        slow_loader(Duration::from_millis(300), &started),
        Some(Duration::from_secs(60)),
    )
    .unwrap();
    figi.start_remote("slow").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    figi.stop_remote("slow").unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(figi.all_settings(), json!({}));

    // A stopped (not removed) source can still be refreshed by hand.
    figi.refresh_remote("slow").await.unwrap();
    assert!(figi.get_bool("stale", false).unwrap());
}
