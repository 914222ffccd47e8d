//! Supervisor Integration Tests
//!
//! Drives a venue supervisor over an in-memory transport: subscription
//! batching, reconnect and resubscribe, frame dispatch into the store, and
//! shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use std::time::Duration;

use tokio::time::timeout;

use common::{Harness, WAIT, symbols, tok};
use market_stream_mux::infrastructure::stream::WireOp;
use market_stream_mux::{ConnectionState, HeartbeatConfig, StoreKey};

const QUIET: Duration = Duration::from_millis(200);

#[tokio::test(start_paused = true)]
async fn shared_symbols_flow_end_to_end() {
    let mut h = Harness::start();
    let store = h.stream.store().clone();

    let a = h.stream.subscriber();
    let tokens = a.subscribe(&["AAPL", "MSFT"]);
    assert_eq!(tokens, vec![tok("NASDAQ:AAPL"), tok("NASDAQ:MSFT")]);

    let mut link = h.server.accept().await;
    let cmd = link.next_command().await;
    assert_eq!(cmd.op, WireOp::Subscribe);
    assert_eq!(symbols(&cmd), vec!["NASDAQ:AAPL", "NASDAQ:MSFT"]);

    timeout(WAIT, store.wait_for_connection("us", ConnectionState::Connected))
        .await
        .unwrap();
    assert_eq!(a.connection_state(), ConnectionState::Connected);

    // A second consumer of an already-streamed symbol sends nothing
    let b = h.stream.subscriber();
    b.subscribe(&["aapl"]);
    link.assert_quiet(QUIET).await;
    assert_eq!(h.stream.ledger().count(&tok("NASDAQ:AAPL")), 2);

    link.push(
        r#"{"type":"tick","symbol":"NASDAQ:AAPL","ltp":190.5,"change":1.25,"change_pct":0.66}"#,
    );
    h.flush(&link, "NASDAQ:QQQ").await;

    let seen_by_a = a.tick(&tok("NASDAQ:AAPL")).unwrap();
    let seen_by_b = b.tick(&tok("NASDAQ:AAPL")).unwrap();
    assert_eq!(seen_by_a, seen_by_b);
    assert_eq!(seen_by_a.ltp, 190.5);
    assert_eq!(seen_by_a.change, 1.25);

    // MSFT goes; AAPL stays while b holds it
    a.unsubscribe(&["AAPL", "MSFT"]);
    let cmd = link.next_command().await;
    assert_eq!(cmd.op, WireOp::Unsubscribe);
    assert_eq!(symbols(&cmd), vec!["NASDAQ:MSFT"]);

    // Last holder leaves: final unsubscribe, then the connection closes
    drop(b);
    let cmd = link.next_command().await;
    assert_eq!(cmd.op, WireOp::Unsubscribe);
    assert_eq!(symbols(&cmd), vec!["NASDAQ:AAPL"]);
    link.wait_closed().await;

    timeout(WAIT, store.wait_for_connection("us", ConnectionState::Disconnected))
        .await
        .unwrap();
    assert!(h.stream.ledger().is_empty());

    // Cached values outlive the subscription
    assert!(store.tick(&tok("NASDAQ:AAPL")).is_some());

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn burst_of_subscribes_sends_one_batch() {
    let mut h = Harness::start();

    let anchor = h.stream.subscriber();
    anchor.subscribe(&["SPY"]);
    let mut link = h.server.accept().await;
    assert_eq!(symbols(&link.next_command().await), vec!["NASDAQ:SPY"]);

    let consumers: Vec<_> = ["TSLA", "AAPL", "NVDA", "MSFT", "AMZN", "AAPL"]
        .iter()
        .map(|symbol| {
            let consumer = h.stream.subscriber();
            consumer.subscribe(&[*symbol]);
            consumer
        })
        .collect();

    let cmd = link.next_command().await;
    assert_eq!(cmd.op, WireOp::Subscribe);
    assert_eq!(
        symbols(&cmd),
        vec![
            "NASDAQ:AAPL",
            "NASDAQ:AMZN",
            "NASDAQ:MSFT",
            "NASDAQ:NVDA",
            "NASDAQ:TSLA"
        ]
    );
    link.assert_quiet(QUIET).await;

    // Subscribe then unsubscribe before the supervisor runs nets to nothing
    let flicker = h.stream.subscriber();
    flicker.subscribe(&["META"]);
    flicker.unsubscribe(&["META"]);
    link.assert_quiet(QUIET).await;

    drop(consumers);
    let cmd = link.next_command().await;
    assert_eq!(cmd.op, WireOp::Unsubscribe);
    assert_eq!(symbols(&cmd).len(), 5);

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_and_resubscribes_everything() {
    let mut h = Harness::start();
    let store = h.stream.store().clone();

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL", "MSFT"]);
    let mut first = h.server.accept().await;
    first.next_command().await;
    timeout(WAIT, store.wait_for_connection("us", ConnectionState::Connected))
        .await
        .unwrap();

    h.server.fail_next(1);
    first.hang_up();
    timeout(WAIT, store.wait_for_connection("us", ConnectionState::Disconnected))
        .await
        .unwrap();
    first.wait_closed().await;

    // Changes made while disconnected are honored on reconnect
    consumer.subscribe(&["NVDA"]);

    let mut second = h.server.accept().await;
    let cmd = second.next_command().await;
    assert_eq!(cmd.op, WireOp::Subscribe);
    assert_eq!(
        symbols(&cmd),
        vec!["NASDAQ:AAPL", "NASDAQ:MSFT", "NASDAQ:NVDA"]
    );

    // Initial connect, one refused retry, one successful retry
    let attempts = h.server.attempts();
    assert_eq!(attempts.len(), 3);
    let first_retry = attempts[2] - attempts[1];
    assert!(first_retry >= Duration::from_secs(2), "{first_retry:?}");
    assert!(first_retry < Duration::from_secs(3), "{first_retry:?}");

    timeout(WAIT, store.wait_for_connection("us", ConnectionState::Connected))
        .await
        .unwrap();
    let status = h.stream.status().snapshot();
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.wire_tokens, 3);
    assert!(status.last_error.is_none());

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
    assert!(second.is_closed());
}

#[tokio::test(start_paused = true)]
async fn emptied_ledger_during_backoff_stops_retrying() {
    let mut h = Harness::start();
    let store = h.stream.store().clone();

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL"]);
    let mut link = h.server.accept().await;
    link.next_command().await;

    h.server.fail_next(u32::MAX);
    link.hang_up();
    timeout(WAIT, store.wait_for_connection("us", ConnectionState::Disconnected))
        .await
        .unwrap();

    consumer.release();
    tokio::time::sleep(Duration::from_secs(120)).await;
    let settled = h.server.attempts().len();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.server.attempts().len(), settled);

    // Demand returns: connect again once refusals stop
    h.server.fail_next(0);
    consumer.subscribe(&["AAPL"]);
    let mut link = h.server.accept().await;
    assert_eq!(symbols(&link.next_command().await), vec!["NASDAQ:AAPL"]);

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_forces_reconnect() {
    let mut h = Harness::start_with(HeartbeatConfig::new(
        Duration::from_secs(5),
        Duration::from_secs(5),
    ));
    h.server.ignore_pings();

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL"]);
    let mut silent = h.server.accept().await;
    silent.next_command().await;

    let mut next = h.server.accept().await;
    assert!(silent.is_closed());
    assert_eq!(symbols(&next.next_command().await), vec!["NASDAQ:AAPL"]);

    let status = h.stream.status().snapshot();
    assert_eq!(status.state, ConnectionState::Connected);

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_connection_open() {
    let mut h = Harness::start_with(HeartbeatConfig::new(
        Duration::from_secs(5),
        Duration::from_secs(5),
    ));

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL"]);
    let mut link = h.server.accept().await;
    link.next_command().await;

    h.server.assert_no_connection(Duration::from_secs(60)).await;
    assert!(!link.is_closed());

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn invalid_frames_are_dropped_without_touching_the_store() {
    let mut h = Harness::start();
    let store = h.stream.store().clone();

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL"]);
    let mut link = h.server.accept().await;
    link.next_command().await;

    link.push(r#"{"type":"tick","symbol":"NASDAQ:AAPL","ltp":190.5}"#);
    link.push(r#"{"type":"tick","symbol":"NASDAQ:AAPL","ltp":"abc"}"#);
    link.push(r#"{"type":"tick","symbol":"NASDAQ:AAPL"}"#);
    link.push(r#"{"type":"tick","symbol":"NSE:INFY","ltp":1500.0}"#);
    link.push(r#"{"type":"mystery","symbol":"NASDAQ:AAPL"}"#);
    link.push("not json at all");
    link.push(r#"{"type":"error","message":"rate limited"}"#);
    h.flush(&link, "NASDAQ:QQQ").await;

    assert_eq!(store.tick(&tok("NASDAQ:AAPL")).unwrap().ltp, 190.5);
    assert!(store.tick(&tok("NSE:INFY")).is_none());

    let status = h.stream.status().snapshot();
    assert_eq!(status.frames_received, 8);
    assert_eq!(status.frames_dropped, 5);
    assert_eq!(status.state, ConnectionState::Connected);

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn bars_and_status_frames_reach_the_store() {
    let mut h = Harness::start();
    let store = h.stream.store().clone();
    let aapl = tok("NASDAQ:AAPL");

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL"]);
    let mut link = h.server.accept().await;
    link.next_command().await;

    let mut bars = store.watch_keys([StoreKey::bars(&aapl, "1m")]);

    link.push(
        r#"{"type":"bar","symbol":"NASDAQ:AAPL","interval":"1m","status":"partial","t":60000,"o":1,"h":2,"l":0.5,"c":1.5,"v":10}"#,
    );
    link.push(
        r#"{"type":"candle","symbol":"NASDAQ:AAPL","interval":"1m","status":"closed","t":60000,"o":1,"h":2.5,"l":0.5,"c":2,"v":25}"#,
    );
    // Stale partial for an already closed bar is ignored
    link.push(
        r#"{"type":"bar","symbol":"NASDAQ:AAPL","interval":"1m","status":"partial","t":60000,"o":9,"h":9,"l":9,"c":9}"#,
    );
    link.push(
        r#"{"type":"backfill","symbol":"NASDAQ:AAPL","interval":"1m","bars":[{"t":0,"o":1,"h":1,"l":1,"c":1},{"t":"bad"}]}"#,
    );
    link.push(r#"{"type":"market_status","us":"open"}"#);
    h.flush(&link, "NASDAQ:QQQ").await;

    assert!(bars.changed().await.is_some());

    let closed = store.closed_bars(&aapl, "1m");
    let times: Vec<i64> = closed.iter().map(|b| b.t).collect();
    assert_eq!(times, vec![0, 60_000]);
    assert_eq!(closed[1].close, 2.0);
    assert!(store.partial_bar(&aapl, "1m").is_none());
    assert!(store.closed_bars(&aapl, "5m").is_empty());

    let status = store.status("market_status").unwrap();
    assert_eq!(status["us"], "open");

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_transport_and_stops() {
    let mut h = Harness::start();
    let store = h.stream.store().clone();

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL"]);
    let mut link = h.server.accept().await;
    link.next_command().await;

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();

    assert!(link.is_closed());
    assert_eq!(store.connection("us"), ConnectionState::Disconnected);
    h.server.assert_no_connection(Duration::from_secs(60)).await;
}

#[tokio::test(start_paused = true)]
async fn overlapping_consumers_share_one_wire_lifecycle() {
    let mut h = Harness::start();

    let a = h.stream.subscriber();
    let b = h.stream.subscriber();
    a.subscribe(&["AAPL"]);
    b.subscribe(&["AAPL", "MSFT"]);

    let mut link = h.server.accept().await;
    let cmd = link.next_command().await;
    assert_eq!(cmd.op, WireOp::Subscribe);
    assert_eq!(symbols(&cmd), vec!["NASDAQ:AAPL", "NASDAQ:MSFT"]);
    link.assert_quiet(QUIET).await;

    // b still holds AAPL
    a.unsubscribe(&["AAPL"]);
    link.assert_quiet(QUIET).await;
    assert_eq!(h.stream.ledger().count(&tok("NASDAQ:AAPL")), 1);

    b.unsubscribe(&["AAPL", "MSFT"]);
    let cmd = link.next_command().await;
    assert_eq!(cmd.op, WireOp::Unsubscribe);
    assert_eq!(symbols(&cmd), vec!["NASDAQ:AAPL", "NASDAQ:MSFT"]);
    link.wait_closed().await;
    assert!(h.stream.ledger().is_empty());

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_clears_wire_and_reports_error() {
    let mut h = Harness::start_with(HeartbeatConfig::new(
        Duration::from_secs(5),
        Duration::from_secs(5),
    ));
    let store = h.stream.store().clone();
    h.server.ignore_pings();

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL"]);
    let mut silent = h.server.accept().await;
    silent.next_command().await;
    timeout(WAIT, store.wait_for_connection("us", ConnectionState::Connected))
        .await
        .unwrap();
    assert_eq!(h.stream.status().snapshot().wire_tokens, 1);

    // Keep it down so the lost state stays observable
    h.server.fail_next(u32::MAX);
    timeout(WAIT, store.wait_for_connection("us", ConnectionState::Disconnected))
        .await
        .unwrap();
    silent.wait_closed().await;

    let status = h.stream.status().snapshot();
    assert_eq!(status.wire_tokens, 0);
    assert_eq!(status.ledger_tokens, 1);
    assert_eq!(status.last_error.as_deref(), Some("heartbeat timeout"));

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn zero_ping_interval_does_not_stop_the_supervisor() {
    let mut h = Harness::start_with(HeartbeatConfig {
        ping_interval: Duration::ZERO,
        pong_timeout: Duration::from_secs(3600),
    });

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["AAPL"]);
    let mut link = h.server.accept().await;
    assert_eq!(symbols(&link.next_command().await), vec!["NASDAQ:AAPL"]);

    h.server.assert_no_connection(Duration::from_secs(5)).await;
    assert!(!link.is_closed());
    assert!(!h.task.is_finished());

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn trades_and_bare_symbols_land_under_wanted_tokens() {
    let mut h = Harness::start();
    let store = h.stream.store().clone();

    let consumer = h.stream.subscriber();
    consumer.subscribe(&["NYSE:IBM", "AAPL"]);
    let mut link = h.server.accept().await;
    link.next_command().await;

    link.push(r#"{"type":"tick","symbol":"IBM","ltp":221.0}"#);
    link.push(r#"{"type":"trade","symbol":"AAPL","p":190.25,"v":300,"t":1700000000000}"#);
    h.flush(&link, "NASDAQ:QQQ").await;

    assert_eq!(store.tick(&tok("NYSE:IBM")).unwrap().ltp, 221.0);
    assert!(store.tick(&tok("NASDAQ:IBM")).is_none());

    let trade = store.tick(&tok("NASDAQ:AAPL")).unwrap();
    assert_eq!(trade.ltp, 190.25);
    assert_eq!(trade.volume, Some(300.0));

    let status = h.stream.status().snapshot();
    assert_eq!(status.frames_dropped, 0);

    h.cancel.cancel();
    timeout(WAIT, h.task).await.unwrap().unwrap();
}
