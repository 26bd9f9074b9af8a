//! World clock scenarios.

use crate::{PlayerKeys, TestClient, TestServer};
use cubeland_core::proto::{endpoint, time};
use std::time::Duration;

/// Config tweaks that make clock behavior observable in test time:
/// a fast day (10 real seconds) and one-second update broadcasts.
fn fast_clock(config: &mut cubeland_core::config::ServerConfig) {
    config.proto.secs_per_day = 10;
    config.proto.time_update_interval_secs = 1;
}

#[tokio::test]
async fn clock_is_paused_until_someone_authenticates() {
    let ts = TestServer::start_with(fast_clock, None).await.unwrap();
    let alice = PlayerKeys::generate();
    ts.register_player(&alice).await;

    // Nobody is connected; the world clock must not move.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client.authenticate(&alice, "alice").await.unwrap();

    let frame = client
        .recv_matching(endpoint::TIME, time::INITIAL_STATE)
        .await
        .unwrap();
    let initial: time::TimeInitialState = TestClient::decode(&frame).unwrap();
    assert!(
        initial.current_time < 0.02,
        "clock advanced while empty: {}",
        initial.current_time
    );
    assert!((initial.tick_factor - 0.1).abs() < 1e-9);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn clock_advances_at_tick_factor_while_occupied() {
    let ts = TestServer::start_with(fast_clock, None).await.unwrap();
    let alice = PlayerKeys::generate();
    ts.register_player(&alice).await;

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client.authenticate(&alice, "alice").await.unwrap();

    let frame = client
        .recv_matching(endpoint::TIME, time::INITIAL_STATE)
        .await
        .unwrap();
    let initial: time::TimeInitialState = TestClient::decode(&frame).unwrap();
    let started = tokio::time::Instant::now();

    // Let a couple of updates arrive, then check the advertised time
    // against wall clock × tick factor.
    let mut last = None;
    for _ in 0..2 {
        let frame = client
            .recv_matching(endpoint::TIME, time::UPDATE)
            .await
            .unwrap();
        assert_eq!(frame.header.tag, 0);
        let u: time::TimeUpdate = TestClient::decode(&frame).unwrap();
        last = Some(u.current_time);
    }

    let elapsed = started.elapsed().as_secs_f64();
    let advanced = last.unwrap() - initial.current_time;
    let expected = elapsed * initial.tick_factor;

    // Generous window: update delivery adds up to a second of slack.
    assert!(
        advanced > 0.0 && (advanced - expected).abs() < expected.max(0.1) * 0.5,
        "advanced {advanced}, expected ≈{expected}"
    );

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn time_survives_everyone_leaving() {
    let ts = TestServer::start_with(fast_clock, None).await.unwrap();
    let alice = PlayerKeys::generate();
    ts.register_player(&alice).await;

    let frozen = {
        let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
        client.authenticate(&alice, "alice").await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        drop(client);

        // Give the reaper a moment, then the clock pauses.
        tokio::time::sleep(Duration::from_millis(400)).await;
        ts.server.shared.clock.now()
    };
    assert!(frozen > 0.0);

    // With no sessions, time stands still.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(ts.server.shared.clock.now(), frozen);

    // A returning player resumes from where the world stopped.
    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client.authenticate(&alice, "alice").await.unwrap();
    let frame = client
        .recv_matching(endpoint::TIME, time::INITIAL_STATE)
        .await
        .unwrap();
    let initial: time::TimeInitialState = TestClient::decode(&frame).unwrap();
    assert!(initial.current_time >= frozen);
    assert!(initial.current_time < frozen + 0.05);

    ts.server.shutdown().await.unwrap();
}
