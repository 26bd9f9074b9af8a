//! Player movement scenarios.

use crate::{PlayerKeys, TestClient, TestServer};
use cubeland_core::proto::{endpoint, movement, Vec3};
use std::time::Duration;

fn update(epoch: u32, x: f32) -> movement::PlayerPositionChanged {
    movement::PlayerPositionChanged {
        epoch,
        position: Vec3::new(x, 64.0, 0.0),
        angles: Vec3::default(),
    }
}

#[tokio::test]
async fn stale_epochs_never_reach_other_players() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    let bob = PlayerKeys::generate();
    ts.register_player(&alice).await;
    ts.register_player(&bob).await;

    let mut a = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    a.authenticate(&alice, "alice").await.unwrap();
    let mut b = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    b.authenticate(&bob, "bob").await.unwrap();

    // Epochs 100, 101, 95, 99, 120 — the two stale ones are discarded, so
    // broadcast positions can only ever be x = 100, 101, or 120.
    for (epoch, x) in [
        (100, 100.0),
        (101, 101.0),
        (95, 95.0),
        (99, 99.0),
        (120, 120.0),
    ] {
        a.send(
            endpoint::PLAYER_MOVEMENT,
            movement::POSITION_CHANGED,
            &update(epoch, x),
        )
        .await
        .unwrap();
    }

    // Collect broadcasts for a few ticks; the last accepted position must
    // win and no discarded one may ever appear.
    let mut seen = Vec::new();
    let collect_until = tokio::time::Instant::now() + Duration::from_millis(600);
    while tokio::time::Instant::now() < collect_until {
        let remaining = collect_until - tokio::time::Instant::now();
        let frame = tokio::time::timeout(
            remaining,
            b.recv_matching(endpoint::PLAYER_MOVEMENT, movement::POSITION_BROADCAST),
        )
        .await;
        let Ok(Ok(frame)) = frame else { break };
        let broadcast: movement::PlayerPositionBroadcast = TestClient::decode(&frame).unwrap();
        assert_eq!(broadcast.player_id, alice.id);
        seen.push(broadcast.position.x);
    }

    assert!(!seen.is_empty(), "no position broadcasts at all");
    for x in &seen {
        assert!(
            [100.0, 101.0, 120.0].contains(x),
            "stale position {x} was broadcast"
        );
    }
    assert_eq!(*seen.last().unwrap(), 120.0);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn saved_position_replays_on_next_login() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    ts.register_player(&alice).await;

    {
        let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
        client.authenticate(&alice, "alice").await.unwrap();

        client
            .send(
                endpoint::PLAYER_MOVEMENT,
                movement::POSITION_CHANGED,
                &update(1, 33.5),
            )
            .await
            .unwrap();

        // The saver sweep runs every 2 seconds; allow one to pass.
        tokio::time::sleep(Duration::from_millis(2600)).await;
    }

    // Reconnect: the stored position comes back as an unsolicited push
    // right after authentication.
    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client.authenticate(&alice, "alice").await.unwrap();

    let frame = client
        .recv_matching(endpoint::PLAYER_MOVEMENT, movement::POSITION_INITIAL)
        .await
        .unwrap();
    assert_eq!(frame.header.tag, 0);
    let initial: movement::PlayerPositionInitial = TestClient::decode(&frame).unwrap();
    assert_eq!(initial.position.x, 33.5);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn own_position_is_not_echoed_back() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    ts.register_player(&alice).await;

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client.authenticate(&alice, "alice").await.unwrap();

    client
        .send(
            endpoint::PLAYER_MOVEMENT,
            movement::POSITION_CHANGED,
            &update(1, 5.0),
        )
        .await
        .unwrap();

    client
        .expect_silence(
            endpoint::PLAYER_MOVEMENT,
            movement::POSITION_BROADCAST,
            Duration::from_millis(400),
        )
        .await
        .unwrap();

    ts.server.shutdown().await.unwrap();
}
