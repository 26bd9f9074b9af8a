//! Block edit fan-out scenarios.

use crate::{PlayerKeys, TestClient, TestServer};
use cubeland_core::proto::{block_change, endpoint, BlockPos, ChunkPos};
use cubeland_services::WorldSource;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn edits_fan_out_to_others_but_not_the_originator() {
    let ts = TestServer::start().await.unwrap();

    let players: Vec<PlayerKeys> = (0..3).map(|_| PlayerKeys::generate()).collect();
    for player in &players {
        ts.register_player(player).await;
    }

    let mut a = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    a.authenticate(&players[0], "a").await.unwrap();
    let mut b = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    b.authenticate(&players[1], "b").await.unwrap();
    let mut c = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    c.authenticate(&players[2], "c").await.unwrap();

    let new_id = Uuid::new_v4();
    let report = block_change::BlockChangeReport {
        changes: vec![block_change::BlockChangeInfo {
            chunk_pos: ChunkPos::new(0, 0),
            block_pos: BlockPos::new(1, 2, 3),
            new_id,
        }],
    };
    a.send(endpoint::BLOCK_CHANGE, block_change::REPORT, &report)
        .await
        .unwrap();

    // B and C both receive the broadcast with the same change.
    for peer in [&mut b, &mut c] {
        let frame = peer
            .recv_matching(endpoint::BLOCK_CHANGE, block_change::BROADCAST)
            .await
            .unwrap();
        assert_eq!(frame.header.tag, 0);
        let broadcast: block_change::BlockChangeBroadcast = TestClient::decode(&frame).unwrap();
        assert_eq!(broadcast.changes.len(), 1);
        assert_eq!(broadcast.changes[0].new_id, new_id);
        assert_eq!(broadcast.changes[0].block_pos, BlockPos::new(1, 2, 3));
    }

    // A never sees its own edit echoed.
    a.expect_silence(
        endpoint::BLOCK_CHANGE,
        block_change::BROADCAST,
        Duration::from_millis(500),
    )
    .await
    .unwrap();

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn edit_is_applied_to_the_world() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    ts.register_player(&alice).await;

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client.authenticate(&alice, "alice").await.unwrap();

    let new_id = Uuid::new_v4();
    client
        .send(
            endpoint::BLOCK_CHANGE,
            block_change::REPORT,
            &block_change::BlockChangeReport {
                changes: vec![block_change::BlockChangeInfo {
                    chunk_pos: ChunkPos::new(1, 1),
                    block_pos: BlockPos::new(7, 8, 9),
                    new_id,
                }],
            },
        )
        .await
        .unwrap();

    // Poll the world until the edit lands (the report has no reply frame).
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let chunk = ts.world.get_chunk(1, 1).await.unwrap();
        let found = chunk.read().get_block(BlockPos::new(7, 8, 9)).unwrap();
        if found == Some(new_id) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "edit never reached the world"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The chunk is marked dirty for the next flush.
    assert!(ts.world.dirty_chunks().contains(&(1, 1)));

    ts.server.shutdown().await.unwrap();
}
