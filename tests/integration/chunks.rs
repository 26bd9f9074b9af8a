//! Chunk transfer scenarios.

use crate::{PlayerKeys, TestClient, TestServer};
use cubeland_core::proto::{chunk, endpoint, ChunkPos};
use std::time::Duration;

#[tokio::test]
async fn chunk_streams_slices_then_completion() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    ts.register_player(&alice).await;

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client.authenticate(&alice, "alice").await.unwrap();

    let pos = ChunkPos::new(0, 0);
    let tag = client
        .send(endpoint::CHUNK, chunk::GET, &chunk::ChunkGet { chunk_pos: pos })
        .await
        .unwrap();

    // Flat test world: exactly one occupied slice.
    let slice = client
        .recv_matching(endpoint::CHUNK, chunk::SLICE_DATA)
        .await
        .unwrap();
    assert_eq!(slice.header.tag, 0);
    let slice: chunk::ChunkSliceData = TestClient::decode(&slice).unwrap();
    assert_eq!(slice.chunk_pos, pos);
    assert_eq!(slice.y, 0);
    assert!(!slice.data.is_empty());

    let completion = client
        .recv_matching(endpoint::CHUNK, chunk::COMPLETION)
        .await
        .unwrap();
    assert_eq!(completion.header.tag, tag);
    let completion: chunk::ChunkCompletion = TestClient::decode(&completion).unwrap();
    assert_eq!(completion.chunk_pos, pos);
    assert_eq!(completion.num_slices, 1);
    assert!(completion
        .meta
        .iter()
        .any(|entry| entry.key == "generator" && entry.value == "flat"));

    // Completion made this session an observer; disconnecting must clear
    // every observation it held.
    assert_eq!(ts.server.shared.observers.len(), 1);
    drop(client);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !ts.server.shared.observers.is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "observer rows survived the session"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn duplicate_request_gets_one_completion() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    ts.register_player(&alice).await;

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client.authenticate(&alice, "alice").await.unwrap();

    let pos = ChunkPos::new(3, 3);

    // Two requests back to back, before any response: the second is a
    // duplicate and must produce neither slices nor a completion.
    let first_tag = client
        .send(endpoint::CHUNK, chunk::GET, &chunk::ChunkGet { chunk_pos: pos })
        .await
        .unwrap();
    let second_tag = client
        .send(endpoint::CHUNK, chunk::GET, &chunk::ChunkGet { chunk_pos: pos })
        .await
        .unwrap();

    let completion = client
        .recv_matching(endpoint::CHUNK, chunk::COMPLETION)
        .await
        .unwrap();
    assert_eq!(completion.header.tag, first_tag);

    // No second completion shows up.
    client
        .expect_silence(endpoint::CHUNK, chunk::COMPLETION, Duration::from_millis(500))
        .await
        .unwrap();
    let _ = second_tag;

    ts.server.shutdown().await.unwrap();
}
