//! Key cache tiering and coalescing, end to end against the stub account
//! service.

use crate::{spawn_account_stub, PlayerKeys, TestClient, TestServer};
use cubeland_services::KeyCache;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn remote_tier_is_hit_exactly_once_per_process() {
    let alice = PlayerKeys::generate();
    let known = HashMap::from([(alice.id, alice.public_pem())]);
    let (base, hits) = spawn_account_stub(known, Duration::ZERO).await.unwrap();

    let ts = TestServer::start_with(|_| {}, Some(base)).await.unwrap();

    // First authentication walks all three tiers and fetches remotely.
    let mut first = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    first.authenticate(&alice, "alice").await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Second authentication — different session, same process — is served
    // from memory: no new remote request, no new database read.
    let db_reads_before = ts.keys.stats().db_reads;
    let mut second = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    second.authenticate(&alice, "alice2").await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(ts.keys.stats().db_reads, db_reads_before);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn disk_tier_survives_a_process_restart() {
    let alice = PlayerKeys::generate();
    let known = HashMap::from([(alice.id, alice.public_pem())]);
    let (base, hits) = spawn_account_stub(known, Duration::ZERO).await.unwrap();

    let cache_dir = tempfile::tempdir().unwrap();

    // "First process": populate disk via a remote fetch.
    {
        let cache = KeyCache::open(cache_dir.path(), &base).unwrap();
        cache.get(alice.id).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    // "Restart": a fresh cache over the same directory answers from
    // SQLite with a single read and no remote traffic.
    let cache = KeyCache::open(cache_dir.path(), &base).unwrap();
    let key = cache.get(alice.id).await.unwrap();
    assert_eq!(key.pem(), alice.public_pem());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().db_reads, 1);
    assert_eq!(cache.stats().remote_fetches, 0);
}

#[tokio::test]
async fn concurrent_lookups_for_one_key_coalesce() {
    let alice = PlayerKeys::generate();
    let known = HashMap::from([(alice.id, alice.public_pem())]);
    // The stub answers slowly so all lookups overlap.
    let (base, hits) = spawn_account_stub(known, Duration::from_millis(200))
        .await
        .unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(KeyCache::open(cache_dir.path(), &base).unwrap());

    let mut lookups = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let id = alice.id;
        lookups.push(tokio::spawn(async move { cache.get(id).await }));
    }
    for lookup in lookups {
        lookup.await.unwrap().unwrap();
    }

    assert_eq!(
        hits.load(Ordering::SeqCst),
        1,
        "coalescing must collapse concurrent misses into one remote GET"
    );
}

#[tokio::test]
async fn unknown_player_is_refused_but_session_survives() {
    let ghost = PlayerKeys::generate();
    let (base, _hits) = spawn_account_stub(HashMap::new(), Duration::ZERO)
        .await
        .unwrap();

    let ts = TestServer::start_with(|_| {}, Some(base)).await.unwrap();

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    let result = client.authenticate(&ghost, "ghost").await;
    let message = result.unwrap_err().to_string();
    assert!(
        message.contains("UnknownId"),
        "expected UnknownId refusal, got: {message}"
    );

    ts.server.shutdown().await.unwrap();
}
