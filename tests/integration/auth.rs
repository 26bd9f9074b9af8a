//! Authentication scenarios.

use crate::{PlayerKeys, TestClient, TestServer};
use cubeland_core::proto::{auth, chat, endpoint, time};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::Signature;

#[tokio::test]
async fn authenticate_then_disconnect_announces_departure() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    let bob = PlayerKeys::generate();
    ts.register_player(&alice).await;
    ts.register_player(&bob).await;

    let mut watcher = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    watcher.authenticate(&bob, "bob").await.unwrap();

    // Alice joins: the tag discipline inside authenticate() checks the
    // challenge and status echo her request tag. The initial clock state
    // follows as an unsolicited push.
    let mut alice_client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    alice_client.authenticate(&alice, "alice").await.unwrap();

    let initial = alice_client
        .recv_matching(endpoint::TIME, time::INITIAL_STATE)
        .await
        .unwrap();
    assert_eq!(initial.header.tag, 0);
    let state: time::TimeInitialState = TestClient::decode(&initial).unwrap();
    assert!(state.tick_factor > 0.0);

    // Bob sees her arrive. His own join notice may come through first —
    // joins go to every authenticated session, the joiner included.
    let joined = loop {
        let frame = watcher
            .recv_matching(endpoint::CHAT, chat::PLAYER_JOINED)
            .await
            .unwrap();
        let joined: chat::ChatPlayerJoined = TestClient::decode(&frame).unwrap();
        if joined.player_id != bob.id {
            break joined;
        }
    };
    assert_eq!(joined.player_id, alice.id);
    assert_eq!(joined.display_name, "alice");

    // ...and leave.
    drop(alice_client);
    let left = watcher
        .recv_matching(endpoint::CHAT, chat::PLAYER_LEFT)
        .await
        .unwrap();
    let left: chat::ChatPlayerLeft = TestClient::decode(&left).unwrap();
    assert_eq!(left.player_id, alice.id);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn wrong_key_is_refused() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    let impostor = PlayerKeys::generate();
    ts.register_player(&alice).await;

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    let tag = client
        .send(
            endpoint::AUTH,
            auth::REQUEST,
            &auth::AuthRequest {
                client_id: alice.id,
                display_name: "alice?".into(),
            },
        )
        .await
        .unwrap();

    let frame = client
        .recv_matching(endpoint::AUTH, auth::CHALLENGE)
        .await
        .unwrap();
    let challenge: auth::AuthChallenge = TestClient::decode(&frame).unwrap();

    // Signed with the wrong private key.
    let signature: Signature = impostor.signing.sign(&challenge.challenge);
    client
        .send_tagged(
            endpoint::AUTH,
            auth::CHALLENGE_REPLY,
            tag,
            &auth::AuthChallengeReply {
                signature: signature.to_der().as_bytes().to_vec(),
            },
        )
        .await
        .unwrap();

    let frame = client
        .recv_matching(endpoint::AUTH, auth::STATUS)
        .await
        .unwrap();
    let status: auth::AuthStatus = TestClient::decode(&frame).unwrap();
    assert_eq!(status.state, auth::AuthState::InvalidSignature);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn endpoints_are_locked_before_authentication() {
    let ts = TestServer::start().await.unwrap();

    let mut client = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    client
        .send(
            endpoint::WORLD_INFO,
            cubeland_core::proto::world_info::GET,
            &cubeland_core::proto::world_info::WorldInfoGet {
                key: "generator.seed".into(),
            },
        )
        .await
        .unwrap();

    // The server closes the session; the next read fails or hits EOF.
    let outcome =
        tokio::time::timeout(std::time::Duration::from_secs(5), client.recv()).await;
    match outcome {
        Ok(Err(_)) => {}
        Ok(Ok(frame)) => panic!("expected closed session, got frame {:?}", frame.header),
        Err(_) => panic!("server neither replied nor closed the session"),
    }

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn connected_player_listing() {
    let ts = TestServer::start().await.unwrap();
    let alice = PlayerKeys::generate();
    let bob = PlayerKeys::generate();
    ts.register_player(&alice).await;
    ts.register_player(&bob).await;

    let mut a = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    a.authenticate(&alice, "alice").await.unwrap();
    let mut b = TestClient::connect(ts.addr, &ts.cert_pem).await.unwrap();
    b.authenticate(&bob, "bob").await.unwrap();

    let tag = a
        .send(
            endpoint::AUTH,
            auth::GET_CONNECTED,
            &auth::AuthGetConnected {
                include_address: true,
            },
        )
        .await
        .unwrap();

    let frame = a
        .recv_matching(endpoint::AUTH, auth::GET_CONNECTED_REPLY)
        .await
        .unwrap();
    assert_eq!(frame.header.tag, tag);
    let reply: auth::AuthGetConnectedReply = TestClient::decode(&frame).unwrap();

    let mut names: Vec<_> = reply
        .players
        .iter()
        .map(|p| p.display_name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["alice", "bob"]);
    assert!(reply.players.iter().all(|p| p.remote_addr.is_some()));

    ts.server.shutdown().await.unwrap();
}
