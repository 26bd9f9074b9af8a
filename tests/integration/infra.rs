//! Test infrastructure: server harness, player keypairs, and a stub
//! account service for the key cache's remote tier.

use anyhow::Result;
use cubeland_core::config::ServerConfig;
use cubeland_core::crypto::PlayerPublicKey;
use cubeland_services::{KeyCache, MemoryWorldSource, WorldSource};
use cubelandd::server::Server;
use p256::ecdsa::SigningKey;
use p256::pkcs8::{EncodePublicKey, LineEnding};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

/// A player's client-side credentials.
pub struct PlayerKeys {
    pub id: Uuid,
    pub signing: SigningKey,
}

impl PlayerKeys {
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4(),
            signing: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    pub fn public_pem(&self) -> String {
        self.signing
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap()
    }
}

/// A running server plus everything tests need to talk to it.
pub struct TestServer {
    pub server: Server,
    pub addr: SocketAddr,
    pub world: Arc<MemoryWorldSource>,
    pub keys: Arc<KeyCache>,
    /// Server certificate PEM; clients trust exactly this.
    pub cert_pem: String,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    /// Start a server on an ephemeral port with a fresh self-signed cert.
    pub async fn start() -> Result<Self> {
        Self::start_with(|_| {}, None).await
    }

    /// Start with config tweaks and an optional account-service base URL.
    pub async fn start_with(
        tweak: impl FnOnce(&mut ServerConfig),
        api_base: Option<String>,
    ) -> Result<Self> {
        let tmp = tempfile::tempdir()?;

        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
        let cert_pem = certified.cert.pem();
        let key_pem = certified.key_pair.serialize_pem();

        let cert_path = tmp.path().join("server-cert.pem");
        let key_path = tmp.path().join("server-key.pem");
        std::fs::write(&cert_path, &cert_pem)?;
        std::fs::write(&key_path, &key_pem)?;

        let mut config = ServerConfig::default();
        config.listen.port = 0;
        config.tls.cert = cert_path;
        config.tls.key = key_path;
        config.keys.cache_dir = tmp.path().join("cache");
        if let Some(base) = api_base {
            config.keys.api_base = base;
        }
        tweak(&mut config);

        let world = MemoryWorldSource::new();
        let keys = Arc::new(KeyCache::open(
            &config.keys.cache_dir,
            &config.keys.api_base,
        )?);

        let world_source: Arc<dyn WorldSource> = world.clone();
        let server = Server::start(config, world_source, keys.clone()).await?;
        // The server binds the wildcard address; clients dial loopback.
        let addr = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));

        Ok(Self {
            server,
            addr,
            world,
            keys,
            cert_pem,
            _tmp: tmp,
        })
    }

    /// Make a player known without touching disk or network tiers.
    pub async fn register_player(&self, player: &PlayerKeys) {
        let key = PlayerPublicKey::from_pem(&player.public_pem()).unwrap();
        self.keys.insert_decoded(player.id, key).await;
    }
}

// ── Stub account service ──────────────────────────────────────────────────────

/// Counter of pubkey requests the stub has served.
pub type HitCounter = Arc<AtomicUsize>;

/// Spawn a minimal HTTP server answering `GET /user/{uuid}/pubkey` with the
/// JSON shape the key cache expects. Unknown ids get a 404. `delay` holds
/// each response open, letting tests overlap concurrent lookups.
pub async fn spawn_account_stub(
    known: HashMap<Uuid, String>,
    delay: Duration,
) -> Result<(String, HitCounter)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let hits: HitCounter = Arc::new(AtomicUsize::new(0));

    let task_hits = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let known = known.clone();
            let hits = task_hits.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut byte = [0u8; 1];
                // Read headers only; these requests have no body.
                while !request.ends_with(b"\r\n\r\n") {
                    match stream.read(&mut byte).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => request.push(byte[0]),
                    }
                }

                hits.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;

                let path = std::str::from_utf8(&request)
                    .ok()
                    .and_then(|text| text.split_whitespace().nth(1))
                    .unwrap_or("")
                    .to_string();

                let response = path
                    .strip_prefix("/user/")
                    .and_then(|rest| rest.strip_suffix("/pubkey"))
                    .and_then(|id| Uuid::parse_str(id).ok())
                    .and_then(|id| known.get(&id).cloned());

                let (status, body) = match response {
                    Some(pem) => (
                        "200 OK",
                        serde_json::json!({ "success": true, "key": pem }).to_string(),
                    ),
                    None => (
                        "404 Not Found",
                        serde_json::json!({ "success": false }).to_string(),
                    ),
                };

                let reply = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes()).await;
            });
        }
    });

    Ok((base, hits))
}
