//! Player public key cache.
//!
//! Lookup runs through three tiers: a decoded in-memory map, a local SQLite
//! table, and finally the account service over HTTP. Whatever tier hits,
//! the tiers above it are populated on the way out.
//!
//! Concurrent lookups for the same missing key coalesce: the first caller
//! owns the key's slot while it walks the slow tiers, and everyone else
//! waits on that slot rather than issuing their own remote request. Lookups
//! for distinct keys proceed in parallel. Entries currently live for the
//! process lifetime (no TTL yet).

use cubeland_core::crypto::PlayerPublicKey;
use rusqlite::OptionalExtension;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// File name of the cache database inside the cache directory.
const DB_FILE: &str = "server_keys.sqlite3";

/// v1 schema, applied when the table is missing.
const SCHEMA_V1: &str = "CREATE TABLE keys_v1 (uuid BLOB PRIMARY KEY, pubkey TEXT NOT NULL);";

#[derive(Debug, Error)]
pub enum KeyCacheError {
    /// The account service does not know this player.
    #[error("unknown player id")]
    UnknownPlayer,

    #[error("key lookup failed: {0}")]
    LookupFailed(String),

    #[error("key cache database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("failed to open key cache: {0}")]
    Open(std::io::Error),

    #[error(transparent)]
    BadKey(#[from] cubeland_core::crypto::CryptoError),
}

/// Per-key slot. Holding the slot lock while filling it is what makes
/// concurrent misses coalesce.
type KeySlot = Arc<tokio::sync::Mutex<Option<Arc<PlayerPublicKey>>>>;

/// Tier access counters, exposed for stats and tests.
#[derive(Debug, Default)]
pub struct KeyCacheStats {
    pub db_reads: u64,
    pub remote_fetches: u64,
}

pub struct KeyCache {
    api_base: String,
    http: reqwest::Client,
    db: tokio::sync::Mutex<rusqlite::Connection>,
    decoded: Mutex<HashMap<Uuid, KeySlot>>,
    db_reads: AtomicU64,
    remote_fetches: AtomicU64,
}

#[derive(Deserialize)]
struct PubkeyResponse {
    success: bool,
    key: Option<String>,
}

impl KeyCache {
    /// Open (creating if needed) the cache database under `cache_dir`.
    ///
    /// Applying the schema is idempotent: it only runs when `keys_v1` does
    /// not exist yet.
    pub fn open(cache_dir: &Path, api_base: &str) -> Result<Self, KeyCacheError> {
        std::fs::create_dir_all(cache_dir).map_err(KeyCacheError::Open)?;
        let path = cache_dir.join(DB_FILE);
        let conn = rusqlite::Connection::open(&path)?;

        if !table_exists(&conn, "keys_v1")? {
            tracing::debug!(path = %path.display(), "initializing key cache with v1 schema");
            conn.execute_batch(SCHEMA_V1)?;
        }

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            db: tokio::sync::Mutex::new(conn),
            decoded: Mutex::new(HashMap::new()),
            db_reads: AtomicU64::new(0),
            remote_fetches: AtomicU64::new(0),
        })
    }

    /// Resolve a player's public key through the tiers.
    pub async fn get(&self, id: Uuid) -> Result<Arc<PlayerPublicKey>, KeyCacheError> {
        // The map lock guards only slot creation; it is never held across
        // I/O. The slot lock is what serializes the slow path per key.
        let slot: KeySlot = {
            let mut decoded = self.decoded.lock().expect("key map lock poisoned");
            decoded.entry(id).or_default().clone()
        };

        let mut guard = slot.lock().await;
        if let Some(key) = guard.as_ref() {
            return Ok(key.clone());
        }

        // Disk tier.
        if let Some(pem) = self.read_db_key(id).await? {
            let key = Arc::new(PlayerPublicKey::from_pem(&pem)?);
            *guard = Some(key.clone());
            return Ok(key);
        }

        // Remote tier.
        let pem = self.fetch_remote(id).await?;
        let key = Arc::new(PlayerPublicKey::from_pem(&pem)?);
        self.write_db_key(id, &pem).await?;
        *guard = Some(key.clone());

        tracing::debug!(player = %id, "public key fetched from account service");
        Ok(key)
    }

    /// Seed the memory tier directly. Used by tests and local tooling.
    pub async fn insert_decoded(&self, id: Uuid, key: PlayerPublicKey) {
        let slot: KeySlot = {
            let mut decoded = self.decoded.lock().expect("key map lock poisoned");
            decoded.entry(id).or_default().clone()
        };
        *slot.lock().await = Some(Arc::new(key));
    }

    pub fn stats(&self) -> KeyCacheStats {
        KeyCacheStats {
            db_reads: self.db_reads.load(Ordering::Relaxed),
            remote_fetches: self.remote_fetches.load(Ordering::Relaxed),
        }
    }

    async fn read_db_key(&self, id: Uuid) -> Result<Option<String>, KeyCacheError> {
        self.db_reads.fetch_add(1, Ordering::Relaxed);
        let db = self.db.lock().await;
        let pem = db
            .query_row(
                "SELECT pubkey FROM keys_v1 WHERE uuid = ?1",
                [id.as_bytes().as_slice()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(pem)
    }

    async fn write_db_key(&self, id: Uuid, pem: &str) -> Result<(), KeyCacheError> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO keys_v1 (uuid, pubkey) VALUES (?1, ?2)",
            rusqlite::params![id.as_bytes().as_slice(), pem],
        )?;
        Ok(())
    }

    async fn fetch_remote(&self, id: Uuid) -> Result<String, KeyCacheError> {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}/user/{}/pubkey", self.api_base, id);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| KeyCacheError::LookupFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(KeyCacheError::UnknownPlayer);
        }
        if !response.status().is_success() {
            return Err(KeyCacheError::LookupFailed(format!(
                "account service returned {}",
                response.status()
            )));
        }

        let body: PubkeyResponse = response
            .json()
            .await
            .map_err(|e| KeyCacheError::LookupFailed(e.to_string()))?;

        if !body.success {
            return Err(KeyCacheError::LookupFailed(
                "account service reported failure".into(),
            ));
        }
        body.key
            .ok_or_else(|| KeyCacheError::LookupFailed("response missing key field".into()))
    }
}

fn table_exists(conn: &rusqlite::Connection, name: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
