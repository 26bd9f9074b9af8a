//! Server assembly — shared state and background task wiring.
//!
//! [`Server::start`] binds the socket, builds the TLS acceptor, and spawns
//! the long-lived tasks: acceptor, saver, reaper, world clock, and the
//! broadcast fan-out consumer. [`Server::shutdown`] unwinds them in order
//! and flushes persistent state.

use crate::session::SessionRegistry;
use crate::{broadcast, listener, serializer::SerializerPool};
use anyhow::{Context, Result};
use cubeland_core::config::ServerConfig;
use cubeland_core::proto::ChunkPos;
use cubeland_services::{
    BroadcastEvent, BusSender, ChunkHandle, ChunkObservers, KeyCache, SessionId, WorldClock,
    WorldError, WorldSource,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast as shutdown_channel, mpsc};
use tokio::task::JoinHandle;

/// State shared by every task in the server.
pub struct ServerShared {
    pub config: ServerConfig,
    pub world: Arc<dyn WorldSource>,
    pub keys: Arc<KeyCache>,
    pub bus: BusSender,
    pub observers: ChunkObservers,
    pub clock: WorldClock,
    pub sessions: SessionRegistry,
    pub serializer: SerializerPool,
    /// Number of sessions currently authenticated. Gates the world clock.
    pub authed_players: AtomicUsize,
    /// Process-wide weak cache of loaded chunks. Entries die with their
    /// last strong holder; lookups purge dead entries lazily.
    chunk_cache: DashMap<ChunkPos, Weak<ChunkHandle>>,
    next_session_id: AtomicU64,
    reaper_tx: mpsc::UnboundedSender<SessionId>,
}

impl ServerShared {
    pub(crate) fn new(
        config: ServerConfig,
        world: Arc<dyn WorldSource>,
        keys: Arc<KeyCache>,
        bus: BusSender,
        clock: WorldClock,
        serializer: SerializerPool,
        reaper_tx: mpsc::UnboundedSender<SessionId>,
    ) -> Self {
        Self {
            config,
            world,
            keys,
            bus,
            observers: ChunkObservers::new(),
            clock,
            sessions: SessionRegistry::default(),
            serializer,
            authed_players: AtomicUsize::new(0),
            chunk_cache: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            reaper_tx,
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Notify the reaper that a session task has exited.
    pub fn session_closed(&self, id: SessionId) {
        let _ = self.reaper_tx.send(id);
    }

    /// Resolve a chunk through the weak cache, falling back to the world
    /// source and re-populating the cache entry.
    pub async fn chunk_at(&self, pos: ChunkPos) -> Result<Arc<ChunkHandle>, WorldError> {
        if let Some(entry) = self.chunk_cache.get(&pos) {
            if let Some(live) = entry.upgrade() {
                return Ok(live);
            }
        }
        self.chunk_cache
            .remove_if(&pos, |_, weak| weak.strong_count() == 0);

        let chunk = self.world.get_chunk(pos.x, pos.z).await?;
        self.chunk_cache.insert(pos, Arc::downgrade(&chunk));
        Ok(chunk)
    }

    /// Record a completed authentication: bump the gate counter used by the
    /// clock task. The caller has already set the session identity.
    pub fn player_authenticated(&self) {
        self.authed_players.fetch_add(1, Ordering::SeqCst);
    }
}

/// A running server instance.
pub struct Server {
    pub shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    shutdown_tx: shutdown_channel::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind, spawn all background tasks, and start accepting clients.
    pub async fn start(
        config: ServerConfig,
        world: Arc<dyn WorldSource>,
        keys: Arc<KeyCache>,
    ) -> Result<Self> {
        let tls = listener::build_tls_config(&config.tls).context("TLS configuration failed")?;
        let socket = listener::bind(&config.listen).context("failed to bind listening socket")?;
        let local_addr = socket.local_addr()?;

        let (bus, bus_rx) = cubeland_services::bus_channel();
        let (reaper_tx, reaper_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = shutdown_channel::channel(1);

        let clock = WorldClock::new(config.proto.tick_factor());
        if let Err(e) = clock.load(world.as_ref()).await {
            tracing::warn!(error = %e, "could not load persisted world time");
        }

        let serializer = SerializerPool::start(config.world.chunk_serializer_threads);

        let shared = Arc::new(ServerShared::new(
            config, world, keys, bus, clock, serializer, reaper_tx,
        ));

        let tasks = vec![
            tokio::spawn(listener::run_acceptor(
                socket,
                tls,
                shared.clone(),
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(listener::run_saver(shared.clone(), shutdown_tx.subscribe())),
            tokio::spawn(listener::run_reaper(
                shared.clone(),
                reaper_rx,
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(run_clock(shared.clone(), shutdown_tx.subscribe())),
            tokio::spawn(broadcast::run_consumer(
                shared.clone(),
                bus_rx,
                shutdown_tx.subscribe(),
            )),
        ];

        tracing::info!(addr = %local_addr, "cubeland server listening");

        Ok(Self {
            shared,
            local_addr,
            shutdown_tx,
            tasks,
        })
    }

    /// Address the server actually bound (relevant with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every session, stop background tasks, and
    /// flush persistent state.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("server shutting down");

        // Ask each session to exit, then give them a moment to drain so
        // the reaper can still publish their departures.
        self.shared.sessions.for_each(|session| session.request_shutdown());
        for _ in 0..40 {
            if self.shared.sessions.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            let _ = task.await;
        }

        self.shared.clock.pause();
        if let Err(e) = self.shared.clock.save(self.shared.world.as_ref()).await {
            tracing::warn!(error = %e, "failed to persist world time");
        }
        self.shared
            .world
            .flush_dirty_sync()
            .await
            .context("world flush failed")?;

        tracing::info!("server stopped");
        Ok(())
    }
}

/// World clock driver.
///
/// Steps the clock every 100 ms while at least one player is authenticated
/// and pauses (persisting the time) when the last one leaves. Publishes a
/// `TimeTick` on the configured broadcast interval.
async fn run_clock(shared: Arc<ServerShared>, mut shutdown: shutdown_channel::Receiver<()>) {
    const STEP_MS: u64 = 100;

    let update_every = (shared.config.proto.time_update_interval_secs * 1000 / STEP_MS).max(1);
    let mut interval = tokio::time::interval(Duration::from_millis(STEP_MS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut was_running = false;
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("clock task shutting down");
                return;
            }

            _ = interval.tick() => {
                let active = shared.authed_players.load(Ordering::SeqCst) > 0;

                if active {
                    if !was_running {
                        shared.clock.resume();
                        was_running = true;
                        tracing::debug!("world clock resumed");
                    }
                    shared.clock.step();

                    ticks += 1;
                    if ticks % update_every == 0 {
                        shared
                            .bus
                            .publish(BroadcastEvent::TimeTick {
                                current_time: shared.clock.now(),
                            })
                            .await;
                    }
                } else if was_running {
                    shared.clock.pause();
                    was_running = false;
                    tracing::debug!("world clock paused");
                    if let Err(e) = shared.clock.save(shared.world.as_ref()).await {
                        tracing::warn!(error = %e, "failed to persist world time");
                    }
                }
            }
        }
    }
}
