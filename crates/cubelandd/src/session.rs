//! Client session — one task per TLS connection.
//!
//! The session task multiplexes three inputs: bytes arriving from the peer,
//! an event channel carrying pre-encoded outbound frames and control events,
//! and the periodic broadcast tick. Every byte written to the connection is
//! written by this task — handlers respond through it and cross-session
//! traffic arrives as [`SessionEvent::Frame`] — so TLS record framing is
//! never interleaved.
//!
//! Shutdown is cooperative: clearing the run flag plus a `NoOp` event wakes
//! the task, which exits at the next loop iteration.

use crate::dispatch::{HandlerContext, HandlerRegistry};
use crate::handlers;
use crate::server::ServerShared;
use bytes::{Bytes, BytesMut};
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::{FrameDecoder, TagAllocator};
use cubeland_services::{SessionId, QUEUE_DEPTH};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Who the session authenticated as.
#[derive(Debug, Clone)]
pub struct PlayerIdentity {
    pub id: Uuid,
    pub display_name: String,
}

/// Events delivered to a session task from other tasks.
#[derive(Debug)]
pub enum SessionEvent {
    /// A fully encoded frame; the session writes it verbatim.
    Frame(Bytes),
    /// Run the save hooks of dirty handlers.
    Save,
    /// Wake the task with no side effects (used with the run flag).
    NoOp,
}

/// Shared face of a session, visible to the listener, the bus, and the
/// chunk serializer pool. The session task itself owns everything else.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub tags: TagAllocator,
    events: mpsc::Sender<SessionEvent>,
    player: Mutex<Option<PlayerIdentity>>,
    running: AtomicBool,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            tags: TagAllocator::new(),
            events,
            player: Mutex::new(None),
            running: AtomicBool::new(true),
        }
    }

    pub fn player_id(&self) -> Option<Uuid> {
        self.lock_player().as_ref().map(|p| p.id)
    }

    pub fn identity(&self) -> Option<PlayerIdentity> {
        self.lock_player().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_player().is_some()
    }

    /// Record a successful authentication.
    pub fn set_identity(&self, identity: PlayerIdentity) {
        *self.lock_player() = Some(identity);
    }

    fn lock_player(&self) -> std::sync::MutexGuard<'_, Option<PlayerIdentity>> {
        self.player.lock().expect("player lock poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue an outbound frame without blocking.
    ///
    /// A full queue drops the frame — broadcast producers must never stall
    /// on a slow session. Returns whether the frame was accepted.
    pub fn send_frame(&self, frame: Bytes) -> bool {
        match self.events.try_send(SessionEvent::Frame(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    session = self.id,
                    peer = %self.peer_addr,
                    "outbound queue full, frame dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue an outbound frame, waiting for queue space.
    ///
    /// Used by the chunk serializer pool, where backpressure should slow
    /// the producer down instead of dropping slices.
    pub async fn send_frame_wait(&self, frame: Bytes) -> bool {
        self.events.send(SessionEvent::Frame(frame)).await.is_ok()
    }

    /// Ask the session task to run its save sweep.
    pub fn request_save(&self) {
        let _ = self.events.try_send(SessionEvent::Save);
    }

    /// Ask the session task to exit at its next suspension point.
    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.events.try_send(SessionEvent::NoOp);
    }
}

/// The registry of live sessions, shared across all server tasks.
///
/// Iteration callbacks must not call back into the registry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    map: DashMap<SessionId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.map.insert(handle.id, handle);
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.map.remove(&id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.map.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Invoke `f` on every live session.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<SessionHandle>)) {
        for entry in self.map.iter() {
            f(entry.value());
        }
    }
}

/// A session task's owned state.
pub struct Session<S> {
    conn: S,
    handle: Arc<SessionHandle>,
    shared: Arc<ServerShared>,
    events: mpsc::Receiver<SessionEvent>,
    registry: HandlerRegistry,
    decoder: FrameDecoder,
    inbuf: BytesMut,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Build a session over an established connection. The caller inserts
    /// the returned handle into the registry and then runs the session.
    pub fn new(
        conn: S,
        peer_addr: SocketAddr,
        shared: Arc<ServerShared>,
    ) -> (Self, Arc<SessionHandle>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = Arc::new(SessionHandle::new(shared.next_session_id(), peer_addr, tx));

        let session = Self {
            conn,
            handle: handle.clone(),
            shared,
            events: rx,
            registry: HandlerRegistry::new(handlers::default_handlers()),
            decoder: FrameDecoder::new(true),
            inbuf: BytesMut::with_capacity(8 * 1024),
        };
        (session, handle)
    }

    pub async fn run(mut self) {
        let tick_ms = self
            .shared
            .config
            .proto
            .position_broadcast_interval_ms
            .max(1);
        let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let reason = loop {
            if !self.handle.is_running() {
                break "shutdown requested";
            }

            tokio::select! {
                read = self.conn.read_buf(&mut self.inbuf) => match read {
                    Ok(0) => break "peer closed connection",
                    Ok(_) => {
                        if let Err(e) = self.drain_frames().await {
                            tracing::warn!(
                                session = self.handle.id,
                                peer = %self.handle.peer_addr,
                                error = %e,
                                "closing session"
                            );
                            break "protocol error";
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            session = self.handle.id,
                            peer = %self.handle.peer_addr,
                            error = %e,
                            "read failed"
                        );
                        break "read error";
                    }
                },

                event = self.events.recv() => match event {
                    None => break "event channel closed",
                    Some(SessionEvent::Frame(frame)) => {
                        if let Err(e) = self.conn.write_all(&frame).await {
                            tracing::warn!(
                                session = self.handle.id,
                                error = %e,
                                "write failed"
                            );
                            break "write error";
                        }
                    }
                    Some(SessionEvent::Save) => self.save_sweep().await,
                    Some(SessionEvent::NoOp) => {}
                },

                _ = tick.tick() => {
                    if let Err(e) = self.broadcast_tick().await {
                        if e.closes_session() {
                            tracing::warn!(session = self.handle.id, error = %e, "closing session");
                            break "tick error";
                        }
                        tracing::warn!(session = self.handle.id, error = %e, "broadcast tick failed");
                    }
                }
            }
        };

        tracing::debug!(
            session = self.handle.id,
            peer = %self.handle.peer_addr,
            reason,
            "session ending"
        );

        let _ = self.conn.shutdown().await;
        self.shared.session_closed(self.handle.id);
    }

    /// Dispatch every complete frame sitting in the read buffer.
    ///
    /// Per-frame handler errors that do not close the session are logged
    /// here and the loop continues; everything else propagates.
    async fn drain_frames(&mut self) -> Result<(), ProtocolError> {
        loop {
            let frame = match self.decoder.decode(&mut self.inbuf)? {
                Some(frame) => frame,
                None => return Ok(()),
            };

            let was_authenticated = self.handle.is_authenticated();

            let Self {
                conn,
                handle,
                shared,
                registry,
                ..
            } = self;
            let mut cx = HandlerContext {
                conn,
                session: &*handle,
                shared: &*shared,
            };

            match registry.dispatch(&mut cx, &frame.header, &frame.payload).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        session = handle.id,
                        endpoint = frame.header.endpoint,
                        kind = frame.header.kind,
                        "unhandled packet dropped"
                    );
                }
                Err(e) if e.closes_session() => return Err(e),
                Err(e) => {
                    tracing::warn!(session = handle.id, error = %e, "request failed");
                }
            }

            // Crossing into the authenticated state fans out to every
            // handler exactly once (initial position, time state, ...).
            if !was_authenticated && handle.is_authenticated() {
                let mut cx = HandlerContext {
                    conn,
                    session: &*handle,
                    shared: &*shared,
                };
                registry.auth_state_changed(&mut cx).await?;
            }
        }
    }

    async fn broadcast_tick(&mut self) -> Result<(), ProtocolError> {
        let Self {
            conn,
            handle,
            shared,
            registry,
            ..
        } = self;
        let mut cx = HandlerContext {
            conn,
            session: &*handle,
            shared: &*shared,
        };
        registry.broadcast_tick(&mut cx).await
    }

    async fn save_sweep(&mut self) {
        let Self {
            conn,
            handle,
            shared,
            registry,
            ..
        } = self;
        let mut cx = HandlerContext {
            conn,
            session: &*handle,
            shared: &*shared,
        };
        registry.save_dirty(&mut cx).await;
    }
}
