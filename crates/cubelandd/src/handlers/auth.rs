//! Authentication endpoint.
//!
//! Challenge/response over the player's long-lived keypair:
//!
//!   Idle ──AuthRequest──▶ VerifyChallenge ──valid sig──▶ Successful
//!                                │
//!                                └──bad sig──▶ Failed
//!
//! The 32-byte challenge comes from a cryptographic RNG and is signed raw,
//! exactly as transmitted. Key material is resolved through the key cache;
//! cache failures answer on the reply frame and keep the session open.
//! A second `AuthRequest` while a challenge is outstanding closes the
//! session — the client is malformed.

use crate::dispatch::{HandlerContext, PacketHandler};
use crate::session::PlayerIdentity;
use async_trait::async_trait;
use cubeland_core::codec::decode_payload;
use cubeland_core::crypto::{generate_challenge, CHALLENGE_LEN};
use cubeland_core::error::ProtocolError;
use cubeland_core::frame::FrameHeader;
use cubeland_core::proto::{auth, endpoint};
use cubeland_services::{BroadcastEvent, KeyCacheError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No authentication attempted; accept auth requests.
    Idle,
    /// A challenge is outstanding; expect the signed reply.
    VerifyChallenge,
    Successful,
    Failed,
}

pub struct Auth {
    state: State,
    client_id: Option<Uuid>,
    display_name: String,
    challenge: [u8; CHALLENGE_LEN],
}

impl Auth {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            client_id: None,
            display_name: String::new(),
            challenge: [0; CHALLENGE_LEN],
        }
    }

    async fn handle_request(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let request: auth::AuthRequest = decode_payload(payload)?;

        tracing::debug!(
            session = cx.session.id,
            player = %request.client_id,
            name = %request.display_name,
            "authentication requested"
        );

        self.client_id = Some(request.client_id);
        self.display_name = request.display_name;
        self.challenge = generate_challenge();
        self.state = State::VerifyChallenge;

        cx.respond(
            endpoint::AUTH,
            auth::CHALLENGE,
            header.tag,
            &auth::AuthChallenge {
                challenge: self.challenge,
            },
        )
        .await
    }

    async fn handle_challenge_reply(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let reply: auth::AuthChallengeReply = decode_payload(payload)?;
        let client_id = self
            .client_id
            .ok_or_else(|| ProtocolError::UnexpectedState("challenge without request".into()))?;

        // Resolve the client's public key. Lookup failures answer on the
        // reply frame; only the session stays in play.
        let key = match cx.shared.keys.get(client_id).await {
            Ok(key) => key,
            Err(KeyCacheError::UnknownPlayer) => {
                tracing::warn!(player = %client_id, "authentication for unknown player id");
                self.state = State::Failed;
                return self
                    .send_status(cx, header.tag, auth::AuthState::UnknownId)
                    .await;
            }
            Err(e) => {
                tracing::warn!(player = %client_id, error = %e, "key lookup failed");
                // Stay in VerifyChallenge: the client may retry the reply
                // once the account service recovers.
                return self
                    .send_status(cx, header.tag, auth::AuthState::TemporaryError)
                    .await;
            }
        };

        if key.verify(&self.challenge, &reply.signature) {
            self.state = State::Successful;
            cx.session.set_identity(PlayerIdentity {
                id: client_id,
                display_name: self.display_name.clone(),
            });
            cx.shared.player_authenticated();
            cx.shared
                .bus
                .publish(BroadcastEvent::PlayerJoined {
                    id: client_id,
                    display_name: self.display_name.clone(),
                })
                .await;

            tracing::info!(
                session = cx.session.id,
                player = %client_id,
                name = %self.display_name,
                "player authenticated"
            );
            self.send_status(cx, header.tag, auth::AuthState::Success)
                .await
        } else {
            self.state = State::Failed;
            tracing::warn!(
                session = cx.session.id,
                player = %client_id,
                "challenge signature rejected"
            );
            self.send_status(cx, header.tag, auth::AuthState::InvalidSignature)
                .await
        }
    }

    async fn handle_get_connected(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let request: auth::AuthGetConnected = decode_payload(payload)?;

        let mut players = Vec::new();
        cx.shared.sessions.for_each(|session| {
            if let Some(identity) = session.identity() {
                players.push(auth::ConnectedPlayer {
                    id: identity.id,
                    display_name: identity.display_name,
                    remote_addr: request
                        .include_address
                        .then(|| session.peer_addr.to_string()),
                });
            }
        });

        cx.respond(
            endpoint::AUTH,
            auth::GET_CONNECTED_REPLY,
            header.tag,
            &auth::AuthGetConnectedReply { players },
        )
        .await
    }

    async fn send_status(
        &mut self,
        cx: &mut HandlerContext<'_>,
        tag: u16,
        state: auth::AuthState,
    ) -> Result<(), ProtocolError> {
        cx.respond(
            endpoint::AUTH,
            auth::STATUS,
            tag,
            &auth::AuthStatus { state },
        )
        .await
    }
}

#[async_trait]
impl PacketHandler for Auth {
    fn can_handle(&self, header: &FrameHeader) -> bool {
        header.endpoint == endpoint::AUTH && header.kind != 0 && header.kind < auth::TYPE_MAX
    }

    async fn handle(
        &mut self,
        cx: &mut HandlerContext<'_>,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        match self.state {
            State::Idle => match header.kind {
                auth::REQUEST => self.handle_request(cx, header, payload).await,
                kind => Err(ProtocolError::UnexpectedState(format!(
                    "auth type {kind:#04x} before request"
                ))),
            },

            State::VerifyChallenge => match header.kind {
                auth::CHALLENGE_REPLY => self.handle_challenge_reply(cx, header, payload).await,
                // A fresh request mid-challenge means the client is broken.
                kind => Err(ProtocolError::UnexpectedState(format!(
                    "auth type {kind:#04x} while challenge outstanding"
                ))),
            },

            State::Successful => match header.kind {
                auth::GET_CONNECTED => self.handle_get_connected(cx, header, payload).await,
                kind => Err(ProtocolError::UnexpectedState(format!(
                    "auth type {kind:#04x} after authentication"
                ))),
            },

            State::Failed => Err(ProtocolError::UnexpectedState(
                "authentication already failed".into(),
            )),
        }
    }
}
