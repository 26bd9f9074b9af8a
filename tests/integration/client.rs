//! Minimal protocol client used by the end-to-end tests.

use crate::PlayerKeys;
use anyhow::{anyhow, bail, Context, Result};
use cubeland_core::codec::{decode_payload, encode_payload, WireDecode, WireEncode};
use cubeland_core::frame::{read_frame, write_frame, Frame, TagAllocator};
use cubeland_core::proto::{auth, endpoint};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::Signature;
use rustls_pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

pub struct TestClient {
    stream: TlsStream<TcpStream>,
    tags: TagAllocator,
}

impl TestClient {
    /// Connect over TLS, trusting exactly the server's own certificate.
    pub async fn connect(addr: SocketAddr, server_cert_pem: &str) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut server_cert_pem.as_bytes()) {
            roots.add(cert?)?;
        }

        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"cubeland/1.0".to_vec()];

        let connector = TlsConnector::from(Arc::new(config));
        let tcp = TcpStream::connect(addr).await.context("TCP connect")?;
        let stream = connector
            .connect(ServerName::try_from("localhost")?, tcp)
            .await
            .context("TLS handshake")?;

        Ok(Self {
            stream,
            tags: TagAllocator::new(),
        })
    }

    /// Send a request frame with a fresh tag; returns the tag.
    pub async fn send<M: WireEncode>(&mut self, ep: u8, kind: u8, message: &M) -> Result<u16> {
        let tag = self.tags.allocate();
        self.send_tagged(ep, kind, tag, message).await?;
        Ok(tag)
    }

    pub async fn send_tagged<M: WireEncode>(
        &mut self,
        ep: u8,
        kind: u8,
        tag: u16,
        message: &M,
    ) -> Result<()> {
        write_frame(&mut self.stream, ep, kind, tag, &encode_payload(message)).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Frame> {
        Ok(read_frame(&mut self.stream, true).await?)
    }

    /// Receive with a deadline, skipping frames until one matches.
    pub async fn recv_matching(&mut self, ep: u8, kind: u8) -> Result<Frame> {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                let frame = self.recv().await?;
                if frame.header.endpoint == ep && frame.header.kind == kind {
                    return Ok(frame);
                }
            }
        })
        .await
        .map_err(|_| anyhow!("timed out waiting for {ep}:{kind}"))?
    }

    /// Like [`recv_matching`], but failing fast if nothing matches within
    /// `window` — used to assert a frame does NOT arrive.
    ///
    /// [`recv_matching`]: TestClient::recv_matching
    pub async fn expect_silence(&mut self, ep: u8, kind: u8, window: Duration) -> Result<()> {
        let outcome = tokio::time::timeout(window, async {
            loop {
                let frame = self.recv().await?;
                if frame.header.endpoint == ep && frame.header.kind == kind {
                    return Ok::<Frame, anyhow::Error>(frame);
                }
            }
        })
        .await;

        match outcome {
            Err(_) => Ok(()), // window elapsed with no match
            Ok(Err(e)) => bail!("connection failed while expecting silence: {e}"),
            Ok(Ok(frame)) => bail!(
                "unexpected frame {}:{} tag {}",
                frame.header.endpoint,
                frame.header.kind,
                frame.header.tag
            ),
        }
    }

    pub fn decode<M: WireDecode>(frame: &Frame) -> Result<M> {
        Ok(decode_payload(&frame.payload)?)
    }

    /// Run the full challenge/response flow. The whole exchange uses one
    /// tag, which every server reply must echo.
    pub async fn authenticate(&mut self, player: &PlayerKeys, name: &str) -> Result<()> {
        let tag = self
            .send(
                endpoint::AUTH,
                auth::REQUEST,
                &auth::AuthRequest {
                    client_id: player.id,
                    display_name: name.to_string(),
                },
            )
            .await?;

        let frame = self.recv_matching(endpoint::AUTH, auth::CHALLENGE).await?;
        if frame.header.tag != tag {
            bail!(
                "challenge tag {} does not echo request tag {tag}",
                frame.header.tag
            );
        }
        let challenge: auth::AuthChallenge = Self::decode(&frame)?;

        let signature: Signature = player.signing.sign(&challenge.challenge);
        self.send_tagged(
            endpoint::AUTH,
            auth::CHALLENGE_REPLY,
            tag,
            &auth::AuthChallengeReply {
                signature: signature.to_der().as_bytes().to_vec(),
            },
        )
        .await?;

        let frame = self.recv_matching(endpoint::AUTH, auth::STATUS).await?;
        if frame.header.tag != tag {
            bail!(
                "status tag {} does not echo request tag {tag}",
                frame.header.tag
            );
        }
        let status: auth::AuthStatus = Self::decode(&frame)?;
        if status.state != auth::AuthState::Success {
            bail!("authentication refused: {:?}", status.state);
        }
        Ok(())
    }
}
