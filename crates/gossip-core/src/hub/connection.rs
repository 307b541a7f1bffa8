//! Per-connection session: greeting → authenticate → key fan-out →
//! steady-state relay. One task per accepted connection; cleanup runs
//! unconditionally when the read loop exits.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::crypto;
use crate::domain::id::ClientId;
use crate::domain::packet::{opcode, SignalPacket, AUTH_OK_PLAINTEXT};
use crate::wire::{self, Frame, SharedWriter};

use super::Hub;

/// Handshake progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitGreeting,
    AwaitAuth,
    AwaitKeyRequest,
    Active,
}

struct Connection {
    hub: Arc<Hub>,
    writer: SharedWriter,
    /// Set at greeting; present iff the client is in the registry.
    client_id: Option<ClientId>,
    /// The client's armored key, kept for handshake replies.
    client_key: Vec<u8>,
    stage: Stage,
}

/// Entry point for one accepted connection.
pub(super) async fn handle(hub: Arc<Hub>, stream: TcpStream, addr: SocketAddr) {
    info!(target: "connection", %addr, "connection established");

    let (read_half, write_half) = stream.into_split();
    let mut frames = wire::framed_lines(read_half);
    let mut connection = Connection {
        hub,
        writer: wire::shared_writer(write_half),
        client_id: None,
        client_key: Vec::new(),
        stage: Stage::AwaitGreeting,
    };

    if let Err(error) = connection.run(&mut frames).await {
        debug!(target: "connection", %addr, %error, "connection ended with error");
    }
    connection.cleanup().await;
}

impl Connection {
    async fn run(
        &mut self,
        frames: &mut FramedRead<OwnedReadHalf, LinesCodec>,
    ) -> anyhow::Result<()> {
        while let Some(item) = frames.next().await {
            let line = match item {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) if self.stage == Stage::Active => {
                    warn!("oversized frame, dropping");
                    continue;
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    anyhow::bail!("oversized frame during handshake");
                }
                Err(LinesCodecError::Io(error)) => return Err(error.into()),
            };

            let frame = match wire::parse_frame(&line) {
                Ok(frame) => frame,
                Err(error) if self.stage == Stage::Active => {
                    // One bad relayed line must not break the connection.
                    warn!(%error, "dropping bad frame");
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            match frame {
                Frame::Signal(packet) => {
                    if !self.handle_signal(packet).await? {
                        return Ok(());
                    }
                }
                Frame::Data(ciphertext) if self.stage == Stage::Active => {
                    // Relay on its own task so a slow recipient cannot
                    // block this reader.
                    let hub = Arc::clone(&self.hub);
                    tokio::spawn(async move { hub.relay_data(ciphertext).await });
                }
                Frame::Stream(ciphertext) if self.stage == Stage::Active => {
                    let hub = Arc::clone(&self.hub);
                    tokio::spawn(async move { hub.relay_stream(ciphertext).await });
                }
                Frame::Data(_) | Frame::Stream(_) => {
                    debug!("dropping data frame before key sync finished");
                }
            }
        }
        Ok(())
    }

    /// Dispatch one signal. `Ok(false)` ends the connection cleanly.
    async fn handle_signal(&mut self, packet: SignalPacket) -> anyhow::Result<bool> {
        match self.stage {
            Stage::AwaitGreeting => {
                if packet.command == opcode::GREETING {
                    self.handle_greeting(packet).await?;
                } else {
                    debug!(command = %packet.command, "ignoring opcode before greeting");
                }
            }
            Stage::AwaitAuth => {
                if packet.command == opcode::AUTH {
                    return self.handle_auth(packet).await;
                }
                debug!(command = %packet.command, "ignoring opcode before auth");
            }
            Stage::AwaitKeyRequest => {
                if packet.command == opcode::KEY_REQUEST {
                    self.handle_key_request().await?;
                } else {
                    debug!(command = %packet.command, "ignoring opcode before key sync");
                }
            }
            Stage::Active => return self.handle_active(packet).await,
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    async fn handle_greeting(&mut self, packet: SignalPacket) -> anyhow::Result<()> {
        anyhow::ensure!(!packet.sender.is_empty(), "greeting without a sender id");

        let id = ClientId(packet.sender);
        self.client_key = packet.payload.clone();
        self.hub
            .register(id.clone(), packet.payload.clone(), self.writer.clone())
            .await;
        self.client_id = Some(id.clone());
        info!(target: "connection", client = %id, "client registered");

        // Everyone already connected learns the newcomer's key right away.
        self.hub.broadcast_new_key(&id, &packet.payload).await;

        let reply = SignalPacket::new(
            opcode::HOW_ARE_YOU,
            id.as_str(),
            self.hub.config.server_name.as_str(),
            self.hub.identity.armored_public_key().to_vec(),
        );
        self.send(reply).await?;
        debug!(client = %id, "greeting answered");

        self.stage = Stage::AwaitAuth;
        Ok(())
    }

    async fn handle_auth(&mut self, packet: SignalPacket) -> anyhow::Result<bool> {
        // A decrypt failure here is a handshake error and ends the
        // connection via `?`.
        let plaintext = self.hub.identity.decrypt(&packet.payload)?;

        let client = self.client_id.clone().unwrap_or_else(|| ClientId::from(""));
        if plaintext != self.hub.config.password_hash.as_bytes() {
            warn!(client = %client, "authentication failed");
            let rejection =
                SignalPacket::new(opcode::UNAUTHORIZED, client.as_str(), "", Vec::new());
            self.send(rejection).await?;
            return Ok(false);
        }

        debug!(client = %client, "client authenticated");
        let ciphertext = crypto::encrypt_to(AUTH_OK_PLAINTEXT, &self.client_key)?;
        let acknowledgement =
            SignalPacket::new(opcode::AUTH_OK, client.as_str(), "", ciphertext);
        self.send(acknowledgement).await?;

        self.stage = Stage::AwaitKeyRequest;
        Ok(true)
    }

    async fn handle_key_request(&mut self) -> anyhow::Result<()> {
        let client = self
            .client_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("key request before greeting"))?;

        self.hub
            .send_key_listing(&client, &self.client_key, &self.writer)
            .await?;
        debug!(client = %client, "key listing sent");

        self.stage = Stage::Active;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Steady state
    // -----------------------------------------------------------------------

    async fn handle_active(&mut self, packet: SignalPacket) -> anyhow::Result<bool> {
        let client = self.client_id.clone().unwrap_or_else(|| ClientId::from(""));

        match packet.command.as_str() {
            opcode::START_CALL => {
                let call = String::from_utf8_lossy(&packet.payload).into_owned();
                self.hub.add_to_call(&call, packet.sender.as_str()).await;
                debug!(client = %client, call_id = %call, "call opened");

                let reply =
                    SignalPacket::new(opcode::CALL_ACTIVE, client.as_str(), "", Vec::new());
                self.send(reply).await?;
            }

            opcode::JOIN_CALL => {
                let call = String::from_utf8_lossy(&packet.payload).into_owned();
                match self.hub.join_call(&call, packet.sender.as_str()).await {
                    None => {
                        debug!(client = %client, call_id = %call, "call not found");
                        let reply = SignalPacket::new(
                            opcode::CALL_NOT_FOUND,
                            client.as_str(),
                            "",
                            Vec::new(),
                        );
                        self.send(reply).await?;
                    }
                    Some(existing) => {
                        debug!(
                            client = %client,
                            call_id = %call,
                            participants = existing.len(),
                            "joined call"
                        );
                        // The participants already in the call open links
                        // toward the joiner, so each gets told about it.
                        self.hub
                            .announce_joiner(&existing, packet.sender.as_str())
                            .await;
                    }
                }
            }

            opcode::OFFER | opcode::ANSWER | opcode::ICE => {
                self.hub
                    .relay_signal(
                        &packet.command,
                        &packet.destination,
                        &packet.sender,
                        packet.payload,
                    )
                    .await;
            }

            opcode::HANG_UP => {
                let call = String::from_utf8_lossy(&packet.payload).into_owned();
                self.hub.leave_call(&call, packet.sender.as_str()).await;
                debug!(client = %client, call_id = %call, "hang-up handled");
            }

            opcode::UNREGISTER => {
                debug!(client = %client, "clean unregister requested");
                return Ok(false);
            }

            other => warn!(client = %client, command = other, "unknown operation command"),
        }
        Ok(true)
    }

    async fn send(&self, packet: SignalPacket) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        wire::send_signal(&mut *writer, &packet).await?;
        Ok(())
    }

    /// Deregister and notify peers. Runs for every exit path; a no-op for
    /// connections that never finished the greeting.
    async fn cleanup(&mut self) {
        if let Some(id) = self.client_id.take() {
            self.hub.unregister(&id).await;
        }
    }
}
