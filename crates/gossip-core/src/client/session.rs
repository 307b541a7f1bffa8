//! Client session: connection bootstrap, the background reader that
//! mirrors the hub's state machine, and the chat path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::crypto::{self, Identity};
use crate::domain::id::{CallId, ClientId};
use crate::domain::packet::{opcode, DataPacket, SignalPacket, AUTH_OK_PLAINTEXT};
use crate::wire::{self, Frame, SharedWriter};

use super::calls::PeerSession;
use super::ports::{AppEvents, AudioSink, AudioSource, ChatMessage, PeerConnector};

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Argon2 hash of the shared password, see [`crypto::hash_password`].
    pub password_hash: String,
}

/// Mutable session state. One mutex covers the key replica and the peer
/// sessions so call teardown and key removal can never interleave.
pub(super) struct SessionState {
    pub hub_key: Vec<u8>,
    pub server_name: String,
    pub peer_keys: HashMap<ClientId, Vec<u8>>,
    pub channels: Vec<String>,
    pub call_id: Option<CallId>,
    pub in_call: bool,
    pub peers: HashMap<ClientId, PeerSession>,
    pub recorder: Option<JoinHandle<()>>,
}

/// One client's view of the mesh: identity, hub connection, peer-key
/// replica, and active call state.
pub struct ClientSession {
    /// Handle to ourselves for spawning pump tasks; set at construction.
    pub(super) weak_self: Weak<ClientSession>,
    pub(super) client_id: ClientId,
    pub(super) identity: Identity,
    password_hash: String,
    pub(super) writer: SharedWriter,
    pub(super) state: Mutex<SessionState>,
    pub(super) muted: AtomicBool,
    pub(super) deafened: AtomicBool,
    pub(super) connector: Arc<dyn PeerConnector>,
    pub(super) events: Arc<dyn AppEvents>,
    pub(super) source: Arc<dyn AudioSource>,
    pub(super) sink: Arc<dyn AudioSink>,
}

/// Owns the read half; drives the session until the hub goes away.
pub struct SessionReader {
    session: Arc<ClientSession>,
    frames: FramedRead<OwnedReadHalf, LinesCodec>,
}

impl ClientSession {
    /// Connect to the hub, send the greeting, and hand back the session
    /// plus the reader to spawn.
    pub async fn connect(
        config: ClientConfig,
        connector: Arc<dyn PeerConnector>,
        events: Arc<dyn AppEvents>,
        source: Arc<dyn AudioSource>,
        sink: Arc<dyn AudioSink>,
    ) -> anyhow::Result<(Arc<Self>, SessionReader)> {
        let identity = Identity::generate()?;
        let client_id = ClientId::random();

        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("connect to {}:{}", config.host, config.port))?;
        let (read_half, write_half) = stream.into_split();

        let session = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            client_id,
            identity,
            password_hash: config.password_hash,
            writer: wire::shared_writer(write_half),
            state: Mutex::new(SessionState {
                hub_key: Vec::new(),
                server_name: String::new(),
                peer_keys: HashMap::new(),
                channels: Vec::new(),
                call_id: None,
                in_call: false,
                peers: HashMap::new(),
                recorder: None,
            }),
            muted: AtomicBool::new(false),
            deafened: AtomicBool::new(false),
            connector,
            events,
            source,
            sink,
        });

        let greeting = SignalPacket::new(
            opcode::GREETING,
            "",
            session.client_id.as_str(),
            session.identity.armored_public_key().to_vec(),
        );
        session.send_signal_packet(greeting).await?;

        let frames = wire::framed_lines(read_half);
        let reader = SessionReader {
            session: Arc::clone(&session),
            frames,
        };
        Ok((session, reader))
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn is_deafened(&self) -> bool {
        self.deafened.load(Ordering::Relaxed)
    }

    pub fn toggle_mute(&self) {
        self.muted.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn toggle_deafen(&self) {
        self.deafened.fetch_xor(true, Ordering::Relaxed);
    }

    /// Adopt a call id picked elsewhere (an invite); the next
    /// [`Self::start_recording`] joins it instead of creating a call.
    pub async fn update_call_id(&self, call_id: &str) {
        let mut state = self.state.lock().await;
        state.call_id = if call_id.is_empty() {
            None
        } else {
            Some(CallId::from(call_id))
        };
    }

    /// Channels announced by the hub so far.
    pub async fn channels(&self) -> Vec<String> {
        self.state.lock().await.channels.clone()
    }

    /// Current call id, if any was started, joined, or adopted.
    pub async fn call_id(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.call_id.as_ref().map(|c| c.as_str().to_owned())
    }

    pub async fn is_in_call(&self) -> bool {
        self.state.lock().await.in_call
    }

    /// Name the hub reported during the handshake.
    pub async fn server_name(&self) -> String {
        self.state.lock().await.server_name.clone()
    }

    /// Encrypt `text` to every known peer (and ourselves, so the hub's
    /// echo stays readable) and hand it to the hub for fan-out.
    pub async fn send_message(
        &self,
        text: &str,
        expiry: i64,
        channel: &str,
    ) -> anyhow::Result<()> {
        let (recipient_keys, hub_key) = {
            let state = self.state.lock().await;
            anyhow::ensure!(!state.hub_key.is_empty(), "handshake not finished");
            let mut keys: Vec<Vec<u8>> = state.peer_keys.values().cloned().collect();
            keys.push(self.identity.armored_public_key().to_vec());
            (keys, state.hub_key.clone())
        };

        let payload = crypto::encrypt_to_many(text.as_bytes(), &recipient_keys)?;
        let uid = crypto::encrypt_to_many(self.client_id.as_str().as_bytes(), &recipient_keys)?;

        let packet = DataPacket::new(
            opcode::CHAT,
            uid,
            unix_now(),
            expiry,
            1,
            1,
            self.client_id.as_str(),
            channel,
            payload,
        );

        let mut writer = self.writer.lock().await;
        wire::send_data(&mut *writer, &packet, &hub_key).await?;
        Ok(())
    }

    /// Clean unregister: tell the hub, then close the connection.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.stop_media_tasks().await;

        let unregister =
            SignalPacket::new(opcode::UNREGISTER, "", self.client_id.as_str(), Vec::new());
        self.send_signal_packet(unregister).await.ok();

        let mut writer = self.writer.lock().await;
        writer.shutdown().await.ok();
        Ok(())
    }

    pub(super) async fn send_signal_packet(&self, packet: SignalPacket) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        wire::send_signal(&mut *writer, &packet).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    /// Handle one signal packet. Returns `false` when the session must
    /// stop (unauthorized).
    async fn handle_signal(&self, packet: SignalPacket) -> bool {
        match packet.command.as_str() {
            opcode::HOW_ARE_YOU => self.handle_how_are_you(packet).await,
            opcode::AUTH_OK => self.handle_auth_ok(packet).await,
            opcode::CLIENT_KEY => self.handle_client_key(packet).await,
            opcode::CHANNEL_UPDATE => self.handle_channel_update(packet).await,
            opcode::END_OF_KEYS => {
                info!("key sync finished, session active");
                self.events.handshake_complete().await;
            }
            opcode::CALL_ACTIVE => {
                let call_id = {
                    let mut state = self.state.lock().await;
                    state.in_call = true;
                    state.call_id.clone()
                };
                let call_id = call_id.map(|c| c.as_str().to_owned()).unwrap_or_default();
                self.events.call_active(&call_id).await;
            }
            opcode::PARTICIPANT => {
                // A joiner announced itself; we open the link toward it.
                let joiner = packet.destination.clone();
                if let Err(error) = self.open_peer(&joiner).await {
                    warn!(peer = %joiner, %error, "failed to open peer link");
                }
            }
            opcode::OFFER => {
                if let Err(error) = self.handle_offer(&packet.sender, &packet.payload).await {
                    warn!(peer = %packet.sender, %error, "failed to answer offer");
                }
            }
            opcode::ANSWER => self.handle_answer(&packet.sender, &packet.payload).await,
            opcode::ICE => self.handle_ice(&packet.sender, &packet.payload).await,
            opcode::CALL_NOT_FOUND => {
                let abandoned = {
                    let mut state = self.state.lock().await;
                    state.in_call = false;
                    state.call_id.take()
                };
                let call_id = abandoned.map(|c| c.as_str().to_owned()).unwrap_or_default();
                self.events.call_not_found(&call_id).await;
            }
            opcode::UNAUTHORIZED => {
                warn!("hub rejected the password");
                self.events.unauthorized().await;
                let mut writer = self.writer.lock().await;
                writer.shutdown().await.ok();
                return false;
            }
            opcode::REMOVE_KEY => {
                debug!(peer = %packet.sender, "dropping departed peer's key");
                let mut state = self.state.lock().await;
                state.peer_keys.remove(packet.sender.as_str());
            }
            other => warn!(command = other, "unknown operation command"),
        }
        true
    }

    async fn handle_how_are_you(&self, packet: SignalPacket) {
        {
            let mut state = self.state.lock().await;
            state.hub_key = packet.payload.clone();
            state.server_name = packet.sender.clone();
        }
        debug!("hub public key stored");
        self.events.server_name(&packet.sender).await;
        self.events.client_id(&self.client_id).await;

        let ciphertext = match crypto::encrypt_to(self.password_hash.as_bytes(), &packet.payload) {
            Ok(ct) => ct,
            Err(error) => {
                warn!(%error, "cannot encrypt password hash to hub key");
                return;
            }
        };
        let auth = SignalPacket::new(opcode::AUTH, "", self.client_id.as_str(), ciphertext);
        if let Err(error) = self.send_signal_packet(auth).await {
            warn!(%error, "failed to send auth packet");
        }
    }

    async fn handle_auth_ok(&self, packet: SignalPacket) {
        match self.identity.decrypt(&packet.payload) {
            Ok(plaintext) if plaintext == AUTH_OK_PLAINTEXT => {
                info!("securely connected to hub");
            }
            Ok(_) => {
                warn!("unexpected auth acknowledgement payload");
                return;
            }
            Err(error) => {
                warn!(%error, "cannot decrypt auth acknowledgement");
                return;
            }
        }

        let key_request =
            SignalPacket::new(opcode::KEY_REQUEST, "", self.client_id.as_str(), Vec::new());
        if let Err(error) = self.send_signal_packet(key_request).await {
            warn!(%error, "failed to request peer keys");
        }
    }

    async fn handle_client_key(&self, packet: SignalPacket) {
        match self.identity.decrypt(&packet.payload) {
            Ok(key) => {
                debug!(peer = %packet.sender, "stored peer public key");
                let mut state = self.state.lock().await;
                state.peer_keys.insert(ClientId(packet.sender), key);
            }
            Err(error) => warn!(peer = %packet.sender, %error, "cannot decrypt peer key"),
        }
    }

    async fn handle_channel_update(&self, packet: SignalPacket) {
        let name = match self.identity.decrypt(&packet.payload) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(error) => {
                warn!(%error, "cannot decrypt channel name");
                return;
            }
        };
        {
            let mut state = self.state.lock().await;
            if !state.channels.contains(&name) {
                state.channels.push(name.clone());
            }
        }
        self.events.channel_update(&name).await;
    }

    /// Inbound `1` frame: decrypt with our identity, then dispatch.
    async fn handle_data(&self, ciphertext: &[u8]) {
        let json = match self.identity.decrypt(ciphertext) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "undecryptable data frame");
                return;
            }
        };
        let packet = match std::str::from_utf8(&json)
            .map_err(anyhow::Error::from)
            .and_then(|s| DataPacket::from_json(s).map_err(Into::into))
        {
            Ok(packet) => packet,
            Err(error) => {
                warn!(%error, "malformed data packet");
                return;
            }
        };

        match packet.command.as_str() {
            opcode::CHAT => self.handle_chat(packet).await,
            other => debug!(command = other, "ignoring data packet"),
        }
    }

    async fn handle_chat(&self, packet: DataPacket) {
        let body = match self.identity.decrypt(&packet.payload) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(error) => {
                warn!(sender = %packet.sender, %error, "cannot decrypt chat payload");
                return;
            }
        };
        let sender_uid = match self.identity.decrypt(&packet.sender_uid) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(error) => {
                warn!(sender = %packet.sender, %error, "cannot decrypt chat uid");
                return;
            }
        };

        debug!(sender = %packet.sender, channel = %packet.destination, "chat received");
        self.events
            .message_received(ChatMessage {
                channel: packet.destination,
                sender: packet.sender,
                sender_uid,
                body,
                sent_at: packet.timestamp,
                expires_at: packet.expiration,
            })
            .await;
    }
}

impl SessionReader {
    /// Read frames until EOF, error, or an explicit stop. Peer links and
    /// media tasks are torn down on the way out.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut disconnected = true;

        while let Some(item) = self.frames.next().await {
            let line = match item {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("oversized frame from hub, dropping");
                    continue;
                }
                Err(LinesCodecError::Io(error)) => {
                    warn!(%error, "hub connection failed");
                    break;
                }
            };

            match wire::parse_frame(&line) {
                Ok(Frame::Signal(packet)) => {
                    if !self.session.handle_signal(packet).await {
                        // Deliberate local close (unauthorized), not a
                        // hub-side drop.
                        disconnected = false;
                        break;
                    }
                }
                Ok(Frame::Data(ciphertext)) => self.session.handle_data(&ciphertext).await,
                Ok(Frame::Stream(_)) => {
                    // Parsed for symmetry; nothing consumes streams yet.
                    debug!("stream frame ignored");
                }
                Err(error) => warn!(%error, "dropping bad frame"),
            }
        }

        self.session.stop_media_tasks().await;
        if disconnected {
            self.session.events.server_disconnect().await;
        }
        Ok(())
    }
}

pub(super) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
