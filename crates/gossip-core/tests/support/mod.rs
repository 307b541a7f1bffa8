//! Shared helpers for the integration suites: an ephemeral-port hub and a
//! hand-driven wire-level client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, LinesCodec};

use gossip_core::crypto::{self, Identity};
use gossip_core::domain::id::ClientId;
use gossip_core::domain::packet::{
    opcode, DataPacket, SignalPacket, StreamPacket, AUTH_OK_PLAINTEXT,
};
use gossip_core::hub::{Hub, HubConfig};
use gossip_core::wire::{self, Frame, SharedWriter};

pub const TEST_PASSWORD: &str = "secret";
pub const TEST_HUB_NAME: &str = "Test Gossip Hub";

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Start a hub on an ephemeral local port.
pub async fn start_hub() -> (Arc<Hub>, SocketAddr) {
    start_hub_with_channels(vec!["general".to_owned()]).await
}

pub async fn start_hub_with_channels(channels: Vec<String>) -> (Arc<Hub>, SocketAddr) {
    let hub = Arc::new(
        Hub::new(HubConfig {
            password_hash: crypto::hash_password(TEST_PASSWORD).unwrap(),
            server_name: TEST_HUB_NAME.to_owned(),
            channels,
        })
        .unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::clone(&hub).run(listener));
    (hub, addr)
}

/// A wire-level client driven step by step, so each frame the hub emits
/// can be asserted on.
pub struct TestClient {
    pub id: ClientId,
    pub identity: Identity,
    pub hub_key: Vec<u8>,
    pub server_name: String,
    /// (peer id, armored key) pairs learned via `ckp`.
    pub peer_keys: Vec<(String, Vec<u8>)>,
    pub channels: Vec<String>,
    frames: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: SharedWriter,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            id: ClientId::random(),
            identity: Identity::generate().unwrap(),
            hub_key: Vec::new(),
            server_name: String::new(),
            peer_keys: Vec::new(),
            channels: Vec::new(),
            frames: wire::framed_lines(read_half),
            writer: wire::shared_writer(write_half),
        }
    }

    /// Connect and run the whole join flow: greeting, auth, key sync.
    pub async fn join(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        client.handshake().await;
        client.sync_keys().await;
        client
    }

    // -- sending ------------------------------------------------------------

    pub async fn send_signal(&self, packet: SignalPacket) {
        let mut writer = self.writer.lock().await;
        wire::send_signal(&mut *writer, &packet).await.unwrap();
    }

    pub async fn send_data(&self, packet: &DataPacket) {
        let mut writer = self.writer.lock().await;
        wire::send_data(&mut *writer, packet, &self.hub_key)
            .await
            .unwrap();
    }

    pub async fn send_stream(&self, packet: &StreamPacket) {
        let mut writer = self.writer.lock().await;
        wire::send_stream(&mut *writer, packet, &self.hub_key)
            .await
            .unwrap();
    }

    // -- receiving ----------------------------------------------------------

    pub async fn next_frame(&mut self) -> Option<Frame> {
        let item = tokio::time::timeout(FRAME_TIMEOUT, self.frames.next())
            .await
            .expect("timed out waiting for a frame")?;
        let line = item.expect("read error");
        Some(wire::parse_frame(&line).expect("unparseable frame"))
    }

    pub async fn next_signal(&mut self) -> SignalPacket {
        match self.next_frame().await.expect("connection closed") {
            Frame::Signal(packet) => packet,
            other => panic!("expected a signal frame, got {other:?}"),
        }
    }

    /// Next data frame, decrypted with this client's identity.
    pub async fn next_data(&mut self) -> DataPacket {
        match self.next_frame().await.expect("connection closed") {
            Frame::Data(ciphertext) => {
                let json = self.identity.decrypt(&ciphertext).unwrap();
                DataPacket::from_json(std::str::from_utf8(&json).unwrap()).unwrap()
            }
            other => panic!("expected a data frame, got {other:?}"),
        }
    }

    /// Next stream frame, decrypted with this client's identity.
    pub async fn next_stream(&mut self) -> StreamPacket {
        match self.next_frame().await.expect("connection closed") {
            Frame::Stream(ciphertext) => {
                let json = self.identity.decrypt(&ciphertext).unwrap();
                StreamPacket::from_json(std::str::from_utf8(&json).unwrap()).unwrap()
            }
            other => panic!("expected a stream frame, got {other:?}"),
        }
    }

    pub async fn expect_closed(&mut self) {
        assert!(
            self.next_frame().await.is_none(),
            "expected the hub to close the connection"
        );
    }

    // -- join flow ----------------------------------------------------------

    pub async fn greet(&self) {
        self.send_signal(SignalPacket::new(
            opcode::GREETING,
            "",
            self.id.as_str(),
            self.identity.armored_public_key().to_vec(),
        ))
        .await;
    }

    /// Greet and present the given password; stops right after sending
    /// the auth packet.
    pub async fn authenticate(&mut self, password: &str) {
        self.greet().await;

        let how_are_you = self.next_signal().await;
        assert_eq!(how_are_you.command, opcode::HOW_ARE_YOU);
        self.hub_key = how_are_you.payload.clone();
        self.server_name = how_are_you.sender.clone();

        let hash = crypto::hash_password(password).unwrap();
        let ciphertext = crypto::encrypt_to(hash.as_bytes(), &self.hub_key).unwrap();
        self.send_signal(SignalPacket::new(
            opcode::AUTH,
            "",
            self.id.as_str(),
            ciphertext,
        ))
        .await;
    }

    /// Full successful handshake through the auth acknowledgement.
    pub async fn handshake(&mut self) {
        self.authenticate(TEST_PASSWORD).await;

        let acknowledgement = self.next_signal().await;
        assert_eq!(acknowledgement.command, opcode::AUTH_OK);
        assert_eq!(
            self.identity.decrypt(&acknowledgement.payload).unwrap(),
            AUTH_OK_PLAINTEXT
        );
    }

    /// Request the key listing and absorb it until `eok`.
    pub async fn sync_keys(&mut self) {
        self.send_signal(SignalPacket::new(
            opcode::KEY_REQUEST,
            "",
            self.id.as_str(),
            Vec::new(),
        ))
        .await;

        loop {
            let packet = self.next_signal().await;
            match packet.command.as_str() {
                opcode::CLIENT_KEY => {
                    let key = self.identity.decrypt(&packet.payload).unwrap();
                    self.peer_keys.push((packet.sender, key));
                }
                opcode::CHANNEL_UPDATE => {
                    let name = self.identity.decrypt(&packet.payload).unwrap();
                    self.channels.push(String::from_utf8(name).unwrap());
                }
                opcode::END_OF_KEYS => break,
                other => panic!("unexpected {other} during key sync"),
            }
        }
    }

    /// Absorb one broadcast `ckp` (a newcomer's key) into the key list.
    pub async fn absorb_key_broadcast(&mut self) -> String {
        let packet = self.next_signal().await;
        assert_eq!(packet.command, opcode::CLIENT_KEY);
        let key = self.identity.decrypt(&packet.payload).unwrap();
        let sender = packet.sender.clone();
        self.peer_keys.push((packet.sender, key));
        sender
    }

    /// Every key this client knows, its own included; chat gets encrypted
    /// to this set.
    pub fn all_keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self.peer_keys.iter().map(|(_, k)| k.clone()).collect();
        keys.push(self.identity.armored_public_key().to_vec());
        keys
    }
}
