//! Whole-system exercise: two client sessions against a live hub, a call
//! established through the signaling relay, and media flowing over the
//! in-process loopback links.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;

use gossip_client::adapters::audio::{MicBuffer, PlaybackBuffer};
use gossip_client::adapters::loopback::{LoopbackConnector, LoopbackNetwork};
use gossip_core::client::ports::{AppEvents, ChatMessage};
use gossip_core::client::{ClientConfig, ClientSession};
use gossip_core::crypto;
use gossip_core::domain::id::ClientId;
use gossip_core::hub::{Hub, HubConfig};

const PASSWORD: &str = "secret";

#[derive(Default)]
struct EventLog {
    entries: StdMutex<Vec<String>>,
}

impl EventLog {
    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    async fn wait_for(&self, needle: &str) {
        for _ in 0..400 {
            if self
                .entries
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.contains(needle))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "event {needle:?} never seen; log: {:?}",
            self.entries.lock().unwrap()
        );
    }
}

#[async_trait]
impl AppEvents for EventLog {
    async fn server_name(&self, name: &str) {
        self.push(format!("server-name:{name}"));
    }
    async fn client_id(&self, id: &ClientId) {
        self.push(format!("client-id:{id}"));
    }
    async fn channel_update(&self, channel: &str) {
        self.push(format!("channel:{channel}"));
    }
    async fn handshake_complete(&self) {
        self.push("handshake-complete".to_owned());
    }
    async fn message_received(&self, message: ChatMessage) {
        self.push(format!("message:{}:{}", message.sender_uid, message.body));
    }
    async fn call_starting(&self) {
        self.push("call-starting".to_owned());
    }
    async fn call_active(&self, call_id: &str) {
        self.push(format!("call-active:{call_id}"));
    }
    async fn call_not_found(&self, call_id: &str) {
        self.push(format!("call-not-found:{call_id}"));
    }
    async fn peer_connected(&self, peer: &ClientId) {
        self.push(format!("peer-connected:{peer}"));
    }
    async fn peer_hung_up(&self, peer: &ClientId) {
        self.push(format!("peer-hung-up:{peer}"));
    }
    async fn self_hung_up(&self) {
        self.push("self-hung-up".to_owned());
    }
    async fn unauthorized(&self) {
        self.push("unauthorized".to_owned());
    }
    async fn server_disconnect(&self) {
        self.push("server-disconnect".to_owned());
    }
}

struct Participant {
    session: Arc<ClientSession>,
    events: Arc<EventLog>,
    mic: Arc<MicBuffer>,
    speakers: Arc<PlaybackBuffer>,
}

async fn join_mesh(port: u16, network: &Arc<LoopbackNetwork>) -> Participant {
    let events = Arc::new(EventLog::default());
    let mic = Arc::new(MicBuffer::new());
    let speakers = Arc::new(PlaybackBuffer::new());

    let (session, reader) = ClientSession::connect(
        ClientConfig {
            host: "127.0.0.1".to_owned(),
            port,
            password_hash: crypto::hash_password(PASSWORD).unwrap(),
        },
        Arc::new(LoopbackConnector::new(Arc::clone(network))),
        events.clone(),
        mic.clone(),
        speakers.clone(),
    )
    .await
    .unwrap();
    tokio::spawn(reader.run());
    events.wait_for("handshake-complete").await;

    Participant {
        session,
        events,
        mic,
        speakers,
    }
}

async fn start_hub() -> u16 {
    let hub = Arc::new(
        Hub::new(HubConfig {
            password_hash: crypto::hash_password(PASSWORD).unwrap(),
            server_name: "Loopback Hub".to_owned(),
            channels: vec!["general".to_owned()],
        })
        .unwrap(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(hub.run(listener));
    port
}

#[tokio::test]
async fn two_clients_chat_call_and_exchange_media() {
    let port = start_hub().await;
    let network = LoopbackNetwork::new();

    let alice = join_mesh(port, &network).await;
    let bob = join_mesh(port, &network).await;

    // --- chat through the hub ---
    alice
        .session
        .send_message("hi from alice", 0, "general")
        .await
        .unwrap();
    bob.events.wait_for("hi from alice").await;
    // The sender reads its own echo too.
    alice.events.wait_for("hi from alice").await;

    // --- call setup ---
    alice.session.start_recording().await.unwrap();
    alice.events.wait_for("call-active").await;
    let call_id = alice.session.call_id().await.unwrap();

    bob.session.update_call_id(&call_id).await;
    bob.session.start_recording().await.unwrap();

    let alice_id = alice.session.client_id().clone();
    let bob_id = bob.session.client_id().clone();
    alice
        .events
        .wait_for(&format!("peer-connected:{bob_id}"))
        .await;
    bob.events
        .wait_for(&format!("peer-connected:{alice_id}"))
        .await;

    // --- media both ways ---
    alice.mic.push_chunk(&b"alice-pcm"[..]);
    wait_for_chunk(&bob.speakers, &alice_id, b"alice-pcm").await;

    bob.mic.push_chunk(&b"bob-pcm"[..]);
    wait_for_chunk(&alice.speakers, &bob_id, b"bob-pcm").await;

    // --- hang-up tears down the other side's link ---
    bob.session.stop_recording().await.unwrap();
    bob.events.wait_for("self-hung-up").await;
    alice
        .events
        .wait_for(&format!("peer-hung-up:{bob_id}"))
        .await;
}

async fn wait_for_chunk(speakers: &PlaybackBuffer, peer: &ClientId, expected: &[u8]) {
    for _ in 0..400 {
        if let Some(chunk) = speakers.take_chunk(peer) {
            assert_eq!(chunk.as_ref(), expected);
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no media chunk arrived from {peer}");
}
