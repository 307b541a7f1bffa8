//! Port traits (interfaces) the client engine depends on.
//!
//! Adapters implement these; the engine never references a concrete UI
//! toolkit, audio backend, or WebRTC stack.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::domain::id::ClientId;

// ---------------------------------------------------------------------------
// Peer media transport (WebRTC seam)
// ---------------------------------------------------------------------------

/// Creates peer links. A conformant WebRTC stack implements this; the
/// engine only produces and consumes the signaling payloads.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Start an outbound link to `peer`: open the `"data"` channel and
    /// produce the offer description (opaque bytes, relayed verbatim).
    async fn offer(&self, peer: &ClientId) -> anyhow::Result<(Arc<dyn PeerLink>, Vec<u8>)>;

    /// Accept a remote offer from `peer` and produce the answer
    /// description.
    async fn answer(
        &self,
        peer: &ClientId,
        offer: &[u8],
    ) -> anyhow::Result<(Arc<dyn PeerLink>, Vec<u8>)>;
}

/// One established (or establishing) link to a single peer: its data
/// channel plus the ICE surface.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Apply the remote answer to an outbound offer.
    async fn apply_remote_answer(&self, answer: &[u8]) -> anyhow::Result<()>;

    /// Apply one remote ICE candidate.
    async fn add_remote_candidate(&self, candidate: &[u8]) -> anyhow::Result<()>;

    /// Next locally gathered ICE candidate; `None` once gathering is done
    /// or the link is closed.
    async fn next_local_candidate(&self) -> Option<Vec<u8>>;

    /// Resolves when the data channel opens; `false` if it closed first.
    async fn opened(&self) -> bool;

    /// Next inbound data-channel message; `None` when the channel closes.
    async fn recv_media(&self) -> Option<Bytes>;

    /// Send one message over the data channel.
    async fn send_media(&self, data: Bytes) -> anyhow::Result<()>;

    /// Whether the data channel is currently open.
    fn is_open(&self) -> bool;

    /// Close the link. Idempotent; pending `recv_media`/`opened` calls
    /// resolve.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// Audio boundary
// ---------------------------------------------------------------------------

/// Produces raw PCM chunks from the capture device.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Next captured chunk; `None` when the recorder shuts down.
    async fn next_chunk(&self) -> Option<Bytes>;
}

/// Accepts decrypted PCM for playout, one queue per peer. Peak
/// normalization and device handling stay on the adapter side.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn push(&self, peer: &ClientId, pcm: Bytes);
}

// ---------------------------------------------------------------------------
// App events (UI bridge)
// ---------------------------------------------------------------------------

/// A decrypted chat message, ready for display.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Channel the message was posted to.
    pub channel: String,
    /// Sender client id as claimed in the envelope.
    pub sender: String,
    /// Sender identity recovered from the encrypted `uid` field.
    pub sender_uid: String,
    pub body: String,
    /// Unix seconds.
    pub sent_at: i64,
    /// Unix seconds; 0 means no expiry.
    pub expires_at: i64,
}

/// Events surfaced to the UI layer.
#[async_trait]
pub trait AppEvents: Send + Sync {
    async fn server_name(&self, name: &str);
    async fn client_id(&self, id: &ClientId);
    async fn channel_update(&self, channel: &str);
    async fn handshake_complete(&self);
    async fn message_received(&self, message: ChatMessage);
    async fn call_starting(&self);
    async fn call_active(&self, call_id: &str);
    async fn call_not_found(&self, call_id: &str);
    async fn peer_connected(&self, peer: &ClientId);
    async fn peer_hung_up(&self, peer: &ClientId);
    async fn self_hung_up(&self);
    async fn unauthorized(&self);
    async fn server_disconnect(&self);
}
