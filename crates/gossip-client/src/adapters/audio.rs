//! Buffered audio endpoints.
//!
//! Device callbacks run on native audio threads; both adapters therefore
//! hold their locks only long enough to move one chunk. Peak
//! normalization is playback-device business and happens past this
//! boundary.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use gossip_core::client::ports::{AudioSink, AudioSource};
use gossip_core::domain::id::ClientId;

// ---------------------------------------------------------------------------
// Capture side
// ---------------------------------------------------------------------------

/// Hand-off queue between the recorder callback and the session's
/// outbound media pump.
pub struct MicBuffer {
    sender: StdMutex<Option<mpsc::UnboundedSender<Bytes>>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MicBuffer {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: StdMutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
        }
    }

    /// Called from the capture callback with one PCM chunk.
    pub fn push_chunk(&self, chunk: impl Into<Bytes>) {
        if let Ok(guard) = self.sender.lock() {
            if let Some(sender) = guard.as_ref() {
                let _ = sender.send(chunk.into());
            }
        }
    }

    /// Stop the source; the session's recorder loop ends after draining.
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }
}

impl Default for MicBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for MicBuffer {
    async fn next_chunk(&self) -> Option<Bytes> {
        self.receiver.lock().await.recv().await
    }
}

// ---------------------------------------------------------------------------
// Playback side
// ---------------------------------------------------------------------------

/// Per-peer playout queues; the playback callback drains them chunk by
/// chunk.
pub struct PlaybackBuffer {
    queues: StdMutex<HashMap<ClientId, VecDeque<Bytes>>>,
}

impl PlaybackBuffer {
    pub fn new() -> Self {
        Self {
            queues: StdMutex::new(HashMap::new()),
        }
    }

    /// Called from the playback callback; `None` when the peer's queue is
    /// empty (play silence).
    pub fn take_chunk(&self, peer: &ClientId) -> Option<Bytes> {
        let mut queues = self.queues.lock().ok()?;
        queues.get_mut(peer.as_str())?.pop_front()
    }

    /// Drop a departed peer's queue.
    pub fn remove_peer(&self, peer: &ClientId) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.remove(peer.as_str());
        }
    }
}

impl Default for PlaybackBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for PlaybackBuffer {
    async fn push(&self, peer: &ClientId, pcm: Bytes) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(peer.clone()).or_default().push_back(pcm);
        }
    }
}
