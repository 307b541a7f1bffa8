//! In-process implementation of the peer transport ports.
//!
//! Two sessions sharing one [`LoopbackNetwork`] can complete the full
//! offer/answer exchange and push media through paired channels. The
//! "descriptions" on the wire are opaque pairing tokens, relayed through
//! the hub exactly like real session descriptions would be.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};

use gossip_core::client::ports::{PeerConnector, PeerLink};
use gossip_core::domain::id::{random_id, ClientId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Open,
    Closed,
}

// ---------------------------------------------------------------------------
// Network (pairing registry)
// ---------------------------------------------------------------------------

/// Pairs offers with answers. Share one instance between the sessions
/// that should be able to reach each other.
pub struct LoopbackNetwork {
    pending: StdMutex<HashMap<String, PendingOffer>>,
}

struct PendingOffer {
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: StdMutex::new(HashMap::new()),
        })
    }
}

/// [`PeerConnector`] backed by a shared [`LoopbackNetwork`].
pub struct LoopbackConnector {
    network: Arc<LoopbackNetwork>,
}

impl LoopbackConnector {
    pub fn new(network: Arc<LoopbackNetwork>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn offer(&self, _peer: &ClientId) -> anyhow::Result<(Arc<dyn PeerLink>, Vec<u8>)> {
        let (to_answerer, from_offerer) = mpsc::unbounded_channel();
        let (to_offerer, from_answerer) = mpsc::unbounded_channel();

        let token = random_id(16);
        {
            let mut pending = self
                .network
                .pending
                .lock()
                .map_err(|_| anyhow::anyhow!("loopback registry poisoned"))?;
            pending.insert(
                token.clone(),
                PendingOffer {
                    outbound: to_offerer,
                    inbound: from_offerer,
                },
            );
        }

        let link = Arc::new(LoopbackLink::new(to_answerer, from_answerer));
        Ok((link, token.into_bytes()))
    }

    async fn answer(
        &self,
        _peer: &ClientId,
        offer: &[u8],
    ) -> anyhow::Result<(Arc<dyn PeerLink>, Vec<u8>)> {
        let token = std::str::from_utf8(offer)
            .map_err(|_| anyhow::anyhow!("malformed loopback offer"))?;

        let pending = {
            let mut registry = self
                .network
                .pending
                .lock()
                .map_err(|_| anyhow::anyhow!("loopback registry poisoned"))?;
            registry
                .remove(token)
                .ok_or_else(|| anyhow::anyhow!("no pending offer for token"))?
        };

        let link = Arc::new(LoopbackLink::new(pending.outbound, pending.inbound));
        link.mark_open();
        Ok((link, token.as_bytes().to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// One end of a paired channel. Opens on answer; closes on either side.
pub struct LoopbackLink {
    outbound: StdMutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    state_tx: watch::Sender<LinkState>,
    state_rx: watch::Receiver<LinkState>,
}

impl LoopbackLink {
    fn new(
        outbound: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        Self {
            outbound: StdMutex::new(Some(outbound)),
            inbound: Mutex::new(inbound),
            state_tx,
            state_rx,
        }
    }

    fn mark_open(&self) {
        self.state_tx.send_replace(LinkState::Open);
    }

    async fn wait_closed(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow() == LinkState::Closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl PeerLink for LoopbackLink {
    async fn apply_remote_answer(&self, _answer: &[u8]) -> anyhow::Result<()> {
        self.mark_open();
        Ok(())
    }

    async fn add_remote_candidate(&self, _candidate: &[u8]) -> anyhow::Result<()> {
        // Pairing happens at answer time; candidates carry no information
        // here.
        Ok(())
    }

    async fn next_local_candidate(&self) -> Option<Vec<u8>> {
        None
    }

    async fn opened(&self) -> bool {
        let mut rx = self.state_rx.clone();
        loop {
            match *rx.borrow() {
                LinkState::Open => return true,
                LinkState::Closed => return false,
                LinkState::Connecting => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    async fn recv_media(&self) -> Option<Bytes> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            chunk = inbound.recv() => chunk,
            _ = self.wait_closed() => None,
        }
    }

    async fn send_media(&self, data: Bytes) -> anyhow::Result<()> {
        let sender = {
            let guard = self
                .outbound
                .lock()
                .map_err(|_| anyhow::anyhow!("loopback link poisoned"))?;
            guard.clone()
        };
        match sender {
            Some(sender) => sender
                .send(data)
                .map_err(|_| anyhow::anyhow!("peer end gone")),
            None => anyhow::bail!("data channel closed"),
        }
    }

    fn is_open(&self) -> bool {
        *self.state_rx.borrow() == LinkState::Open
    }

    fn close(&self) {
        self.state_tx.send_replace(LinkState::Closed);
        if let Ok(mut guard) = self.outbound.lock() {
            guard.take();
        }
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offer_answer_pairs_two_links() {
        let network = LoopbackNetwork::new();
        let alice = LoopbackConnector::new(Arc::clone(&network));
        let bob = LoopbackConnector::new(network);

        let (a_link, offer) = alice.offer(&ClientId::from("bob")).await.unwrap();
        assert!(!a_link.is_open());

        let (b_link, answer) = bob.answer(&ClientId::from("alice"), &offer).await.unwrap();
        assert!(b_link.is_open());

        a_link.apply_remote_answer(&answer).await.unwrap();
        assert!(a_link.is_open());
        assert!(a_link.opened().await);

        a_link.send_media(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(b_link.recv_media().await.unwrap().as_ref(), b"ping");

        b_link.send_media(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(a_link.recv_media().await.unwrap().as_ref(), b"pong");
    }

    #[tokio::test]
    async fn close_ends_the_peer_stream() {
        let network = LoopbackNetwork::new();
        let connector = LoopbackConnector::new(network);

        let (a_link, offer) = connector.offer(&ClientId::from("b")).await.unwrap();
        let (b_link, answer) = connector.answer(&ClientId::from("a"), &offer).await.unwrap();
        a_link.apply_remote_answer(&answer).await.unwrap();

        a_link.close();
        assert!(!a_link.is_open());
        assert!(b_link.recv_media().await.is_none());
        assert!(a_link.send_media(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn answer_with_unknown_token_fails() {
        let network = LoopbackNetwork::new();
        let connector = LoopbackConnector::new(network);
        assert!(connector
            .answer(&ClientId::from("a"), b"bogus-token-0000")
            .await
            .is_err());
    }
}
