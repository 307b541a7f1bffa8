//! Call orchestration: peer establishment over the signaling relay, the
//! outbound PCM fan-out, and teardown.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crypto;
use crate::domain::id::{CallId, ClientId};
use crate::domain::packet::{opcode, SignalPacket};

use super::ports::PeerLink;
use super::session::ClientSession;

/// One other participant: the media link plus the tasks pumping it.
/// Exists iff this process intends to exchange media with the peer.
pub(super) struct PeerSession {
    pub link: Arc<dyn PeerLink>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerSession {
    fn shutdown(&mut self) {
        self.link.close();
        for task in &self.tasks {
            task.abort();
        }
        self.tasks.clear();
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl ClientSession {
    // -----------------------------------------------------------------------
    // Call entry points
    // -----------------------------------------------------------------------

    /// Start or join a call. With no call id set, a fresh 24-char id is
    /// generated and announced via `start_call`; with one set (an invite),
    /// we ask the hub for the existing participants instead.
    pub async fn start_recording(&self) -> anyhow::Result<()> {
        self.teardown_peers().await;

        let session = self
            .weak_self
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("session is shutting down"))?;

        let (call, joining) = {
            let mut state = self.state.lock().await;
            if let Some(old) = state.recorder.take() {
                old.abort();
            }
            state.recorder = Some(tokio::spawn(async move { session.pump_outbound().await }));
            state.in_call = true;

            match &state.call_id {
                Some(existing) => (existing.clone(), true),
                None => {
                    let call = CallId::random();
                    state.call_id = Some(call.clone());
                    (call, false)
                }
            }
        };

        self.events.call_starting().await;

        let command = if joining {
            opcode::JOIN_CALL
        } else {
            opcode::START_CALL
        };
        debug!(call_id = %call, joining, "entering call");
        self.send_signal_packet(SignalPacket::new(
            command,
            "",
            self.client_id.as_str(),
            call.as_str().as_bytes().to_vec(),
        ))
        .await?;
        Ok(())
    }

    /// Leave the call: tell the hub, close every peer link, clear state.
    /// The call id is kept so the call can be rejoined.
    pub async fn stop_recording(&self) -> anyhow::Result<()> {
        let call = {
            let mut state = self.state.lock().await;
            if let Some(recorder) = state.recorder.take() {
                recorder.abort();
            }
            state.in_call = false;
            state.call_id.clone()
        };

        if let Some(call) = call {
            self.send_signal_packet(SignalPacket::new(
                opcode::HANG_UP,
                "",
                self.client_id.as_str(),
                call.as_str().as_bytes().to_vec(),
            ))
            .await?;
        }

        self.teardown_peers().await;
        self.events.self_hung_up().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Signaling handlers
    // -----------------------------------------------------------------------

    /// Outbound establishment toward a newly announced participant.
    pub(super) async fn open_peer(&self, peer_id: &str) -> anyhow::Result<()> {
        let peer = ClientId::from(peer_id);
        let (link, offer) = self.connector.offer(&peer).await?;
        self.install_peer(peer.clone(), link).await;

        self.send_signal_packet(SignalPacket::new(
            opcode::OFFER,
            peer.as_str(),
            self.client_id.as_str(),
            offer,
        ))
        .await?;
        debug!(%peer, "offer sent");
        Ok(())
    }

    /// Responder side: accept an inbound offer and answer it.
    pub(super) async fn handle_offer(&self, peer_id: &str, offer: &[u8]) -> anyhow::Result<()> {
        let peer = ClientId::from(peer_id);
        let (link, answer) = self.connector.answer(&peer, offer).await?;
        self.install_peer(peer.clone(), link).await;

        self.send_signal_packet(SignalPacket::new(
            opcode::ANSWER,
            peer.as_str(),
            self.client_id.as_str(),
            answer,
        ))
        .await?;
        debug!(%peer, "answer sent");
        Ok(())
    }

    pub(super) async fn handle_answer(&self, peer_id: &str, answer: &[u8]) {
        let link = {
            let state = self.state.lock().await;
            state.peers.get(peer_id).map(|p| Arc::clone(&p.link))
        };
        match link {
            Some(link) => {
                if let Err(error) = link.apply_remote_answer(answer).await {
                    warn!(peer = %peer_id, %error, "failed to apply answer");
                }
            }
            None => warn!(peer = %peer_id, "answer for unknown peer"),
        }
    }

    pub(super) async fn handle_ice(&self, peer_id: &str, candidate: &[u8]) {
        let link = {
            let state = self.state.lock().await;
            state.peers.get(peer_id).map(|p| Arc::clone(&p.link))
        };
        match link {
            Some(link) => {
                if let Err(error) = link.add_remote_candidate(candidate).await {
                    warn!(peer = %peer_id, %error, "failed to add ice candidate");
                }
            }
            // No session yet; the candidate has nowhere to go.
            None => warn!(peer = %peer_id, "ice candidate for unknown peer"),
        }
    }

    // -----------------------------------------------------------------------
    // Peer session lifecycle
    // -----------------------------------------------------------------------

    /// Register the link and spawn its ICE and media pumps. A leftover
    /// session for the same peer is replaced.
    async fn install_peer(&self, peer: ClientId, link: Arc<dyn PeerLink>) {
        let Some(strong) = self.weak_self.upgrade() else {
            link.close();
            return;
        };

        let ice_task = {
            let session = Arc::clone(&strong);
            let link = Arc::clone(&link);
            let peer = peer.clone();
            tokio::spawn(async move { session.pump_candidates(peer, link).await })
        };
        let media_task = {
            let session = strong;
            let link = Arc::clone(&link);
            let peer = peer.clone();
            tokio::spawn(async move { session.pump_inbound(peer, link).await })
        };

        let mut state = self.state.lock().await;
        if let Some(mut old) = state.peers.insert(
            peer,
            PeerSession {
                link,
                tasks: vec![ice_task, media_task],
            },
        ) {
            old.shutdown();
        }
    }

    /// Forward locally gathered ICE candidates to the peer via the hub.
    async fn pump_candidates(&self, peer: ClientId, link: Arc<dyn PeerLink>) {
        while let Some(candidate) = link.next_local_candidate().await {
            let packet = SignalPacket::new(
                opcode::ICE,
                peer.as_str(),
                self.client_id.as_str(),
                candidate,
            );
            if let Err(error) = self.send_signal_packet(packet).await {
                warn!(%peer, %error, "failed to send ice candidate");
                return;
            }
        }
    }

    /// Deliver inbound data-channel messages into the playback path until
    /// the channel closes.
    async fn pump_inbound(self: Arc<Self>, peer: ClientId, link: Arc<dyn PeerLink>) {
        if link.opened().await {
            info!(%peer, "peer link established");
            self.events.peer_connected(&peer).await;

            while let Some(bytes) = link.recv_media().await {
                self.on_encrypted_media(&peer, &bytes).await;
            }
        }

        self.events.peer_hung_up(&peer).await;
        self.remove_peer(&peer).await;
    }

    /// Network ingress for one peer's media. Decrypted exactly once, then
    /// buffered for playback unless deafened.
    pub async fn on_encrypted_media(&self, peer: &ClientId, ciphertext: &[u8]) {
        if self.deafened.load(Ordering::Relaxed) {
            return;
        }
        match self.identity.decrypt(ciphertext) {
            Ok(pcm) => self.sink.push(peer, pcm.into()).await,
            Err(error) => warn!(%peer, %error, "undecryptable media chunk"),
        }
    }

    /// Recorder loop: every captured chunk is encrypted per live peer and
    /// sent over its data channel. Muted and deafened both silence it.
    async fn pump_outbound(self: Arc<Self>) {
        while let Some(chunk) = self.source.next_chunk().await {
            if self.muted.load(Ordering::Relaxed) || self.deafened.load(Ordering::Relaxed) {
                continue;
            }
            self.fan_out_pcm(&chunk).await;
        }
        debug!("audio source closed, recorder loop ending");
    }

    async fn fan_out_pcm(&self, chunk: &[u8]) {
        // Snapshot under the lock, encrypt and send outside it.
        let targets: Vec<(ClientId, Arc<dyn PeerLink>, Option<Vec<u8>>)> = {
            let state = self.state.lock().await;
            state
                .peers
                .iter()
                .map(|(id, peer)| {
                    (
                        id.clone(),
                        Arc::clone(&peer.link),
                        state.peer_keys.get(id.as_str()).cloned(),
                    )
                })
                .collect()
        };

        for (peer, link, key) in targets {
            if !link.is_open() {
                continue;
            }
            match key {
                // The only key-state-driven teardown: a peer whose key we
                // no longer hold cannot receive media.
                None => {
                    warn!(%peer, "no public key for peer, closing channel");
                    link.close();
                    self.remove_peer(&peer).await;
                }
                Some(key) => match crypto::encrypt_to(chunk, &key) {
                    Ok(ciphertext) => {
                        if let Err(error) = link.send_media(ciphertext.into()).await {
                            warn!(%peer, %error, "failed to send media");
                        }
                    }
                    Err(error) => warn!(%peer, %error, "failed to encrypt media"),
                },
            }
        }
    }

    pub(super) async fn remove_peer(&self, peer: &ClientId) {
        let mut state = self.state.lock().await;
        if let Some(mut session) = state.peers.remove(peer.as_str()) {
            session.shutdown();
        }
    }

    pub(super) async fn teardown_peers(&self) {
        let mut state = self.state.lock().await;
        for (_, mut session) in state.peers.drain() {
            session.shutdown();
        }
    }

    /// Stop the recorder and every peer link; used on disconnect and when
    /// the reader loop exits.
    pub(super) async fn stop_media_tasks(&self) {
        {
            let mut state = self.state.lock().await;
            if let Some(recorder) = state.recorder.take() {
                recorder.abort();
            }
            for (_, mut session) in state.peers.drain() {
                session.shutdown();
            }
            state.in_call = false;
        }
    }
}
