//! Fan-out paths: key distribution, departure notices, signaling relay,
//! and per-recipient re-encryption of data and stream frames.
//!
//! Failure policy: a problem with one recipient (or one relayed frame)
//! logs and moves on. Only writes back to the connection that triggered a
//! handshake step propagate errors.

use tracing::{debug, warn};

use crate::crypto;
use crate::domain::id::ClientId;
use crate::domain::packet::{opcode, DataPacket, SignalPacket, StreamPacket};
use crate::wire::{self, SharedWriter};

use super::{ClientHandle, Hub};

impl Hub {
    /// Tell every already-registered client about a newcomer's key, each
    /// copy encrypted to its recipient.
    pub(super) async fn broadcast_new_key(&self, newcomer: &ClientId, key: &[u8]) {
        for (id, handle) in self.other_clients(newcomer.as_str()).await {
            let ciphertext = match crypto::encrypt_to(key, &handle.public_key) {
                Ok(ct) => ct,
                Err(error) => {
                    warn!(client = %id, %error, "cannot encrypt newcomer key");
                    continue;
                }
            };
            let packet = SignalPacket::new(
                opcode::CLIENT_KEY,
                id.as_str(),
                newcomer.as_str(),
                ciphertext,
            );
            if let Err(error) = send_to(&handle.writer, &packet).await {
                warn!(client = %id, %error, "failed to send newcomer key");
            }
        }
    }

    /// Answer a key request: every other client's key, then the channel
    /// list, then the end-of-keys marker, all encrypted to the requester.
    pub(super) async fn send_key_listing(
        &self,
        requester: &ClientId,
        requester_key: &[u8],
        writer: &SharedWriter,
    ) -> anyhow::Result<()> {
        for (id, handle) in self.other_clients(requester.as_str()).await {
            let ciphertext = match crypto::encrypt_to(&handle.public_key, requester_key) {
                Ok(ct) => ct,
                Err(error) => {
                    warn!(peer = %id, %error, "cannot encrypt peer key for requester");
                    continue;
                }
            };
            let packet = SignalPacket::new(
                opcode::CLIENT_KEY,
                requester.as_str(),
                id.as_str(),
                ciphertext,
            );
            send_to(writer, &packet).await?;
        }

        for channel in &self.config.channels {
            let ciphertext = match crypto::encrypt_to(channel.as_bytes(), requester_key) {
                Ok(ct) => ct,
                Err(error) => {
                    warn!(%channel, %error, "cannot encrypt channel name");
                    continue;
                }
            };
            let packet =
                SignalPacket::new(opcode::CHANNEL_UPDATE, requester.as_str(), "", ciphertext);
            send_to(writer, &packet).await?;
        }

        let done = SignalPacket::new(opcode::END_OF_KEYS, requester.as_str(), "", Vec::new());
        send_to(writer, &done).await?;
        Ok(())
    }

    /// Tell the existing participants of a call about a joiner; they
    /// initiate the offers.
    pub(super) async fn announce_joiner(&self, participants: &[String], joiner: &str) {
        for participant in participants {
            let Some(handle) = self.client_handle(participant).await else {
                // Stale roster entry; tolerated until an explicit hang-up.
                debug!(%participant, "skipping departed call participant");
                continue;
            };
            let packet = SignalPacket::new(
                opcode::PARTICIPANT,
                joiner,
                joiner,
                joiner.as_bytes().to_vec(),
            );
            if let Err(error) = send_to(&handle.writer, &packet).await {
                warn!(%participant, %error, "failed to announce joiner");
            }
        }
    }

    /// Opaque signaling relay: a fresh packet of the same opcode with the
    /// sender and destination rewritten, forwarded as-is.
    pub(super) async fn relay_signal(
        &self,
        command: &str,
        destination: &str,
        sender: &str,
        payload: Vec<u8>,
    ) {
        let Some(handle) = self.client_handle(destination).await else {
            warn!(%command, %destination, "relay destination not connected");
            return;
        };
        let packet = SignalPacket::new(command, destination, sender, payload);
        if let Err(error) = send_to(&handle.writer, &packet).await {
            warn!(%command, %destination, %error, "failed to relay");
        } else {
            debug!(%command, from = %sender, to = %destination, "relayed");
        }
    }

    /// Relay a `1` frame: decrypt with the hub identity, then fan out to
    /// every registered client (the sender included), re-encrypted per
    /// recipient.
    pub(super) async fn relay_data(&self, ciphertext: Vec<u8>) {
        let Some(packet) = self.open_relayed::<DataPacket>(&ciphertext) else {
            return;
        };

        for (id, handle) in self.all_clients().await {
            let mut writer = handle.writer.lock().await;
            if let Err(error) = wire::send_data(&mut *writer, &packet, &handle.public_key).await {
                warn!(client = %id, %error, "failed to forward data packet");
            }
        }
        debug!(sender = %packet.sender, "data packet forwarded to all clients");
    }

    /// Relay a `2` frame: same treatment, but only to the listed
    /// recipients that are currently registered.
    pub(super) async fn relay_stream(&self, ciphertext: Vec<u8>) {
        let Some(packet) = self.open_relayed::<StreamPacket>(&ciphertext) else {
            return;
        };

        for recipient in &packet.recipients {
            let Some(handle) = self.client_handle(recipient).await else {
                continue;
            };
            let mut writer = handle.writer.lock().await;
            if let Err(error) = wire::send_stream(&mut *writer, &packet, &handle.public_key).await
            {
                warn!(client = %recipient, %error, "failed to forward stream packet");
            }
        }
        debug!(sender = %packet.data.sender, "stream packet forwarded to listed recipients");
    }

    /// Decrypt and deserialize one relayed body. Bad frames log and are
    /// dropped; the sender's connection is unaffected.
    fn open_relayed<P: serde::de::DeserializeOwned>(&self, ciphertext: &[u8]) -> Option<P> {
        let json = match self.identity.decrypt(ciphertext) {
            Ok(json) => json,
            Err(error) => {
                debug!(%error, "undecryptable relayed frame");
                return None;
            }
        };
        match serde_json::from_slice(&json) {
            Ok(packet) => Some(packet),
            Err(error) => {
                debug!(%error, "malformed relayed frame");
                None
            }
        }
    }

    /// Broadcast the departure of `departed` to the remaining clients.
    pub(super) async fn broadcast_departure(
        &self,
        departed: &ClientId,
        remaining: &[(ClientId, ClientHandle)],
    ) {
        for (id, handle) in remaining {
            let packet = SignalPacket::new(
                opcode::REMOVE_KEY,
                id.as_str(),
                departed.as_str(),
                Vec::new(),
            );
            if let Err(error) = send_to(&handle.writer, &packet).await {
                warn!(client = %id, %error, "failed to send key removal notice");
            }
        }
    }
}

async fn send_to(writer: &SharedWriter, packet: &SignalPacket) -> Result<(), wire::WireError> {
    let mut writer = writer.lock().await;
    wire::send_signal(&mut *writer, packet).await
}
