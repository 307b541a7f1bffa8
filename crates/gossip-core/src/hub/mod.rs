//! Hub engine: accepts client connections, walks each one through the
//! join handshake, keeps the canonical registry of connected clients and
//! their public keys, tracks call rosters, and relays signaling and
//! encrypted traffic.

mod connection;
mod relay;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::crypto::Identity;
use crate::domain::id::ClientId;
use crate::wire::SharedWriter;

/// Hub-side configuration, assembled by the executable.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Argon2 hash the clients must prove knowledge of.
    pub password_hash: String,
    /// Name reported to clients during the handshake.
    pub server_name: String,
    /// Channels announced after key sync.
    pub channels: Vec<String>,
}

/// One registered client: its write handle and its armored public key.
/// Keeping both in one entry makes "registered iff key known" structural.
#[derive(Clone)]
pub struct ClientHandle {
    pub writer: SharedWriter,
    pub public_key: Vec<u8>,
}

/// Shared hub state. The registry and the call rosters have independent
/// locks; neither is ever taken while holding the other.
pub struct Hub {
    pub(super) config: HubConfig,
    pub(super) identity: Identity,
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    calls: RwLock<HashMap<String, Vec<String>>>,
}

impl Hub {
    pub fn new(config: HubConfig) -> anyhow::Result<Self> {
        let identity = Identity::generate()?;
        Ok(Self {
            config,
            identity,
            clients: RwLock::new(HashMap::new()),
            calls: RwLock::new(HashMap::new()),
        })
    }

    /// Accept loop: one task per connection. Accept errors are logged and
    /// the loop keeps going.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let hub = Arc::clone(&self);
                    tokio::spawn(connection::handle(hub, stream, addr));
                }
                Err(error) => warn!(%error, "failed to accept connection"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    pub(super) async fn register(&self, id: ClientId, public_key: Vec<u8>, writer: SharedWriter) {
        let mut clients = self.clients.write().await;
        clients.insert(id, ClientHandle { writer, public_key });
    }

    /// Remove a departed client and tell everyone else to drop its key.
    pub(super) async fn unregister(&self, id: &ClientId) {
        let remaining: Vec<(ClientId, ClientHandle)> = {
            let mut clients = self.clients.write().await;
            if clients.remove(id.as_str()).is_none() {
                return;
            }
            clients
                .iter()
                .map(|(cid, handle)| (cid.clone(), handle.clone()))
                .collect()
        };
        info!(target: "connection", client = %id, "client unregistered");
        self.broadcast_departure(id, &remaining).await;
    }

    pub(super) async fn client_handle(&self, id: &str) -> Option<ClientHandle> {
        self.clients.read().await.get(id).cloned()
    }

    /// Snapshot of every registered client.
    pub(super) async fn all_clients(&self) -> Vec<(ClientId, ClientHandle)> {
        self.clients
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    /// Snapshot of every registered client except `excluded`.
    pub(super) async fn other_clients(&self, excluded: &str) -> Vec<(ClientId, ClientHandle)> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|(id, _)| id.as_str() != excluded)
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    /// Currently registered client ids (diagnostics and tests).
    pub async fn connected_clients(&self) -> Vec<ClientId> {
        self.clients.read().await.keys().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Call rosters
    // -----------------------------------------------------------------------

    /// `start_call`: create or extend the roster.
    pub(super) async fn add_to_call(&self, call: &str, client: &str) {
        let mut calls = self.calls.write().await;
        calls
            .entry(call.to_owned())
            .or_default()
            .push(client.to_owned());
    }

    /// `gmp`: append the joiner and return the participants that were
    /// already there, or `None` when the call does not exist.
    pub(super) async fn join_call(&self, call: &str, client: &str) -> Option<Vec<String>> {
        let mut calls = self.calls.write().await;
        let roster = calls.get_mut(call)?;
        let existing: Vec<String> = roster
            .iter()
            .filter(|participant| participant.as_str() != client)
            .cloned()
            .collect();
        roster.push(client.to_owned());
        Some(existing)
    }

    /// `hang-up`: drop the sender; the roster disappears when empty.
    /// Disconnected clients are not pruned here, only an explicit hang-up
    /// shrinks a roster.
    pub(super) async fn leave_call(&self, call: &str, client: &str) {
        let mut calls = self.calls.write().await;
        if let Some(roster) = calls.get_mut(call) {
            roster.retain(|participant| participant != client);
            if roster.is_empty() {
                calls.remove(call);
            }
        }
    }

    /// Current roster of one call (diagnostics and tests).
    pub async fn call_roster(&self, call: &str) -> Option<Vec<String>> {
        self.calls.read().await.get(call).cloned()
    }
}
