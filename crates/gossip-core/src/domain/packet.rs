//! Wire packet shapes.
//!
//! Three tagged variants share a common envelope. The serialized form is
//! UTF-8 JSON with short field names (`cmd`, `dst`, `snd`, `pld`, `uid`,
//! `ts`, `exp`, `idx`, `max`, `r`); byte-valued fields travel as base64
//! strings. Pure data — framing and encryption live in [`crate::wire`].

use serde::{Deserialize, Serialize};

/// Operation commands carried in the `cmd` field.
pub mod opcode {
    // Join handshake.
    pub const GREETING: &str = "grtng";
    pub const HOW_ARE_YOU: &str = "hru";
    pub const AUTH: &str = "ighru";
    pub const AUTH_OK: &str = "ig";
    pub const KEY_REQUEST: &str = "gmk";
    pub const CLIENT_KEY: &str = "ckp";
    pub const CHANNEL_UPDATE: &str = "cup";
    pub const END_OF_KEYS: &str = "eok";

    // Call lifecycle and p2p signaling relay.
    pub const START_CALL: &str = "start_call";
    pub const CALL_ACTIVE: &str = "call_active";
    pub const JOIN_CALL: &str = "gmp";
    pub const PARTICIPANT: &str = "participent";
    pub const CALL_NOT_FOUND: &str = "c404";
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE: &str = "ice";
    pub const HANG_UP: &str = "hang-up";

    // Session teardown and errors.
    pub const REMOVE_KEY: &str = "rmk";
    pub const UNREGISTER: &str = "urgstr";
    pub const UNAUTHORIZED: &str = "401";

    // Data-plane.
    pub const CHAT: &str = "cht";
}

/// Fixed plaintext the hub returns, encrypted, on successful auth.
pub const AUTH_OK_PLAINTEXT: &[u8] = b"I'm good!";

// ---------------------------------------------------------------------------
// Signal packet
// ---------------------------------------------------------------------------

/// Control-plane packet: handshake, key distribution, call signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPacket {
    #[serde(rename = "cmd")]
    pub command: String,
    /// Intended recipient; empty when addressed to the hub itself.
    #[serde(rename = "dst")]
    pub destination: String,
    #[serde(rename = "snd")]
    pub sender: String,
    #[serde(rename = "pld", with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl SignalPacket {
    pub fn new(
        command: &str,
        destination: impl Into<String>,
        sender: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            command: command.to_owned(),
            destination: destination.into(),
            sender: sender.into(),
            payload: payload.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Data packet
// ---------------------------------------------------------------------------

/// Data-plane packet (chat). Fan-out target of `1` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPacket {
    #[serde(rename = "cmd")]
    pub command: String,
    /// Sender identity, encrypted to the same recipient set as `pld`.
    #[serde(rename = "uid", with = "base64_bytes")]
    pub sender_uid: Vec<u8>,
    /// Creation time, Unix seconds.
    #[serde(rename = "ts")]
    pub timestamp: i64,
    /// Expiry time, Unix seconds (0 = never).
    #[serde(rename = "exp")]
    pub expiration: i64,
    /// Chunk index, 1-based.
    #[serde(rename = "idx")]
    pub chunk_index: i64,
    /// Total chunk count, >= 1.
    #[serde(rename = "max")]
    pub chunk_max: i64,
    #[serde(rename = "snd")]
    pub sender: String,
    /// Channel name for chat traffic.
    #[serde(rename = "dst")]
    pub destination: String,
    #[serde(rename = "pld", with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl DataPacket {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        command: &str,
        sender_uid: Vec<u8>,
        timestamp: i64,
        expiration: i64,
        chunk_index: i64,
        chunk_max: i64,
        sender: impl Into<String>,
        destination: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            command: command.to_owned(),
            sender_uid,
            timestamp,
            expiration,
            chunk_index,
            chunk_max,
            sender: sender.into(),
            destination: destination.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Stream packet
// ---------------------------------------------------------------------------

/// Data packet with an explicit recipient list, used for selective fan-out
/// of streamed media. The embedded data fields flatten into the same JSON
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPacket {
    #[serde(flatten)]
    pub data: DataPacket,
    /// Client ids the hub should relay this packet to.
    #[serde(rename = "r")]
    pub recipients: Vec<String>,
}

impl StreamPacket {
    pub fn new(data: DataPacket, recipients: Vec<String>) -> Self {
        Self { data, recipients }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Base64 byte fields
// ---------------------------------------------------------------------------

/// Byte fields serialize as standard-alphabet base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
