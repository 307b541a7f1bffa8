//! gossip-core — shared library for the end-to-end encrypted chat and
//! voice-call mesh.
//!
//! # Architecture
//!
//! - **domain**: identifiers and wire packet shapes (no I/O).
//! - **crypto**: OpenPGP identity façade + Argon2id password hashing.
//! - **wire**: newline-delimited framing with a one-byte type prefix.
//! - **client**: client session engine, call orchestration, port traits
//!   for the UI bridge, audio devices, and the peer media transport.
//! - **hub**: hub session engine (registry, call rosters, relay).

pub mod client;
pub mod crypto;
pub mod domain;
pub mod hub;
pub mod wire;
