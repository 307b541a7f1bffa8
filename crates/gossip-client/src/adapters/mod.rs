//! Concrete adapters behind the core's port traits: the terminal event
//! bridge, buffered audio endpoints, and the in-process loopback peer
//! transport.

pub mod audio;
pub mod events;
pub mod loopback;
