//! gossip-client — adapters and persisted settings for the client
//! executable. The session engine itself lives in `gossip-core`.

pub mod adapters;
pub mod settings;
