//! Process and call identifiers.

use std::borrow::Borrow;
use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a client identifier.
pub const CLIENT_ID_LEN: usize = 36;

/// Length of a call identifier.
pub const CALL_ID_LEN: usize = 24;

/// Opaque random identifier for one client process, generated once at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(random_id(CLIENT_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets `HashMap<ClientId, _>` be queried with the plain strings that
// arrive in packet fields.
impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Caller-chosen identifier for one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Generate a fresh random id (initiator side).
    pub fn random() -> Self {
        Self(random_id(CALL_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Random alphanumeric string of the given length.
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_fixed_length() {
        assert_eq!(ClientId::random().as_str().len(), CLIENT_ID_LEN);
        assert_eq!(CallId::random().as_str().len(), CALL_ID_LEN);
    }

    #[test]
    fn ids_are_alphanumeric() {
        let id = ClientId::random();
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn map_lookup_by_str() {
        use std::collections::HashMap;

        let id = ClientId::random();
        let mut map = HashMap::new();
        map.insert(id.clone(), 1u32);
        assert_eq!(map.get(id.as_str()), Some(&1));
    }
}
