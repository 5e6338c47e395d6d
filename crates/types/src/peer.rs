use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Region reported when a peer does not name one.
pub const DEFAULT_REGION: &str = "local";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// A peer known to the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub last_seen: DateTime<Utc>,
    /// Cached liveness verdict; only the sweep clears it.
    pub is_online: bool,
    pub reputation: i64,
    pub shared_files: usize,
    pub region: String,
}

impl Peer {
    /// Build a freshly registered peer.
    pub fn from_registration(
        id: String,
        registration: PeerRegistration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            address: registration.address,
            port: registration.port,
            last_seen: now,
            is_online: true,
            reputation: registration.reputation,
            shared_files: registration.shared_files,
            region: registration.region,
        }
    }

    /// `host:port` as other peers would dial it.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Body of `POST /peers/register`.
///
/// Fields a client may send but the directory owns (such as `id`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRegistration {
    pub address: String,
    pub port: u16,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub shared_files: usize,
    #[serde(default)]
    pub reputation: i64,
}

impl PeerRegistration {
    pub fn new<A: Into<String>>(address: A, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            region: default_region(),
            shared_files: 0,
            reputation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_defaults_and_ignores_client_id() {
        let json = r#"{"id":"peer_client","address":"10.1.1.1","port":9001}"#;
        let reg: PeerRegistration = serde_json::from_str(json).unwrap();
        assert_eq!(reg.address, "10.1.1.1");
        assert_eq!(reg.region, DEFAULT_REGION);
        assert_eq!(reg.shared_files, 0);
    }

    #[test]
    fn registration_rejects_missing_port() {
        let json = r#"{"address":"10.1.1.1"}"#;
        assert!(serde_json::from_str::<PeerRegistration>(json).is_err());
    }

    #[test]
    fn peer_from_registration_is_online() {
        let now = Utc::now();
        let mut reg = PeerRegistration::new("10.1.1.1", 9001);
        reg.shared_files = 4;
        let peer = Peer::from_registration("abc".into(), reg, now);
        assert!(peer.is_online);
        assert_eq!(peer.last_seen, now);
        assert_eq!(peer.shared_files, 4);
        assert_eq!(peer.endpoint(), "10.1.1.1:9001");
    }
}
