// Wire Codec
//
// Type-tagged JSON envelopes carried in UDP datagrams. The `type` field is
// the discriminator peers dispatch on; unknown fields inside a known
// envelope are ignored so older nodes tolerate newer senders, while an
// unknown tag fails the parse and is dropped by the transceiver.

use super::NodeDescriptor;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Bootstrap request carrying the joiner's descriptor.
    Join { sender: NodeDescriptor },

    /// Bootstrap reply carrying the seed's current view.
    JoinAck {
        sender: NodeDescriptor,
        membership: Vec<NodeDescriptor>,
    },

    /// Push-pull digest exchange.
    GossipUpdate {
        sender: NodeDescriptor,
        membership: Vec<NodeDescriptor>,
    },

    /// Departure hint; carries only the leaving node's id.
    Leave { sender: String },
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Wire name of the envelope, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Join { .. } => "join",
            Envelope::JoinAck { .. } => "join_ack",
            Envelope::GossipUpdate { .. } => "gossip_update",
            Envelope::Leave { .. } => "leave",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeHealth;

    #[test]
    fn test_wire_field_names() {
        let envelope = Envelope::GossipUpdate {
            sender: NodeDescriptor::new("10.0.0.1", "9000"),
            membership: vec![NodeDescriptor::new("10.0.0.2", "9000")],
        };

        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "gossip_update");
        assert_eq!(value["sender"]["id"], "10.0.0.1:9000");
        assert_eq!(value["sender"]["status"], "alive");
        assert!(value["sender"]["last_seen"].is_string());
        assert_eq!(value["membership"][0]["ip"], "10.0.0.2");
        assert_eq!(value["membership"][0]["port"], "9000");
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let node = NodeDescriptor::new("10.0.0.1", "9000");
        let envelopes = vec![
            Envelope::Join {
                sender: node.clone(),
            },
            Envelope::JoinAck {
                sender: node.clone(),
                membership: vec![node.clone()],
            },
            Envelope::GossipUpdate {
                sender: node.clone(),
                membership: Vec::new(),
            },
            Envelope::Leave {
                sender: node.id.clone(),
            },
        ];

        for envelope in envelopes {
            let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded.kind(), envelope.kind());
        }
    }

    #[test]
    fn test_leave_sender_is_plain_id() {
        let bytes = br#"{"type":"leave","sender":"10.0.0.3:9000"}"#;

        match Envelope::from_bytes(bytes).unwrap() {
            Envelope::Leave { sender } => assert_eq!(sender, "10.0.0.3:9000"),
            other => panic!("unexpected envelope: {}", other.kind()),
        }
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let bytes = br#"{
            "type": "join",
            "sender": {
                "id": "10.0.0.3:9000",
                "ip": "10.0.0.3",
                "port": "9000",
                "status": "suspect",
                "last_seen": "2026-01-01T00:00:00Z",
                "datacenter": "eu-west"
            },
            "hops": 4
        }"#;

        match Envelope::from_bytes(bytes).unwrap() {
            Envelope::Join { sender } => {
                assert_eq!(sender.id, "10.0.0.3:9000");
                assert_eq!(sender.status, NodeHealth::Suspect);
            }
            other => panic!("unexpected envelope: {}", other.kind()),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Envelope::from_bytes(br#"{"type":"ping","sender":"x"}"#).is_err());
        assert!(Envelope::from_bytes(b"not json at all").is_err());
    }
}
