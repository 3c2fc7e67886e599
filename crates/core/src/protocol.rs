//! Wire format shared by the client sync engine and the live-session
//! authority (§6.1). Kept in `keyboardia-core` so neither crate has to
//! depend on the other to agree on message shapes.

use serde::{Deserialize, Serialize};

use crate::mutation::{Mutation, RejectReason};
use crate::session::Session;

/// A message sent from a client to the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello { player_id: String, session_id: String, last_known_server_seq: Option<u64> },
    Heartbeat,
    /// A synced mutation, tagged with the client's own monotonic `seq`.
    /// `client_message` names (§4.2) are carried in `mutation`'s own serde
    /// tag, so the envelope just needs the sequence number.
    Mutate { seq: u64, mutation: Mutation },
}

/// A message sent from the authority to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Identity { player_id: String, color: String, name: String },
    Snapshot { server_seq: u64, state: Box<Session> },
    Broadcast {
        server_seq: u64,
        originator_seq: Option<u64>,
        originator_player_id: String,
        mutation: Mutation,
    },
    Rejected { seq: u64, reason: RejectReason },
    /// Forward-compatibility catch-all: unknown message types are ignored
    /// rather than failing deserialization (§7 "Unknown message type").
    #[serde(other)]
    Unknown,
}
