//! Inbound application message.

use bytes::Bytes;
use uuid::Uuid;

/// A message delivered to a processor.
///
/// In duplex mode `id` is the sender's correlation id; pass it to
/// `Connection::reply` to answer a request. Plain messages and one-way
/// duplex sends carry the nil id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub payload: Bytes,
}

impl Message {
    pub fn new(id: Uuid, payload: Bytes) -> Self {
        Self { id, payload }
    }

    /// Whether the sender is waiting for a reply under this id.
    pub fn expects_reply(&self) -> bool {
        !self.id.is_nil()
    }
}
