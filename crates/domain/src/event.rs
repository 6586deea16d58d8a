//! Sequenced events and watermarks.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    member::MemberName,
    payload::PayloadId,
    Timestamp,
};

/// Small integer identifying a sequencer-store writer replica. Exactly one
/// writer per index is expected to actively publish at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WriterIndex(pub u16);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Deliver,
    Error,
}

/// Opaque trace-propagation context carried alongside an event; treated as
/// opaque bytes by this store (the tracing/telemetry stack that populates
/// it is out of scope here).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub ts: Timestamp,
    pub writer_index: WriterIndex,
    pub kind: EventKind,
    pub message_id: Option<String>,
    pub sender: Option<MemberName>,
    pub recipients: Option<Vec<MemberName>>,
    pub payload_id: Option<PayloadId>,
    pub signing_ts: Option<Timestamp>,
    pub error_message: Option<String>,
    pub trace_context: TraceContext,
}

impl SequencedEvent {
    /// Visibility rule: is `member` among the
    /// addressed recipients, or the sender (who always sees their own
    /// `Deliver`/`Error` acknowledgement)?
    pub fn is_addressed_to(&self, member: &MemberName) -> bool {
        if self.sender.as_ref() == Some(member) {
            return true;
        }
        match &self.recipients {
            Some(recipients) => recipients.iter().any(|r| r == member),
            // No explicit recipient list (e.g. a broadcast `Error`) — visible
            // to everyone.
            None => matches!(self.kind, EventKind::Error),
        }
    }
}

/// Per-writer `(ts, online)` pair gating visibility of that writer's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub writer_index: WriterIndex,
    pub ts: Timestamp,
    pub online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_always_sees_own_event() {
        let alice = MemberName::from("alice");
        let event = SequencedEvent {
            ts: Timestamp::from_micros(1),
            writer_index: WriterIndex(0),
            kind: EventKind::Deliver,
            message_id: Some("m1".to_string()),
            sender: Some(alice.clone()),
            recipients: Some(vec![MemberName::from("bob")]),
            payload_id: None,
            signing_ts: None,
            error_message: None,
            trace_context: TraceContext::default(),
        };
        assert!(event.is_addressed_to(&alice));
        assert!(event.is_addressed_to(&MemberName::from("bob")));
        assert!(!event.is_addressed_to(&MemberName::from("carol")));
    }
}
