//! On-the-wire message shapes, framed length-delimited on top of a stream
//! transport. The gRPC/tonic transport wrapper itself is out of scope;
//! this module only owns the message shapes and their byte-level
//! encode/decode so a transport layer can frame them.
//!
//! Storage-layer bytes stay opaque in `sequencer-store`; only these wire
//! types decode the `CompressedBatch` algorithm tag, keeping opaque
//! content bytes separate from framing-aware types.
//!
//! The wire shapes themselves are `prost`-generated from `proto/wire.proto`
//! (compiled by `build.rs`); this module exposes plain Rust structs/enums
//! for the rest of the workspace to build and pattern-match on, and
//! converts them to/from the generated `pb` types only at the
//! encode/decode boundary.

use std::io::{
    self,
    Read,
    Write,
};

use bytes::{
    Buf,
    BufMut,
    Bytes,
    BytesMut,
};
use prost::Message;

use crate::Timestamp;

/// Generated from `proto/wire.proto`.
#[allow(clippy::all)]
pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/domain.wire.rs"));
}

fn timestamp_to_proto(ts: Timestamp) -> prost_types::Timestamp {
    let micros = ts.as_micros();
    prost_types::Timestamp {
        seconds: micros.div_euclid(1_000_000),
        nanos: (micros.rem_euclid(1_000_000) * 1_000) as i32,
    }
}

fn timestamp_from_proto(ts: &prost_types::Timestamp) -> Timestamp {
    Timestamp::from_micros(ts.seconds * 1_000_000 + (ts.nanos as i64) / 1_000)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    None,
    Gzip,
}

impl From<CompressionAlgorithm> for pb::compressed_batch::Algorithm {
    fn from(a: CompressionAlgorithm) -> Self {
        match a {
            CompressionAlgorithm::None => pb::compressed_batch::Algorithm::None,
            CompressionAlgorithm::Gzip => pb::compressed_batch::Algorithm::Gzip,
        }
    }
}

impl From<pb::compressed_batch::Algorithm> for CompressionAlgorithm {
    fn from(a: pb::compressed_batch::Algorithm) -> Self {
        match a {
            pb::compressed_batch::Algorithm::None => CompressionAlgorithm::None,
            pb::compressed_batch::Algorithm::Gzip => CompressionAlgorithm::Gzip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBatch {
    pub algorithm: CompressionAlgorithm,
    pub bytes: Bytes,
}

impl From<CompressedBatch> for pb::CompressedBatch {
    fn from(b: CompressedBatch) -> Self {
        pb::CompressedBatch { algorithm: pb::compressed_batch::Algorithm::from(b.algorithm) as i32, bytes: b.bytes }
    }
}

impl TryFrom<pb::CompressedBatch> for CompressedBatch {
    type Error = anyhow::Error;

    fn try_from(b: pb::CompressedBatch) -> anyhow::Result<Self> {
        let algorithm = pb::compressed_batch::Algorithm::try_from(b.algorithm)
            .map_err(|_| anyhow::anyhow!("unrecognized CompressedBatch.algorithm tag {}", b.algorithm))?;
        Ok(CompressedBatch { algorithm: algorithm.into(), bytes: b.bytes })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientsTree {
    pub recipients: Vec<String>,
    pub children: Vec<RecipientsTree>,
}

impl RecipientsTree {
    /// Applies `f` to every envelope position in the tree without needing a
    /// generic container type — just a recursive walk over this one
    /// concrete shape.
    pub fn traverse(&self, f: &mut impl FnMut(&[String])) {
        f(&self.recipients);
        for child in &self.children {
            child.traverse(f);
        }
    }

    pub fn all_recipients(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.traverse(&mut |r| out.extend_from_slice(r));
        out
    }
}

impl From<RecipientsTree> for pb::RecipientsTree {
    fn from(t: RecipientsTree) -> Self {
        pb::RecipientsTree {
            recipients: t.recipients,
            children: t.children.into_iter().map(pb::RecipientsTree::from).collect(),
        }
    }
}

impl From<pb::RecipientsTree> for RecipientsTree {
    fn from(t: pb::RecipientsTree) -> Self {
        RecipientsTree {
            recipients: t.recipients,
            children: t.children.into_iter().map(RecipientsTree::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub content: Bytes,
    pub recipients: Vec<RecipientsTree>,
}

impl From<Envelope> for pb::Envelope {
    fn from(e: Envelope) -> Self {
        pb::Envelope { content: e.content, recipients: e.recipients.into_iter().map(pb::RecipientsTree::from).collect() }
    }
}

impl From<pb::Envelope> for Envelope {
    fn from(e: pb::Envelope) -> Self {
        Envelope { content: e.content, recipients: e.recipients.into_iter().map(RecipientsTree::from).collect() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedContent {
    pub content: Bytes,
    pub signature: Bytes,
    pub timestamp_of_signing_key: Option<Timestamp>,
}

impl From<SignedContent> for pb::SignedContent {
    fn from(c: SignedContent) -> Self {
        pb::SignedContent {
            content: c.content,
            signature: c.signature,
            timestamp_of_signing_key: c.timestamp_of_signing_key.map(timestamp_to_proto),
        }
    }
}

impl From<pb::SignedContent> for SignedContent {
    fn from(c: pb::SignedContent) -> Self {
        SignedContent {
            content: c.content,
            signature: c.signature,
            timestamp_of_signing_key: c.timestamp_of_signing_key.as_ref().map(timestamp_from_proto),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliverError {
    BatchInvalid(String),
    BatchRefused(String),
}

impl From<DeliverError> for pb::sequenced_event::DeliverError {
    fn from(e: DeliverError) -> Self {
        match e {
            DeliverError::BatchInvalid(msg) => pb::sequenced_event::DeliverError::BatchInvalid(msg),
            DeliverError::BatchRefused(msg) => pb::sequenced_event::DeliverError::BatchRefused(msg),
        }
    }
}

impl From<pb::sequenced_event::DeliverError> for DeliverError {
    fn from(e: pb::sequenced_event::DeliverError) -> Self {
        match e {
            pb::sequenced_event::DeliverError::BatchInvalid(msg) => DeliverError::BatchInvalid(msg),
            pb::sequenced_event::DeliverError::BatchRefused(msg) => DeliverError::BatchRefused(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSequencedEvent {
    pub counter: i64,
    pub timestamp: Timestamp,
    pub domain_id: String,
    pub message_id: Option<String>,
    pub batch: Option<CompressedBatch>,
    pub deliver_error: Option<DeliverError>,
}

impl From<WireSequencedEvent> for pb::SequencedEvent {
    fn from(e: WireSequencedEvent) -> Self {
        pb::SequencedEvent {
            counter: e.counter,
            timestamp: Some(timestamp_to_proto(e.timestamp)),
            domain_id: e.domain_id,
            message_id: e.message_id,
            batch: e.batch.map(pb::CompressedBatch::from),
            deliver_error: e.deliver_error.map(pb::sequenced_event::DeliverError::from),
        }
    }
}

impl TryFrom<pb::SequencedEvent> for WireSequencedEvent {
    type Error = anyhow::Error;

    fn try_from(e: pb::SequencedEvent) -> anyhow::Result<Self> {
        let timestamp = e.timestamp.as_ref().ok_or_else(|| anyhow::anyhow!("SequencedEvent missing timestamp"))?;
        let batch = e.batch.map(CompressedBatch::try_from).transpose()?;
        Ok(WireSequencedEvent {
            counter: e.counter,
            timestamp: timestamp_from_proto(timestamp),
            domain_id: e.domain_id,
            message_id: e.message_id,
            batch,
            deliver_error: e.deliver_error.map(DeliverError::from),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcsCommitmentWire {
    pub domain_id: String,
    pub sending_participant: String,
    pub counter_participant: String,
    pub from_exclusive: Timestamp,
    pub to_inclusive: Timestamp,
    pub commitment: Bytes,
}

impl From<AcsCommitmentWire> for pb::AcsCommitment {
    fn from(c: AcsCommitmentWire) -> Self {
        pb::AcsCommitment {
            domain_id: c.domain_id,
            sending_participant: c.sending_participant,
            counter_participant: c.counter_participant,
            from_exclusive: Some(timestamp_to_proto(c.from_exclusive)),
            to_inclusive: Some(timestamp_to_proto(c.to_inclusive)),
            commitment: c.commitment,
        }
    }
}

impl TryFrom<pb::AcsCommitment> for AcsCommitmentWire {
    type Error = anyhow::Error;

    fn try_from(c: pb::AcsCommitment) -> anyhow::Result<Self> {
        let from_exclusive = c.from_exclusive.as_ref().ok_or_else(|| anyhow::anyhow!("AcsCommitment missing from_exclusive"))?;
        let to_inclusive = c.to_inclusive.as_ref().ok_or_else(|| anyhow::anyhow!("AcsCommitment missing to_inclusive"))?;
        Ok(AcsCommitmentWire {
            domain_id: c.domain_id,
            sending_participant: c.sending_participant,
            counter_participant: c.counter_participant,
            from_exclusive: timestamp_from_proto(from_exclusive),
            to_inclusive: timestamp_from_proto(to_inclusive),
            commitment: c.commitment,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub client_protocol_versions: Vec<String>,
    pub minimum_protocol_version: Option<String>,
}

impl From<HandshakeRequest> for pb::HandshakeRequest {
    fn from(r: HandshakeRequest) -> Self {
        pb::HandshakeRequest {
            client_protocol_versions: r.client_protocol_versions,
            minimum_protocol_version: r.minimum_protocol_version,
        }
    }
}

impl From<pb::HandshakeRequest> for HandshakeRequest {
    fn from(r: pb::HandshakeRequest) -> Self {
        HandshakeRequest {
            client_protocol_versions: r.client_protocol_versions,
            minimum_protocol_version: r.minimum_protocol_version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResponse {
    Success { server_version: String },
    Failure { reason: String },
}

impl From<HandshakeResponse> for pb::HandshakeResponse {
    fn from(r: HandshakeResponse) -> Self {
        let result = match r {
            HandshakeResponse::Success { server_version } => pb::handshake_response::Result::ServerVersion(server_version),
            HandshakeResponse::Failure { reason } => pb::handshake_response::Result::FailureReason(reason),
        };
        pb::HandshakeResponse { result: Some(result) }
    }
}

impl TryFrom<pb::HandshakeResponse> for HandshakeResponse {
    type Error = anyhow::Error;

    fn try_from(r: pb::HandshakeResponse) -> anyhow::Result<Self> {
        match r.result {
            Some(pb::handshake_response::Result::ServerVersion(v)) => Ok(HandshakeResponse::Success { server_version: v }),
            Some(pb::handshake_response::Result::FailureReason(reason)) => Ok(HandshakeResponse::Failure { reason }),
            None => Err(anyhow::anyhow!("HandshakeResponse missing result")),
        }
    }
}

/// A length-delimited frame: `prost`'s own varint length prefix followed by
/// the protobuf-encoded message, the same convention the gRPC wire format
/// wraps in an HTTP/2 stream — we apply it directly to a byte buffer since
/// the transport itself is out of scope here.
pub fn encode_frame<T, P>(msg: T) -> anyhow::Result<Bytes>
where
    P: Message + From<T>,
{
    let proto: P = msg.into();
    let mut buf = BytesMut::with_capacity(proto.encoded_len() + 8);
    proto.encode_length_delimited(&mut buf)?;
    Ok(buf.freeze())
}

pub fn decode_frame<T, P>(bytes: &mut Bytes) -> anyhow::Result<T>
where
    P: Message + Default,
    T: TryFrom<P, Error = anyhow::Error>,
{
    anyhow::ensure!(bytes.has_remaining(), "frame truncated: missing length prefix");
    let proto = P::decode_length_delimited(&mut *bytes)?;
    T::try_from(proto)
}

/// Gzip-compresses `bytes` if `algorithm` is `Gzip`, otherwise passes through
/// unchanged.
pub fn compress(algorithm: CompressionAlgorithm, bytes: &[u8]) -> io::Result<Bytes> {
    match algorithm {
        CompressionAlgorithm::None => Ok(Bytes::copy_from_slice(bytes)),
        CompressionAlgorithm::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(bytes)?;
            Ok(Bytes::from(encoder.finish()?))
        },
    }
}

pub fn decompress(batch: &CompressedBatch) -> io::Result<Bytes> {
    match batch.algorithm {
        CompressionAlgorithm::None => Ok(batch.bytes.clone()),
        CompressionAlgorithm::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(&batch.bytes[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(Bytes::from(out))
        },
    }
}
