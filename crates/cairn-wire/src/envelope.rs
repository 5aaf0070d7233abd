//! The JSON wire envelope.
//!
//! Every transmitted message is one JSON object with five fields: `type`,
//! `uniqueBlockId`, `targetNodeNumber`, `timestamp`, and `payload`. The
//! payload maps component namespaces to string key/value fragments; the
//! reserved [`PROTOCOL_NAMESPACE`] fragment carries the per-variant
//! structured fields so component namespaces stay untouched.

use bytes::BytesMut;
use cairn_types::{BlockId, BlockVersion, ErrorOrigin, ErrorPath, Location, Timestamp};
use serde::{Deserialize, Serialize};

use crate::message::{
    BackwardAnalysisContinuation, BackwardAnalysisRequest, ErrorNotice, ErrorReachedProgramEntry,
    ForwardAnalysisRequest, Message, MessageBody, TaskCompletion, TaskKind, TaskResult,
    TaskStatus, WorkerCheckpoint,
};
use crate::{Fragment, Frame, PROTOCOL_NAMESPACE, Payload, WireError};

// ============================================================================
// Envelope
// ============================================================================

/// Wire-level message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    ForwardAnalysisRequest,
    BackwardAnalysisRequest,
    #[serde(rename = "BackwardAnalysisContinuationRequest")]
    BackwardAnalysisContinuation,
    #[serde(rename = "TaskCompletionMessage")]
    TaskCompletion,
    #[serde(rename = "ErrorReachedProgramEntryMessage")]
    ErrorReachedProgramEntry,
    #[serde(rename = "ErrorMessage")]
    Error,
}

/// The JSON object transmitted for every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// The block the message is about (or the failing participant for
    /// `ErrorMessage`).
    #[serde(rename = "uniqueBlockId")]
    pub block: String,

    /// The CFA node the message targets.
    #[serde(rename = "targetNodeNumber")]
    pub target_node: u64,

    /// Construction time, epoch nanoseconds as a decimal string.
    pub timestamp: Timestamp,

    /// Component payload fragments plus the `@protocol` fragment.
    pub payload: Payload,
}

impl Envelope {
    /// Serializes the envelope to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an envelope from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Message {
    /// Serializes this message as envelope JSON (one object, no framing).
    ///
    /// Used by the blocking transport, which writes one message per
    /// connection and lets end-of-stream delimit it.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        self.to_envelope()?.to_json()
    }

    /// Parses a message from envelope JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        Self::from_envelope(Envelope::from_json(bytes)?)
    }

    /// Appends this message as a length-delimited frame.
    ///
    /// Used by the non-blocking transport.
    pub fn encode_frame(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        Frame::new(self.to_json()?).encode(buf)
    }

    /// Attempts to decode one framed message from the front of the buffer.
    ///
    /// Returns `Ok(None)` until a complete frame has accumulated.
    pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Self>, WireError> {
        match Frame::decode(buf)? {
            Some(frame) => Ok(Some(Self::from_json(frame.body())?)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Protocol fragment keys
// ============================================================================

const KEY_EXPECTED_VERSION: &str = "expectedVersion";
const KEY_PREDECESSOR: &str = "predecessor";
const KEY_HAS_PRECONDITION: &str = "hasPrecondition";
const KEY_START_LOCATION: &str = "startLocation";
const KEY_ORIGIN_BLOCK: &str = "errorOriginBlock";
const KEY_ORIGIN_LOCATION: &str = "errorOriginLocation";
const KEY_SOURCE_BLOCK: &str = "sourceBlock";
const KEY_HAS_CONDITION: &str = "hasCondition";
const KEY_TASK_KIND: &str = "taskKind";
const KEY_TASK_STATUS: &str = "taskStatus";
const KEY_BLOCK_VERSION: &str = "blockVersion";
const KEY_RESULT: &str = "result";
const KEY_ERROR_PATH: &str = "errorPath";
const KEY_ORIGIN: &str = "origin";
const KEY_CAUSE: &str = "cause";

/// Builder for the `@protocol` fragment.
#[derive(Default)]
struct Proto(Fragment);

impl Proto {
    fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    fn set_flag(self, key: &str, value: bool) -> Self {
        self.set(key, value)
    }

    fn set_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    fn into_payload(self, mut payload: Payload) -> Payload {
        payload.insert_fragment(PROTOCOL_NAMESPACE, self.0);
        payload
    }
}

/// Reader for the `@protocol` fragment.
struct ProtoReader(Fragment);

impl ProtoReader {
    fn get(&self, field: &'static str) -> Result<&str, WireError> {
        self.0
            .get(field)
            .map(String::as_str)
            .ok_or(WireError::MissingField { field })
    }

    fn get_opt(&self, field: &'static str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    fn get_u64(&self, field: &'static str) -> Result<u64, WireError> {
        let raw = self.get(field)?;
        raw.parse().map_err(|_| WireError::InvalidField {
            field,
            value: raw.to_string(),
        })
    }

    fn get_flag(&self, field: &'static str) -> Result<bool, WireError> {
        let raw = self.get(field)?;
        raw.parse().map_err(|_| WireError::InvalidField {
            field,
            value: raw.to_string(),
        })
    }

    fn get_origin(&self) -> Result<ErrorOrigin, WireError> {
        Ok(ErrorOrigin::new(
            BlockId::from(self.get(KEY_ORIGIN_BLOCK)?),
            Location::new(self.get_u64(KEY_ORIGIN_LOCATION)?),
        ))
    }
}

fn origin_fields(proto: Proto, origin: &ErrorOrigin) -> Proto {
    proto
        .set(KEY_ORIGIN_BLOCK, origin.block())
        .set(KEY_ORIGIN_LOCATION, origin.location().as_u64())
}

// ============================================================================
// Message → Envelope
// ============================================================================

impl Message {
    /// Converts this message into its wire envelope.
    pub fn to_envelope(&self) -> Result<Envelope, WireError> {
        let (kind, block, target_node, payload) = match &self.body {
            MessageBody::ForwardAnalysisRequest(m) => {
                let proto = Proto::default()
                    .set(KEY_EXPECTED_VERSION, m.expected_version.as_u64())
                    .set_opt(KEY_PREDECESSOR, m.predecessor.as_ref())
                    .set_flag(KEY_HAS_PRECONDITION, m.precondition.is_some());
                (
                    MessageKind::ForwardAnalysisRequest,
                    m.target.to_string(),
                    m.target_entry.as_u64(),
                    proto.into_payload(m.precondition.clone().unwrap_or_default()),
                )
            }

            MessageBody::BackwardAnalysisRequest(m) => {
                let proto = origin_fields(Proto::default(), &m.error_origin)
                    .set(KEY_START_LOCATION, m.start_location.as_u64())
                    .set_opt(KEY_SOURCE_BLOCK, m.source.as_ref())
                    .set_flag(KEY_HAS_CONDITION, m.condition.is_some());
                (
                    MessageKind::BackwardAnalysisRequest,
                    m.block.to_string(),
                    m.start_location.as_u64(),
                    proto.into_payload(m.condition.clone().unwrap_or_default()),
                )
            }

            MessageBody::BackwardAnalysisContinuation(m) => {
                let proto = origin_fields(Proto::default(), &m.error_origin);
                (
                    MessageKind::BackwardAnalysisContinuation,
                    m.block.to_string(),
                    m.error_origin.location().as_u64(),
                    proto.into_payload(m.checkpoint.data.clone()),
                )
            }

            MessageBody::TaskCompletion(m) => {
                let mut proto = Proto::default()
                    .set(
                        KEY_TASK_KIND,
                        match m.kind {
                            TaskKind::Forward => "forward",
                            TaskKind::Backward => "backward",
                        },
                    )
                    .set(
                        KEY_TASK_STATUS,
                        match m.status {
                            TaskStatus::Completed => "completed",
                            TaskStatus::Aborted => "aborted",
                        },
                    )
                    .set(KEY_BLOCK_VERSION, m.version.as_u64());

                let payload = match &m.result {
                    TaskResult::ForwardSummary { summary } => {
                        proto = proto.set(KEY_RESULT, "summary");
                        summary.clone()
                    }
                    TaskResult::ForwardViolation { error_path } => {
                        proto = proto.set(KEY_RESULT, "violation").set(
                            KEY_ERROR_PATH,
                            serde_json::to_string(error_path)
                                .map_err(|source| WireError::Json { source })?,
                        );
                        Payload::new()
                    }
                    TaskResult::BackwardCondition { origin, condition } => {
                        proto = origin_fields(proto.set(KEY_RESULT, "condition"), origin);
                        condition.clone()
                    }
                    TaskResult::BackwardInfeasible { origin } => {
                        proto = origin_fields(proto.set(KEY_RESULT, "infeasible"), origin);
                        Payload::new()
                    }
                    TaskResult::BackwardSuspended { origin, checkpoint } => {
                        proto = origin_fields(proto.set(KEY_RESULT, "suspended"), origin);
                        checkpoint.data.clone()
                    }
                    TaskResult::None => {
                        proto = proto.set(KEY_RESULT, "none");
                        Payload::new()
                    }
                };

                (
                    MessageKind::TaskCompletion,
                    m.block.to_string(),
                    m.block_entry.as_u64(),
                    proto.into_payload(payload),
                )
            }

            MessageBody::ErrorReachedProgramEntry(m) => {
                let proto = origin_fields(Proto::default(), &m.origin)
                    .set_flag(KEY_HAS_CONDITION, m.condition.is_some());
                (
                    MessageKind::ErrorReachedProgramEntry,
                    m.origin.block().to_string(),
                    m.origin.location().as_u64(),
                    proto.into_payload(m.condition.clone().unwrap_or_default()),
                )
            }

            MessageBody::Error(m) => {
                let proto = Proto::default()
                    .set(KEY_ORIGIN, &m.origin)
                    .set(KEY_CAUSE, &m.cause);
                (
                    MessageKind::Error,
                    m.origin.clone(),
                    0,
                    proto.into_payload(Payload::new()),
                )
            }
        };

        Ok(Envelope {
            kind,
            block,
            target_node,
            timestamp: self.timestamp,
            payload,
        })
    }

    /// Reconstructs a typed message from its wire envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, WireError> {
        let Envelope {
            kind,
            block,
            target_node,
            timestamp,
            mut payload,
        } = envelope;

        let proto = ProtoReader(payload.remove_fragment(PROTOCOL_NAMESPACE).ok_or(
            WireError::MissingField {
                field: PROTOCOL_NAMESPACE,
            },
        )?);

        let body = match kind {
            MessageKind::ForwardAnalysisRequest => {
                let precondition = proto.get_flag(KEY_HAS_PRECONDITION)?.then_some(payload);
                MessageBody::ForwardAnalysisRequest(ForwardAnalysisRequest {
                    predecessor: proto.get_opt(KEY_PREDECESSOR).map(BlockId::from),
                    expected_version: BlockVersion::new(proto.get_u64(KEY_EXPECTED_VERSION)?),
                    target: BlockId::from(block),
                    target_entry: Location::new(target_node),
                    precondition,
                })
            }

            MessageKind::BackwardAnalysisRequest => {
                let condition = proto.get_flag(KEY_HAS_CONDITION)?.then_some(payload);
                MessageBody::BackwardAnalysisRequest(BackwardAnalysisRequest {
                    block: BlockId::from(block),
                    error_origin: proto.get_origin()?,
                    start_location: Location::new(proto.get_u64(KEY_START_LOCATION)?),
                    source: proto.get_opt(KEY_SOURCE_BLOCK).map(BlockId::from),
                    condition,
                })
            }

            MessageKind::BackwardAnalysisContinuation => {
                MessageBody::BackwardAnalysisContinuation(BackwardAnalysisContinuation {
                    block: BlockId::from(block),
                    error_origin: proto.get_origin()?,
                    checkpoint: WorkerCheckpoint::new(payload),
                })
            }

            MessageKind::TaskCompletion => {
                let task_kind = match proto.get(KEY_TASK_KIND)? {
                    "forward" => TaskKind::Forward,
                    "backward" => TaskKind::Backward,
                    other => {
                        return Err(WireError::InvalidField {
                            field: KEY_TASK_KIND,
                            value: other.to_string(),
                        });
                    }
                };
                let status = match proto.get(KEY_TASK_STATUS)? {
                    "completed" => TaskStatus::Completed,
                    "aborted" => TaskStatus::Aborted,
                    other => {
                        return Err(WireError::InvalidField {
                            field: KEY_TASK_STATUS,
                            value: other.to_string(),
                        });
                    }
                };
                let result = match proto.get(KEY_RESULT)? {
                    "summary" => TaskResult::ForwardSummary { summary: payload },
                    "violation" => {
                        let raw = proto.get(KEY_ERROR_PATH)?;
                        let error_path: ErrorPath = serde_json::from_str(raw)
                            .map_err(|source| WireError::Json { source })?;
                        TaskResult::ForwardViolation { error_path }
                    }
                    "condition" => TaskResult::BackwardCondition {
                        origin: proto.get_origin()?,
                        condition: payload,
                    },
                    "infeasible" => TaskResult::BackwardInfeasible {
                        origin: proto.get_origin()?,
                    },
                    "suspended" => TaskResult::BackwardSuspended {
                        origin: proto.get_origin()?,
                        checkpoint: WorkerCheckpoint::new(payload),
                    },
                    "none" => TaskResult::None,
                    other => {
                        return Err(WireError::InvalidField {
                            field: KEY_RESULT,
                            value: other.to_string(),
                        });
                    }
                };
                MessageBody::TaskCompletion(TaskCompletion {
                    block: BlockId::from(block),
                    block_entry: Location::new(target_node),
                    kind: task_kind,
                    version: BlockVersion::new(proto.get_u64(KEY_BLOCK_VERSION)?),
                    status,
                    result,
                })
            }

            MessageKind::ErrorReachedProgramEntry => {
                let condition = proto.get_flag(KEY_HAS_CONDITION)?.then_some(payload);
                MessageBody::ErrorReachedProgramEntry(ErrorReachedProgramEntry {
                    origin: proto.get_origin()?,
                    condition,
                })
            }

            MessageKind::Error => MessageBody::Error(ErrorNotice {
                origin: proto.get(KEY_ORIGIN)?.to_string(),
                cause: proto.get(KEY_CAUSE)?.to_string(),
            }),
        };

        Ok(Message::with_timestamp(timestamp, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::{CfaEdge, EdgeKind};

    fn fragment(pairs: &[(&str, &str)]) -> Fragment {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn sample_payload() -> Payload {
        let mut p = Payload::new();
        p.insert_fragment("callstack", fragment(&[("frames", "main/f")]));
        p.insert_fragment("values", fragment(&[("x", "3")]));
        p
    }

    #[test]
    fn forward_request_round_trips() {
        let msg = Message::new(MessageBody::ForwardAnalysisRequest(ForwardAnalysisRequest {
            predecessor: Some(BlockId::from("B0")),
            expected_version: BlockVersion::new(4),
            target: BlockId::from("B1"),
            target_entry: Location::new(10),
            precondition: Some(sample_payload()),
        }));

        let back = Message::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn seed_request_keeps_no_precondition() {
        let msg = Message::new(MessageBody::ForwardAnalysisRequest(ForwardAnalysisRequest {
            predecessor: None,
            expected_version: BlockVersion::ZERO,
            target: BlockId::from("B0"),
            target_entry: Location::new(0),
            precondition: None,
        }));

        let back = Message::from_json(&msg.to_json().unwrap()).unwrap();
        match back.body {
            MessageBody::ForwardAnalysisRequest(m) => {
                assert!(m.predecessor.is_none());
                assert!(m.precondition.is_none());
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn violation_completion_carries_error_path() {
        let path = ErrorPath::new(vec![CfaEdge::new(
            Location::new(10),
            Location::new(11),
            EdgeKind::Assume,
            "x == 0",
        )]);
        let msg = Message::new(MessageBody::TaskCompletion(TaskCompletion {
            block: BlockId::from("B1"),
            block_entry: Location::new(10),
            kind: TaskKind::Forward,
            version: BlockVersion::new(1),
            status: TaskStatus::Completed,
            result: TaskResult::ForwardViolation {
                error_path: path.clone(),
            },
        }));

        let back = Message::from_json(&msg.to_json().unwrap()).unwrap();
        match back.body {
            MessageBody::TaskCompletion(m) => match m.result {
                TaskResult::ForwardViolation { error_path } => assert_eq!(error_path, path),
                other => panic!("unexpected result: {other:?}"),
            },
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn envelope_uses_spec_field_names() {
        let msg = Message::new(MessageBody::Error(ErrorNotice {
            origin: "worker-B1".into(),
            cause: "analysis panicked".into(),
        }));

        let json: serde_json::Value =
            serde_json::from_slice(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "ErrorMessage");
        assert_eq!(json["uniqueBlockId"], "worker-B1");
        assert_eq!(json["targetNodeNumber"], 0);
        assert!(json["timestamp"].is_string());
        assert!(json["payload"].is_object());
    }

    #[test]
    fn component_namespaces_survive_untouched() {
        let msg = Message::new(MessageBody::BackwardAnalysisRequest(BackwardAnalysisRequest {
            block: BlockId::from("B1"),
            error_origin: ErrorOrigin::new(BlockId::from("B2"), Location::new(30)),
            start_location: Location::new(20),
            source: Some(BlockId::from("B2")),
            condition: Some(sample_payload()),
        }));

        let envelope = msg.to_envelope().unwrap();
        // Component fragments sit beside @protocol, byte for byte.
        assert_eq!(
            envelope.payload.fragment("values"),
            Some(&fragment(&[("x", "3")]))
        );
        assert!(envelope.payload.fragment(PROTOCOL_NAMESPACE).is_some());

        let back = Message::from_envelope(envelope).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn missing_protocol_fragment_is_rejected() {
        let envelope = Envelope {
            kind: MessageKind::Error,
            block: "x".into(),
            target_node: 0,
            timestamp: Timestamp::ZERO,
            payload: Payload::new(),
        };
        assert!(matches!(
            Message::from_envelope(envelope),
            Err(WireError::MissingField { .. })
        ));
    }

    #[test]
    fn completion_with_empty_error_path_is_rejected() {
        let mut payload = Payload::new();
        payload.insert_fragment(
            PROTOCOL_NAMESPACE,
            fragment(&[
                ("taskKind", "forward"),
                ("taskStatus", "completed"),
                ("blockVersion", "1"),
                ("result", "violation"),
                ("errorPath", r#"{"edges":[]}"#),
            ]),
        );
        let envelope = Envelope {
            kind: MessageKind::TaskCompletion,
            block: "B1".into(),
            target_node: 10,
            timestamp: Timestamp::ZERO,
            payload,
        };
        // A peer cannot smuggle in a path the local constructor would refuse.
        assert!(matches!(
            Message::from_envelope(envelope),
            Err(WireError::Json { .. })
        ));
    }

    #[test]
    fn invalid_version_string_is_rejected() {
        let mut payload = Payload::new();
        payload.insert_fragment(
            PROTOCOL_NAMESPACE,
            fragment(&[
                ("expectedVersion", "not-a-number"),
                ("hasPrecondition", "false"),
            ]),
        );
        let envelope = Envelope {
            kind: MessageKind::ForwardAnalysisRequest,
            block: "B0".into(),
            target_node: 0,
            timestamp: Timestamp::ZERO,
            payload,
        };
        assert!(matches!(
            Message::from_envelope(envelope),
            Err(WireError::InvalidField { .. })
        ));
    }
}
