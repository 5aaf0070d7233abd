//! # cairn-wire: Wire protocol for `Cairn`
//!
//! This crate defines everything that crosses a block-worker boundary:
//!
//! - [`Payload`] — serialized abstract states, one namespace per component
//! - [`Message`] / [`MessageBody`] — the closed protocol message taxonomy
//! - [`Envelope`] — the JSON object actually transmitted
//! - [`Frame`] — length-delimited framing for the non-blocking transport
//!
//! ## Envelope shape
//!
//! One JSON object per message:
//!
//! ```json
//! {
//!   "type": "ForwardAnalysisRequest",
//!   "uniqueBlockId": "B2",
//!   "targetNodeNumber": 10,
//!   "timestamp": "1700000000000000000",
//!   "payload": { "<component>": { "<key>": "<value>" } }
//! }
//! ```
//!
//! Per-variant structured fields (versions, error origins, task status) ride
//! in the reserved `"@protocol"` namespace of `payload`; component
//! namespaces are never touched, so a component's deserialize sees exactly
//! the fragment its serialize produced.

mod envelope;
mod error;
mod frame;
mod message;
mod payload;

pub use envelope::{Envelope, MessageKind};
pub use error::WireError;
pub use frame::{FRAME_HEADER_SIZE, Frame, MAX_FRAME_SIZE};
pub use message::{
    BackwardAnalysisContinuation, BackwardAnalysisRequest, ErrorNotice, ErrorReachedProgramEntry,
    ForwardAnalysisRequest, Message, MessageBody, TaskCompletion, TaskKind, TaskResult,
    TaskStatus, WorkerCheckpoint,
};
pub use payload::{Fragment, PROTOCOL_NAMESPACE, Payload};
