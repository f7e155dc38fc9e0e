//! Remote transport contract.
//!
//! The concrete wire transport is an external collaborator. This
//! module defines the seams it plugs into: the [`Transport`] and
//! [`Serializer`] traits, the [`WireEnvelope`] exchanged with them, the
//! length-prefixed framing used on the wire, and the inbound dispatch
//! into the local registry and ask table.
//!
//! Remote asks resolve through the same ask registry as local asks:
//! the correlation id rides the wire envelope and the transport is
//! responsible only for delivery.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use slog::warn;
use uuid::Uuid;

use crate::{
    actor::{ActorAddress, ActorError, ActorPath, AskError, DeadLetter},
    kernel::ask::ReplyPayload,
    system::ActorSystem,
    AnyMessage, AskRequest,
};

/// Length prefix size: 4-byte big-endian length, then opaque bytes.
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireKind {
    /// Fire-and-forget message
    Tell,
    /// Request carrying a correlation id; a reply is expected
    Ask,
    /// Successful reply to an `Ask`
    AskReply,
    /// The remote handler failed while the ask was pending
    AskFailure,
}

/// Serialized payload plus the tag a serializer uses to pick the
/// concrete type back out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireBytes {
    pub type_tag: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct WireEnvelope {
    pub kind: WireKind,
    pub target: ActorAddress,
    pub sender: Option<ActorAddress>,
    pub correlation_id: Option<Uuid>,
    pub payload: WireBytes,
}

/// A pluggable point-to-point transport. Fire-and-forget sends;
/// ordering is FIFO per connection, unspecified across connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self, system: &ActorSystem) -> Result<(), RemoteError>;

    async fn send(&self, envelope: WireEnvelope) -> Result<(), RemoteError>;

    async fn stop(&self);
}

/// Value <-> bytes. Implementations must preserve `ActorAddress`
/// structure under round-trip.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &(dyn Any + Send)) -> Result<WireBytes, RemoteError>;

    fn deserialize(&self, bytes: &WireBytes) -> Result<AnyMessage, RemoteError>;
}

/// The transport and serializer pair installed on a system.
#[derive(Clone)]
pub struct RemoteHandle {
    pub transport: Arc<dyn Transport>,
    pub serializer: Arc<dyn Serializer>,
}

impl RemoteHandle {
    pub fn new(transport: Arc<dyn Transport>, serializer: Arc<dyn Serializer>) -> Self {
        RemoteHandle {
            transport,
            serializer,
        }
    }

    /// Ships an ask resolution back to the asking node.
    pub(crate) async fn send_reply(
        &self,
        sys: &ActorSystem,
        origin: ActorAddress,
        correlation_id: Uuid,
        result: Result<ReplyPayload, AskError>,
    ) {
        let envelope = match result {
            Ok(payload) => match self.serializer.serialize(payload.as_ref()) {
                Ok(payload) => WireEnvelope {
                    kind: WireKind::AskReply,
                    target: origin,
                    sender: None,
                    correlation_id: Some(correlation_id),
                    payload,
                },
                Err(err) => {
                    warn!(sys.log(), "Failed to serialize ask reply: {}", err);
                    return;
                }
            },
            Err(err) => WireEnvelope {
                kind: WireKind::AskFailure,
                target: origin,
                sender: None,
                correlation_id: Some(correlation_id),
                payload: WireBytes {
                    type_tag: "error".to_string(),
                    bytes: err.to_string().into_bytes(),
                },
            },
        };

        if let Err(err) = self.transport.send(envelope).await {
            // upstream is unaffected; retries are the reliable-delivery
            // layer's concern
            warn!(sys.log(), "Remote send failed: {}", err);
        }
    }
}

/// Delivers an inbound wire envelope into this system: tells and asks
/// resolve their target path in the registry, replies resolve the ask
/// table. Unknown targets are dead-lettered with a warning.
pub async fn route_inbound(sys: &ActorSystem, envelope: WireEnvelope) -> Result<(), RemoteError> {
    let remote = sys
        .remote()
        .ok_or_else(|| RemoteError::new("no transport configured"))?;

    match envelope.kind {
        WireKind::Tell | WireKind::Ask => {
            let path: ActorPath = envelope.target.path.clone();
            let target = match sys.provider().lookup(&path) {
                Some(target) => target,
                None => {
                    warn!(sys.log(), "Inbound envelope for unknown actor: {}", path);
                    sys.publish_dead_letter(DeadLetter {
                        msg: format!("remote {:?}", envelope.payload.type_tag),
                        sender: None,
                        recipient: path,
                    })
                    .await;
                    return Err(RemoteError::new("actor not found"));
                }
            };

            let mut msg = remote.serializer.deserialize(&envelope.payload)?;
            let ask = match (envelope.kind, envelope.correlation_id) {
                (WireKind::Ask, Some(id)) => Some(AskRequest {
                    id,
                    origin: envelope.sender.clone(),
                }),
                _ => None,
            };

            target
                .cell
                .send_any_msg(&mut msg, None, ask)
                .await
                .map_err(|_| RemoteError::new("message rejected"))
        }
        WireKind::AskReply => {
            let id = envelope
                .correlation_id
                .ok_or_else(|| RemoteError::new("reply without correlation id"))?;
            let mut msg = remote.serializer.deserialize(&envelope.payload)?;
            match msg.msg.take() {
                Some(payload) => {
                    sys.asks().complete(id, Ok(payload));
                    Ok(())
                }
                None => Err(RemoteError::new("empty reply payload")),
            }
        }
        WireKind::AskFailure => {
            let id = envelope
                .correlation_id
                .ok_or_else(|| RemoteError::new("reply without correlation id"))?;
            let reason = String::from_utf8_lossy(&envelope.payload.bytes).into_owned();
            sys.asks()
                .complete(id, Err(AskError::Failed(ActorError::new(reason))));
            Ok(())
        }
    }
}

/// Prefixes `payload` with its 4-byte big-endian length.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental decoder for length-prefixed frames arriving in
/// arbitrary chunks on a connection.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame's payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        if self.buf.len() < FRAME_HEADER_LEN + len {
            return None;
        }

        let frame = self.buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec();
        self.buf.drain(..FRAME_HEADER_LEN + len);
        Some(frame)
    }
}

pub struct RemoteError {
    pub reason: String,
}

impl RemoteError {
    pub fn new(reason: impl Into<String>) -> Self {
        RemoteError {
            reason: reason.into(),
        }
    }
}

impl Error for RemoteError {}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Remote transport failed. Cause: {}", self.reason)
    }
}

impl fmt::Debug for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
