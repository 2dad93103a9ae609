//! `stem.*` WebSocket wire protocol.
//!
//! Every frame in either direction is a JSON object
//! `{"type": "<event>", "data": <payload>}`; frames sent by the server also
//! carry an RFC 3339 `timestamp`. Inbound frames are decoded exactly once, at
//! the socket boundary, into [`InboundEvent`]. Downstream code matches on the
//! enum and never looks at event name strings again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::ids::{ConnectionId, RankId, WorkerId};

/// Event names used on the wire.
pub mod events {
    /// Registry snapshot pushed by the server.
    pub const WORKERS: &str = "stem.workers";
    /// Rank announcement from a worker process.
    pub const WORKER_CONNECTED: &str = "stem.worker_connected";
    /// Create a pipeline on every rank of a worker.
    pub const PIPELINE_CREATE: &str = "stem.pipeline.create";
    /// A worker reports a created pipeline.
    pub const PIPELINE_CREATED: &str = "stem.pipeline.created";
    /// Execute a pipeline on every rank of a worker.
    pub const PIPELINE_EXECUTE: &str = "stem.pipeline.execute";
    /// A worker reports an executed pipeline.
    pub const PIPELINE_EXECUTED: &str = "stem.pipeline.executed";
    /// Pipeline deletion notice.
    pub const PIPELINE_DELETE: &str = "stem.pipeline.delete";
    /// Bright-field reference update.
    pub const BRIGHT: &str = "stem.bright";
    /// Dark reference update.
    pub const DARK: &str = "stem.dark";
    /// Image size update.
    pub const SIZE: &str = "stem.size";
    /// Per-frame validation error, sent to the offending connection only.
    pub const ERROR: &str = "stem.error";
}

/// Rank announcement payload (`stem.worker_connected`).
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerAnnouncement {
    /// Worker the announcing rank belongs to (`id` on the wire).
    pub worker_id: WorkerId,
    /// Rank slot being claimed.
    pub rank: RankId,
    /// Replacement capability list. `None` leaves the stored list untouched.
    pub pipelines: Option<Vec<Value>>,
}

/// A command addressed to every rank of one worker.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetedCommand {
    /// Target worker (`workerId` on the wire).
    pub worker_id: WorkerId,
    /// The original payload, forwarded unmodified.
    pub payload: Value,
}

/// Every inbound message kind the server understands.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// A worker rank registers itself.
    WorkerConnected(WorkerAnnouncement),
    /// Targeted: create a pipeline on a worker.
    PipelineCreate(TargetedCommand),
    /// Targeted: execute a pipeline on a worker.
    PipelineExecute(TargetedCommand),
    /// Status broadcast.
    PipelineCreated(Value),
    /// Status broadcast.
    PipelineExecuted(Value),
    /// Status broadcast.
    PipelineDelete(Value),
    /// Data broadcast.
    Bright(Value),
    /// Data broadcast.
    Dark(Value),
    /// Data broadcast.
    Size(Value),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

impl InboundEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_parts(&envelope.event_type, envelope.data)
    }

    /// Build an event from its wire name and payload.
    pub fn from_parts(event_type: &str, data: Value) -> Result<Self, ProtocolError> {
        let event = match event_type {
            events::WORKER_CONNECTED => Self::WorkerConnected(parse_announcement(data)?),
            events::PIPELINE_CREATE => {
                Self::PipelineCreate(parse_targeted(events::PIPELINE_CREATE, data)?)
            }
            events::PIPELINE_EXECUTE => {
                Self::PipelineExecute(parse_targeted(events::PIPELINE_EXECUTE, data)?)
            }
            events::PIPELINE_CREATED => Self::PipelineCreated(data),
            events::PIPELINE_EXECUTED => Self::PipelineExecuted(data),
            events::PIPELINE_DELETE => Self::PipelineDelete(data),
            events::BRIGHT => Self::Bright(data),
            events::DARK => Self::Dark(data),
            events::SIZE => Self::Size(data),
            other => return Err(ProtocolError::UnknownEvent(other.to_owned())),
        };
        Ok(event)
    }

    /// Wire name of this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::WorkerConnected(_) => events::WORKER_CONNECTED,
            Self::PipelineCreate(_) => events::PIPELINE_CREATE,
            Self::PipelineExecute(_) => events::PIPELINE_EXECUTE,
            Self::PipelineCreated(_) => events::PIPELINE_CREATED,
            Self::PipelineExecuted(_) => events::PIPELINE_EXECUTED,
            Self::PipelineDelete(_) => events::PIPELINE_DELETE,
            Self::Bright(_) => events::BRIGHT,
            Self::Dark(_) => events::DARK,
            Self::Size(_) => events::SIZE,
        }
    }
}

fn require_object(
    event: &'static str,
    data: Value,
) -> Result<Map<String, Value>, ProtocolError> {
    match data {
        Value::Object(map) => Ok(map),
        Value::Null => Err(ProtocolError::InvalidField {
            event,
            message: "payload is required".into(),
        }),
        _ => Err(ProtocolError::InvalidField {
            event,
            message: "payload must be an object".into(),
        }),
    }
}

fn require_worker_id(
    event: &'static str,
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<WorkerId, ProtocolError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(ProtocolError::MissingField { event, field }),
        Some(Value::String(s)) if !s.is_empty() => Ok(WorkerId::from(s.as_str())),
        Some(_) => Err(ProtocolError::InvalidField {
            event,
            message: format!("'{field}' must be a non-empty string"),
        }),
    }
}

fn parse_targeted(event: &'static str, data: Value) -> Result<TargetedCommand, ProtocolError> {
    let map = require_object(event, data)?;
    let worker_id = require_worker_id(event, &map, "workerId")?;
    Ok(TargetedCommand {
        worker_id,
        payload: Value::Object(map),
    })
}

fn parse_announcement(data: Value) -> Result<WorkerAnnouncement, ProtocolError> {
    const EVENT: &str = events::WORKER_CONNECTED;
    let mut map = require_object(EVENT, data)?;
    let worker_id = require_worker_id(EVENT, &map, "id")?;

    let rank = match map.get("rank") {
        None | Some(Value::Null) => {
            return Err(ProtocolError::MissingField {
                event: EVENT,
                field: "rank",
            });
        }
        Some(v) => v
            .as_u64()
            .and_then(|n| RankId::try_from(n).ok())
            .ok_or_else(|| ProtocolError::InvalidField {
                event: EVENT,
                message: "'rank' must be a non-negative integer".into(),
            })?,
    };

    let pipelines = match map.remove("pipelines") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(items),
        Some(_) => {
            return Err(ProtocolError::InvalidField {
                event: EVENT,
                message: "'pipelines' must be an array".into(),
            });
        }
    };

    Ok(WorkerAnnouncement {
        worker_id,
        rank,
        pipelines,
    })
}

/// One worker as seen in a registry snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerView {
    /// Pipeline descriptors the worker declared, in declaration order.
    pub pipelines: Vec<Value>,
    /// Rank → connection currently occupying that rank.
    pub ranks: BTreeMap<RankId, ConnectionId>,
}

/// Payload of `stem.workers`: one user's workers keyed by worker id.
pub type WorkersSnapshot = BTreeMap<WorkerId, WorkerView>;

/// Server-pushed frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Event name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Event payload.
    pub data: Value,
}

impl OutboundFrame {
    /// Create a frame stamped with the current UTC time.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            data,
        }
    }

    /// A `stem.workers` snapshot frame.
    pub fn workers(snapshot: &WorkersSnapshot) -> Self {
        // String and integer map keys always serialize.
        let data = serde_json::to_value(snapshot).unwrap_or_else(|_| Value::Object(Map::new()));
        Self::new(events::WORKERS, data)
    }

    /// A `stem.error` frame describing why a frame was rejected.
    pub fn error(err: &ProtocolError) -> Self {
        Self::new(
            events::ERROR,
            serde_json::json!({
                "code": err.code(),
                "message": err.to_string(),
            }),
        )
    }

    /// Serialize to the JSON text sent on the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
