//! Wire envelopes pushed by the central server.
//!
//! Every message is a JSON object `{"type": ..., "payload": ...}`. The `type`
//! selects the payload shape; unrecognized types decode to
//! [`Envelope::Unknown`] so newer servers never break older clients.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::Entity;

/// A decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Begins a chunked full sync of `total_servers` entities.
    FullSyncStart { total_servers: usize },
    /// One entity of an in-flight full sync.
    ServerUpdate { server_id: String, server_data: Entity },
    /// Ends a chunked full sync.
    FullSyncComplete,
    /// Incremental change against an already consistent replica.
    DeltaUpdate(DeltaUpdate),
    /// One-shot full replica sent by older servers as `full_sync`.
    FullSnapshot { servers: HashMap<String, Entity> },
    /// Any `type` this client does not understand.
    Unknown { kind: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeltaUpdate {
    pub changed_servers: Option<HashMap<String, Entity>>,
    pub removed_servers: Option<Vec<String>>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    /// The wire `type` tag for this envelope.
    pub fn kind(&self) -> &str {
        match self {
            Envelope::FullSyncStart { .. } => "full_sync_start",
            Envelope::ServerUpdate { .. } => "server_update",
            Envelope::FullSyncComplete => "full_sync_complete",
            Envelope::DeltaUpdate(_) => "delta_update",
            Envelope::FullSnapshot { .. } => "full_sync",
            Envelope::Unknown { kind } => kind.as_str(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("invalid `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct FullSyncStartPayload {
    total_servers: usize,
}

#[derive(Deserialize)]
struct ServerUpdatePayload {
    server_id: String,
    server_data: Entity,
}

#[derive(Deserialize)]
struct FullSnapshotPayload {
    #[serde(default)]
    servers: Option<HashMap<String, Entity>>,
}

/// Parse envelope JSON text into an [`Envelope`].
pub fn parse_envelope(text: &str) -> Result<Envelope, EnvelopeError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(EnvelopeError::Json)?;
    let RawEnvelope { kind, payload } = raw;

    let envelope = match kind.as_str() {
        "full_sync_start" => {
            let p: FullSyncStartPayload = payload_as(&kind, payload)?;
            Envelope::FullSyncStart {
                total_servers: p.total_servers,
            }
        }
        "server_update" => {
            let p: ServerUpdatePayload = payload_as(&kind, payload)?;
            Envelope::ServerUpdate {
                server_id: p.server_id,
                server_data: p.server_data,
            }
        }
        "full_sync_complete" => Envelope::FullSyncComplete,
        "delta_update" => {
            let delta: DeltaUpdate = if payload.is_null() {
                DeltaUpdate::default()
            } else {
                payload_as(&kind, payload)?
            };
            Envelope::DeltaUpdate(delta)
        }
        "full_sync" => {
            let p: FullSnapshotPayload = payload_as(&kind, payload)?;
            Envelope::FullSnapshot {
                servers: p.servers.unwrap_or_default(),
            }
        }
        _ => Envelope::Unknown { kind: kind.clone() },
    };
    Ok(envelope)
}

fn payload_as<T: serde::de::DeserializeOwned>(
    kind: &str,
    payload: serde_json::Value,
) -> Result<T, EnvelopeError> {
    serde_json::from_value(payload).map_err(|source| EnvelopeError::Payload {
        kind: kind.to_string(),
        source,
    })
}
