//! Push operations.
//!
//! Pending local work is expressed as operations against the remote, not
//! as direct mutations. A push pass turns each operation into one remote
//! call and settles the local record from its outcome.

use crate::{LocalId, RemoteId, Version};
use serde::{Deserialize, Serialize};

/// Create a record the remote has never seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOp {
    /// Local record to create remotely
    pub local_id: LocalId,
    /// Payload to send
    pub payload: serde_json::Value,
    /// Record version this payload was taken from
    pub version: Version,
}

/// Replace the remote copy of a record edited locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOp {
    /// Local record to push
    pub local_id: LocalId,
    /// Remote id to update
    pub remote_id: RemoteId,
    /// Payload to send (full replacement)
    pub payload: serde_json::Value,
    /// Record version this payload was taken from
    pub version: Version,
}

/// A pending change to push to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushOp {
    Create(CreateOp),
    Update(UpdateOp),
}

impl PushOp {
    /// Get the local record id.
    pub fn local_id(&self) -> &LocalId {
        match self {
            PushOp::Create(op) => &op.local_id,
            PushOp::Update(op) => &op.local_id,
        }
    }

    /// Get the payload.
    pub fn payload(&self) -> &serde_json::Value {
        match self {
            PushOp::Create(op) => &op.payload,
            PushOp::Update(op) => &op.payload,
        }
    }

    /// Mutable access to the payload, for rewriting links before sending.
    pub fn payload_mut(&mut self) -> &mut serde_json::Value {
        match self {
            PushOp::Create(op) => &mut op.payload,
            PushOp::Update(op) => &mut op.payload,
        }
    }

    /// Get the record version the payload was taken from.
    pub fn version(&self) -> Version {
        match self {
            PushOp::Create(op) => op.version,
            PushOp::Update(op) => op.version,
        }
    }
}
