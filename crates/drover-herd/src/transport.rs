//! Transport interface for talking to subordinate nodes.
//!
//! The herd never opens sockets itself; a [`Transport`] implementation
//! performs the fetch-snapshot / push-plan round trips. Wire formats,
//! deadlines, and retry-on-connect policy all live behind this trait. A
//! hung call occupies one connection slot and one node's busy flag until
//! the transport's own deadline fires, so implementations are expected to
//! enforce one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use drover_types::{FileSystem, UpdatePlan};

/// Transport-level failures, as visible to the coordinator.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out")]
    Timeout,
}

/// Destination acknowledgement for a pushed plan.
///
/// A push failure means the plan is treated as fully non-applied; the
/// destination's own apply semantics are out of the coordinator's hands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Whether any post-apply trigger failed on the destination.
    pub trigger_failures: bool,
}

/// Network round trips to a node, keyed by its address.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the node's current filesystem snapshot.
    async fn fetch_snapshot(&self, address: &str) -> Result<FileSystem, TransportError>;

    /// Deliver an update plan to the node.
    async fn push_plan(&self, address: &str, plan: &UpdatePlan)
        -> Result<PushAck, TransportError>;
}
