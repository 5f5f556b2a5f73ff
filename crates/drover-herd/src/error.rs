//! Herd error types.

use thiserror::Error;

use drover_reconcile::ReconcileError;

use crate::image::ImageError;
use crate::transport::TransportError;

/// Failures local to a single node's poll cycle.
///
/// Every kind is recorded on that node's last-error fields and ends the
/// cycle early; none aborts the scheduler or other nodes' cycles. The
/// next scheduled scan is the retry mechanism.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] TransportError),

    #[error("push failed: {0}")]
    Push(#[source] TransportError),

    #[error("image lookup failed: {0}")]
    ImageLookup(#[source] ImageError),

    #[error("snapshot rejected: {0}")]
    ReconcileInput(#[source] ReconcileError),
}

/// Parse errors for administrative selector queries. Returned
/// synchronously to the caller; scheduler state is untouched.
#[derive(Debug, Error)]
pub enum SelectorParseError {
    #[error("query too short")]
    TooShort,

    #[error("unknown unit {0:?} in query")]
    UnknownUnit(char),

    #[error("bad magnitude in query: {0}")]
    BadMagnitude(#[from] std::num::ParseIntError),
}
