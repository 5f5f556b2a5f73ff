//! Drover herd coordinator.
//!
//! The herd owns the population of managed nodes ("subs") and drives the
//! continuous convergence loop: fetch each node's filesystem snapshot,
//! diff it against the node's required image, and push the resulting
//! update plan. One round-robin cursor paces the population; semaphore
//! pools bound connections, polls, pushes, and CPU-bound diffing
//! independently.
//!
//! # Key Components
//!
//! - [`Herd`]: population ownership, the scan scheduler, and selection
//!   queries over the membership.
//! - [`Sub`]: one managed node, its busy flag, and its observable
//!   [`SubStatus`].
//! - [`Transport`] and [`ImageProvider`]: the external seams. In-memory
//!   implementations ([`MemoryTransport`], [`MemoryImageProvider`])
//!   serve development and tests.
//! - [`reachable_selector`]: compact `<integer><unit>` queries over how
//!   long nodes have been unreachable.

#![deny(unsafe_code)]

mod config;
mod error;
mod herd;
mod image;
mod memory;
mod selector;
mod sub;
mod transport;

pub use config::HerdConfig;
pub use error::{CycleError, SelectorParseError};
pub use herd::Herd;
pub use image::{Image, ImageError, ImageProvider};
pub use memory::{MemoryImageProvider, MemoryTransport};
pub use selector::reachable_selector;
pub use sub::{Sub, SubStatus};
pub use transport::{PushAck, Transport, TransportError};
