//! Drover Types - Filesystem tree model and update plans
//!
//! This crate defines the in-memory data model shared by the reconciliation
//! algorithm and the herd scheduler:
//!
//! - [`FileSystem`]: an immutable-per-snapshot filesystem tree (inode table,
//!   directory entries, hardlink groups, content-hash index)
//! - [`UpdatePlan`]: the ordered set of operations that converge a subject
//!   tree onto a required tree
//! - [`PathFilter`]: per-image predicate excluding node-local paths from
//!   reconciliation
//! - [`Trigger`]: declarative post-apply actions, passed through verbatim
//!
//! Trees are pure data: no I/O, no locking. A subject tree is replaced
//! wholesale on each successful fetch; a required tree is owned by its
//! image and read-only to consumers. Any serialization chosen by a
//! transport must round-trip these types losslessly, including hardlink
//! group membership and full metadata for every inode kind.

#![deny(unsafe_code)]

pub mod compare;
pub mod filesystem;
pub mod filter;
pub mod plan;

// Re-exports
pub use compare::{compare_inodes, InodeComparison};
pub use filesystem::{
    join_path, ContentHash, DirectoryEntry, DirectoryInode, FileMode, FileSystem, GenericInode,
    Inode, RegularInode, SymlinkInode, ROOT_INODE,
};
pub use filter::{FilterError, PathFilter};
pub use plan::{Directory, Hardlink, InodeSpec, Trigger, UpdatePlan};
