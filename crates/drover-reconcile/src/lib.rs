//! Drover Reconcile - dedup-aware filesystem tree diffing
//!
//! Given a node's observed tree (the subject), an image's declared tree
//! (the required), and a path exclusion filter, [`reconcile`] computes the
//! minimal ordered [`UpdatePlan`] that converges the subject onto the
//! required tree. The algorithm is pure: no I/O, no concurrency,
//! side-effect-free on its inputs.
//!
//! Traversal is driven by the required tree, directory by directory. At
//! each level, subject entries absent from the required directory are
//! scheduled for deletion first, so a path whose type changes never
//! collides with its replacement. Matching entries are compared three
//! ways (type, metadata, data); content is never re-transferred when a
//! hardlink to an already-correct or already-scheduled path suffices.
//!
//! Both trees must have their derived tables built
//! ([`drover_types::FileSystem::build_tables`]) before reconciliation: the
//! required tree's filenames table supplies dedup candidates and the
//! subject's filenames table resolves them to existing inodes.

#![deny(unsafe_code)]

mod walk;

pub use walk::{reconcile, reconcile_with_triggers, ReconcileError};

// Re-export the plan type produced here so consumers need not depend on
// drover-types directly for the common case.
pub use drover_types::UpdatePlan;
