//! Update plans and triggers.
//!
//! An [`UpdatePlan`] is the sole output of reconciliation. Applying it to
//! the subject tree in per-field order — deletes, then directory
//! creates/changes, then inode creates/changes, then hardlinks — yields a
//! tree equal to the required tree modulo filtered paths.

use serde::{Deserialize, Serialize};

use crate::filesystem::{DirectoryInode, FileMode, Inode};

/// A directory to create or to retarget metadata on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    pub name: String,
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
}

impl Directory {
    pub fn from_inode(name: impl Into<String>, inode: &DirectoryInode) -> Self {
        Self {
            name: name.into(),
            mode: inode.mode,
            uid: inode.uid,
            gid: inode.gid,
        }
    }
}

/// A non-directory inode to create or change, with its full metadata and
/// content reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InodeSpec {
    pub name: String,
    pub inode: Inode,
}

/// A hardlink to create: `source` is the new path, `target` an existing
/// (or about-to-be-created) path sharing the inode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardlink {
    pub source: String,
    pub target: String,
}

/// A declarative post-apply action. Reconciliation never interprets
/// triggers; they are copied verbatim from the required image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Anchored patterns over changed pathnames that arm this trigger.
    pub match_paths: Vec<String>,
    /// Service to act on when armed.
    pub service: String,
    /// Whether acting on the service disrupts the node.
    pub high_impact: bool,
}

/// The ordered set of filesystem operations converging a subject tree
/// onto a required tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    /// Pathnames to remove, processed before any creation so a path whose
    /// type changes never collides with its replacement.
    pub paths_to_delete: Vec<String>,
    pub directories_to_make: Vec<Directory>,
    pub directories_to_change: Vec<Directory>,
    pub inodes_to_make: Vec<InodeSpec>,
    pub inodes_to_change: Vec<InodeSpec>,
    pub hardlinks_to_make: Vec<Hardlink>,
    pub triggers: Vec<Trigger>,
}

impl UpdatePlan {
    /// True when the plan carries no filesystem operations. Triggers do
    /// not count: a plan with nothing to do arms nothing.
    pub fn is_empty(&self) -> bool {
        self.paths_to_delete.is_empty()
            && self.directories_to_make.is_empty()
            && self.directories_to_change.is_empty()
            && self.inodes_to_make.is_empty()
            && self.inodes_to_change.is_empty()
            && self.hardlinks_to_make.is_empty()
    }

    /// Total number of filesystem operations.
    pub fn operation_count(&self) -> usize {
        self.paths_to_delete.len()
            + self.directories_to_make.len()
            + self.directories_to_change.len()
            + self.inodes_to_make.len()
            + self.inodes_to_change.len()
            + self.hardlinks_to_make.len()
    }
}
