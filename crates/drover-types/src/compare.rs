//! Inode comparison primitives for the reconciliation algorithm.

use crate::filesystem::Inode;

/// Outcome of comparing two inodes along the three axes the
/// reconciliation algorithm cares about.
///
/// When the types differ, metadata and data comparison is undefined and
/// both are reported false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeComparison {
    pub same_type: bool,
    pub same_metadata: bool,
    pub same_data: bool,
}

impl InodeComparison {
    pub fn identical(&self) -> bool {
        self.same_type && self.same_metadata && self.same_data
    }

    fn differ() -> Self {
        Self {
            same_type: false,
            same_metadata: false,
            same_data: false,
        }
    }
}

/// Compare two inodes by type, metadata, and data.
///
/// Per kind: directories compare mode/uid/gid as metadata and have no
/// data; regular files compare mode/uid/gid/mtime as metadata and
/// size+hash as data; symlinks compare uid/gid as metadata and the target
/// as data; generic inodes compare mode/uid/gid/mtime as metadata and the
/// device number as data.
pub fn compare_inodes(left: &Inode, right: &Inode) -> InodeComparison {
    match (left, right) {
        (Inode::Directory(a), Inode::Directory(b)) => InodeComparison {
            same_type: true,
            same_metadata: a.mode == b.mode && a.uid == b.uid && a.gid == b.gid,
            same_data: true,
        },
        (Inode::Regular(a), Inode::Regular(b)) => InodeComparison {
            same_type: true,
            same_metadata: a.mode == b.mode
                && a.uid == b.uid
                && a.gid == b.gid
                && a.mtime == b.mtime,
            same_data: a.size == b.size && a.hash == b.hash,
        },
        (Inode::Symlink(a), Inode::Symlink(b)) => InodeComparison {
            same_type: true,
            same_metadata: a.uid == b.uid && a.gid == b.gid,
            same_data: a.target == b.target,
        },
        (Inode::Generic(a), Inode::Generic(b)) => InodeComparison {
            same_type: true,
            same_metadata: a.mode == b.mode
                && a.uid == b.uid
                && a.gid == b.gid
                && a.mtime == b.mtime,
            same_data: a.rdev == b.rdev,
        },
        _ => InodeComparison::differ(),
    }
}
