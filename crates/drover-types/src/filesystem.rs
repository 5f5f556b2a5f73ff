//! Filesystem tree snapshots.
//!
//! A [`FileSystem`] is a self-contained snapshot of a node's (or image's)
//! filesystem: an inode table keyed by inode number, a root directory, and
//! two derived tables — inode number to all pathnames hardlinked to it, and
//! content hash to the inodes sharing that content. Hardlink groups are
//! first-class: several directory entries may carry the same inode number.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content hash of a regular file's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("content hash must be 32 bytes"))?;
        Ok(ContentHash(bytes))
    }
}

impl ContentHash {
    pub const ZERO: ContentHash = ContentHash([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Unix-style file mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMode(pub u32);

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

/// A directory inode: ordered entry list plus a name index.
///
/// The entry list gives stable iteration order; the index gives O(1)
/// lookup by name. Both must stay in sync, so entries are added through
/// [`DirectoryInode::add_entry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryInode {
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    pub entries: Vec<DirectoryEntry>,
    /// Name to inode number index over `entries`.
    pub index: HashMap<String, u64>,
}

impl DirectoryInode {
    pub fn new(mode: FileMode, uid: u32, gid: u32) -> Self {
        Self {
            mode,
            uid,
            gid,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Append an entry, replacing any previous entry with the same name.
    pub fn add_entry(&mut self, name: impl Into<String>, inode_number: u64) {
        let name = name.into();
        if let Some(previous) = self.index.insert(name.clone(), inode_number) {
            if previous != inode_number {
                self.entries.retain(|e| e.name != name);
            } else {
                for entry in &mut self.entries {
                    if entry.name == name {
                        entry.inode_number = inode_number;
                        return;
                    }
                }
            }
        }
        self.entries.push(DirectoryEntry { name, inode_number });
    }

    /// Look up an entry's inode number by name.
    pub fn entry(&self, name: &str) -> Option<u64> {
        self.index.get(name).copied()
    }
}

/// One `(name, inode number)` pair inside a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub inode_number: u64,
}

/// A regular file inode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularInode {
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    pub hash: ContentHash,
}

/// A symbolic link inode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkInode {
    pub uid: u32,
    pub gid: u32,
    pub target: String,
}

/// A device node or other non-regular, non-directory, non-symlink inode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericInode {
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    pub mtime: DateTime<Utc>,
    pub rdev: u64,
}

/// Any inode kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inode {
    Directory(DirectoryInode),
    Regular(RegularInode),
    Symlink(SymlinkInode),
    Generic(GenericInode),
}

impl Inode {
    pub fn is_directory(&self) -> bool {
        matches!(self, Inode::Directory(_))
    }

    pub fn as_directory(&self) -> Option<&DirectoryInode> {
        match self {
            Inode::Directory(dir) => Some(dir),
            _ => None,
        }
    }
}

/// Inode number of the root directory in every tree.
pub const ROOT_INODE: u64 = 1;

/// A filesystem snapshot: inode table, root, and derived tables.
///
/// The derived tables are rebuilt by [`FileSystem::build_tables`] after the
/// inode table or entry lists change; they are not maintained incrementally
/// because snapshots are replaced wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystem {
    /// Inode number to inode. Every entry's inode number must resolve here.
    pub inode_table: HashMap<u64, Inode>,
    /// Inode number of the root directory.
    pub root: u64,
    /// Inode number to every pathname hardlinked to it. Names are recorded
    /// per directory in entry-list order, directories visited depth-first,
    /// so the order is deterministic; it is the order dedup candidates are
    /// considered in.
    pub filenames_table: HashMap<u64, Vec<String>>,
    /// Content hash to the inodes sharing that content.
    pub hash_to_inodes: HashMap<ContentHash, Vec<u64>>,
}

impl FileSystem {
    /// An empty tree: a bare root directory with no entries. Valid as the
    /// snapshot of an uninitialized node.
    pub fn empty() -> Self {
        let mut inode_table = HashMap::new();
        inode_table.insert(
            ROOT_INODE,
            Inode::Directory(DirectoryInode::new(FileMode(0o755), 0, 0)),
        );
        Self {
            inode_table,
            root: ROOT_INODE,
            filenames_table: HashMap::new(),
            hash_to_inodes: HashMap::new(),
        }
    }

    pub fn inode(&self, inode_number: u64) -> Option<&Inode> {
        self.inode_table.get(&inode_number)
    }

    pub fn directory(&self, inode_number: u64) -> Option<&DirectoryInode> {
        self.inode_table.get(&inode_number).and_then(Inode::as_directory)
    }

    pub fn root_directory(&self) -> Option<&DirectoryInode> {
        self.directory(self.root)
    }

    /// Rebuild the filenames and hash-to-inodes tables.
    ///
    /// Walks the tree iteratively in depth-first pre-order over each
    /// directory's entry list. Entries whose inode number does not resolve
    /// are skipped here; the reconciliation algorithm reports them.
    pub fn build_tables(&mut self) {
        let mut filenames: HashMap<u64, Vec<String>> = HashMap::new();
        let mut hashes: HashMap<ContentHash, Vec<u64>> = HashMap::new();
        let mut stack: Vec<(String, u64)> = vec![(String::from("/"), self.root)];
        while let Some((path, inode_number)) = stack.pop() {
            let Some(Inode::Directory(dir)) = self.inode_table.get(&inode_number) else {
                continue;
            };
            let mut subdirs = Vec::new();
            for entry in &dir.entries {
                let child_path = join_path(&path, &entry.name);
                filenames
                    .entry(entry.inode_number)
                    .or_default()
                    .push(child_path.clone());
                match self.inode_table.get(&entry.inode_number) {
                    Some(Inode::Directory(_)) => {
                        subdirs.push((child_path, entry.inode_number));
                    }
                    Some(Inode::Regular(file)) => {
                        let inodes = hashes.entry(file.hash).or_default();
                        if !inodes.contains(&entry.inode_number) {
                            inodes.push(entry.inode_number);
                        }
                    }
                    _ => {}
                }
            }
            // Reverse push keeps pop order equal to entry-list order.
            for item in subdirs.into_iter().rev() {
                stack.push(item);
            }
        }
        self.filenames_table = filenames;
        self.hash_to_inodes = hashes;
    }

    /// Total number of pathnames in the tree (hardlinks counted separately).
    pub fn filename_count(&self) -> usize {
        self.filenames_table.values().map(Vec::len).sum()
    }
}

/// Join a directory path and an entry name into a full pathname.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}
