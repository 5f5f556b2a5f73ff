//! The reconciliation walk.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, trace};

use drover_types::{
    compare_inodes, filesystem::join_path, Directory, DirectoryInode, FileSystem, Hardlink, Inode,
    InodeSpec, PathFilter, Trigger, UpdatePlan,
};

/// Malformed or inconsistent input trees. Fatal to the cycle that asked
/// for the plan, never silently ignored.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// An entry's inode number does not resolve in its tree's inode table.
    #[error("dangling inode reference at {path}: inode {inode_number} is not in the table")]
    DanglingInode { path: String, inode_number: u64 },
}

/// Compute the update plan converging `subject` onto `required`, ignoring
/// paths matched by `filter`.
pub fn reconcile(
    subject: &FileSystem,
    required: &FileSystem,
    filter: &PathFilter,
) -> Result<UpdatePlan, ReconcileError> {
    let required_root = required
        .root_directory()
        .ok_or(ReconcileError::DanglingInode {
            path: "/".to_string(),
            inode_number: required.root,
        })?;
    // A subject with no resolvable root is treated as an empty node.
    let subject_root = subject.root_directory();

    let mut plan = UpdatePlan::default();
    let mut state = WalkState {
        subject,
        required,
        filter,
        required_inode_to_subject: HashMap::new(),
        inodes_changed: HashSet::new(),
        inodes_created: HashMap::new(),
        subject_filename_to_inode: None,
    };
    state.compare_directories(&mut plan, subject_root, required_root, "/")?;
    debug!(
        deletions = plan.paths_to_delete.len(),
        directories = plan.directories_to_make.len() + plan.directories_to_change.len(),
        inodes = plan.inodes_to_make.len() + plan.inodes_to_change.len(),
        hardlinks = plan.hardlinks_to_make.len(),
        "built update plan"
    );
    Ok(plan)
}

/// [`reconcile`], with the image's triggers copied verbatim into the plan.
pub fn reconcile_with_triggers(
    subject: &FileSystem,
    required: &FileSystem,
    filter: &PathFilter,
    triggers: &[Trigger],
) -> Result<UpdatePlan, ReconcileError> {
    let mut plan = reconcile(subject, required, filter)?;
    plan.triggers = triggers.to_vec();
    Ok(plan)
}

/// Per-walk bookkeeping, keyed by required inode number unless noted.
struct WalkState<'a> {
    subject: &'a FileSystem,
    required: &'a FileSystem,
    filter: &'a PathFilter,
    /// Required inode number to the subject inode already confirmed
    /// correct for it, and the required pathname where it was confirmed.
    /// The first required path touching an inode is canonical; later
    /// paths hardlink to it. The canonical pathname is always in the
    /// required tree, so the plan never deletes it.
    required_inode_to_subject: HashMap<u64, (u64, String)>,
    /// Inodes whose metadata change is already scheduled.
    inodes_changed: HashSet<u64>,
    /// Inodes whose creation is already scheduled, and at which path.
    inodes_created: HashMap<u64, String>,
    /// Subject pathname to subject inode number, built on first use.
    subject_filename_to_inode: Option<HashMap<&'a str, u64>>,
}

impl<'a> WalkState<'a> {
    fn compare_directories(
        &mut self,
        plan: &mut UpdatePlan,
        subject_dir: Option<&'a DirectoryInode>,
        required_dir: &'a DirectoryInode,
        dir_path: &str,
    ) -> Result<(), ReconcileError> {
        // Deletions first, so renamed-type paths never collide.
        if let Some(subject_dir) = subject_dir {
            for entry in &subject_dir.entries {
                let pathname = join_path(dir_path, &entry.name);
                if self.filter.matches(&pathname) {
                    continue;
                }
                if required_dir.entry(&entry.name).is_none() {
                    trace!(path = %pathname, "delete");
                    plan.paths_to_delete.push(pathname);
                }
            }
        }
        for entry in &required_dir.entries {
            let pathname = join_path(dir_path, &entry.name);
            if self.filter.matches(&pathname) {
                continue;
            }
            let required_inode = self.required.inode(entry.inode_number).ok_or_else(|| {
                ReconcileError::DanglingInode {
                    path: pathname.clone(),
                    inode_number: entry.inode_number,
                }
            })?;
            let subject_entry = subject_dir.and_then(|d| d.entry(&entry.name));
            match subject_entry {
                None => self.add_entry(plan, entry.inode_number, required_inode, &pathname)?,
                Some(subject_inum) => {
                    let subject_inode =
                        self.subject.inode(subject_inum).ok_or_else(|| {
                            ReconcileError::DanglingInode {
                                path: pathname.clone(),
                                inode_number: subject_inum,
                            }
                        })?;
                    self.compare_entries(
                        plan,
                        subject_inum,
                        subject_inode,
                        entry.inode_number,
                        required_inode,
                        &pathname,
                    )?;
                }
            }
            // Descend with the subject directory when one exists here.
            if let Inode::Directory(required_child) = required_inode {
                let subject_child = subject_entry
                    .and_then(|inum| self.subject.inode(inum))
                    .and_then(Inode::as_directory);
                self.compare_directories(plan, subject_child, required_child, &pathname)?;
            }
        }
        Ok(())
    }

    /// A required entry with no subject counterpart.
    fn add_entry(
        &mut self,
        plan: &mut UpdatePlan,
        required_inum: u64,
        required_inode: &Inode,
        pathname: &str,
    ) -> Result<(), ReconcileError> {
        if let Inode::Directory(dir) = required_inode {
            make_directory(plan, dir, pathname, true);
            Ok(())
        } else {
            self.add_inode(plan, required_inum, required_inode, pathname)
        }
    }

    fn compare_entries(
        &mut self,
        plan: &mut UpdatePlan,
        subject_inum: u64,
        subject_inode: &Inode,
        required_inum: u64,
        required_inode: &Inode,
        pathname: &str,
    ) -> Result<(), ReconcileError> {
        let cmp = compare_inodes(subject_inode, required_inode);
        if let Inode::Directory(required_dir) = required_inode {
            if cmp.same_metadata {
                return Ok(());
            }
            if cmp.same_type {
                make_directory(plan, required_dir, pathname, false);
            } else {
                // A non-directory is in the way: destroy and recreate,
                // never patch across inode kinds.
                trace!(path = %pathname, "replace non-directory with directory");
                plan.paths_to_delete.push(pathname.to_string());
                make_directory(plan, required_dir, pathname, true);
            }
            return Ok(());
        }
        if cmp.identical() {
            self.relink(plan, subject_inum, required_inum, pathname);
            return Ok(());
        }
        if cmp.same_type && cmp.same_data {
            self.update_metadata(plan, required_inum, required_inode, pathname);
            self.relink(plan, subject_inum, required_inum, pathname);
            return Ok(());
        }
        trace!(path = %pathname, "replace");
        plan.paths_to_delete.push(pathname.to_string());
        self.add_inode(plan, required_inum, required_inode, pathname)
    }

    /// Hardlink consolidation for an existing, content-correct path.
    ///
    /// The first required path touching `required_inum` establishes the
    /// canonical subject inode and pathname. Later paths already
    /// hardlinked to it in the subject need nothing; otherwise they
    /// become hardlinks to the canonical pathname. The target must be a
    /// required-tree pathname: subject-only names for the same inode may
    /// be scheduled for deletion in this very plan, and deletes are
    /// applied before hardlinks.
    fn relink(
        &mut self,
        plan: &mut UpdatePlan,
        subject_inum: u64,
        required_inum: u64,
        pathname: &str,
    ) {
        let (canonical, target) = match self.required_inode_to_subject.get(&required_inum) {
            None => {
                self.required_inode_to_subject
                    .insert(required_inum, (subject_inum, pathname.to_string()));
                return;
            }
            Some((canonical, target)) => (*canonical, target.clone()),
        };
        if canonical == subject_inum {
            return;
        }
        make_hardlink(plan, pathname, &target);
    }

    fn update_metadata(
        &mut self,
        plan: &mut UpdatePlan,
        required_inum: u64,
        required_inode: &Inode,
        pathname: &str,
    ) {
        // One metadata change per inode covers every path linked to it.
        if !self.inodes_changed.insert(required_inum) {
            return;
        }
        trace!(path = %pathname, "update metadata");
        plan.inodes_to_change.push(InodeSpec {
            name: pathname.to_string(),
            inode: required_inode.clone(),
        });
    }

    /// Schedule a non-directory inode, preferring a hardlink over a
    /// content transfer whenever one can serve.
    fn add_inode(
        &mut self,
        plan: &mut UpdatePlan,
        required_inum: u64,
        required_inode: &Inode,
        pathname: &str,
    ) -> Result<(), ReconcileError> {
        // Already materialized earlier in this plan: link to it.
        if let Some(existing) = self.inodes_created.get(&required_inum) {
            let existing = existing.clone();
            make_hardlink(plan, pathname, &existing);
            return Ok(());
        }
        // Another required name for this inode may already be present and
        // correct on the subject; link to it instead of transferring.
        if let Some(names) = self.required.filenames_table.get(&required_inum) {
            if names.len() > 1 {
                let mut same_data_name: Option<String> = None;
                for name in names {
                    if self.filter.matches(name) {
                        continue;
                    }
                    let Some(subject_inum) = self.subject_inode_from_filename(name) else {
                        continue;
                    };
                    let Some(subject_inode) = self.subject.inode(subject_inum) else {
                        return Err(ReconcileError::DanglingInode {
                            path: name.clone(),
                            inode_number: subject_inum,
                        });
                    };
                    let cmp = compare_inodes(subject_inode, required_inode);
                    if cmp.same_metadata && cmp.same_data {
                        make_hardlink(plan, pathname, name);
                        return Ok(());
                    }
                    if cmp.same_data && same_data_name.is_none() {
                        same_data_name = Some(name.clone());
                    }
                }
                if let Some(name) = same_data_name {
                    self.update_metadata(plan, required_inum, required_inode, &name);
                    make_hardlink(plan, pathname, &name);
                    return Ok(());
                }
            }
        }
        trace!(path = %pathname, "add inode");
        plan.inodes_to_make.push(InodeSpec {
            name: pathname.to_string(),
            inode: required_inode.clone(),
        });
        self.inodes_created
            .insert(required_inum, pathname.to_string());
        Ok(())
    }

    fn subject_inode_from_filename(&mut self, name: &str) -> Option<u64> {
        let subject = self.subject;
        let map = self.subject_filename_to_inode.get_or_insert_with(|| {
            let mut map = HashMap::new();
            for (inum, names) in &subject.filenames_table {
                for name in names {
                    map.insert(name.as_str(), *inum);
                }
            }
            map
        });
        map.get(name).copied()
    }
}

fn make_directory(plan: &mut UpdatePlan, inode: &DirectoryInode, pathname: &str, create: bool) {
    let directory = Directory::from_inode(pathname, inode);
    if create {
        trace!(path = %pathname, "add directory");
        plan.directories_to_make.push(directory);
    } else {
        trace!(path = %pathname, "change directory");
        plan.directories_to_change.push(directory);
    }
}

fn make_hardlink(plan: &mut UpdatePlan, source: &str, target: &str) {
    trace!(source = %source, target = %target, "make hardlink");
    plan.hardlinks_to_make.push(Hardlink {
        source: source.to_string(),
        target: target.to_string(),
    });
}
