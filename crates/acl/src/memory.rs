//! In-process ACL table.
//!
//! Used when the worker runs with ACL edits disabled (dry run) and by tests that need to
//! assert exactly which grants exist. Recursive edits apply to the path itself and to every
//! descendant already present in the table.
//!
//! The mask entry is modelled as well: a `chmod` on a path carrying entries rewrites its mask
//! from the group bits, and a grant widens an existing mask, as `setfacl -m` does. The
//! effective rights of a group are its grant bounded by the mask.

use crate::{AclBackend, AclPerms, AclResult, GroupId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// One edit applied to a [`MemoryAcl`], in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AclOperation {
    Grant {
        group: GroupId,
        perms: AclPerms,
        path: PathBuf,
        recursive: bool,
    },
    Revoke {
        group: GroupId,
        path: PathBuf,
        recursive: bool,
    },
    Clear {
        path: PathBuf,
        recursive: bool,
    },
    Mask {
        perms: AclPerms,
        path: PathBuf,
        recursive: bool,
    },
}

#[derive(Debug, Default)]
struct Table {
    entries: BTreeMap<PathBuf, BTreeMap<GroupId, AclPerms>>,
    masks: BTreeMap<PathBuf, AclPerms>,
    operations: Vec<AclOperation>,
}

#[derive(Debug, Default)]
pub struct MemoryAcl {
    table: Mutex<Table>,
}

impl MemoryAcl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mask granted to `group` on exactly `path`, if any.
    pub fn grant_for(&self, group: GroupId, path: &Path) -> Option<AclPerms> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .entries
            .get(path)
            .and_then(|groups| groups.get(&group))
            .copied()
    }

    /// Returns what `group` can actually do on `path`: its grant bounded by the mask.
    pub fn effective_for(&self, group: GroupId, path: &Path) -> Option<AclPerms> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let granted = table.entries.get(path).and_then(|groups| groups.get(&group))?;
        let effective = match table.masks.get(path) {
            Some(mask) => granted.intersect(*mask),
            None => *granted,
        };
        (effective != AclPerms::NONE).then_some(effective)
    }

    pub fn mask_on(&self, path: &Path) -> Option<AclPerms> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.masks.get(path).copied()
    }

    /// Returns every group holding a grant on `path`.
    pub fn groups_on(&self, path: &Path) -> Vec<GroupId> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .entries
            .get(path)
            .map(|groups| groups.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Returns every edit applied so far.
    pub fn operations(&self) -> Vec<AclOperation> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.operations.clone()
    }

    fn affected_paths(table: &Table, path: &Path, recursive: bool) -> Vec<PathBuf> {
        let mut paths = vec![path.to_path_buf()];
        if recursive {
            paths.extend(
                table
                    .entries
                    .keys()
                    .filter(|known| known.as_path() != path && known.starts_with(path))
                    .cloned(),
            );
        }
        paths
    }
}

impl AclBackend for MemoryAcl {
    fn grant(
        &self,
        group: GroupId,
        perms: AclPerms,
        path: &Path,
        recursive: bool,
    ) -> AclResult<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for target in Self::affected_paths(&table, path, recursive) {
            if let Some(mask) = table.masks.get_mut(&target) {
                *mask = mask.union(perms);
            }
            table.entries.entry(target).or_default().insert(group, perms);
        }
        table.operations.push(AclOperation::Grant {
            group,
            perms,
            path: path.to_path_buf(),
            recursive,
        });
        Ok(())
    }

    fn revoke(&self, group: GroupId, path: &Path, recursive: bool) -> AclResult<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for target in Self::affected_paths(&table, path, recursive) {
            if let Some(groups) = table.entries.get_mut(&target) {
                groups.remove(&group);
                if groups.is_empty() {
                    table.entries.remove(&target);
                }
            }
        }
        table.operations.push(AclOperation::Revoke {
            group,
            path: path.to_path_buf(),
            recursive,
        });
        Ok(())
    }

    fn clear(&self, path: &Path, recursive: bool) -> AclResult<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for target in Self::affected_paths(&table, path, recursive) {
            table.entries.remove(&target);
            table.masks.remove(&target);
        }
        table.operations.push(AclOperation::Clear {
            path: path.to_path_buf(),
            recursive,
        });
        Ok(())
    }

    fn set_mask(&self, perms: AclPerms, path: &Path, recursive: bool) -> AclResult<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for target in Self::affected_paths(&table, path, recursive) {
            table.masks.insert(target, perms);
        }
        table.operations.push(AclOperation::Mask {
            perms,
            path: path.to_path_buf(),
            recursive,
        });
        Ok(())
    }

    fn mode_changed(&self, path: &Path, mode: u32) -> AclResult<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.entries.contains_key(path) || table.masks.contains_key(path) {
            table
                .masks
                .insert(path.to_path_buf(), AclPerms::from_bits((mode >> 3) & 0o7));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G1: GroupId = GroupId::new(1001);
    const G2: GroupId = GroupId::new(1002);

    #[test]
    fn grants_are_per_group() {
        let acl = MemoryAcl::new();
        let path = Path::new("/lake/p/subject/study");
        acl.grant(G1, AclPerms::READ_TRAVERSE, path, false).unwrap();
        acl.grant(G2, AclPerms::READ_TRAVERSE, path, false).unwrap();
        acl.revoke(G1, path, false).unwrap();

        assert_eq!(acl.grant_for(G1, path), None);
        assert_eq!(acl.grant_for(G2, path), Some(AclPerms::READ_TRAVERSE));
    }

    #[test]
    fn chmod_masks_grants_until_the_mask_is_restored() {
        let acl = MemoryAcl::new();
        let path = Path::new("/lake/p/subject/study");
        acl.grant(G1, AclPerms::READ_TRAVERSE, path, false).unwrap();

        acl.mode_changed(path, 0o700).unwrap();
        assert_eq!(acl.grant_for(G1, path), Some(AclPerms::READ_TRAVERSE));
        assert_eq!(acl.effective_for(G1, path), None);

        acl.set_mask(AclPerms::READ_TRAVERSE, path, false).unwrap();
        assert_eq!(acl.effective_for(G1, path), Some(AclPerms::READ_TRAVERSE));
    }

    #[test]
    fn chmod_without_entries_sets_no_mask() {
        let acl = MemoryAcl::new();
        acl.mode_changed(Path::new("/plain"), 0o700).unwrap();
        assert_eq!(acl.mask_on(Path::new("/plain")), None);
        assert!(acl.operations().is_empty());
    }

    #[test]
    fn recursive_clear_removes_known_descendants() {
        let acl = MemoryAcl::new();
        acl.grant(G1, AclPerms::READ_TRAVERSE, Path::new("/d/x"), false)
            .unwrap();
        acl.grant(G1, AclPerms::READ_TRAVERSE, Path::new("/d/x/y"), false)
            .unwrap();
        acl.grant(G1, AclPerms::READ_TRAVERSE, Path::new("/d/xy"), false)
            .unwrap();

        acl.clear(Path::new("/d/x"), true).unwrap();

        assert!(acl.groups_on(Path::new("/d/x")).is_empty());
        assert!(acl.groups_on(Path::new("/d/x/y")).is_empty());
        assert_eq!(acl.groups_on(Path::new("/d/xy")), vec![G1]);
        assert_eq!(acl.operations().len(), 4);
    }
}
