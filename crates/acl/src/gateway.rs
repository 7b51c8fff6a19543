//! Filesystem gateway used by the materializer and the access manager.

use crate::{AclBackend, AclError, AclPerms, AclResult, GroupId};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// Numeric owner applied with `chown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// Directory, link, mode and ACL operations over one ACL backend.
#[derive(Clone, Debug)]
pub struct FsGateway {
    acl: Arc<dyn AclBackend>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AclError + '_ {
    move |source| AclError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FsGateway {
    pub fn new(acl: Arc<dyn AclBackend>) -> Self {
        Self { acl }
    }

    /// Creates `path` with `mode` and optional owner.
    ///
    /// Returns `Ok(false)` without touching anything if the directory already exists.
    /// The parent must exist.
    pub fn create_directory(
        &self,
        path: &Path,
        owner: Option<Ownership>,
        mode: u32,
    ) -> AclResult<bool> {
        match fs::create_dir(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => {
                tracing::debug!("directory already exists: {}", path.display());
                return Ok(false);
            }
            Err(e) => return Err(io_error(path)(e)),
        }

        // create_dir is subject to the process umask; set the mode explicitly.
        self.chmod(path, mode)?;
        if let Some(owner) = owner {
            self.chown(path, owner, false)?;
        }
        Ok(true)
    }

    /// Creates a symbolic link at `link_path` pointing to `target`.
    ///
    /// Returns `Ok(false)` if a symlink is already present at `link_path`, whatever it points
    /// to; an existing regular file or directory is an error.
    pub fn create_symlink(&self, target: &Path, link_path: &Path) -> AclResult<bool> {
        match fs::symlink_metadata(link_path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                tracing::debug!("link already exists: {}", link_path.display());
                return Ok(false);
            }
            Ok(_) => {
                return Err(AclError::NotASymlink {
                    path: link_path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(link_path)(e)),
        }

        std::os::unix::fs::symlink(target, link_path).map_err(io_error(link_path))?;
        Ok(true)
    }

    /// Changes the owner of `path` (and everything beneath it when `recursive`).
    ///
    /// Symbolic links are re-owned themselves, never followed.
    pub fn chown(&self, path: &Path, owner: Ownership, recursive: bool) -> AclResult<()> {
        if !recursive {
            return std::os::unix::fs::lchown(path, Some(owner.uid), Some(owner.gid))
                .map_err(io_error(path));
        }

        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| AclError::Io {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
            std::os::unix::fs::lchown(entry.path(), Some(owner.uid), Some(owner.gid))
                .map_err(io_error(entry.path()))?;
        }
        Ok(())
    }

    /// Sets the mode bits of `path`. On a path carrying ACL entries this also rewrites the
    /// mask from the group bits; see [`FsGateway::set_acl_mask`].
    pub fn chmod(&self, path: &Path, mode: u32) -> AclResult<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_error(path))?;
        self.acl.mode_changed(path, mode)
    }

    /// Sets `dir_mode` on every directory and `file_mode` on every file strictly beneath
    /// `root`. `root` itself and symbolic links are left alone.
    ///
    /// Returns the number of entries changed.
    pub fn chmod_tree(&self, root: &Path, dir_mode: u32, file_mode: u32) -> AclResult<usize> {
        let mut changed = 0usize;
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| AclError::Io {
                path: root.to_path_buf(),
                source: e.into(),
            })?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.chmod(entry.path(), dir_mode)?;
            } else if file_type.is_file() {
                self.chmod(entry.path(), file_mode)?;
            } else {
                continue;
            }
            changed += 1;
        }
        Ok(changed)
    }

    pub fn grant_group_access(
        &self,
        group: GroupId,
        perms: AclPerms,
        path: &Path,
        recursive: bool,
    ) -> AclResult<()> {
        tracing::debug!("granting {} to group {} on {}", perms, group, path.display());
        self.acl.grant(group, perms, path, recursive)
    }

    pub fn revoke_group_access(
        &self,
        group: GroupId,
        path: &Path,
        recursive: bool,
    ) -> AclResult<()> {
        tracing::debug!("revoking group {} on {}", group, path.display());
        self.acl.revoke(group, path, recursive)
    }

    pub fn set_acl_mask(&self, perms: AclPerms, path: &Path) -> AclResult<()> {
        tracing::debug!("setting ACL mask {} on {}", perms, path.display());
        self.acl.set_mask(perms, path, false)
    }

    pub fn clear_all_grants(&self, path: &Path, recursive: bool) -> AclResult<()> {
        tracing::debug!("clearing ACL entries on {}", path.display());
        self.acl.clear(path, recursive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryAcl;
    use tempfile::TempDir;

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    fn gateway() -> (FsGateway, Arc<MemoryAcl>) {
        let acl = Arc::new(MemoryAcl::new());
        (FsGateway::new(acl.clone()), acl)
    }

    #[test]
    fn create_directory_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let (fs_gateway, _) = gateway();
        let dir = temp.path().join("dataset");

        assert!(fs_gateway.create_directory(&dir, None, 0o700).unwrap());
        assert_eq!(mode_of(&dir), 0o700);
        assert!(!fs_gateway.create_directory(&dir, None, 0o755).unwrap());
        // Existing directory is left untouched.
        assert_eq!(mode_of(&dir), 0o700);
    }

    #[test]
    fn create_directory_fails_when_a_file_is_in_the_way() {
        let temp = TempDir::new().unwrap();
        let (fs_gateway, _) = gateway();
        let path = temp.path().join("taken");
        fs::write(&path, b"x").unwrap();

        let result = fs_gateway.create_directory(&path, None, 0o700);
        assert!(matches!(result, Err(AclError::Io { .. })));
    }

    #[test]
    fn create_symlink_skips_existing_link() {
        let temp = TempDir::new().unwrap();
        let (fs_gateway, _) = gateway();
        let target = temp.path().join("source");
        fs::create_dir(&target).unwrap();
        let link = temp.path().join("link");

        assert!(fs_gateway.create_symlink(&target, &link).unwrap());
        assert!(!fs_gateway.create_symlink(&target, &link).unwrap());
        assert_eq!(fs::read_link(&link).unwrap(), target);
    }

    #[test]
    fn create_symlink_rejects_regular_file() {
        let temp = TempDir::new().unwrap();
        let (fs_gateway, _) = gateway();
        let link = temp.path().join("link");
        fs::write(&link, b"not a link").unwrap();

        let result = fs_gateway.create_symlink(temp.path(), &link);
        assert!(matches!(result, Err(AclError::NotASymlink { .. })));
    }

    #[test]
    fn chmod_tree_leaves_root_alone() {
        let temp = TempDir::new().unwrap();
        let (fs_gateway, _) = gateway();
        let study = temp.path().join("study");
        let series = study.join("series-1");
        fs::create_dir_all(&series).unwrap();
        fs::write(series.join("image.dcm"), b"pixels").unwrap();
        fs_gateway.chmod(&study, 0o700).unwrap();
        fs_gateway.chmod(&series, 0o700).unwrap();
        fs_gateway.chmod(&series.join("image.dcm"), 0o600).unwrap();

        let changed = fs_gateway.chmod_tree(&study, 0o755, 0o644).unwrap();

        assert_eq!(changed, 2);
        assert_eq!(mode_of(&study), 0o700);
        assert_eq!(mode_of(&series), 0o755);
        assert_eq!(mode_of(&series.join("image.dcm")), 0o644);
    }

    #[test]
    fn acl_operations_are_delegated_to_backend() {
        let (fs_gateway, acl) = gateway();
        let group = GroupId::new(2000);
        let path = Path::new("/datasets/one");

        fs_gateway
            .grant_group_access(group, AclPerms::READ_TRAVERSE, path, false)
            .unwrap();
        assert_eq!(acl.grant_for(group, path), Some(AclPerms::READ_TRAVERSE));

        fs_gateway.revoke_group_access(group, path, false).unwrap();
        assert_eq!(acl.grant_for(group, path), None);
    }
}
