//! Lakeset filesystem ACL gateway
//!
//! Thin wrapper over the filesystem operations the dataset pipeline needs:
//! directory creation, symbolic links, ownership and mode changes, and discretionary ACL
//! edits.
//!
//! ## Design Principles
//!
//! - Group access is only ever granted or revoked through ACL entries, never by changing
//!   owner or mode bits, so a path can be shared by a changing set of groups without one
//!   group's grant disturbing another's.
//! - Directory and symlink creation are idempotent: re-running after an interruption finds
//!   the work already done and reports it instead of failing.
//! - There is no retry at this layer. Any failure of the underlying tool is returned to the
//!   caller.
//!
//! ## Backends
//!
//! ACL edits go through an [`AclBackend`]:
//!
//! - [`Setfacl`] invokes the `setfacl` tool directly.
//! - [`MemoryAcl`] keeps an in-process table (dry runs and tests).

mod gateway;
mod memory;
mod setfacl;

pub use gateway::{FsGateway, Ownership};
pub use lakeset_types::GroupId;
pub use memory::{AclOperation, MemoryAcl};
pub use setfacl::Setfacl;

use std::fmt;
use std::path::{Path, PathBuf};

/// Errors that can occur during filesystem and ACL operations
#[derive(Debug, thiserror::Error)]
pub enum AclError {
    /// A direct filesystem call failed
    #[error("filesystem operation failed on {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ACL tool could not be started
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The ACL tool ran but reported failure or unexpected output
    #[error("`{command}` failed (exit status {status:?}): {stderr}")]
    Command {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// A link was requested where a regular file or directory already exists
    #[error("{path} exists and is not a symbolic link", path = path.display())]
    NotASymlink { path: PathBuf },
}

pub type AclResult<T> = std::result::Result<T, AclError>;

/// Permission mask of an ACL entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AclPerms {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl AclPerms {
    /// Read plus directory traversal, the only mask datasets hand out.
    pub const READ_TRAVERSE: AclPerms = AclPerms {
        read: true,
        write: false,
        execute: true,
    };

    pub const NONE: AclPerms = AclPerms {
        read: false,
        write: false,
        execute: false,
    };

    /// Permissions of an `rwx` triplet, e.g. the group bits `(mode >> 3) & 0o7`.
    pub const fn from_bits(bits: u32) -> AclPerms {
        AclPerms {
            read: bits & 0o4 != 0,
            write: bits & 0o2 != 0,
            execute: bits & 0o1 != 0,
        }
    }

    pub const fn intersect(self, other: AclPerms) -> AclPerms {
        AclPerms {
            read: self.read && other.read,
            write: self.write && other.write,
            execute: self.execute && other.execute,
        }
    }

    pub const fn union(self, other: AclPerms) -> AclPerms {
        AclPerms {
            read: self.read || other.read,
            write: self.write || other.write,
            execute: self.execute || other.execute,
        }
    }

    /// Renders the mask in `setfacl` notation, e.g. `r-x`.
    pub fn as_mode_string(&self) -> String {
        let mut out = String::with_capacity(3);
        out.push(if self.read { 'r' } else { '-' });
        out.push(if self.write { 'w' } else { '-' });
        out.push(if self.execute { 'x' } else { '-' });
        out
    }
}

impl fmt::Display for AclPerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_mode_string())
    }
}

/// Applies discretionary ACL edits to paths.
///
/// Implementations must not touch owner or mode bits.
pub trait AclBackend: Send + Sync + fmt::Debug {
    fn grant(&self, group: GroupId, perms: AclPerms, path: &Path, recursive: bool)
        -> AclResult<()>;

    fn revoke(&self, group: GroupId, path: &Path, recursive: bool) -> AclResult<()>;

    /// Removes every extended ACL entry from `path`.
    fn clear(&self, path: &Path, recursive: bool) -> AclResult<()>;

    /// Sets the ACL mask entry, the upper bound of every group grant on `path`.
    fn set_mask(&self, perms: AclPerms, path: &Path, recursive: bool) -> AclResult<()>;

    /// Called after the mode bits of `path` changed. A `chmod` rewrites the mask from the
    /// group bits; the kernel does this itself, in-process backends mirror it here.
    fn mode_changed(&self, _path: &Path, _mode: u32) -> AclResult<()> {
        Ok(())
    }
}
