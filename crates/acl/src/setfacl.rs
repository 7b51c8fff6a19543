//! `setfacl` process backend.

use crate::{AclBackend, AclError, AclPerms, AclResult, GroupId};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Applies ACL edits by running `setfacl`.
///
/// A non-zero exit status or anything written to stderr is treated as failure.
#[derive(Clone, Debug)]
pub struct Setfacl {
    program: PathBuf,
}

impl Default for Setfacl {
    fn default() -> Self {
        Self {
            program: PathBuf::from("setfacl"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AclEdit {
    Grant(GroupId, AclPerms),
    Revoke(GroupId),
    Clear,
    Mask(AclPerms),
}

impl Setfacl {
    /// Uses a specific `setfacl` binary instead of resolving it from `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, edit: AclEdit, path: &Path, recursive: bool) -> AclResult<()> {
        let args = setfacl_args(edit, path, recursive);
        let command_line = render_command(&self.program, &args);
        tracing::debug!("running {}", command_line);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| AclError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        if !output.status.success() || !stderr.is_empty() {
            return Err(AclError::Command {
                command: command_line,
                status: output.status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

impl AclBackend for Setfacl {
    fn grant(
        &self,
        group: GroupId,
        perms: AclPerms,
        path: &Path,
        recursive: bool,
    ) -> AclResult<()> {
        self.run(AclEdit::Grant(group, perms), path, recursive)
    }

    fn revoke(&self, group: GroupId, path: &Path, recursive: bool) -> AclResult<()> {
        self.run(AclEdit::Revoke(group), path, recursive)
    }

    fn clear(&self, path: &Path, recursive: bool) -> AclResult<()> {
        self.run(AclEdit::Clear, path, recursive)
    }

    fn set_mask(&self, perms: AclPerms, path: &Path, recursive: bool) -> AclResult<()> {
        self.run(AclEdit::Mask(perms), path, recursive)
    }
}

/// Builds the `setfacl` argument list for one edit.
///
/// The path always follows `--` so names starting with a dash are never read as options.
pub(crate) fn setfacl_args(edit: AclEdit, path: &Path, recursive: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(5);
    if recursive {
        args.push("-R".into());
    }
    match edit {
        AclEdit::Grant(group, perms) => {
            args.push("-m".into());
            args.push(format!("g:{}:{}", group, perms).into());
        }
        AclEdit::Revoke(group) => {
            args.push("-x".into());
            args.push(format!("g:{}", group).into());
        }
        AclEdit::Clear => args.push("-b".into()),
        AclEdit::Mask(perms) => {
            args.push("-m".into());
            args.push(format!("m::{}", perms).into());
        }
    }
    args.push("--".into());
    args.push(path.as_os_str().to_owned());
    args
}

fn render_command(program: &Path, args: &[OsString]) -> String {
    let mut out = program.display().to_string();
    for arg in args {
        out.push(' ');
        out.push_str(&arg.to_string_lossy());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn grant_args_name_group_and_mask() {
        let args = setfacl_args(
            AclEdit::Grant(GroupId::new(1500), AclPerms::READ_TRAVERSE),
            Path::new("/datasets/abc"),
            false,
        );
        assert_eq!(as_strings(args), ["-m", "g:1500:r-x", "--", "/datasets/abc"]);
    }

    #[test]
    fn recursive_revoke_args() {
        let args = setfacl_args(
            AclEdit::Revoke(GroupId::new(7)),
            Path::new("/lake/p/s"),
            true,
        );
        assert_eq!(as_strings(args), ["-R", "-x", "g:7", "--", "/lake/p/s"]);
    }

    #[test]
    fn mask_args() {
        let args = setfacl_args(
            AclEdit::Mask(AclPerms::READ_TRAVERSE),
            Path::new("/lake/p/s"),
            false,
        );
        assert_eq!(as_strings(args), ["-m", "m::r-x", "--", "/lake/p/s"]);
    }

    #[test]
    fn clear_args_remove_all_entries() {
        let args = setfacl_args(AclEdit::Clear, Path::new("-odd-name"), false);
        assert_eq!(as_strings(args), ["-b", "--", "-odd-name"]);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let backend = Setfacl::with_program("/nonexistent/bin/setfacl");
        let err = backend
            .clear(Path::new("/tmp"), false)
            .expect_err("spawning a missing binary must fail");
        assert!(matches!(err, AclError::Spawn { .. }));
    }

    #[test]
    fn failing_program_is_a_command_error() {
        // `false` ignores its arguments and exits non-zero.
        let backend = Setfacl::with_program("false");
        let err = backend
            .revoke(GroupId::new(1), Path::new("/tmp"), false)
            .expect_err("non-zero exit must fail");
        assert!(matches!(err, AclError::Command { .. }));
    }
}
