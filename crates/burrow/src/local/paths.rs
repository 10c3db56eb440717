//! Workspace path containment.
//!
//! Every requested path is resolved against the workspace root and verified
//! to stay inside it, regardless of `..` traversal, absolute-path arguments,
//! or symlinks along the way.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{ExecError, ExecResult};

/// Resolve `requested` against `root`, failing with `PathOutsideWorkspace`
/// if the result would escape the root.
///
/// The returned path may not exist yet (writes create it); containment is
/// checked both lexically and against the canonicalized deepest existing
/// ancestor so symlinks cannot smuggle the path out.
pub(crate) fn resolve_path(root: &Path, requested: &str) -> ExecResult<PathBuf> {
    let root_canon = root.canonicalize()?;

    let candidate = {
        let requested = Path::new(requested);
        if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            root_canon.join(requested)
        }
    };

    // Lexical normalization: fold `.` and `..` without touching the
    // filesystem, rejecting any traversal above the filesystem root.
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ExecError::PathOutsideWorkspace(requested.to_string()));
                }
            }
            other => normalized.push(other),
        }
    }

    if !normalized.starts_with(&root_canon) {
        return Err(ExecError::PathOutsideWorkspace(requested.to_string()));
    }

    // Symlink check: canonicalize the deepest existing ancestor and re-attach
    // the not-yet-existing tail.
    let mut existing = normalized.clone();
    let mut tail: Vec<OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => tail.push(name.to_os_string()),
            None => break,
        }
        if !existing.pop() {
            break;
        }
    }

    let mut resolved = existing.canonicalize()?;
    for name in tail.iter().rev() {
        resolved.push(name);
    }

    if !resolved.starts_with(&root_canon) {
        return Err(ExecError::PathOutsideWorkspace(requested.to_string()));
    }

    Ok(resolved)
}

/// Validate an execution target id before it becomes a directory name.
pub(crate) fn validate_target(id: &str) -> ExecResult<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(ExecError::InvalidConfiguration(format!(
            "invalid execution target '{id}'"
        )));
    }
    let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !id.chars().all(valid) || id.starts_with('.') {
        return Err(ExecError::InvalidConfiguration(format!(
            "invalid execution target '{id}'"
        )));
    }
    Ok(())
}
