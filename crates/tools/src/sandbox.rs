//! Workspace path scoping for the file tools.
//!
//! Relative paths resolve against the workspace root. With restriction on,
//! a path that leaves the root (lexically through `..`, or through a
//! symlink) is denied. A few credential locations are always denied.

use clawloop_core::error::ToolError;
use std::path::{Component, Path, PathBuf};

const FORBIDDEN_HOME_DIRS: &[&str] = &[".ssh", ".gnupg", ".aws"];
const FORBIDDEN_FILES: &[&str] = &["/etc/shadow", "/etc/sudoers"];

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    restrict: bool,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, restrict: bool) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or_else(|_| normalize(&root));
        Self { root, restrict }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_restricted(&self) -> bool {
        self.restrict
    }

    /// Resolve `path` for `tool`, enforcing the workspace boundary.
    pub fn resolve(&self, tool: &str, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::invalid(tool, "path must not be empty"));
        }
        let raw = Path::new(path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };
        let resolved = normalize(&joined);

        if is_forbidden(&resolved) {
            return Err(ToolError::denied(tool, format!("access to '{path}' is not allowed")));
        }

        if self.restrict {
            let outside = || {
                ToolError::denied(tool, format!("path '{path}' is outside the workspace"))
            };
            if !resolved.starts_with(&self.root) {
                return Err(outside());
            }
            // Symlinks inside the workspace may still point elsewhere.
            if let Some(real) = canonical_prefix(&resolved)
                && !real.starts_with(&self.root)
            {
                return Err(outside());
            }
        }
        Ok(resolved)
    }
}

/// Lexically remove `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonical form of the longest existing ancestor of `path`, with the
/// missing tail re-attached.
fn canonical_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            let mut real = real;
            for part in tail.iter().rev() {
                real.push(part);
            }
            return Some(real);
        }
        tail.push(existing.file_name()?.to_os_string());
        existing = existing.parent()?;
    }
}

fn is_forbidden(path: &Path) -> bool {
    if FORBIDDEN_FILES.iter().any(|f| path == Path::new(f)) {
        return true;
    }
    match std::env::var_os("HOME") {
        Some(home) => {
            let home = PathBuf::from(home);
            FORBIDDEN_HOME_DIRS
                .iter()
                .any(|dir| path.starts_with(home.join(dir)))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_paths_resolve_inside_root() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path(), true);
        let p = ws.resolve("read_file", "notes/today.md").unwrap();
        assert_eq!(p, ws.root().join("notes/today.md"));
        assert_eq!(ws.resolve("list_dir", ".").unwrap(), ws.root());
    }

    #[test]
    fn traversal_is_denied_when_restricted() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path(), true);
        let err = ws.resolve("read_file", "../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
        assert!(ws.resolve("read_file", "/etc/hosts").is_err());
        // .. that stays inside is fine
        assert!(ws.resolve("read_file", "a/../b.txt").is_ok());
    }

    #[test]
    fn unrestricted_allows_outside_paths() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path(), false);
        assert_eq!(
            ws.resolve("read_file", "/tmp/x.txt").unwrap(),
            PathBuf::from("/tmp/x.txt")
        );
    }

    #[test]
    fn credential_files_always_denied() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path(), false);
        assert!(ws.resolve("read_file", "/etc/shadow").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_denied() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let ws = Workspace::new(dir.path(), true);
        assert!(ws.resolve("read_file", "link/secret.txt").is_err());
    }

    #[test]
    fn empty_path_is_invalid() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path(), true);
        assert!(matches!(
            ws.resolve("read_file", "  ").unwrap_err(),
            ToolError::InvalidArguments { .. }
        ));
    }
}
