//! Sandbox-root path helpers (spec §5/§6): `<sandbox_root>/<project_id>/` is
//! the cwd every provider CLI is spawned with, and the root `StandardValidator`
//! resolves file-existence/grep criteria against.

use std::path::{Path, PathBuf};

pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(sandbox_root: impl Into<PathBuf>, project_id: &str) -> Self {
        Sandbox {
            root: sandbox_root.into().join(project_id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// True only for paths that are non-absolute, free of `..` components,
    /// and resolve to somewhere under the sandbox root (spec §4.6.1).
    pub fn is_path_sanctioned(&self, candidate: &str) -> bool {
        let p = Path::new(candidate);
        if p.is_absolute() {
            return false;
        }
        if p.components().any(|c| c == std::path::Component::ParentDir) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn joins_sandbox_root_and_project_id() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), "acme");
        assert_eq!(sandbox.path(), dir.path().join("acme"));
    }

    #[test]
    fn rejects_absolute_and_traversal_paths() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), "acme");
        assert!(!sandbox.is_path_sanctioned("/etc/passwd"));
        assert!(!sandbox.is_path_sanctioned("../escape"));
        assert!(sandbox.is_path_sanctioned("src/a.ts"));
    }
}
