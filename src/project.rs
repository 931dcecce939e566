//! `.foundry.toml` discovery: a walk-up-to-root search from the current
//! directory, same shape as most dotfile-config lookups.

use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".foundry.toml";

/// Walks up from `start` looking for `.foundry.toml`, returning its path if
/// found before reaching the filesystem root.
pub fn discover_from(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start.to_path_buf());
    while let Some(candidate) = dir {
        let config_path = candidate.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            return Some(config_path);
        }
        dir = candidate.parent().map(|p| p.to_path_buf());
    }
    None
}

pub fn discover() -> Option<PathBuf> {
    std::env::current_dir().ok().and_then(|cwd| discover_from(&cwd))
}

/// Writes a minimal `.foundry.toml` at `dir`, failing if one already exists.
pub fn init(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(&path, "# Foundry project configuration\n")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn discover_from_finds_config_in_ancestor_directory() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join(CONFIG_FILE_NAME), "").unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(discover_from(&nested), Some(root.path().join(CONFIG_FILE_NAME)));
    }

    #[test]
    fn discover_from_returns_none_when_absent() {
        let root = tempdir().unwrap();
        assert_eq!(discover_from(root.path()), None);
    }

    #[test]
    fn init_refuses_to_overwrite_existing_config() {
        let root = tempdir().unwrap();
        init(root.path()).unwrap();
        assert!(init(root.path()).is_err());
    }
}
