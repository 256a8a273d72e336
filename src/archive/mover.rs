use crate::error::{PipelineError, Result};
use crate::utils::filename::versioned_destination;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rename `src` to `dest`, copying then deleting when a rename cannot cross
/// filesystems.
pub fn move_file(src: &Path, dest: &Path) -> Result<()> {
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !src.is_file() {
                return Err(rename_err.into());
            }
            std::fs::copy(src, dest).map_err(|_| PipelineError::Io(rename_err))?;
            std::fs::remove_file(src)?;
            Ok(())
        }
    }
}

/// Move `src` into `dest_dir` under its own name, adding `_v{n}` on collision.
pub fn move_versioned(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file_name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::Config(format!("Not a file path: {}", src.display())))?;

    std::fs::create_dir_all(dest_dir)?;
    let dest = versioned_destination(dest_dir, &file_name);
    move_file(src, &dest)?;

    debug!(from = %src.display(), to = %dest.display(), "Moved file");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_move_versioned_keeps_both_copies() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("loaded");

        let first = temp.path().join("granule.event.csv");
        std::fs::write(&first, b"first").unwrap();
        let moved = move_versioned(&first, &archive).unwrap();
        assert_eq!(moved, archive.join("granule.event.csv"));
        assert!(!first.exists());

        std::fs::write(&first, b"second").unwrap();
        let moved = move_versioned(&first, &archive).unwrap();
        assert_eq!(moved, archive.join("granule_v1.event.csv"));
        assert_eq!(std::fs::read(&moved).unwrap(), b"second");
        assert_eq!(
            std::fs::read(archive.join("granule.event.csv")).unwrap(),
            b"first"
        );
    }

    #[test]
    fn test_move_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.csv");
        assert!(move_versioned(&missing, temp.path()).is_err());
    }
}
