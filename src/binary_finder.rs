//! Locating the external aligner executable
//!
//! The aligner is searched next to the running executable first, so that a
//! bundled binary wins over a system install, and then on `PATH`.

use crate::error::{ReconcileError, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming an aligner executable explicitly.
pub const ALIGNER_ENV: &str = "MSA_RECONCILE_MUSCLE";

/// Executable names tried, in order.
pub const ALIGNER_NAMES: &[&str] = &["muscle", "muscle3"];

/// Find the aligner binary
///
/// Search order:
/// 1. `explicit`, when given (must exist)
/// 2. `$MSA_RECONCILE_MUSCLE`
/// 3. Same directory as current executable
/// 4. System PATH
pub fn find_aligner(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ReconcileError::AlignerNotFound(path.display().to_string()));
    }

    if let Some(path) = std::env::var_os(ALIGNER_ENV).map(PathBuf::from) {
        if path.exists() {
            return Ok(path);
        }
        log::warn!("{ALIGNER_ENV} points to missing file {}", path.display());
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            for name in ALIGNER_NAMES {
                let binary = exe_dir.join(name);
                if binary.is_file() {
                    return Ok(binary);
                }
            }
        }
    }

    for name in ALIGNER_NAMES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    Err(ReconcileError::AlignerNotFound(format!(
        "{} not found. Install MUSCLE 3.x, ensure it is in PATH or set {ALIGNER_ENV}.",
        ALIGNER_NAMES.join("/")
    )))
}

/// Whether an aligner can be found at all.
pub fn aligner_available() -> bool {
    find_aligner(None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_must_exist() {
        let missing = Path::new("/nonexistent/muscle");
        assert!(matches!(
            find_aligner(Some(missing)),
            Err(ReconcileError::AlignerNotFound(_))
        ));

        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(find_aligner(Some(file.path())).unwrap(), file.path());
    }
}
