//! File helpers shared by the loaders and the batch runner.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Supported FITS file extensions.
pub const FITS_EXTENSIONS: &[&str] = &["fit", "fits", "fts"];

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("File not found: '{}'", path.display())]
    NotFound { path: PathBuf },
    #[error("Not a regular file: '{}'", path.display())]
    NotAFile { path: PathBuf },
    #[error("Failed to create directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Check that `path` exists and is a regular file.
pub fn require_file(path: &Path) -> Result<(), FileError> {
    if !path.exists() {
        return Err(FileError::NotFound {
            path: path.to_path_buf(),
        });
    }
    if !path.is_file() {
        return Err(FileError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Create `dir` and any missing parents.
pub fn ensure_dir(dir: &Path) -> Result<(), FileError> {
    fs::create_dir_all(dir).map_err(|source| FileError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// True if the path has a FITS extension (case-insensitive).
pub fn is_fits_path(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| FITS_EXTENSIONS.iter().any(|f| f.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_output_path;

    #[test]
    fn test_is_fits_path() {
        assert!(is_fits_path(Path::new("cube.fits")));
        assert!(is_fits_path(Path::new("dir/IMAGE.FIT")));
        assert!(!is_fits_path(Path::new("catalog.txt")));
        assert!(!is_fits_path(Path::new("noext")));
    }

    #[test]
    fn test_require_file_missing() {
        let err = require_file(Path::new("/definitely/not/here.fits")).unwrap_err();
        assert!(matches!(err, FileError::NotFound { .. }));
        assert!(err.to_string().contains("here.fits"));
    }

    #[test]
    fn test_require_file_rejects_directory() {
        let dir = test_output_path("file_utils_dir");
        ensure_dir(&dir).unwrap();
        assert!(matches!(
            require_file(&dir),
            Err(FileError::NotAFile { .. })
        ));
    }
}
