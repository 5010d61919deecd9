//! Utility functions for directory management and file output
//!
//! Paths follow the XDG Base Directory specification:
//!
//! - Config: `~/.config/secrules/` - `config.json`
//!
//! # Example
//!
//! ```
//! use secrules::utils::get_config_dir;
//!
//! if let Some(dir) = get_config_dir() {
//!     println!("config lives in {}", dir.display());
//! }
//! ```

use directories::ProjectDirs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "secrules", "secrules").map(|pd| pd.config_dir().to_path_buf())
}

pub fn ensure_config_dir() -> std::io::Result<PathBuf> {
    let dir = get_config_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "No home directory to place configuration in",
        )
    })?;

    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        DirBuilder::new()
            .mode(0o700) // User read/write/execute only
            .recursive(true)
            .create(&dir)?;
    }

    #[cfg(not(unix))]
    std::fs::create_dir_all(&dir)?;

    Ok(dir)
}

/// Writes `contents` to `path` atomically.
///
/// The data goes to a temporary file in the same directory, is flushed to
/// disk, then renamed over the target so readers never see a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;

    file.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot write file. Free up space and try again.",
            )
        } else {
            e.error
        }
    })?;
    Ok(())
}
