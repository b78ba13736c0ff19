use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path) -> io::Result<()>;

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path) -> io::Result<()>;

    /// Create a new file readable only by the owner. Fails if it already exists.
    fn create_private_file(path: &Path) -> io::Result<File>;

    /// Root data directory for vieagent.
    /// Unix: `~/.vieagent`, Windows: `%APPDATA%\vieagent`.
    fn data_dir() -> PathBuf;
}

/// `VIEAGENT_DATA_DIR` wins over the platform default.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var("VIEAGENT_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
