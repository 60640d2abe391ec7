//! Runtime constants and filesystem path resolution.

use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;

/// Maximum number of entries kept in the store before eviction kicks in.
pub const MAX_ENTRIES: usize = 1000;

/// Maximum visible characters in a derived preview string.
pub const PREVIEW_LEN: usize = 100;

/// Maximum IPC frame body size (either direction).
pub const IPC_MAX_MSG: u32 = 16 * 1024 * 1024;

pub const SOCK_NAME: &str = "clipd.sock";
pub const DB_FILENAME: &str = "clipd.db";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Socket directory: `$XDG_RUNTIME_DIR`, falling back to `/tmp`.
pub fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

pub fn socket_path() -> PathBuf {
    runtime_dir().join(SOCK_NAME)
}

/// Database path under the per-user data directory, creating it if needed.
pub fn db_path() -> io::Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "clipd")
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
    std::fs::create_dir_all(dirs.data_dir())?;
    Ok(dirs.data_dir().join(DB_FILENAME))
}
