use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.tasksheet/`
pub fn tasksheet_root(home: &Path) -> PathBuf {
    tasksheet_core::config::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    tasksheet_root(home).join(DAEMON_SOCKET)
}
