// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-user working directory holding the agent's sockets and log file.

use std::env;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::{APP_DIR, FORWARDER_SOCKET, LOGGER_FILE, LOGGER_SOCKET};
use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorkDir { root: root.into() }
    }

    /// Uses `root` when given, `<home>/monit-go` otherwise.
    pub fn resolve(root: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(root) = root {
            return Ok(Self::new(root));
        }
        let home = env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::new(PathBuf::from(home).join(APP_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn forwarder_socket(&self) -> PathBuf {
        self.root.join(FORWARDER_SOCKET)
    }

    pub fn logger_socket(&self) -> PathBuf {
        self.root.join(LOGGER_SOCKET)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOGGER_FILE)
    }

    /// Creates the directory (mode 0700), removes sockets left behind by a
    /// previous run and makes sure the log file exists.
    pub fn setup(&self) -> Result<(), ConfigError> {
        let err = |source| ConfigError::WorkDir {
            path: self.root.clone(),
            source,
        };

        if !self.root.is_dir() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&self.root)
                .map_err(err)?;
        }

        for socket in [self.forwarder_socket(), self.logger_socket()] {
            match fs::remove_file(&socket) {
                Ok(()) => debug!("removed stale socket {}", socket.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(err(e)),
            }
        }

        OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.log_file())
            .map_err(err)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_setup_creates_layout() {
        let home = tempfile::tempdir().unwrap();
        let workdir = WorkDir::new(home.path().join(APP_DIR));

        workdir.setup().unwrap();

        let mode = fs::metadata(workdir.root()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        assert!(workdir.log_file().is_file());
        assert_eq!(workdir.forwarder_socket(), workdir.root().join("fwd.sock"));
        assert_eq!(workdir.logger_socket(), workdir.root().join("log.sock"));
    }

    #[test]
    fn test_setup_clears_stale_sockets_and_keeps_log() {
        let root = tempfile::tempdir().unwrap();
        let workdir = WorkDir::new(root.path());
        fs::write(workdir.forwarder_socket(), b"").unwrap();
        fs::write(workdir.logger_socket(), b"").unwrap();
        fs::write(workdir.log_file(), b"6: monit-logger Logger started\n").unwrap();

        workdir.setup().unwrap();

        assert!(!workdir.forwarder_socket().exists());
        assert!(!workdir.logger_socket().exists());
        assert_eq!(
            fs::read_to_string(workdir.log_file()).unwrap(),
            "6: monit-logger Logger started\n"
        );
    }

    #[test]
    #[serial]
    fn test_resolve_defaults_to_home() {
        let home = tempfile::tempdir().unwrap();
        let previous = env::var_os("HOME");
        env::set_var("HOME", home.path());

        let workdir = WorkDir::resolve(None).unwrap();
        assert_eq!(workdir.root(), home.path().join("monit-go"));

        match previous {
            Some(previous) => env::set_var("HOME", previous),
            None => env::remove_var("HOME"),
        }
    }

    #[test]
    fn test_resolve_prefers_override() {
        let workdir = WorkDir::resolve(Some(Path::new("/srv/monit"))).unwrap();
        assert_eq!(workdir.log_file(), Path::new("/srv/monit/monit-go.log"));
    }
}
