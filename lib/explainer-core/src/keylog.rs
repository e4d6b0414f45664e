//! Handshake secret logging in the NSS key log format
//! (`LABEL <client_random hex> <secret hex>`), readable by traffic analyzers.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rustls::KeyLog;
use tracing::{debug, warn};

use crate::{ExplainerError, Result};

/// Writes one line per handshake secret to a file truncated at creation
pub struct KeyLogWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl KeyLogWriter {
    /// Create (or truncate) the log file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = options.open(&path).map_err(|e| {
            ExplainerError::InvalidConfiguration(format!(
                "Failed to open key log {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!("Writing TLS key log to {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

/// Render a single key log line, without the trailing newline
pub fn format_line(label: &str, client_random: &[u8], secret: &[u8]) -> String {
    format!(
        "{} {} {}",
        label,
        hex::encode(client_random),
        hex::encode(secret)
    )
}

impl KeyLog for KeyLogWriter {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        let line = format_line(label, client_random, secret);
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("Failed to write key log entry to {}: {}", self.path.display(), e);
        }
    }

    fn will_log(&self, _label: &str) -> bool {
        true
    }
}

impl std::fmt::Debug for KeyLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLogWriter").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        let line = format_line("CLIENT_RANDOM", &[0x3a, 0x3a], &[0x01, 0xff]);
        assert_eq!(line, "CLIENT_RANDOM 3a3a 01ff");
    }

    #[test]
    fn test_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sslkeylog.log");
        let writer = KeyLogWriter::create(&path).unwrap();

        writer.log("CLIENT_HANDSHAKE_TRAFFIC_SECRET", &[0xaa; 4], &[0x01; 2]);
        writer.log("SERVER_HANDSHAKE_TRAFFIC_SECRET", &[0xaa; 4], &[0x02; 2]);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "CLIENT_HANDSHAKE_TRAFFIC_SECRET aaaaaaaa 0101",
                "SERVER_HANDSHAKE_TRAFFIC_SECRET aaaaaaaa 0202",
            ]
        );
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sslkeylog.log");
        std::fs::write(&path, "stale contents\n").unwrap();

        let writer = KeyLogWriter::create(&path).unwrap();
        writer.log("EXPORTER_SECRET", &[0x00], &[0x00]);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "EXPORTER_SECRET 00 00\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sslkeylog.log");
        KeyLogWriter::create(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let err = KeyLogWriter::create("/definitely/not/here/sslkeylog.log").unwrap_err();
        assert!(matches!(err, ExplainerError::InvalidConfiguration(_)));
    }
}
