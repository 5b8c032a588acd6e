//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use huddle_shared::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, MAX_FRAME_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address the chat listener binds to.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:8080`
    pub listen_addr: SocketAddr,

    /// Plain-text `username,password` file.
    /// Env: `CREDENTIALS_PATH`
    /// Default: `users.txt`
    pub credentials_path: PathBuf,

    /// Append-only session journal.
    /// Env: `JOURNAL_PATH`
    /// Default: `journal.txt`
    pub journal_path: PathBuf,

    /// Largest frame body accepted or sent, in bytes.
    /// Env: `MAX_FRAME_SIZE`
    /// Default: `65535`
    pub max_frame_size: usize,

    /// Slice size used when re-chunking images, in bytes. Always below
    /// `max_frame_size`.
    /// Env: `CHUNK_SIZE`
    /// Default: `8192`
    pub chunk_size: usize,

    /// Cap on one reassembled payload, in bytes.
    /// Env: `MAX_PAYLOAD_SIZE`
    /// Default: 16 MiB
    pub max_payload_size: usize,

    /// Depth of each session's outbound queue.
    /// Env: `OUTBOUND_QUEUE`
    /// Default: `256`
    pub outbound_queue: usize,

    // -- Compatibility switches --

    /// Failed logins allowed before the connection is dropped (0 = unlimited).
    /// Env: `MAX_LOGIN_ATTEMPTS`
    /// Default: `0`
    pub max_login_attempts: u32,

    /// Whether one username may hold several live sessions at once.
    /// Env: `ALLOW_DUPLICATE_LOGINS` (true/false)
    /// Default: `true`
    pub allow_duplicate_logins: bool,

    /// Whether to read operator commands from stdin.
    /// Env: `CONSOLE` (true/false)
    /// Default: `true`
    pub console_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 8080).into(),
            credentials_path: PathBuf::from("users.txt"),
            journal_path: PathBuf::from("journal.txt"),
            max_frame_size: MAX_FRAME_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            outbound_queue: 256,
            max_login_attempts: 0,
            allow_duplicate_logins: true,
            console_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var("LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Ok(path) = std::env::var("CREDENTIALS_PATH") {
            config.credentials_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("JOURNAL_PATH") {
            config.journal_path = PathBuf::from(path);
        }

        if let Some(size) = parse_var("MAX_FRAME_SIZE") {
            config.max_frame_size = size;
        }

        if let Some(size) = parse_var("CHUNK_SIZE") {
            config.chunk_size = size;
        }

        if let Some(size) = parse_var("MAX_PAYLOAD_SIZE") {
            config.max_payload_size = size;
        }

        if let Some(depth) = parse_var("OUTBOUND_QUEUE") {
            config.outbound_queue = depth;
        }

        // -- Compatibility switches --

        if let Some(n) = parse_var("MAX_LOGIN_ATTEMPTS") {
            config.max_login_attempts = n;
        }

        if let Ok(val) = std::env::var("ALLOW_DUPLICATE_LOGINS") {
            config.allow_duplicate_logins = val != "false" && val != "0";
        }

        if let Ok(val) = std::env::var("CONSOLE") {
            config.console_enabled = val != "false" && val != "0";
        }

        config.normalized()
    }

    /// Clamp values into a consistent range.
    pub fn normalized(mut self) -> Self {
        if self.max_frame_size == 0 || self.max_frame_size > MAX_FRAME_SIZE {
            tracing::warn!(
                value = self.max_frame_size,
                max = MAX_FRAME_SIZE,
                "MAX_FRAME_SIZE out of range, using maximum"
            );
            self.max_frame_size = MAX_FRAME_SIZE;
        }

        // Slices must leave room below the frame limit.
        if self.chunk_size == 0 || self.chunk_size >= self.max_frame_size {
            let clamped = DEFAULT_CHUNK_SIZE.min(self.max_frame_size / 2).max(1);
            tracing::warn!(
                value = self.chunk_size,
                clamped,
                "CHUNK_SIZE must be below MAX_FRAME_SIZE, clamping"
            );
            self.chunk_size = clamped;
        }

        if self.outbound_queue == 0 {
            self.outbound_queue = 1;
        }

        self
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(var = name, value = %value, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_frame_size, 65535);
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.max_login_attempts, 0);
        assert!(config.allow_duplicate_logins);
    }

    #[test]
    fn test_chunk_size_clamped_below_frame_size() {
        let config = ServerConfig {
            max_frame_size: 1000,
            chunk_size: 1000,
            ..ServerConfig::default()
        }
        .normalized();
        assert!(config.chunk_size < config.max_frame_size);
        assert_eq!(config.chunk_size, 500);
    }

    #[test]
    fn test_frame_size_capped_at_prefix_limit() {
        let config = ServerConfig {
            max_frame_size: 1 << 20,
            ..ServerConfig::default()
        }
        .normalized();
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
    }
}
