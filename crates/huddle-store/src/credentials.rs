//! Username/password records.
//!
//! The whole file is loaded into memory at startup. Registration appends one
//! record and only then updates the in-memory map, all under a single lock,
//! so a success reply always refers to a record already on disk. A failed
//! append is truncated away, and a record always starts on a fresh line.
//!
//! Passwords are stored and compared as plaintext for compatibility with
//! existing `users.txt` files; the comparison itself is constant-time.

use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use subtle::ConstantTimeEq;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

/// Parse `username,password` lines. Lines without exactly two fields, or
/// with an empty username, are skipped.
pub fn parse_records(contents: &str) -> HashMap<String, String> {
    let mut users = HashMap::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        let mut fields = line.split(',');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(username), Some(password), None) if !username.is_empty() => {
                users.insert(username.to_string(), password.to_string());
            }
            _ if line.is_empty() => {}
            _ => debug!(line = number + 1, "Skipping malformed credential record"),
        }
    }
    users
}

fn validate(username: &str, password: &str) -> Result<()> {
    if username.is_empty() || password.is_empty() {
        return Err(StoreError::InvalidCredential("empty username or password"));
    }
    if username.contains(',') || password.contains(',') {
        return Err(StoreError::InvalidCredential("comma in username or password"));
    }
    if [username, password]
        .iter()
        .any(|field| field.contains(|c: char| c == '\n' || c == '\r'))
    {
        return Err(StoreError::InvalidCredential("line break in username or password"));
    }
    Ok(())
}

pub struct CredentialStore {
    path: PathBuf,
    users: Mutex<HashMap<String, String>>,
}

impl CredentialStore {
    /// Load the credential file. A missing file means no users yet; it is
    /// created on the first registration.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users = match fs::read_to_string(&path).await {
            Ok(contents) => parse_records(&contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "Credential file not found, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), users = users.len(), "Credential store loaded");

        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.users.lock().await.contains_key(username)
    }

    pub async fn verify(&self, username: &str, password: &str) -> bool {
        let users = self.users.lock().await;
        users
            .get(username)
            .is_some_and(|stored| stored.as_bytes().ct_eq(password.as_bytes()).into())
    }

    /// Register a new user. The record is appended and synced before the
    /// in-memory map changes; a failed append leaves no trace in either.
    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        validate(username, password)?;

        let mut users = self.users.lock().await;
        if users.contains_key(username) {
            return Err(StoreError::AlreadyExists(username.to_string()));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        let len = file.metadata().await?.len();

        let mut record = format!("{username},{password}\n");
        if len > 0 {
            file.seek(SeekFrom::Start(len - 1)).await?;
            if file.read_u8().await? != b'\n' {
                warn!(path = %self.path.display(), "Credential file lacks a final newline");
                record.insert(0, '\n');
            }
        }

        let written = async {
            file.write_all(record.as_bytes()).await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            if let Err(undo) = file.set_len(len).await {
                warn!(path = %self.path.display(), error = %undo, "Failed to undo partial record");
            }
            return Err(e.into());
        }

        users.insert(username.to_string(), password.to_string());
        debug!(user = %username, "Registered new user");
        Ok(())
    }

    /// Every registered username, sorted.
    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }
}
