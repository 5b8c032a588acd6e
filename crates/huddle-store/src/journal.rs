//! Append-only session journal.
//!
//! Each entry is one line: `yyyy-MM-dd HH:mm:ss <message>` in local time.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format one journal line, trailing newline included. Returns `None` for a
/// blank message.
pub fn format_entry(at: DateTime<Local>, message: &str) -> Option<String> {
    let message = message.trim_end_matches(&['\r', '\n'][..]);
    if message.trim().is_empty() {
        return None;
    }
    Some(format!("{} {}\n", at.format(TIMESTAMP_FORMAT), message))
}

pub struct Journal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    /// The file is created lazily on the first entry.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, message: &str) -> Result<()> {
        let Some(entry) = format_entry(Local::now(), message) else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append, logging instead of returning a failure. Journal trouble never
    /// affects a session.
    pub async fn record(&self, message: &str) {
        if let Err(e) = self.append(message).await {
            warn!(path = %self.path.display(), error = %e, "Failed to write journal entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_entry_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            format_entry(at, "登录成功: 用户[alice]\n").as_deref(),
            Some("2024-03-09 07:05:01 登录成功: 用户[alice]\n")
        );
        assert_eq!(format_entry(at, "  \n"), None);
    }

    #[tokio::test]
    async fn test_appends_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("journal.txt"));

        journal.append("first").await.unwrap();
        journal.append("").await.unwrap();
        journal.record("second").await;

        let contents = std::fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" first"));
        assert!(lines[1].ends_with(" second"));
    }
}
