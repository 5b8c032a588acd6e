//! # huddle-store
//!
//! Persisted state for the Huddle relay, both kept as plain append-only
//! text files so existing deployments keep working:
//!
//! - `users.txt`: one `username,password` record per line
//! - `journal.txt`: one timestamped line per session event

pub mod credentials;
pub mod journal;

mod error;

pub use credentials::CredentialStore;
pub use error::{Result, StoreError};
pub use journal::Journal;
