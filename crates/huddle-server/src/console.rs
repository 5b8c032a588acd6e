//! Operator commands read from the server's stdin.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::handler::SessionContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Users currently online.
    List,
    /// Every registered user.
    ListAll,
    /// Stop accepting connections.
    Stop,
    /// Exit the process.
    Quit,
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let command = match line {
            "" => return None,
            "list" => ConsoleCommand::List,
            "listall" => ConsoleCommand::ListAll,
            "stop" => ConsoleCommand::Stop,
            "quit" => ConsoleCommand::Quit,
            other => ConsoleCommand::Unknown(other.to_string()),
        };
        Some(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleOutcome {
    /// The operator asked to exit.
    Quit,
    /// Input ended; the server keeps running without a console.
    InputClosed,
}

/// Forward stdin lines from a dedicated thread.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
        debug!("Console input closed");
    });
    rx
}

/// Execute console lines until `quit` or end of input. `stop` is notified
/// once when the operator asks the acceptor to stop.
pub async fn run_console(
    mut lines: mpsc::Receiver<String>,
    ctx: SessionContext,
    stop: Arc<Notify>,
) -> ConsoleOutcome {
    let mut stopped = false;

    while let Some(line) = lines.recv().await {
        let Some(command) = ConsoleCommand::parse(&line) else {
            continue;
        };

        match command {
            ConsoleCommand::List => {
                let names = ctx.registry.usernames().await;
                info!(online = names.len(), users = %names.join(" "), "Online users");
            }
            ConsoleCommand::ListAll => {
                let names = ctx.credentials.usernames().await;
                info!(registered = names.len(), users = %names.join(" "), "Registered users");
            }
            ConsoleCommand::Stop if stopped => info!("Server is already stopped"),
            ConsoleCommand::Stop => {
                stopped = true;
                stop.notify_one();
                info!("Stopping server");
            }
            ConsoleCommand::Quit => return ConsoleOutcome::Quit,
            ConsoleCommand::Unknown(other) => {
                warn!(command = %other, "Unknown command, expected list, listall, stop or quit")
            }
        }
    }

    ConsoleOutcome::InputClosed
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use huddle_store::{CredentialStore, Journal};
    use tempfile::TempDir;

    use crate::config::ServerConfig;

    async fn context(dir: &TempDir) -> SessionContext {
        let credentials = CredentialStore::open(dir.path().join("users.txt"))
            .await
            .unwrap();
        let journal = Journal::new(dir.path().join("journal.txt"));
        SessionContext::new(ServerConfig::default(), credentials, journal)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse(" list \n"), Some(ConsoleCommand::List));
        assert_eq!(ConsoleCommand::parse("listall"), Some(ConsoleCommand::ListAll));
        assert_eq!(ConsoleCommand::parse("stop"), Some(ConsoleCommand::Stop));
        assert_eq!(ConsoleCommand::parse("quit"), Some(ConsoleCommand::Quit));
        assert_eq!(
            ConsoleCommand::parse("kick bob"),
            Some(ConsoleCommand::Unknown("kick bob".into()))
        );
        assert_eq!(ConsoleCommand::parse("   "), None);
    }

    #[tokio::test]
    async fn test_stop_notifies_then_quit_returns() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;
        let stop = Arc::new(Notify::new());

        let (tx, rx) = mpsc::channel(8);
        for line in ["list", "listall", "", "stop", "stop", "bogus", "quit", "list"] {
            tx.send(line.to_string()).await.unwrap();
        }

        let outcome = run_console(rx, ctx, stop.clone()).await;
        assert_eq!(outcome, ConsoleOutcome::Quit);
        tokio::time::timeout(Duration::from_millis(100), stop.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_end_of_input_keeps_server_running() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;
        let stop = Arc::new(Notify::new());

        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        assert_eq!(
            run_console(rx, ctx, stop.clone()).await,
            ConsoleOutcome::InputClosed
        );
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stop.notified())
                .await
                .is_err()
        );
    }
}
