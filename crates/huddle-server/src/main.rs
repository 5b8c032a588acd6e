//! # huddle-server
//!
//! Chat relay binary. Reads its settings from the environment, loads the
//! credential file, listens for clients and takes operator commands on
//! stdin.

use std::future;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_server::console::{self, ConsoleOutcome};
use huddle_server::{Server, ServerConfig, SessionContext};
use huddle_store::{CredentialStore, Journal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle_server=debug")),
        )
        .init();

    info!("Starting Huddle chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        max_login_attempts = config.max_login_attempts,
        allow_duplicate_logins = config.allow_duplicate_logins,
        "Compatibility settings"
    );

    // -----------------------------------------------------------------------
    // 3. Open persisted state
    // -----------------------------------------------------------------------
    let credentials = CredentialStore::open(config.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open credential file {}",
                config.credentials_path.display()
            )
        })?;
    let users = credentials.len().await;
    info!(
        users,
        path = %credentials.path().display(),
        "Loaded credentials"
    );

    let journal = Journal::new(config.journal_path.clone());
    info!(path = %journal.path().display(), "Session journal ready");

    let listen_addr = config.listen_addr;
    let console_enabled = config.console_enabled;
    let ctx = SessionContext::new(config, credentials, journal);

    // -----------------------------------------------------------------------
    // 4. Bind the listener (the only fatal failure after startup)
    // -----------------------------------------------------------------------
    let server = Server::bind(listen_addr, ctx.clone())
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %server.local_addr()?, "Chat server listening");

    // -----------------------------------------------------------------------
    // 5. Serve until quit or Ctrl+C; `stop` only closes the listener
    // -----------------------------------------------------------------------
    let stop = Arc::new(Notify::new());
    let stop_signal = stop.clone();
    let serve = server.run(async move { stop_signal.notified().await });

    let console = async {
        if console_enabled {
            let lines = console::spawn_stdin_reader();
            if console::run_console(lines, ctx.clone(), stop).await == ConsoleOutcome::Quit {
                return;
            }
            info!("Console input closed, server keeps running");
        }
        future::pending::<()>().await
    };

    tokio::pin!(serve);
    tokio::pin!(console);
    let mut serving = true;

    loop {
        tokio::select! {
            () = &mut serve, if serving => {
                serving = false;
                info!("Server stopped, type quit to exit");
            }
            () = &mut console => {
                info!("Quit requested from console");
                break;
            }
            Ok(()) = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    let online = ctx.registry.len().await;
    info!(online, "Shutting down");
    Ok(())
}
