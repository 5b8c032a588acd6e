//! # huddle-server
//!
//! Multi-user chat relay. Clients log in over a length-framed TCP stream,
//! then exchange room broadcasts, private messages and chunked images
//! through the server.
//!
//! - [`handler`] drives one connection from login to leave
//! - [`router`] classifies and delivers each message
//! - [`registry`] tracks who is online
//! - [`server`] accepts connections and stops gracefully
//! - [`console`] reads operator commands from stdin

pub mod config;
pub mod console;
pub mod error;
pub mod handler;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::ServerError;
pub use handler::{handle_connection, SessionContext};
pub use server::Server;
