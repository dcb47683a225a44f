//! # R2O Net
//!
//! TCP server core for the reverse-engineered R2 game protocol.
//!
//! The crate frames length-prefixed packets off many concurrent client
//! sockets, applies/removes the client's XOR obfuscation, decodes flat
//! fixed-width payloads, and feeds every observable event to the application
//! through one serialized dispatch stream.
//!
//! ## Layers
//! - [`core`]: the packet codec (framing, header quirks, obfuscation, wire
//!   fields)
//! - [`service`]: sessions (per-connection lifecycle and tasks) and the
//!   server (registry, capacity, accept timeout, dispatch)
//! - [`config`] / [`utils`]: configuration and logging plumbing
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use r2o_net::{Config, Packet, Resources, Server, ServerHandler, Session};
//!
//! struct Lobby;
//!
//! impl ServerHandler for Lobby {
//!     fn on_connection(&mut self, client: &Arc<Session>) {
//!         // identify the client here; accept or reject before the timeout
//!         let _ = client.accept();
//!     }
//!
//!     fn on_client_packet(&mut self, client: &Arc<Session>, packet: &Packet) {
//!         if packet.id == 5100 {
//!             client.error(packet.id, 2208232205, 0);
//!         }
//!     }
//!
//!     fn on_disconnect(&mut self, _client: &Arc<Session>) {}
//! }
//!
//! # async fn run() -> r2o_net::Result<()> {
//! let config = Config::default();
//! r2o_net::utils::logging::init(&config.logging);
//!
//! let server = Arc::new(Server::new(
//!     config.server,
//!     Resources {
//!         crypt_key: std::fs::read("resources/crypt.key")?,
//!         accept_packet: std::fs::read("resources/accept.bin")?,
//!     },
//! )?);
//! server.start(Lobby).await
//! # }
//! ```
//!
//! ## Security
//! The XOR pass is wire-format compatibility, not confidentiality: the key is
//! fixed, bodies longer than it travel partially in the clear, and nothing is
//! authenticated. Treat the transport as plaintext.

#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod utils;

pub use crate::config::{Config, LoggingConfig, ServerConfig};
pub use crate::core::codec::PacketCodec;
pub use crate::core::packet::Packet;
pub use crate::core::wire::{WireRead, WireWrite};
pub use crate::error::{NetError, Result};
pub use crate::service::server::{
    Resources, Server, ServerHandler, ERROR_IDENTIFICATION_TIMEOUT, ERROR_SERVER_IS_FULL,
};
pub use crate::service::session::Session;
