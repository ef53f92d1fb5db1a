//! Proxy engine subsystem.
//!
//! # Data Flow
//! ```text
//! accepted socket
//!     → server.rs (supervisor: one task per connection, drain on shutdown)
//!     → handler.rs (parse → pipeline verdict → dispatch)
//!         → upstream.rs (ordinary forward, CONNECT tunnel, WebSocket 101)
//!         → relay.rs (opaque bidirectional byte copy)
//! ```
//!
//! # Design Decisions
//! - One exchange per connection; the proxy never re-frames tunneled bytes
//! - Errors stay local to their connection: the handler answers the client
//!   with a synthesized response and closes, nothing propagates
//! - The relay half-closes the opposite write side on EOF so in-flight
//!   bytes drain before the sockets drop

pub mod handler;
pub mod relay;
pub mod server;
pub mod upstream;

pub use server::ProxyServer;

use thiserror::Error;

/// Error type for the supervisor loop. Accept failures are logged and
/// survived inside the loop; everything else is handled per connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
