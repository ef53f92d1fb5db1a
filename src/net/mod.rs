//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id generation, active-count tracking)
//!     → hand off to the proxy engine
//! ```
//!
//! # Design Decisions
//! - A semaphore bounds concurrent connections; accept waits for a permit
//! - Each connection holds its permit for its whole lifetime, so the bound
//!   survives handler panics
//! - Tracking is what lets shutdown drain in-flight connections

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
