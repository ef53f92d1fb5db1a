//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     load config → assemble plugins → initialize pipeline → bind → serve
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGINT/Ctrl+C → broadcast → stop accepting → drain connections
//!     → finalize plugins (reverse order) → exit
//! ```
//!
//! # Design Decisions
//! - Shutdown is a broadcast: every long-running task subscribes
//! - Draining has a deadline; connections still open afterwards are
//!   forcibly closed

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
