//! Plugin-driven forward HTTP/HTTPS/WebSocket proxy.
//!
//! Every accepted connection flows through the same stages:
//!
//! ```text
//! Client ──▶ net (bounded listener)
//!        ──▶ http (request codec)
//!        ──▶ plugin (ordered interceptor pipeline, firewall included)
//!        ──▶ proxy (forward upstream, CONNECT tunnel, or WebSocket relay)
//! ```
//!
//! The firewall is an ordinary plugin: it holds an ordered rule list
//! (first-match-wins, default allow) and answers the pipeline's
//! `handle_request` hook. Administrative edits to the rule list run
//! concurrently with traffic and are published as atomic snapshots.

// Core subsystems
pub mod config;
pub mod firewall;
pub mod http;
pub mod plugin;
pub mod proxy;

// Cross-cutting concerns
pub mod lifecycle;
pub mod net;
pub mod shell;

pub use config::ProxyConfig;
pub use firewall::Firewall;
pub use lifecycle::Shutdown;
pub use plugin::Pipeline;
pub use proxy::ProxyServer;
