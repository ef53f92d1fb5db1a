//! Plugin subsystem.
//!
//! # Data Flow
//! ```text
//! bootstrap assembles Vec<Arc<dyn ProxyPlugin>>   (fixed order, fixed set)
//!     → pipeline.rs (initialize in order, isolate failures)
//!     → per request: handle_request chain (first deny short-circuits)
//!     → per response: handle_response chain (bytes threaded through)
//!     → shutdown: finalize in reverse order
//! ```
//!
//! # Design Decisions
//! - No runtime discovery or dynamic loading: the plugin set is an
//!   explicit list handed to `Pipeline::new` at startup
//! - Plugins needing each other receive handles at construction
//!   (dependency injection), never a lookup into a global manager
//! - Hooks are synchronous; they run inline in the connection's task and
//!   must not block on I/O

pub mod pipeline;

use std::sync::Arc;

use thiserror::Error;

use crate::http::HttpRequest;

/// Error raised by a plugin hook.
///
/// The pipeline decides what a failure means per hook: initialization
/// failures drop the plugin, request-hook failures deny the request
/// (fail-closed), response-hook failures skip the plugin's step.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PluginError(String);

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// A shell command exposed by a plugin: takes argument tokens, returns an
/// optional line of output for the operator.
pub type CommandFn = Arc<dyn Fn(&[String]) -> Option<String> + Send + Sync>;

/// An interceptor in the proxy's request/response chain.
///
/// Implementations hold their own state behind interior mutability; hooks
/// take `&self` and run concurrently across connections.
pub trait ProxyPlugin: Send + Sync {
    /// Unique name within one pipeline.
    fn name(&self) -> &str;

    /// One-time setup, called in registration order before traffic flows.
    fn initialize(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// One-time teardown, called in reverse registration order at shutdown.
    fn finalize(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Inspect a request. `Ok(true)` lets the chain continue; `Ok(false)`
    /// denies the request and stops the chain.
    fn handle_request(&self, _request: &HttpRequest) -> Result<bool, PluginError> {
        Ok(true)
    }

    /// Inspect or rewrite raw response bytes. The returned buffer feeds the
    /// next plugin in the chain.
    fn handle_response(
        &self,
        response: Vec<u8>,
        _request: &HttpRequest,
    ) -> Result<Vec<u8>, PluginError> {
        Ok(response)
    }

    /// Shell commands this plugin contributes to the command registry.
    fn commands(&self) -> Vec<(String, CommandFn)> {
        Vec::new()
    }
}

pub use pipeline::{Pipeline, PipelineError};
