//! Ordered plugin dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::http::HttpRequest;
use crate::plugin::{CommandFn, ProxyPlugin};

/// Error raised while assembling or initializing a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("duplicate plugin name {0:?}")]
    DuplicatePlugin(String),

    #[error("plugin {plugin:?} registers command {command:?} which is already taken")]
    DuplicateCommand { plugin: String, command: String },
}

/// The fixed, ordered chain of plugins every request and response passes
/// through.
///
/// The plugin set and its order are immutable after construction; only a
/// plugin's internal state (the firewall's rule list, for instance) changes
/// at runtime. Plugins whose `initialize` fails are dropped from the
/// operating set and everything else keeps running.
pub struct Pipeline {
    plugins: Vec<Arc<dyn ProxyPlugin>>,
    commands: HashMap<String, CommandFn>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field(
                "commands",
                &self.commands.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    /// Assemble a pipeline from an explicit plugin list.
    ///
    /// Plugin names must be unique; registration order is dispatch order.
    pub fn new(plugins: Vec<Arc<dyn ProxyPlugin>>) -> Result<Self, PipelineError> {
        for (i, plugin) in plugins.iter().enumerate() {
            if plugins[..i].iter().any(|p| p.name() == plugin.name()) {
                return Err(PipelineError::DuplicatePlugin(plugin.name().to_string()));
            }
        }
        Ok(Self {
            plugins,
            commands: HashMap::new(),
        })
    }

    /// Initialize every plugin in registration order.
    ///
    /// A failing plugin is logged and removed from the operating set; the
    /// rest of the chain still loads. Commands are collected from the
    /// plugins that survive.
    pub fn initialize(&mut self) -> Result<(), PipelineError> {
        let mut operating = Vec::with_capacity(self.plugins.len());
        for plugin in self.plugins.drain(..) {
            match plugin.initialize() {
                Ok(()) => {
                    tracing::debug!(plugin = plugin.name(), "plugin initialized");
                    operating.push(plugin);
                }
                Err(err) => {
                    tracing::error!(
                        plugin = plugin.name(),
                        error = %err,
                        "plugin failed to initialize; disabling it"
                    );
                }
            }
        }
        self.plugins = operating;

        for plugin in &self.plugins {
            for (command, handler) in plugin.commands() {
                if self.commands.contains_key(&command) {
                    return Err(PipelineError::DuplicateCommand {
                        plugin: plugin.name().to_string(),
                        command,
                    });
                }
                self.commands.insert(command, handler);
            }
        }
        Ok(())
    }

    /// Run the request chain. Returns `false` as soon as any plugin denies
    /// or fails (fail-closed); later plugins are not consulted.
    pub fn process_request(&self, request: &HttpRequest) -> bool {
        for plugin in &self.plugins {
            match plugin.handle_request(request) {
                Ok(true) => continue,
                Ok(false) => {
                    tracing::debug!(
                        plugin = plugin.name(),
                        method = %request.method,
                        target = %request.target,
                        client = %request.client,
                        "request denied"
                    );
                    return false;
                }
                Err(err) => {
                    tracing::warn!(
                        plugin = plugin.name(),
                        error = %err,
                        "request hook failed; denying request"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Thread raw response bytes through every plugin in registration
    /// order. A failing plugin's step is skipped; the previous bytes flow
    /// on unchanged, so a misbehaving plugin can never lose a response.
    pub fn process_response(&self, response: Vec<u8>, request: &HttpRequest) -> Vec<u8> {
        let mut data = response;
        for plugin in &self.plugins {
            match plugin.handle_response(data.clone(), request) {
                Ok(next) => data = next,
                Err(err) => {
                    tracing::warn!(
                        plugin = plugin.name(),
                        error = %err,
                        "response hook failed; passing response through unchanged"
                    );
                }
            }
        }
        data
    }

    /// Finalize every operating plugin in reverse registration order.
    /// Failures are logged and do not block the remaining plugins.
    pub fn finalize(&self) {
        for plugin in self.plugins.iter().rev() {
            if let Err(err) = plugin.finalize() {
                tracing::error!(
                    plugin = plugin.name(),
                    error = %err,
                    "plugin failed to finalize"
                );
            }
        }
    }

    /// Dispatch a shell command line to the plugin that registered its
    /// first token.
    pub fn dispatch_command(&self, line: &str) -> Option<String> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next()?;
        let args: Vec<String> = tokens.map(str::to_string).collect();
        match self.commands.get(command) {
            Some(handler) => handler(&args),
            None => Some(format!("Unknown command: {command}")),
        }
    }

    /// Names of the operating plugins, in dispatch order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}
