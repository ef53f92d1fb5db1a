//! Rules persistence.
//!
//! The on-disk format is a YAML document with a single top-level `rules`
//! key holding the ordered rule list. Saving then loading reproduces an
//! equal, equally-ordered list.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::firewall::rule::Rule;
use crate::firewall::Firewall;
use crate::plugin::{CommandFn, PluginError, ProxyPlugin};

/// Error type for rules document I/O.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),
}

/// The persisted document shape.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Load an ordered rule list from a YAML document.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>, StoreError> {
    let text = fs::read_to_string(path)?;
    let document: RulesDocument = serde_yml::from_str(&text)?;
    Ok(document.rules)
}

/// Save an ordered rule list as a YAML document.
pub fn save_rules(path: &Path, rules: &[Rule]) -> Result<(), StoreError> {
    let document = RulesDocument {
        rules: rules.to_vec(),
    };
    let text = serde_yml::to_string(&document)?;
    fs::write(path, text)?;
    Ok(())
}

/// Plugin that ties the firewall to its rules document.
///
/// It receives the firewall handle at construction (no manager lookup),
/// loads the document at `initialize` when one exists, and exposes
/// load/save/reset commands to the administration shell. It takes no part
/// in request or response handling.
pub struct FirewallStore {
    firewall: Firewall,
    path: PathBuf,
}

impl FirewallStore {
    pub fn new(firewall: Firewall, path: impl Into<PathBuf>) -> Self {
        Self {
            firewall,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from(&self, path: &Path) -> Result<usize, StoreError> {
        let rules = load_rules(path)?;
        let count = rules.len();
        self.firewall.set_rules(rules);
        Ok(count)
    }
}

impl ProxyPlugin for FirewallStore {
    fn name(&self) -> &str {
        "firewall-store"
    }

    fn initialize(&self) -> Result<(), PluginError> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "no rules file; starting empty");
            return Ok(());
        }
        let count = self
            .load_from(&self.path)
            .map_err(|err| PluginError::new(format!("loading {}: {err}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), rules = count, "firewall rules loaded");
        Ok(())
    }

    fn commands(&self) -> Vec<(String, CommandFn)> {
        let firewall = self.firewall.clone();
        let default_path = self.path.clone();

        let load_firewall = firewall.clone();
        let load_path = default_path.clone();
        let load: CommandFn = Arc::new(move |args: &[String]| {
            let path = args.first().map(PathBuf::from).unwrap_or_else(|| load_path.clone());
            Some(match load_rules(&path) {
                Ok(rules) => {
                    let count = rules.len();
                    load_firewall.set_rules(rules);
                    format!("Loaded {count} rules from {}", path.display())
                }
                Err(err) => format!("Failed to load rules: {err}"),
            })
        });

        let save_firewall = firewall.clone();
        let save_path = default_path.clone();
        let save: CommandFn = Arc::new(move |args: &[String]| {
            let path = args.first().map(PathBuf::from).unwrap_or_else(|| save_path.clone());
            let rules = save_firewall.rules();
            Some(match save_rules(&path, &rules) {
                Ok(()) => format!("Saved {} rules to {}", rules.len(), path.display()),
                Err(err) => format!("Failed to save rules: {err}"),
            })
        });

        let reset: CommandFn = Arc::new(move |_args: &[String]| {
            firewall.clear_rules();
            Some("Cleared firewall rules".to_string())
        });

        vec![
            ("load-rules".to_string(), load),
            ("save-rules".to_string(), save),
            ("reset-rules".to_string(), reset),
        ]
    }
}
