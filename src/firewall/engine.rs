//! Rule list ownership and evaluation.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::firewall::matcher::rule_matches;
use crate::firewall::rule::{Action, Rule, RuleError};
use crate::http::HttpRequest;
use crate::plugin::{CommandFn, PluginError, ProxyPlugin};

/// Shared rule table behind the cloneable `Firewall` handle.
///
/// Readers load the current snapshot without locking; mutators serialize on
/// `write_lock`, build the edited list, and publish it as a whole new
/// snapshot. A concurrent `evaluate` therefore sees either the old or the
/// new list, never a partial edit.
#[derive(Default)]
struct RuleTable {
    rules: ArcSwap<Vec<Rule>>,
    write_lock: Mutex<()>,
}

/// The firewall engine.
///
/// Cloning the handle shares the underlying rule table, so the instance
/// registered in the pipeline and the one held by the administrative path
/// see the same rules.
#[derive(Clone, Default)]
pub struct Firewall {
    table: Arc<RuleTable>,
}

impl Firewall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a request against the rule list in order. The first rule
    /// whose matchers all hold decides; no match means `Allow`.
    pub fn evaluate(&self, request: &HttpRequest) -> Action {
        let snapshot = self.table.rules.load();
        for rule in snapshot.iter() {
            if rule_matches(rule, request) {
                return rule.action;
            }
        }
        Action::Allow
    }

    /// Defensive copy of the current rule list.
    pub fn rules(&self) -> Vec<Rule> {
        self.table.rules.load().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.table.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.rules.load().is_empty()
    }

    /// Replace the whole list atomically.
    pub fn set_rules(&self, rules: Vec<Rule>) {
        let _guard = self.write_guard();
        self.table.rules.store(Arc::new(rules));
    }

    /// Append a rule, or insert it at `index`. Fails without mutating
    /// anything if `index` is outside the insertion range `[0, len]`.
    pub fn add_rule(&self, rule: Rule, index: Option<usize>) -> Result<(), RuleError> {
        let _guard = self.write_guard();
        let mut next = self.table.rules.load().as_ref().clone();
        match index {
            Some(index) if index > next.len() => {
                return Err(RuleError::IndexOutOfRange {
                    index,
                    len: next.len(),
                });
            }
            Some(index) => next.insert(index, rule),
            None => next.push(rule),
        }
        self.table.rules.store(Arc::new(next));
        Ok(())
    }

    /// Remove and return the rule at `index`; subsequent rules shift down.
    pub fn remove_rule(&self, index: usize) -> Result<Rule, RuleError> {
        let _guard = self.write_guard();
        let mut next = self.table.rules.load().as_ref().clone();
        if index >= next.len() {
            return Err(RuleError::IndexOutOfRange {
                index,
                len: next.len(),
            });
        }
        let removed = next.remove(index);
        self.table.rules.store(Arc::new(next));
        Ok(removed)
    }

    /// Empty the list.
    pub fn clear_rules(&self) {
        let _guard = self.write_guard();
        self.table.rules.store(Arc::new(Vec::new()));
    }

    fn write_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded section never panics, so poisoning cannot leave the
        // table inconsistent; recover the lock and continue.
        self.table
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn render_rules(&self) -> String {
        let rules = self.rules();
        if rules.is_empty() {
            return "No firewall rules configured.".to_string();
        }
        rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| format!("{idx}: {rule}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ProxyPlugin for Firewall {
    fn name(&self) -> &str {
        "firewall"
    }

    fn handle_request(&self, request: &HttpRequest) -> Result<bool, PluginError> {
        Ok(self.evaluate(request) == Action::Allow)
    }

    fn commands(&self) -> Vec<(String, CommandFn)> {
        let firewall = self.clone();
        vec![(
            "show-rules".to_string(),
            Arc::new(move |_args: &[String]| Some(firewall.render_rules())) as CommandFn,
        )]
    }
}
