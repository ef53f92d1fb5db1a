//! Firewall subsystem.
//!
//! # Data Flow
//! ```text
//! YAML rules document
//!     → store.rs (load/save, round-trip faithful)
//!     → engine.rs (ordered list, atomic snapshots)
//!
//! per request:
//!     engine.evaluate → matcher.rs (pure, per-rule) → Allow | Deny
//!
//! administrative path (shell / commands):
//!     add_rule / remove_rule / set_rules / clear_rules → new snapshot
//! ```
//!
//! # Design Decisions
//! - First matching rule wins; an empty list allows everything
//! - Mutations publish a whole new immutable snapshot (arc-swap), so the
//!   hot path never takes a lock and never sees a partial edit
//! - IP patterns are parsed at rule construction, never at match time

pub mod engine;
pub mod matcher;
pub mod rule;
pub mod store;

pub use engine::Firewall;
pub use rule::{Action, IpPattern, Rule, RuleError};
pub use store::{FirewallStore, StoreError};
