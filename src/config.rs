//! Engine configuration.
//!
//! Knobs that spec.md leaves as fixed constants are exposed here so an
//! embedding application can tune them without a recompile, loaded the way
//! the teacher's own `config.rs` layers a [`figment`] provider stack:
//! compiled-in defaults, overridden by an optional TOML file, overridden
//! by `RULE_ENGINE_*` environment variables.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Hard cap on distinct variables per rule (spec §4.2). Raisable (or
/// lowerable) for embedders with unusually wide or narrow queries; threaded
/// into [`crate::variable::VariableTable`] at rule-construction time via
/// `VariableTable::with_limit`, so `RULE_ENGINE_MAX_VARIABLES` actually
/// changes the limit a rule is rejected at rather than only the default.
pub const DEFAULT_MAX_VARIABLES: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum distinct variables a single rule may reference.
    pub max_variables: usize,
    /// Sanity cap on emitted instructions; a compiler that would exceed
    /// this is almost certainly lowering a pathological term list and
    /// should fail fast rather than build an unbounded program.
    pub max_program_length: usize,
    /// Depth cap for the SubSet/SuperSet DFS walking a transitive relation.
    /// The cycle-detection mark in the dependency orderer (spec §4.3)
    /// guards variable ordering; this guards the VM's own traversal
    /// against a cyclic IsA-like graph at evaluation time so Termination
    /// (spec §8) holds even over malformed storage state.
    pub max_transitive_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_variables: DEFAULT_MAX_VARIABLES,
            max_program_length: 4096,
            max_transitive_depth: 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration layering defaults, an optional `rule_engine.toml`,
    /// and `RULE_ENGINE_*` environment variables, in that priority order.
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("rule_engine.toml"))
            .merge(Env::prefixed("RULE_ENGINE_"))
            .extract()
    }
}
