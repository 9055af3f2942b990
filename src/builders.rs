//! Fluent builders for constructing terms and rules, particularly useful
//! for tests and the `rule_debug` CLI (spec §3, "Term").
//!
//! ## Example
//!
//! ```rust
//! use ecs_rule_engine::builders::{RuleBuilder, TermBuilder};
//! use ecs_rule_engine::config::EngineConfig;
//! use ecs_rule_engine::storage::InMemoryWorld;
//! use ecs_rule_engine::term::TermArg;
//!
//! let storage = InMemoryWorld::new();
//! let config = EngineConfig::default();
//!
//! // Position(this)
//! let rule = RuleBuilder::new()
//!     .term(TermBuilder::new(TermArg::id(1u64)).build())
//!     .build(&storage, &config);
//! assert!(rule.is_ok());
//! ```

use crate::error::CompileError;
use crate::config::EngineConfig;
use crate::id::EntityId;
use crate::rule::Rule;
use crate::storage::StorageLookup;
use crate::term::{ObjectArg, Operator, SubjectFlags, Term, TermArg};

/// Fluent constructor for a single [`Term`]. Defaults to a unary term over
/// the root `.` subject with `And`/`Self` semantics, matching
/// [`Term::new`]'s defaults.
#[derive(Debug, Clone)]
pub struct TermBuilder {
    predicate: TermArg,
    subject: TermArg,
    object: ObjectArg,
    operator: Operator,
    subject_flags: SubjectFlags,
}

impl TermBuilder {
    pub fn new(predicate: TermArg) -> Self {
        TermBuilder {
            predicate,
            subject: TermArg::var("."),
            object: ObjectArg::Absent,
            operator: Operator::And,
            subject_flags: SubjectFlags::SELF,
        }
    }

    pub fn subject_id(mut self, id: impl Into<EntityId>) -> Self {
        self.subject = TermArg::id(id);
        self
    }

    pub fn subject_var(mut self, name: impl Into<String>) -> Self {
        self.subject = TermArg::var(name);
        self
    }

    pub fn object_id(mut self, id: impl Into<EntityId>) -> Self {
        self.object = ObjectArg::Value(TermArg::id(id));
        self
    }

    pub fn object_var(mut self, name: impl Into<String>) -> Self {
        self.object = ObjectArg::Value(TermArg::var(name));
        self
    }

    /// Present but explicitly "no object" (the literal `0`), distinct from
    /// an absent (unary) object.
    pub fn no_object(mut self) -> Self {
        self.object = ObjectArg::NoObject;
        self
    }

    pub fn not(mut self) -> Self {
        self.operator = Operator::Not;
        self
    }

    pub fn optional(mut self) -> Self {
        self.operator = Operator::Optional;
        self
    }

    pub fn with_flags(mut self, flags: SubjectFlags) -> Self {
        self.subject_flags = flags;
        self
    }

    pub fn build(self) -> Term {
        Term {
            predicate: self.predicate,
            subject: self.subject,
            object: self.object,
            operator: self.operator,
            subject_flags: self.subject_flags,
        }
    }
}

/// Fluent constructor for a rule's term list, carrying the source
/// expression through to [`Rule::new`] for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RuleBuilder {
    terms: Vec<Term>,
    expr: Option<String>,
}

impl RuleBuilder {
    pub fn new() -> Self {
        RuleBuilder::default()
    }

    pub fn term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn expr(mut self, expr: impl Into<String>) -> Self {
        self.expr = Some(expr.into());
        self
    }

    pub fn build<S: StorageLookup>(
        self,
        storage: &S,
        config: &EngineConfig,
    ) -> Result<Rule, CompileError> {
        Rule::new(&self.terms, self.expr.as_deref(), storage, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryWorld;

    #[test]
    fn term_builder_defaults_to_unary_root_subject() {
        let creature = EntityId::new(1, 0);
        let term = TermBuilder::new(TermArg::id(creature)).build();
        assert!(!term.is_binary());
        assert_eq!(term.subject, TermArg::var("."));
    }

    #[test]
    fn rule_builder_compiles_a_single_term() {
        let mut world = InMemoryWorld::new();
        let creature = EntityId::new(1, 0);
        world.add(EntityId::new(100, 0), creature);
        let config = EngineConfig::default();
        let rule = RuleBuilder::new()
            .term(TermBuilder::new(TermArg::id(creature)).build())
            .expr("Creature(this)")
            .build(&world, &config)
            .unwrap();
        assert_eq!(rule.expr(), Some("Creature(this)"));
    }
}
