//! # ECS Rule Query Engine
//!
//! A declarative, backtracking query engine for an Entity-Component-System
//! database: variable joins over tables, transitive/IsA-aware relations,
//! negation and optional terms, compiled once to a flat instruction
//! program and then iterated any number of times without recompiling
//! (spec §1).
//!
//! ## Pipeline
//!
//! ```text
//! Vec<Term>                         (external term parser's output)
//!     |
//! order_variables()                 -> dependency-ordered variable ids
//!     |
//! compiler::compile()               -> Program (flat instruction array)
//!     |
//! Rule::new()                       -> Rule (program + variable table)
//!     |
//! rule.iter(storage, config)        -> Iter (backtracking cursor)
//! ```
//!
//! ## Module organization
//!
//! | Module | Component | Purpose |
//! |--------|-----------|---------|
//! | [`term`] | C1 | Parsed term/operator/subject-flags model |
//! | [`pair`] | C1 | Term lowered to a compiled predicate/object pair |
//! | [`variable`] | C2 | Variable table: kind, depth, occurrence bookkeeping |
//! | [`order`] | C3 | Dependency ordering: root election, depth, tie-break |
//! | [`program`] | C4 | Flat instruction array and `rule_str` disassembly |
//! | [`compiler`] | C4 | Term list -> `Program` lowering |
//! | [`frame`] | C5 | Register matrix and O(V) backtracking snapshot |
//! | [`vm`] | C6 | Backtracking instruction dispatcher |
//! | [`iterator`] | C7 | Public per-query evaluation cursor |
//! | [`storage`] | C8 | Narrow read-only contract onto ECS storage |
//! | [`closure`] | - | Transitive-relation BFS shared by compiler and VM |
//! | [`rule`] | - | `Rule::new` entry point tying C1-C8 together |
//! | [`builders`] | - | Fluent term/rule construction ergonomics |
//! | [`config`] | - | Tunable limits, layered from defaults/TOML/env |
//! | [`error`] | - | Compile-time and (debug-only) runtime error kinds |
//!
//! ## Example
//!
//! ```rust
//! use ecs_rule_engine::config::EngineConfig;
//! use ecs_rule_engine::rule::Rule;
//! use ecs_rule_engine::storage::InMemoryWorld;
//! use ecs_rule_engine::term::{Term, TermArg};
//!
//! let mut world = InMemoryWorld::new();
//! let creature = ecs_rule_engine::id::EntityId::new(1, 0);
//! let yoda = ecs_rule_engine::id::EntityId::new(100, 0);
//! world.add(yoda, creature);
//!
//! let config = EngineConfig::default();
//! let terms = vec![Term::new(TermArg::id(creature), TermArg::var("."))];
//! let rule = Rule::new(&terms, Some("Creature(this)"), &world, &config).unwrap();
//!
//! let mut iter = rule.iter(&world, &config);
//! while iter.next() {
//!     assert_eq!(iter.entities(), vec![yoda]);
//! }
//! ```

pub mod builders;
pub mod closure;
pub mod compiler;
pub mod config;
pub mod error;
pub mod frame;
pub mod id;
pub mod iterator;
pub mod order;
pub mod pair;
pub mod program;
pub mod rule;
pub mod storage;
pub mod term;
pub mod variable;
pub mod vm;

pub use crate::builders::{RuleBuilder, TermBuilder};
pub use crate::config::EngineConfig;
pub use crate::error::{CompileError, Diagnostic, RuntimeError};
pub use crate::id::EntityId;
pub use crate::iterator::Iter;
pub use crate::rule::Rule;
pub use crate::term::{ObjectArg, Operator, SubjectFlags, Term, TermArg};
