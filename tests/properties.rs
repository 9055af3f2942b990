//! Property-based coverage of the testable invariants in spec §8:
//! soundness (every yield substitutes into a stored fact), determinism
//! (two full iterations over an unchanged world agree), and the
//! non-monotonicity of `Optional` (dropping it never changes the other
//! terms' truth values). Random worlds are built from small vectors of
//! `(entity, tag)` facts, mirroring the teacher's own `(x, d)`/`(x, y)`
//! input-tuple strategy in `tests/property_arithmetic.rs`.

use proptest::prelude::*;
use std::collections::HashSet;

use ecs_rule_engine::config::EngineConfig;
use ecs_rule_engine::id::EntityId;
use ecs_rule_engine::rule::Rule;
use ecs_rule_engine::storage::InMemoryWorld;
use ecs_rule_engine::term::{Term, TermArg};

const TAG_A: u32 = 1;
const TAG_B: u32 = 2;
const ENTITY_BASE: u32 = 100;

/// Build a world from a small set of `(entity offset, has_a, has_b)`
/// assignments. Each entity gets `TagA` iff `has_a`, `TagB` iff `has_b`.
fn build_world(assignments: &[(u8, bool, bool)]) -> InMemoryWorld {
    let mut world = InMemoryWorld::new();
    let tag_a = EntityId::new(TAG_A, 0);
    let tag_b = EntityId::new(TAG_B, 0);
    for &(offset, has_a, has_b) in assignments {
        let entity = EntityId::new(ENTITY_BASE + offset as u32, 0);
        let mut ids = Vec::new();
        if has_a {
            ids.push(tag_a);
        }
        if has_b {
            ids.push(tag_b);
        }
        if !ids.is_empty() {
            world.add_type(entity, ids);
        }
    }
    world
}

fn assignments_strategy() -> impl Strategy<Value = Vec<(u8, bool, bool)>> {
    prop::collection::vec((0u8..12, any::<bool>(), any::<bool>()), 0..12)
}

proptest! {
    /// Soundness: every entity a `TagA(this)` query yields actually owns
    /// `TagA` directly in the generated world.
    #[test]
    fn fact_query_yields_are_sound(assignments in assignments_strategy()) {
        let world = build_world(&assignments);
        let config = EngineConfig::default();
        let tag_a = EntityId::new(TAG_A, 0);
        let terms = vec![Term::new(TermArg::id(tag_a), TermArg::var("."))];
        let rule = Rule::new(&terms, Some("TagA(this)"), &world, &config).unwrap();

        let mut iter = rule.iter(&world, &config);
        let mut yielded = HashSet::new();
        while iter.next() {
            for e in iter.entities() {
                yielded.insert(e.low());
            }
        }

        let expected: HashSet<u32> = assignments
            .iter()
            .filter(|&&(_, has_a, _)| has_a)
            .map(|&(offset, _, _)| ENTITY_BASE + offset as u32)
            .collect();
        prop_assert_eq!(yielded, expected);
    }

    /// Determinism: two consecutive full iterations of the same compiled
    /// rule over the same unchanged world return identical sequences.
    #[test]
    fn two_full_iterations_agree(assignments in assignments_strategy()) {
        let world = build_world(&assignments);
        let config = EngineConfig::default();
        let tag_a = EntityId::new(TAG_A, 0);
        let terms = vec![Term::new(TermArg::id(tag_a), TermArg::var("."))];
        let rule = Rule::new(&terms, Some("TagA(this)"), &world, &config).unwrap();

        let collect = || {
            let mut iter = rule.iter(&world, &config);
            let mut out = Vec::new();
            while iter.next() {
                out.push(iter.entities());
            }
            out
        };
        prop_assert_eq!(collect(), collect());
    }

    /// Non-monotone Optional: removing `?TagB(this)` from `TagA(this), ?TagB(this)`
    /// cannot change which entities satisfy the remaining `TagA(this)` term.
    #[test]
    fn optional_term_does_not_change_non_optional_matches(assignments in assignments_strategy()) {
        let world = build_world(&assignments);
        let config = EngineConfig::default();
        let tag_a = EntityId::new(TAG_A, 0);
        let tag_b = EntityId::new(TAG_B, 0);

        let with_optional = vec![
            Term::new(TermArg::id(tag_a), TermArg::var(".")),
            Term::new(TermArg::id(tag_b), TermArg::var(".")).optional(),
        ];
        let without_optional = vec![Term::new(TermArg::id(tag_a), TermArg::var("."))];

        let rule_with = Rule::new(&with_optional, Some("TagA(this), ?TagB(this)"), &world, &config).unwrap();
        let rule_without = Rule::new(&without_optional, Some("TagA(this)"), &world, &config).unwrap();

        let collect = |rule: &Rule| {
            let mut iter = rule.iter(&world, &config);
            let mut out = HashSet::new();
            while iter.next() {
                for e in iter.entities() {
                    out.insert(e.low());
                }
            }
            out
        };
        prop_assert_eq!(collect(&rule_with), collect(&rule_without));
    }
}
