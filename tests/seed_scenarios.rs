//! Integration coverage for the engine's seed query scenarios (spec §8):
//! one test per scenario, driven entirely through the public API.

use ecs_rule_engine::config::EngineConfig;
use ecs_rule_engine::id::EntityId;
use ecs_rule_engine::rule::Rule;
use ecs_rule_engine::storage::InMemoryWorld;
use ecs_rule_engine::term::{SubjectFlags, Term, TermArg};

fn ids(n: u32) -> EntityId {
    EntityId::new(n, 0)
}

#[test]
fn fact_query_yields_the_single_matching_entity() {
    let mut world = InMemoryWorld::new();
    let creature = ids(1);
    let yoda = ids(100);
    world.add(yoda, creature);

    let config = EngineConfig::default();
    let terms = vec![Term::new(TermArg::id(creature), TermArg::var("."))];
    let rule = Rule::new(&terms, Some("Creature(this)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    assert!(iter.next());
    assert_eq!(iter.entities(), vec![yoda]);
    assert!(!iter.next());
}

#[test]
fn variable_query_enumerates_every_table_member() {
    let mut world = InMemoryWorld::new();
    let position = ids(1);
    let a = ids(100);
    let b = ids(101);
    world.add(a, position);
    world.add(b, position);

    let config = EngineConfig::default();
    let terms = vec![Term::new(TermArg::id(position), TermArg::var("."))];
    let rule = Rule::new(&terms, Some("Position(this)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    assert!(iter.next());
    let mut found = iter.entities();
    found.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(found, expected);
}

#[test]
fn pair_with_object_variable_binds_the_matching_object() {
    let mut world = InMemoryWorld::new();
    let home_planet = ids(1);
    let tatooine = ids(2);
    let luke = ids(10);
    world.add_pair(luke, home_planet, tatooine);

    let config = EngineConfig::default();
    let terms = vec![Term::with_object(
        TermArg::id(home_planet),
        TermArg::id(luke),
        TermArg::var("_Planet"),
    )];
    let rule = Rule::new(&terms, Some("HomePlanet(luke, _Planet)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    assert!(iter.next());
    assert_eq!(iter.ids()[0], EntityId::pair(home_planet, tatooine));
    assert!(!iter.next());
}

#[test]
fn transitive_subset_includes_every_descendant() {
    let mut world = InMemoryWorld::new();
    let is_a = ids(1);
    let vehicle = ids(2);
    let car = ids(3);
    let sedan = ids(4);
    world.mark_transitive(is_a);
    world.add_pair(car, is_a, vehicle);
    world.add_pair(sedan, is_a, car);

    let config = EngineConfig::default();
    let terms = vec![Term::with_object(TermArg::id(is_a), TermArg::var("."), TermArg::id(vehicle))];
    let rule = Rule::new(&terms, Some("IsA(this, Vehicle)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    let mut found = Vec::new();
    while iter.next() {
        found.extend(iter.entities());
    }
    found.sort();
    let mut expected = vec![car, sedan];
    expected.sort();
    assert_eq!(found, expected);
}

#[test]
fn transitive_superset_includes_every_ancestor() {
    let mut world = InMemoryWorld::new();
    let is_a = ids(1);
    let vehicle = ids(2);
    let car = ids(3);
    let sedan = ids(4);
    world.mark_transitive(is_a);
    world.add_pair(car, is_a, vehicle);
    world.add_pair(sedan, is_a, car);

    let config = EngineConfig::default();
    let terms = vec![Term::with_object(TermArg::id(is_a), TermArg::id(sedan), TermArg::var("."))];
    let rule = Rule::new(&terms, Some("IsA(sedan, this)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    let mut found = Vec::new();
    while iter.next() {
        found.extend(iter.entities());
    }
    found.sort();
    let mut expected = vec![car, vehicle];
    expected.sort();
    assert_eq!(found, expected);
}

#[test]
fn negation_excludes_matching_entities() {
    let mut world = InMemoryWorld::new();
    let position = ids(1);
    let frozen = ids(2);
    let moving = ids(100);
    let stuck = ids(101);
    world.add_type(moving, vec![position]);
    world.add_type(stuck, vec![position, frozen]);

    let config = EngineConfig::default();
    let terms = vec![
        Term::new(TermArg::id(position), TermArg::var(".")),
        Term::new(TermArg::id(frozen), TermArg::var(".")).not(),
    ];
    let rule = Rule::new(&terms, Some("Position(this), !Frozen(this)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    assert!(iter.next());
    assert_eq!(iter.entities(), vec![moving]);
    assert!(!iter.next());
}

#[test]
fn optional_term_never_eliminates_a_row() {
    let mut world = InMemoryWorld::new();
    let tag_a = ids(1);
    let tag_b = ids(2);
    let only_a = ids(10);
    let both = ids(11);
    world.add(only_a, tag_a);
    world.add_type(both, vec![tag_a, tag_b]);

    let config = EngineConfig::default();
    let terms = vec![
        Term::new(TermArg::id(tag_a), TermArg::var(".")),
        Term::new(TermArg::id(tag_b), TermArg::var(".")).optional(),
    ];
    let rule = Rule::new(&terms, Some("TagA(this), ?TagB(this)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    let mut seen = Vec::new();
    while iter.next() {
        seen.push((iter.entities()[0], iter.is_set(1)));
    }
    seen.sort_by_key(|(e, _)| e.low());
    assert_eq!(seen, vec![(only_a, false), (both, true)]);
}

#[test]
fn nothing_flagged_term_matches_nothing_but_still_reports_its_own_id() {
    let mut world = InMemoryWorld::new();
    let position = ids(1);
    let frozen = ids(2);
    let both = ids(100);
    world.add_type(both, vec![position, frozen]);

    let config = EngineConfig::default();
    let terms = vec![
        Term::new(TermArg::id(position), TermArg::var(".")),
        Term::new(TermArg::id(frozen), TermArg::var(".")).with_flags(SubjectFlags::NOTHING),
    ];
    let rule = Rule::new(&terms, Some("Position(this), Frozen(this:nothing)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    assert!(iter.next());
    assert_eq!(iter.entities(), vec![both]);
    // The Nothing-flagged term never matched storage, so it contributes no
    // join constraint: `both` is yielded purely on the first term. Its own
    // id is still reported verbatim rather than as an unresolved `0`.
    assert_eq!(iter.ids()[1], frozen);
    assert!(!iter.next());
}

#[test]
fn same_variable_as_both_predicate_and_object_requires_equal_relation_and_object() {
    let mut world = InMemoryWorld::new();
    let a = ids(1);
    let b = ids(2);
    let e1 = ids(100);
    let e2 = ids(101);
    world.add_pair(e1, a, b);
    world.add_pair(e2, a, a);

    let config = EngineConfig::default();
    let terms = vec![Term::with_object(TermArg::var("_X"), TermArg::var("."), TermArg::var("_X"))];
    let rule = Rule::new(&terms, Some("_X(this, _X)"), &world, &config).unwrap();

    let mut iter = rule.iter(&world, &config);
    assert!(iter.next());
    assert_eq!(iter.entities(), vec![e2]);
    assert!(!iter.next());
}
