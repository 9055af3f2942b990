//! Transitive closure helpers shared by the compiler (for IsA substitution
//! decisions) and the VM (for SubSet/SuperSet/With dispatch).
//!
//! These walk a transitive relation one hop at a time using only the
//! storage lookup interface (C8): "direct parents" of `e` are the objects
//! of pairs `(relation, object)` present in `e`'s own type; "direct
//! children" of `e` are the entities whose type carries `(relation, e)`.

use crate::config::EngineConfig;
use crate::id::EntityId;
use crate::storage::StorageLookup;
use std::collections::HashSet;

/// Direct parents of `entity` along `relation`: objects `o` such that
/// `entity`'s own type contains the pair `(relation, o)`.
pub fn direct_parents<S: StorageLookup>(
    storage: &S,
    relation: EntityId,
    entity: EntityId,
) -> Vec<EntityId> {
    let Some((table, _)) = storage.resolve_entity(entity) else {
        return Vec::new();
    };
    storage
        .table_type(table)
        .iter()
        .filter_map(|id| id.split_pair())
        .filter(|(r, _)| r.stripped() == relation.stripped())
        .map(|(_, o)| o)
        .collect()
}

/// Direct children of `entity` along `relation`: entities `c` whose type
/// contains the pair `(relation, entity)`.
pub fn direct_children<S: StorageLookup>(
    storage: &S,
    relation: EntityId,
    entity: EntityId,
) -> Vec<EntityId> {
    let mask = EntityId::pair(relation, entity);
    let Some(record) = storage.lookup_id_record(mask) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for rec in &record.tables {
        let col = rec.column as usize;
        for &e in storage.table_entities(rec.table) {
            let _ = col; // column is informational; membership implies the pair is present.
            out.push(e);
        }
    }
    out
}

/// All strict ancestors of `start` along `relation`, breadth-first,
/// de-duplicated, bounded by `max_depth` hops to guarantee termination
/// even over a malformed/cyclic graph (spec §8, Termination).
pub fn superset_chain<S: StorageLookup>(
    storage: &S,
    relation: EntityId,
    start: EntityId,
    config: &EngineConfig,
) -> Vec<EntityId> {
    let mut seen: HashSet<u64> = HashSet::new();
    seen.insert(start.stripped().0);
    let mut frontier = vec![start];
    let mut out = Vec::new();
    for _ in 0..config.max_transitive_depth {
        if frontier.is_empty() {
            break;
        }
        let mut next = Vec::new();
        for e in frontier {
            for p in direct_parents(storage, relation, e) {
                if seen.insert(p.stripped().0) {
                    out.push(p);
                    next.push(p);
                }
            }
        }
        frontier = next;
    }
    out
}

/// All strict descendants of `start` along `relation`, breadth-first,
/// de-duplicated, bounded by `max_depth` hops.
pub fn subset_chain<S: StorageLookup>(
    storage: &S,
    relation: EntityId,
    start: EntityId,
    config: &EngineConfig,
) -> Vec<EntityId> {
    let mut seen: HashSet<u64> = HashSet::new();
    seen.insert(start.stripped().0);
    let mut frontier = vec![start];
    let mut out = Vec::new();
    for _ in 0..config.max_transitive_depth {
        if frontier.is_empty() {
            break;
        }
        let mut next = Vec::new();
        for e in frontier {
            for c in direct_children(storage, relation, e) {
                if seen.insert(c.stripped().0) {
                    out.push(c);
                    next.push(c);
                }
            }
        }
        frontier = next;
    }
    out
}

/// True if `entity` owns `pair_id` (unary id or relation pair) directly in
/// its own type, or via inheritance along `isa` (spec §4.4, "Implicit IsA
/// substitution").
pub fn owns_with_inheritance<S: StorageLookup>(
    storage: &S,
    isa: EntityId,
    entity: EntityId,
    owns: impl Fn(EntityId) -> bool,
    config: &EngineConfig,
) -> bool {
    if owns(entity) {
        return true;
    }
    superset_chain(storage, isa, entity, config).into_iter().any(owns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryWorld;

    fn ids() -> (EntityId, EntityId, EntityId, EntityId) {
        (
            EntityId::new(1, 0),
            EntityId::new(2, 0),
            EntityId::new(3, 0),
            EntityId::new(4, 0),
        )
    }

    #[test]
    fn superset_chain_walks_multiple_hops() {
        let (isa, planet, body, thing) = ids();
        let mut world = InMemoryWorld::new();
        world.mark_transitive(isa);
        world.add_pair(planet, isa, body);
        world.add_pair(body, isa, thing);
        let config = EngineConfig::default();
        let ancestors = superset_chain(&world, isa, planet, &config);
        assert_eq!(ancestors, vec![body, thing]);
    }

    #[test]
    fn subset_chain_walks_multiple_hops() {
        let (isa, planet, body, thing) = ids();
        let mut world = InMemoryWorld::new();
        world.mark_transitive(isa);
        world.add_pair(planet, isa, body);
        world.add_pair(body, isa, thing);
        let config = EngineConfig::default();
        let descendants = subset_chain(&world, isa, thing, &config);
        assert_eq!(descendants, vec![body, planet]);
    }

    #[test]
    fn cyclic_graph_still_terminates() {
        let (isa, a, b, _) = ids();
        let mut world = InMemoryWorld::new();
        world.mark_transitive(isa);
        world.add_pair(a, isa, b);
        world.add_pair(b, isa, a);
        let mut config = EngineConfig::default();
        config.max_transitive_depth = 8;
        let ancestors = superset_chain(&world, isa, a, &config);
        assert!(ancestors.len() <= 2);
    }
}
