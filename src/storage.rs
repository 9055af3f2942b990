//! Storage lookup interface (C8): the narrow, read-only contract the core
//! consumes from the ECS storage layer. Everything else about archetypes,
//! column layout, or component data belongs to that external collaborator
//! (spec §1, §4.8) — this module only describes the shape of the contract
//! and, for tests/benches/the CLI, a minimal in-memory implementation of
//! it.

use crate::id::EntityId;
use std::collections::HashMap;

/// Opaque handle to an archetype/table. Stable for the lifetime of the
/// storage the rule was compiled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

/// A trait a predicate entity may or may not have, queried during
/// term-to-pair lowering (spec §4.1, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trait {
    /// The relation is closed under composition; queries expand along its
    /// chain automatically.
    Transitive,
    /// The relation is not itself subject to IsA substitution.
    Final,
    /// Reflexive closure of a transitive relation: `R(x, x)` holds.
    TransitiveSelf,
}

/// One entry of an id record: the table that carries a matching id, and
/// the column (0-based) where the pattern first occurs in that table's
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRecord {
    pub table: TableId,
    pub column: u32,
}

/// An inverted index from an id pattern (possibly containing wildcards)
/// to the ordered, non-empty tables that carry it.
#[derive(Debug, Clone, Default)]
pub struct IdRecord {
    pub tables: Vec<TableRecord>,
}

/// The narrow, read-only contract the VM and compiler consume. A real
/// embedding implements this over its own archetype store; `InMemoryWorld`
/// below is a minimal reference implementation used by tests, benches and
/// the `rule_debug` CLI.
pub trait StorageLookup {
    /// Resolve a live entity to its current (table, row) location, or
    /// `None` if the entity has since been deleted (spec §7, "Stale
    /// entity literal").
    fn resolve_entity(&self, entity: EntityId) -> Option<(TableId, u32)>;

    /// Look up the id record for a (possibly wildcarded) mask. `None` if
    /// no non-empty table carries anything matching it.
    fn lookup_id_record(&self, mask: EntityId) -> Option<&IdRecord>;

    /// The ordered type (list of ids) of a table.
    fn table_type(&self, table: TableId) -> &[EntityId];

    /// The entities currently stored in a table, in table order.
    fn table_entities(&self, table: TableId) -> &[EntityId];

    /// Whether `entity` carries the named built-in trait.
    fn has_trait(&self, entity: EntityId, trait_: Trait) -> bool;
}

/// A toy in-memory storage implementation of [`StorageLookup`], useful for
/// tests, benchmarks and the CLI demo. Facts are inserted as
/// `(subject, predicate, object)` triples (object absent for unary facts);
/// each distinct type (ordered id list) gets its own table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorld {
    next_table: u32,
    /// table id -> (type, entities)
    tables: HashMap<TableId, (Vec<EntityId>, Vec<EntityId>)>,
    /// entity -> (table, row)
    locations: HashMap<EntityId, (TableId, u32)>,
    /// id mask (generation-free) -> id record
    records: HashMap<u64, IdRecord>,
    transitive: std::collections::HashSet<EntityId>,
    final_preds: std::collections::HashSet<EntityId>,
    transitive_self: std::collections::HashSet<EntityId>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        InMemoryWorld::default()
    }

    pub fn mark_transitive(&mut self, predicate: EntityId) {
        self.transitive.insert(predicate.stripped());
    }

    pub fn mark_final(&mut self, predicate: EntityId) {
        self.final_preds.insert(predicate.stripped());
    }

    pub fn mark_transitive_self(&mut self, predicate: EntityId) {
        self.transitive_self.insert(predicate.stripped());
        self.transitive.insert(predicate.stripped());
    }

    /// Add a unary fact `id(entity)`.
    pub fn add(&mut self, entity: EntityId, id: EntityId) {
        self.add_type(entity, vec![id]);
    }

    /// Add a binary fact `(relation, object)(entity)`.
    pub fn add_pair(&mut self, entity: EntityId, relation: EntityId, object: EntityId) {
        self.add_type(entity, vec![EntityId::pair(relation, object)]);
    }

    /// Ensure `entity` carries every id in `ids` (merging with whatever
    /// type it already has), moving it to the appropriate table.
    pub fn add_type(&mut self, entity: EntityId, ids: Vec<EntityId>) {
        let mut type_ = if let Some(&(table, row)) = self.locations.get(&entity) {
            let mut existing = self.tables[&table].0.clone();
            self.remove_row(table, row);
            for id in ids {
                if !existing.contains(&id) {
                    existing.push(id);
                }
            }
            existing
        } else {
            let mut fresh = Vec::new();
            for id in ids {
                if !fresh.contains(&id) {
                    fresh.push(id);
                }
            }
            fresh
        };
        type_.sort_by_key(|e| e.0);
        let table = self.find_or_create_table(&type_);
        let entry = self.tables.get_mut(&table).unwrap();
        let row = entry.1.len() as u32;
        entry.1.push(entity);
        self.locations.insert(entity, (table, row));
        self.reindex_table(table);
    }

    fn remove_row(&mut self, table: TableId, row: u32) {
        let entry = self.tables.get_mut(&table).unwrap();
        entry.1.remove(row as usize);
        for (i, &e) in entry.1.iter().enumerate() {
            self.locations.insert(e, (table, i as u32));
        }
    }

    fn find_or_create_table(&mut self, type_: &[EntityId]) -> TableId {
        for (id, (t, _)) in &self.tables {
            if t.as_slice() == type_ {
                return *id;
            }
        }
        let id = TableId(self.next_table);
        self.next_table += 1;
        self.tables.insert(id, (type_.to_vec(), Vec::new()));
        id
    }

    /// Rebuild every id-record entry touching this table's type. Cheap
    /// enough for a reference implementation; a production store would
    /// maintain records incrementally.
    fn reindex_table(&mut self, table: TableId) {
        let type_ = self.tables[&table].0.clone();
        if self.tables[&table].1.is_empty() {
            return;
        }
        for (col, &id) in type_.iter().enumerate() {
            let masks = self.masks_for(id);
            for mask in masks {
                let record = self.records.entry(mask).or_default();
                if !record.tables.iter().any(|r| r.table == table) {
                    record.tables.push(TableRecord {
                        table,
                        column: col as u32,
                    });
                }
            }
        }
    }

    /// All (possibly-wildcarded) masks a concrete id satisfies, used to
    /// build the id-record inverted index.
    fn masks_for(&self, id: EntityId) -> Vec<u64> {
        let mut out = vec![id.stripped().0];
        if let Some((r, o)) = id.split_pair() {
            out.push(EntityId::pair(r, EntityId::WILDCARD).0);
            out.push(EntityId::pair(EntityId::WILDCARD, o).0);
            out.push(EntityId::pair(EntityId::WILDCARD, EntityId::WILDCARD).0);
        }
        out
    }
}

impl StorageLookup for InMemoryWorld {
    fn resolve_entity(&self, entity: EntityId) -> Option<(TableId, u32)> {
        self.locations.get(&entity.stripped()).copied()
    }

    fn lookup_id_record(&self, mask: EntityId) -> Option<&IdRecord> {
        self.records.get(&mask.stripped().0)
    }

    fn table_type(&self, table: TableId) -> &[EntityId] {
        &self.tables[&table].0
    }

    fn table_entities(&self, table: TableId) -> &[EntityId] {
        &self.tables[&table].1
    }

    fn has_trait(&self, entity: EntityId, trait_: Trait) -> bool {
        let e = entity.stripped();
        match trait_ {
            Trait::Transitive => self.transitive.contains(&e),
            Trait::Final => self.final_preds.contains(&e),
            Trait::TransitiveSelf => self.transitive_self.contains(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_lookup_unary_fact() {
        let mut w = InMemoryWorld::new();
        let yoda = EntityId::new(100, 0);
        let creature = EntityId::new(1, 0);
        w.add(yoda, creature);
        let record = w.lookup_id_record(creature).unwrap();
        assert_eq!(record.tables.len(), 1);
        let table = record.tables[0].table;
        assert_eq!(w.table_entities(table), &[yoda]);
    }

    #[test]
    fn pair_wildcard_masks_are_indexed() {
        let mut w = InMemoryWorld::new();
        let luke = EntityId::new(1, 0);
        let home_planet = EntityId::new(2, 0);
        let tatooine = EntityId::new(3, 0);
        w.add_pair(luke, home_planet, tatooine);
        let mask = EntityId::pair(home_planet, EntityId::WILDCARD);
        let record = w.lookup_id_record(mask).unwrap();
        assert_eq!(record.tables.len(), 1);
    }
}
