//! Iterator façade (C7): initializes register state, advances on
//! `next()`, and populates the public iterator record (entities, ids,
//! subjects, columns) on each yield (spec §4.7, §6).

use crate::config::EngineConfig;
use crate::error::RuntimeError;
use crate::id::EntityId;
use crate::pair::{PairFlags, Slot};
use crate::program::{Program, SubjectHint};
use crate::storage::StorageLookup;
use crate::variable::{VariableKind, VariableTable};
use crate::vm::Vm;

/// A disposable, per-query evaluation cursor over a compiled
/// [`crate::rule::Rule`]. Cheap to create; owns its own register matrix
/// and per-op context, so many iterators can run concurrently over the
/// same read-only rule and storage (spec §5).
pub struct Iter<'a, S> {
    vm: Vm<'a, S>,
    program: &'a Program,
    variables: &'a VariableTable,
    storage: &'a S,
    started: bool,
}

impl<'a, S: StorageLookup> Iter<'a, S> {
    pub(crate) fn new(
        program: &'a Program,
        variables: &'a VariableTable,
        storage: &'a S,
        config: &'a EngineConfig,
    ) -> Self {
        Iter {
            vm: Vm::new(program, storage, config),
            program,
            variables,
            storage,
            started: false,
        }
    }

    /// Bind a variable before the first `next()` call. Calling this after
    /// iteration has begun is a programmer error (spec §4.7, "allowed
    /// only before first next"); debug-asserted, ignored in release.
    pub fn set_var(&mut self, var: usize, entity: EntityId) {
        debug_assert!(!self.started, "set_var called after iteration started");
        self.vm.set_var(var, entity);
    }

    /// Advance the search; `true` means a new binding was published.
    /// Returns `false` exactly once the program is exhausted (spec §4.7,
    /// "Failure model"); polling again past that point is a programmer
    /// error and only debug-asserted, matching the original engine's
    /// `ecs_assert`, which compiles out in release builds.
    pub fn next(&mut self) -> bool {
        debug_assert!(!self.vm.is_done(), "{}", RuntimeError::IteratorExhausted);
        self.started = true;
        self.vm.next()
    }

    /// `true` if `.`/`This` ranges over a table (bulk presentation) rather
    /// than a single entity.
    pub fn this_is_table(&self) -> bool {
        self.program.this_is_table
    }

    /// Matched entities in the current batch. Empty if the rule has no
    /// `this` variable, in which case the rule yields a single boolean
    /// "true" with no bound entities (spec §4.4, "Yield"; §4.7).
    pub fn entities(&self) -> Vec<EntityId> {
        let Some(reg) = self.program.this_register else {
            return Vec::new();
        };
        let slot = self.vm.register(reg);
        if let Some(table) = slot.table {
            let entities = self.storage.table_entities(table);
            let start = slot.offset as usize;
            let end = (slot.offset + slot.count) as usize;
            entities.get(start..end).map(<[EntityId]>::to_vec).unwrap_or_default()
        } else if let Some(e) = slot.entity {
            vec![e]
        } else {
            // `this_register` is only set once the compiler has proven some
            // op writes it before Yield (see `compiler::compile`'s "8.
            // Yield" step), so an unbound slot here means Yield fired
            // without actually writing its input register.
            debug_assert!(false, "{}", RuntimeError::UnboundRegister { register: reg });
            Vec::new()
        }
    }

    /// `entities().len()`; `0` means the rule is a boolean "true" match
    /// with no bound subject (spec §6).
    pub fn count(&self) -> u32 {
        self.entities().len() as u32
    }

    /// Concrete id or pair for each term, with variables reified (spec
    /// §6, `ids[0..term_count)`).
    pub fn ids(&self) -> Vec<EntityId> {
        (0..self.program.term_count).map(|ti| self.id_for(ti)).collect()
    }

    fn id_for(&self, ti: usize) -> EntityId {
        let Some(op_idx) = self.program.term_ops[ti] else {
            return self.literal_id_for(ti);
        };
        let Some(pair) = &self.program.ops[op_idx].filter else {
            return EntityId::from(0u64);
        };
        let pred = self.resolve_slot(pair.predicate);
        if pair.is_unary {
            return pred;
        }
        let obj = if pair.flags.contains(PairFlags::OBJ_NONE) {
            EntityId::from(0u64)
        } else {
            self.resolve_slot(pair.object)
        };
        EntityId::pair(pred, obj)
    }

    /// `Nothing`-flagged terms (and any other term that never reached the
    /// emitter) report their own unevaluated pair verbatim, mirroring the
    /// original engine's `it->ids[i] = term->id` fallback.
    fn literal_id_for(&self, ti: usize) -> EntityId {
        let Some(pair) = self.program.term_literal_ids.get(ti).and_then(|p| p.as_ref()) else {
            return EntityId::from(0u64);
        };
        let pred = self.resolve_slot(pair.predicate);
        if pair.is_unary {
            return pred;
        }
        let obj = if pair.flags.contains(PairFlags::OBJ_NONE) {
            EntityId::from(0u64)
        } else {
            self.resolve_slot(pair.object)
        };
        EntityId::pair(pred, obj)
    }

    fn resolve_slot(&self, slot: Slot) -> EntityId {
        match slot {
            Slot::Id(id) => id,
            Slot::Register(r) => self.vm.register(r).entity.unwrap_or(EntityId::WILDCARD),
        }
    }

    /// The entity each term was matched against; `0` iff the term's
    /// subject is the `this` batch (spec §6, `subjects[0..term_count)`).
    pub fn subjects(&self) -> Vec<EntityId> {
        (0..self.program.term_count).map(|ti| self.subject_for(ti)).collect()
    }

    fn subject_for(&self, ti: usize) -> EntityId {
        let Some(op_idx) = self.program.term_ops[ti] else {
            return EntityId::from(0u64);
        };
        match self.program.ops[op_idx].subject_hint {
            SubjectHint::ThisBatch => EntityId::from(0u64),
            SubjectHint::Literal(id) => id,
            SubjectHint::Register(r) => self.vm.register(r).entity.unwrap_or(EntityId::from(0u64)),
        }
    }

    /// Public (1-based) column index per term; `0` if the term never
    /// matched (an Optional that didn't fire), negative when the matched
    /// column belongs to the bulk `this` table rather than one specific
    /// resolved row (spec §6: "negative for shared sources").
    pub fn columns(&self) -> Vec<i32> {
        (0..self.program.term_count).map(|ti| self.column_for(ti)).collect()
    }

    fn column_for(&self, ti: usize) -> i32 {
        let Some(op_idx) = self.program.term_ops[ti] else {
            return 0;
        };
        let col = self.vm.column(ti);
        if col != 0 && matches!(self.program.ops[op_idx].subject_hint, SubjectHint::ThisBatch) {
            -col
        } else {
            col
        }
    }

    /// Whether term `term` matched on this yield; the Optional scenario
    /// (spec §8, seed test 7) reads this per optional term.
    pub fn is_set(&self, term: usize) -> bool {
        self.vm.column(term) != 0
    }

    /// Bound entity for each Entity-kind variable, in variable-id order
    /// (`0` if unbound). Table-kind variables are hidden from this public
    /// surface (spec §4.7, "Expose variable values").
    pub fn variables(&self) -> Vec<EntityId> {
        self.variables
            .iter()
            .filter(|v| matches!(v.kind, VariableKind::Entity))
            .map(|v| self.vm.register(v.id).entity.unwrap_or(EntityId::from(0u64)))
            .collect()
    }

    /// Current entity bound to variable `var` (`0` if unbound or the
    /// variable is Table-kind).
    pub fn get_var(&self, var: usize) -> EntityId {
        self.vm.register(var).entity.unwrap_or(EntityId::from(0u64))
    }

    /// Release the iterator's scratch (register matrix, columns, per-op
    /// context). A no-op beyond ordinary `Drop` in Rust, kept for parity
    /// with the conceptual `free(iterator)` surface of spec §4.7.
    pub fn free(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostic;
    use crate::order::order_variables;
    use crate::program::Program as CompiledProgram;
    use crate::storage::InMemoryWorld;
    use crate::term::{Term, TermArg};

    fn compile(world: &InMemoryWorld, terms: &[Term]) -> (CompiledProgram, VariableTable) {
        let mut variables = VariableTable::new();
        let diag = Diagnostic::default();
        let order = order_variables(terms, &mut variables, &diag).unwrap();
        let config = EngineConfig::default();
        let program = crate::compiler::compile(terms, &mut variables, &order, world, &config).unwrap();
        (program, variables)
    }

    #[test]
    fn ids_are_reified_pairs() {
        let mut world = InMemoryWorld::new();
        let home_planet = EntityId::new(1, 0);
        let tatooine = EntityId::new(2, 0);
        let luke = EntityId::new(10, 0);
        world.add_pair(luke, home_planet, tatooine);

        let terms = vec![Term::with_object(
            TermArg::id(home_planet),
            TermArg::var("."),
            TermArg::var("_X"),
        )];
        let (program, variables) = compile(&world, &terms);
        let config = EngineConfig::default();
        let mut iter = Iter::new(&program, &variables, &world, &config);
        assert!(iter.next());
        let ids = iter.ids();
        assert_eq!(ids[0], EntityId::pair(home_planet, tatooine));
        assert!(!iter.next());
    }

    #[test]
    fn boolean_rule_has_no_this_and_yields_once() {
        let mut world = InMemoryWorld::new();
        let creature = EntityId::new(1, 0);
        let yoda = EntityId::new(100, 0);
        world.add(yoda, creature);
        let terms = vec![Term::new(TermArg::id(creature), TermArg::id(yoda))];
        let (program, variables) = compile(&world, &terms);
        let config = EngineConfig::default();
        let mut iter = Iter::new(&program, &variables, &world, &config);
        assert!(iter.next());
        assert_eq!(iter.count(), 0);
        assert!(iter.entities().is_empty());
    }

    #[test]
    fn optional_term_reports_is_set() {
        let mut world = InMemoryWorld::new();
        let tag_a = EntityId::new(1, 0);
        let tag_b = EntityId::new(2, 0);
        let e1 = EntityId::new(10, 0);
        let e2 = EntityId::new(11, 0);
        world.add(e1, tag_a);
        world.add_type(e2, vec![tag_a, tag_b]);

        let terms = vec![
            Term::new(TermArg::id(tag_a), TermArg::var(".")),
            Term::new(TermArg::id(tag_b), TermArg::var(".")).optional(),
        ];
        let (program, variables) = compile(&world, &terms);
        let config = EngineConfig::default();
        let mut iter = Iter::new(&program, &variables, &world, &config);

        let mut results = Vec::new();
        while iter.next() {
            let this = iter.entities();
            let is_set = iter.is_set(1);
            results.push((this, is_set));
        }
        assert_eq!(results.len(), 2);
        for (entities, is_set) in results {
            let entity = entities[0];
            if entity.low() == e2.low() {
                assert!(is_set);
            } else {
                assert!(!is_set);
            }
        }
    }
}
