//! Instruction interpreter (C6): the backtracking dispatch loop that
//! drives a compiled [`Program`] against a [`StorageLookup`] (spec §4.6).
//!
//! No call stack is used; suspension between `next()` calls is just
//! freezing `ip`, `redo` and the per-operation context array, matching
//! the "Backtracking without call stacks" design note (spec §9).

use crate::closure::{subset_chain, superset_chain};
use crate::config::EngineConfig;
use crate::error::RuntimeError;
use crate::frame::{RegisterMatrix, RegisterSlot};
use crate::id::EntityId;
use crate::pair::{Pair, PairFlags, Slot};
use crate::program::{NotRole, OpKind, Operation, Program};
use crate::storage::{StorageLookup, TableId};

/// `-1` is the only valid terminal jump; anything else must land inside
/// the program. A compiled program with a target outside that range is a
/// compiler bug, not a reachable runtime state (spec §7).
#[inline]
fn debug_assert_valid_jump(ip: usize, target: i32, op_count: usize) {
    debug_assert!(
        target == -1 || (target >= 0 && (target as usize) < op_count),
        "{}",
        RuntimeError::InvalidJumpTarget { ip, label: target }
    );
}

/// Per-instruction evaluation state, discriminated by the owning op's
/// kind (spec §4.6, "Per-instruction state").
#[derive(Debug, Clone)]
enum OpState {
    None,
    /// Select: tables matching the id-record lookup, and a cursor.
    Select { tables: Vec<TableId>, idx: usize },
    /// SubSet/SuperSet: the materialized closure walk, and a cursor.
    Walk { items: Vec<EntityId>, idx: usize },
    /// Each: the next row to forward.
    Each { row: usize },
}

/// One compiled rule's live evaluation state. Cheap to create; disposable
/// (spec §4.7, "iterators are disposable").
pub struct Vm<'a, S> {
    program: &'a Program,
    storage: &'a S,
    config: &'a EngineConfig,
    regs: RegisterMatrix,
    op_ctx: Vec<OpState>,
    ip: i32,
    last_frame: usize,
    redo: bool,
    done: bool,
    yield_frame: usize,
}

impl<'a, S: StorageLookup> Vm<'a, S> {
    pub fn new(program: &'a Program, storage: &'a S, config: &'a EngineConfig) -> Self {
        Vm {
            program,
            storage,
            config,
            regs: RegisterMatrix::new(program.frame_count(), program.variable_count, program.term_count),
            op_ctx: (0..program.ops.len()).map(|_| OpState::None).collect(),
            ip: 0,
            last_frame: 0,
            redo: false,
            done: false,
            yield_frame: 0,
        }
    }

    /// Bind a variable before the first `next()` call (spec §4.7,
    /// `set_var`). Writes directly into frame 0; calling this after
    /// iteration has begun produces undefined (but not unsound) results,
    /// matching the original engine's "allowed only before first next".
    pub fn set_var(&mut self, var: usize, entity: EntityId) {
        self.regs.set(0, var, RegisterSlot::single_entity(entity));
    }

    pub fn register(&self, var: usize) -> RegisterSlot {
        self.regs.get(self.yield_frame, var)
    }

    /// `true` once the program has been exhausted and `next()` has
    /// returned `false`; re-polling past that point is a programmer error
    /// (spec §4.7, "Failure model").
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn column(&self, term: usize) -> i32 {
        self.regs.column(self.yield_frame, term)
    }

    /// Advance the search; `true` means a new binding was yielded.
    pub fn next(&mut self) -> bool {
        if self.done {
            return false;
        }
        loop {
            if self.ip < 0 {
                self.done = true;
                return false;
            }
            let ip = self.ip as usize;
            let op = &self.program.ops[ip];

            if !self.redo && op.frame > self.last_frame {
                self.regs.copy_forward(op.frame - 1, op.frame);
            }

            let result = dispatch(op, self.redo, &mut self.regs, &mut self.op_ctx[ip], self.storage, self.config);

            #[cfg(feature = "trace-vm")]
            tracing::trace!(ip, kind = ?op.kind, redo = self.redo, result, "dispatch");

            if op.kind == OpKind::Yield && result {
                self.yield_frame = op.frame;
                self.last_frame = op.frame;
                let next_ip = op.on_fail;
                debug_assert_valid_jump(ip, next_ip, self.program.ops.len());
                self.redo = next_ip <= self.ip;
                self.ip = next_ip;
                return true;
            }

            let next_ip = if result { op.on_pass } else { op.on_fail };
            debug_assert_valid_jump(ip, next_ip, self.program.ops.len());
            self.redo = next_ip <= self.ip;
            self.last_frame = op.frame;
            self.ip = next_ip;
        }
    }
}

fn dispatch<S: StorageLookup>(
    op: &Operation,
    redo: bool,
    regs: &mut RegisterMatrix,
    ctx: &mut OpState,
    storage: &S,
    config: &EngineConfig,
) -> bool {
    match op.kind {
        OpKind::Input => !redo,
        OpKind::Select => dispatch_select(op, redo, regs, ctx, storage, config),
        OpKind::With => match &op.filter {
            Some(pair) if pair.is_transitive() => dispatch_transitive_with(op, redo, regs, storage, config),
            Some(_) => dispatch_with(op, redo, regs, storage, config),
            None => false,
        },
        OpKind::SubSet => dispatch_walk(OpKind::SubSet, op, redo, regs, ctx, storage, config),
        OpKind::SuperSet => dispatch_walk(OpKind::SuperSet, op, redo, regs, ctx, storage, config),
        OpKind::Each => dispatch_each(op, redo, regs, ctx, storage),
        OpKind::Not => dispatch_not(op, redo),
        OpKind::Yield => !redo,
    }
}

fn dispatch_not(op: &Operation, redo: bool) -> bool {
    match op.not_role {
        Some(NotRole::Lead) => !redo,
        Some(NotRole::TrailNot) => false,
        Some(NotRole::TrailOptional) => !redo,
        None => false,
    }
}

/// Read a concrete entity out of a (possibly still-wildcard) slot: the
/// literal id, the bound entity, or a representative entity drawn from a
/// bound table (every entity in a table shares the same type, so any one
/// of them is a valid witness for type-level traits like IsA ancestry).
fn slot_entity<S: StorageLookup>(slot: Slot, regs: &RegisterMatrix, frame: usize, storage: &S) -> Option<EntityId> {
    match slot {
        Slot::Id(id) => Some(id),
        Slot::Register(r) => {
            let rs = regs.get(frame, r);
            if let Some(e) = rs.entity {
                Some(e)
            } else if let Some(t) = rs.table {
                storage.table_entities(t).get(rs.offset as usize).copied()
            } else {
                None
            }
        }
    }
}

fn build_mask<S: StorageLookup>(pair: &Pair, regs: &RegisterMatrix, frame: usize, storage: &S) -> EntityId {
    let pred = slot_entity(pair.predicate, regs, frame, storage).unwrap_or(EntityId::WILDCARD);
    if pair.is_unary {
        return pred;
    }
    let obj = if pair.flags.contains(PairFlags::OBJ_NONE) {
        EntityId::from(0u64)
    } else {
        slot_entity(pair.object, regs, frame, storage).unwrap_or(EntityId::WILDCARD)
    };
    EntityId::pair(pred, obj)
}

fn ids_equal_with_isa<S: StorageLookup>(
    storage: &S,
    config: &EngineConfig,
    found: EntityId,
    wanted: EntityId,
    use_isa: bool,
) -> bool {
    if found.stripped() == wanted.stripped() {
        return true;
    }
    use_isa && subset_chain(storage, EntityId::IS_A, wanted, config)
        .iter()
        .any(|d| d.stripped() == found.stripped())
}

/// Scan `table`'s type for a column matching `op.filter`, reifying any
/// wildcard predicate/object register and recording the matched column
/// (spec §4.6, "Find-next-column", "Reify variables").
fn reify_from_table<S: StorageLookup>(
    op: &Operation,
    table: TableId,
    storage: &S,
    config: &EngineConfig,
    regs: &mut RegisterMatrix,
) -> bool {
    let Some(pair) = &op.filter else { return false };
    let same_var = pair.flags.contains(PairFlags::PRED_VAR)
        && pair.flags.contains(PairFlags::OBJ_VAR)
        && matches!((pair.predicate, pair.object), (Slot::Register(a), Slot::Register(b)) if a == b);

    let type_ = storage.table_type(table);
    for (col, &id) in type_.iter().enumerate() {
        if pair.is_unary {
            let matched = match pair.predicate {
                Slot::Id(want) => !id.is_pair() && ids_equal_with_isa(storage, config, id, want, op.predicate_isa),
                Slot::Register(_) => !id.is_pair(),
            };
            if !matched {
                continue;
            }
            if let Slot::Register(reg) = pair.predicate {
                regs.set(op.frame, reg, RegisterSlot::single_entity(id));
            }
            if op.term_index >= 0 {
                regs.set_column(op.frame, op.term_index as usize, col as i32 + 1);
            }
            return true;
        }

        let Some((r, o)) = id.split_pair() else { continue };
        if pair.flags.contains(PairFlags::OBJ_NONE) && o.stripped() != EntityId::from(0u64) {
            continue;
        }
        let pred_ok = match pair.predicate {
            Slot::Id(want) => ids_equal_with_isa(storage, config, r, want, op.predicate_isa),
            Slot::Register(_) => true,
        };
        if !pred_ok {
            continue;
        }
        let obj_ok = match pair.object {
            Slot::Id(want) => o.stripped() == want.stripped(),
            Slot::Register(_) => true,
        };
        if !obj_ok {
            continue;
        }
        if same_var && r.stripped() != o.stripped() {
            continue;
        }

        if let Slot::Register(reg) = pair.predicate {
            regs.set(op.frame, reg, RegisterSlot::single_entity(r));
        }
        if let Slot::Register(reg) = pair.object {
            regs.set(op.frame, reg, RegisterSlot::single_entity(o));
        }
        if op.term_index >= 0 {
            regs.set_column(op.frame, op.term_index as usize, col as i32 + 1);
        }
        return true;
    }
    false
}

fn dispatch_select<S: StorageLookup>(
    op: &Operation,
    redo: bool,
    regs: &mut RegisterMatrix,
    ctx: &mut OpState,
    storage: &S,
    config: &EngineConfig,
) -> bool {
    let Some(pair) = &op.filter else { return false };
    if !redo {
        let mut masks = vec![build_mask(pair, regs, op.frame, storage)];
        if op.predicate_isa {
            if let Slot::Id(pred) = pair.predicate {
                for sub in subset_chain(storage, EntityId::IS_A, pred, config) {
                    let obj = if pair.is_unary {
                        None
                    } else {
                        Some(slot_entity(pair.object, regs, op.frame, storage).unwrap_or(EntityId::WILDCARD))
                    };
                    masks.push(match obj {
                        Some(o) => EntityId::pair(sub, o),
                        None => sub,
                    });
                }
            }
        }
        let mut tables = Vec::new();
        for mask in masks {
            if let Some(record) = storage.lookup_id_record(mask) {
                for tr in &record.tables {
                    if !tables.contains(&tr.table) {
                        tables.push(tr.table);
                    }
                }
            }
        }
        *ctx = OpState::Select { tables, idx: 0 };
    }

    let OpState::Select { tables, idx } = ctx else { return false };
    while *idx < tables.len() {
        let table = tables[*idx];
        *idx += 1;
        let entities = storage.table_entities(table);
        if entities.is_empty() {
            continue;
        }
        if let Some(out) = op.output {
            regs.set(op.frame, out, RegisterSlot::table_range(table, 0, entities.len() as u32));
        }
        if reify_from_table(op, table, storage, config, regs) {
            return true;
        }
    }
    false
}

fn dispatch_with<S: StorageLookup>(
    op: &Operation,
    redo: bool,
    regs: &mut RegisterMatrix,
    storage: &S,
    config: &EngineConfig,
) -> bool {
    if redo {
        return false;
    }
    let primary_table = if let Some(lit) = op.literal_subject {
        storage.resolve_entity(lit).map(|(t, _)| t)
    } else if let Some(r) = op.input {
        let slot = regs.get(op.frame, r);
        if let Some(t) = slot.table {
            Some(t)
        } else {
            slot.entity.and_then(|e| storage.resolve_entity(e)).map(|(t, _)| t)
        }
    } else {
        None
    };
    let Some(primary_table) = primary_table else { return false };
    if reify_from_table(op, primary_table, storage, config, regs) {
        return true;
    }
    if op.isa_subject {
        if let Some(lit) = op.literal_subject {
            for ancestor in superset_chain(storage, EntityId::IS_A, lit, config) {
                if let Some((t, _)) = storage.resolve_entity(ancestor) {
                    if reify_from_table(op, t, storage, config, regs) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

fn dispatch_transitive_with<S: StorageLookup>(
    op: &Operation,
    redo: bool,
    regs: &RegisterMatrix,
    storage: &S,
    config: &EngineConfig,
) -> bool {
    if redo {
        return false;
    }
    let Some(pair) = &op.filter else { return false };
    let Slot::Id(relation) = pair.predicate else { return false };
    let subject = if let Some(lit) = op.literal_subject {
        Some(lit)
    } else if let Some(r) = op.input {
        slot_entity(Slot::Register(r), regs, op.frame, storage)
    } else {
        None
    };
    let Some(subject) = subject else { return false };
    let Some(object) = slot_entity(pair.object, regs, op.frame, storage) else { return false };

    if pair.is_inclusive() && subject.stripped() == object.stripped() {
        return true;
    }
    superset_chain(storage, relation, subject, config)
        .iter()
        .any(|a| a.stripped() == object.stripped())
}

fn dispatch_walk<S: StorageLookup>(
    kind: OpKind,
    op: &Operation,
    redo: bool,
    regs: &mut RegisterMatrix,
    ctx: &mut OpState,
    storage: &S,
    config: &EngineConfig,
) -> bool {
    let Some(relation) = op.relation else { return false };
    if !redo {
        let start = if let Some(lit) = op.walk_from_literal {
            Some(lit)
        } else if let Some(r) = op.input {
            slot_entity(Slot::Register(r), regs, op.frame, storage)
        } else {
            None
        };
        let items = match start {
            Some(start) => {
                let mut items = match kind {
                    OpKind::SubSet => subset_chain(storage, relation, start, config),
                    OpKind::SuperSet => superset_chain(storage, relation, start, config),
                    _ => unreachable!(),
                };
                if op.inclusive {
                    items.insert(0, start);
                }
                items
            }
            None => Vec::new(),
        };
        *ctx = OpState::Walk { items, idx: 0 };
    }

    let OpState::Walk { items, idx } = ctx else { return false };
    while *idx < items.len() {
        let candidate = items[*idx];
        *idx += 1;
        match kind {
            OpKind::SubSet => {
                if let Some((table, row)) = storage.resolve_entity(candidate) {
                    if let Some(out) = op.output {
                        regs.set(op.frame, out, RegisterSlot::table_range(table, row, 1));
                    }
                    return true;
                }
            }
            OpKind::SuperSet => {
                if let Some(out) = op.output {
                    regs.set(op.frame, out, RegisterSlot::single_entity(candidate));
                }
                return true;
            }
            _ => unreachable!(),
        }
    }
    false
}

fn dispatch_each<S: StorageLookup>(
    op: &Operation,
    redo: bool,
    regs: &mut RegisterMatrix,
    ctx: &mut OpState,
    storage: &S,
) -> bool {
    let Some(input) = op.input else { return false };
    if !redo {
        let slot = regs.get(op.frame, input);
        let row = slot.table.map(|_| slot.offset as usize).unwrap_or(0);
        *ctx = OpState::Each { row };
    }
    let OpState::Each { row } = ctx else { return false };
    let slot = regs.get(op.frame, input);
    let Some(table) = slot.table else { return false };
    let end = (slot.offset + slot.count) as usize;
    if *row >= end {
        return false;
    }
    let entities = storage.table_entities(table);
    // Skip builtin entities that could confuse downstream operations
    // (spec §9, "Wildcard"/"This" inside an Each loop).
    loop {
        if *row >= end {
            return false;
        }
        let Some(&entity) = entities.get(*row) else { return false };
        *row += 1;
        let stripped = entity.stripped();
        if stripped != EntityId::WILDCARD && stripped != EntityId::THIS {
            if let Some(out) = op.output {
                regs.set(op.frame, out, RegisterSlot::single_entity(entity));
            }
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::error::Diagnostic;
    use crate::order::order_variables;
    use crate::storage::InMemoryWorld;
    use crate::term::{Term, TermArg};
    use crate::variable::VariableTable;

    fn run(world: &InMemoryWorld, terms: &[Term]) -> (Program, VariableTable) {
        let mut variables = VariableTable::new();
        let diag = Diagnostic::default();
        let order = order_variables(terms, &mut variables, &diag).unwrap();
        let config = EngineConfig::default();
        let program = compile(terms, &mut variables, &order, world, &config).unwrap();
        (program, variables)
    }

    #[test]
    fn fact_query_yields_once() {
        let mut world = InMemoryWorld::new();
        let yoda = EntityId::new(100, 0);
        let creature = EntityId::new(1, 0);
        world.add(yoda, creature);
        let terms = vec![Term::new(TermArg::id(creature), TermArg::id(yoda))];
        let (program, _variables) = run(&world, &terms);
        let config = EngineConfig::default();
        let mut vm = Vm::new(&program, &world, &config);
        assert!(vm.next());
        assert!(!vm.next());
    }

    #[test]
    fn variable_query_yields_matching_entities() {
        let mut world = InMemoryWorld::new();
        let home_planet = EntityId::new(1, 0);
        let tatooine = EntityId::new(2, 0);
        let dagobah = EntityId::new(3, 0);
        let luke = EntityId::new(10, 0);
        let rey = EntityId::new(11, 0);
        let yoda = EntityId::new(12, 0);
        world.add_pair(luke, home_planet, tatooine);
        world.add_pair(rey, home_planet, tatooine);
        world.add_pair(yoda, home_planet, dagobah);

        let terms = vec![Term::with_object(
            TermArg::id(home_planet),
            TermArg::var("."),
            TermArg::id(tatooine),
        )];
        let (program, variables) = run(&world, &terms);
        let config = EngineConfig::default();
        let mut vm = Vm::new(&program, &world, &config);
        let this_table = variables.find(crate::variable::VariableKind::Table, ".").unwrap().id;

        let mut seen = Vec::new();
        while vm.next() {
            let slot = vm.register(this_table);
            let table = slot.table.unwrap();
            for row in slot.offset..(slot.offset + slot.count) {
                seen.push(world.table_entities(table)[row as usize]);
            }
        }
        seen.sort_by_key(|e| e.low());
        let mut expected = vec![luke, rey];
        expected.sort_by_key(|e| e.low());
        assert_eq!(seen, expected);
    }

    #[test]
    fn transitive_subset_includes_descendants() {
        let mut world = InMemoryWorld::new();
        let is_a = EntityId::IS_A;
        world.mark_transitive(is_a);
        let character = EntityId::new(1, 0);
        let creature = EntityId::new(2, 0);
        let droid = EntityId::new(3, 0);
        world.add_pair(creature, is_a, character);
        world.add_pair(droid, is_a, character);

        let terms = vec![Term::with_object(
            TermArg::id(is_a),
            TermArg::var("."),
            TermArg::id(character),
        )];
        let (program, variables) = run(&world, &terms);
        let config = EngineConfig::default();
        let mut vm = Vm::new(&program, &world, &config);
        let this_table = variables.find(crate::variable::VariableKind::Table, ".").unwrap().id;

        let mut seen = Vec::new();
        while vm.next() {
            let slot = vm.register(this_table);
            if let Some(table) = slot.table {
                seen.push(world.table_entities(table)[slot.offset as usize]);
            }
        }
        seen.sort_by_key(|e| e.low());
        let mut expected = vec![creature, droid];
        expected.sort_by_key(|e| e.low());
        assert_eq!(seen, expected);
    }

    #[test]
    fn negation_filters_matching_entities() {
        let mut world = InMemoryWorld::new();
        let tag_a = EntityId::new(1, 0);
        let tag_b = EntityId::new(2, 0);
        let e1 = EntityId::new(10, 0);
        let e2 = EntityId::new(11, 0);
        let e3 = EntityId::new(12, 0);
        world.add(e1, tag_a);
        world.add_type(e2, vec![tag_a, tag_b]);
        world.add(e3, tag_a);

        let terms = vec![
            Term::new(TermArg::id(tag_a), TermArg::var(".")),
            Term::new(TermArg::id(tag_b), TermArg::var(".")).not(),
        ];
        let (program, variables) = run(&world, &terms);
        let config = EngineConfig::default();
        let mut vm = Vm::new(&program, &world, &config);
        let this_table = variables.find(crate::variable::VariableKind::Table, ".").unwrap().id;

        let mut seen = Vec::new();
        while vm.next() {
            let slot = vm.register(this_table);
            if let Some(table) = slot.table {
                for row in slot.offset..(slot.offset + slot.count) {
                    seen.push(world.table_entities(table)[row as usize]);
                }
            }
        }
        seen.sort_by_key(|e| e.low());
        let mut expected = vec![e1, e3];
        expected.sort_by_key(|e| e.low());
        assert_eq!(seen, expected);
    }

    #[test]
    fn dispatch_each_skips_builtin_wildcard_and_this_entities() {
        let table = TableId(0);
        let mut regs = RegisterMatrix::new(2, 2, 0);
        let ordinary = EntityId::new(42, 0);
        regs.set(0, 0, RegisterSlot::table_range(table, 0, 1));

        struct FixedWorld(Vec<EntityId>);
        impl StorageLookup for FixedWorld {
            fn resolve_entity(&self, _entity: EntityId) -> Option<(TableId, u32)> {
                None
            }
            fn lookup_id_record(&self, _mask: EntityId) -> Option<&crate::storage::IdRecord> {
                None
            }
            fn table_type(&self, _table: TableId) -> &[EntityId] {
                &[]
            }
            fn table_entities(&self, _table: TableId) -> &[EntityId] {
                &self.0
            }
            fn has_trait(&self, _entity: EntityId, _trait_: crate::storage::Trait) -> bool {
                false
            }
        }

        let world = FixedWorld(vec![EntityId::WILDCARD, EntityId::THIS, ordinary]);
        let mut op = Operation::new(OpKind::Each, 0);
        op.input = Some(0);
        op.output = Some(1);
        // The table register's `count` covers all three rows.
        regs.set(0, 0, RegisterSlot::table_range(table, 0, 3));

        let mut ctx = OpState::None;
        assert!(dispatch_each(&op, false, &mut regs, &mut ctx, &world));
        assert_eq!(regs.get(0, 1).entity, Some(ordinary));
        assert!(!dispatch_each(&op, true, &mut regs, &mut ctx, &world));
    }
}
