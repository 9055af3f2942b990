//! Program emitter (C4): lowers an ordered term list into the flat
//! instruction array the VM evaluates (spec §4.4).
//!
//! Linking convention: every "plain" data op sets `on_pass = index + 1`,
//! `on_fail = index - 1` (advance / upstream redo). The Not/Optional
//! wrapper pair deviates from this and is linked explicitly at the point
//! of emission; see the doc comments on [`crate::program::NotRole`] and
//! `emit_wrapped` below. Inclusive-transitive closures (spec §4.4,
//! "Transitive lowering") are folded into the SubSet/SuperSet op itself
//! via `Operation::inclusive` rather than the separate Store/SetJmp/Jump
//! quad the spec sketches for it: the op's own cursor prepends the
//! starting entity to the enumerated closure, so the first `next()`
//! yields it and later redos walk strict ancestors/descendants, with no
//! extra control-flow ops or frames needed.

use crate::config::EngineConfig;
use crate::error::CompileError;
use crate::id::EntityId;
use crate::pair::{term_to_pair, Pair, Slot};
use crate::program::{NotRole, OpKind, Operation, Program, SubjectHint};
use crate::storage::{StorageLookup, Trait};
use crate::term::{Operator, SubjectFlags, Term, TermArg};
use crate::variable::{VariableKind, VariableTable};

/// `Nothing`-flagged terms (spec §3, "subject selector flags") match no
/// source: the original engine's `skip_term` excludes them from both
/// variable-depth crawling and program emission, reporting only their own
/// (possibly still-wildcard) id in the iterator's `ids[]` array rather
/// than a matched one (`examples/original_source`'s `rules.c`,
/// `skip_term`/`ecs_rule_next`'s `it->ids[i] = term->id` initialization).
fn is_nothing(term: &Term) -> bool {
    term.subject_flags.contains(SubjectFlags::NOTHING)
}

struct Compiler<'a, S> {
    storage: &'a S,
    ops: Vec<Operation>,
    /// Highest frame index assigned so far; control-flow ops reuse it.
    current_frame: usize,
    /// variable id -> has a prior op already produced a value for it.
    written: Vec<bool>,
    /// term index -> first data op emitted for it, used to populate
    /// [`Program::term_ops`] for the iterator façade (spec §6).
    term_ops: Vec<Option<usize>>,
    /// term index -> the unevaluated pair of a `Nothing`-flagged term, used
    /// to populate [`Program::term_literal_ids`] instead of `term_ops`.
    term_literal_ids: Vec<Option<Pair>>,
}

impl<'a, S: StorageLookup> Compiler<'a, S> {
    fn ensure_written_len(&mut self, variables: &VariableTable) {
        if self.written.len() < variables.len() {
            self.written.resize(variables.len(), false);
        }
    }

    fn next_frame(&mut self) -> usize {
        self.current_frame += 1;
        self.current_frame
    }

    /// Push a data op, linking it with the default advance/previous rule.
    fn push_linked(&mut self, mut op: Operation) -> usize {
        let idx = self.ops.len() as i32;
        op.on_pass = idx + 1;
        op.on_fail = idx - 1;
        let term_index = op.term_index;
        let has_filter = op.filter.is_some();
        self.ops.push(op);
        let idx = idx as usize;
        if has_filter && term_index >= 0 {
            let ti = term_index as usize;
            if ti < self.term_ops.len() && self.term_ops[ti].is_none() {
                self.term_ops[ti] = Some(idx);
            }
        }
        idx
    }
}

/// Compile `terms` (already ordered by [`crate::order::order_variables`])
/// into a [`Program`].
#[tracing::instrument(level = "debug", skip_all, fields(terms = terms.len()))]
pub fn compile<S: StorageLookup>(
    terms: &[Term],
    variables: &mut VariableTable,
    order: &[usize],
    storage: &S,
    config: &EngineConfig,
) -> Result<Program, CompileError> {
    let mut c = Compiler {
        storage,
        ops: Vec::new(),
        current_frame: 0,
        written: vec![false; variables.len()],
        term_ops: vec![None; terms.len()],
        term_literal_ids: vec![None; terms.len()],
    };

    // Input: program start.
    let mut input = Operation::new(OpKind::Input, 0);
    input.on_pass = 1;
    input.on_fail = -1;
    c.ops.push(input);

    // `Nothing`-flagged terms never reach emission; they report their own
    // pair verbatim (spec §3, "Nothing"; `is_nothing`'s doc comment).
    for (ti, term) in terms.iter().enumerate() {
        if is_nothing(term) {
            c.term_literal_ids[ti] = Some(term_to_pair(term, variables, storage));
        }
    }

    // 2. Literal-subject terms (excluding the wildcard-subject literal).
    for (ti, term) in terms.iter().enumerate() {
        if term.operator == Operator::And
            && !is_nothing(term)
            && term.has_literal_subject()
            && term.subject.as_id() != Some(EntityId::WILDCARD)
        {
            emit_and_term(&mut c, variables, ti, term)?;
        }
    }

    // 3. Subject-variable terms, in sorted variable order.
    for &vid in order {
        if !matches!(variables.get(vid).kind, VariableKind::Table) {
            continue;
        }
        let name = variables.get(vid).name.clone();
        for (ti, term) in terms.iter().enumerate() {
            if term.operator != Operator::And || is_nothing(term) {
                continue;
            }
            let TermArg::Variable(subj_name) = &term.subject else {
                continue;
            };
            let normalized = if subj_name == crate::variable::ROOT_ALIAS {
                crate::variable::ROOT_NAME
            } else {
                subj_name.as_str()
            };
            if normalized == name {
                emit_and_term(&mut c, variables, ti, term)?;
            }
        }
    }

    // 4. Wildcard-subject terms: enumerate without binding a subject.
    for (ti, term) in terms.iter().enumerate() {
        if term.operator == Operator::And
            && !is_nothing(term)
            && term.subject.as_id() == Some(EntityId::WILDCARD)
        {
            let pair = term_to_pair(term, variables, storage);
            let mut op = Operation::new(OpKind::Select, 0);
            op.filter = Some(pair);
            op.term_index = ti as i32;
            op.frame = c.next_frame();
            c.push_linked(op);
        }
    }

    // 5. Not terms.
    for (ti, term) in terms.iter().enumerate() {
        if term.operator == Operator::Not && !is_nothing(term) {
            emit_wrapped(&mut c, variables, ti, term, NotRole::TrailNot)?;
        }
    }

    // 6. Optional terms.
    for (ti, term) in terms.iter().enumerate() {
        if term.operator == Operator::Optional && !is_nothing(term) {
            emit_wrapped(&mut c, variables, ti, term, NotRole::TrailOptional)?;
        }
    }

    // 7. Each closures: bridge every Entity-kind variable whose Table-kind
    // twin has been written but which has not itself been produced yet.
    c.ensure_written_len(variables);
    let bridge_targets: Vec<(usize, usize)> = variables
        .iter()
        .filter(|v| matches!(v.kind, VariableKind::Entity))
        .filter_map(|v| {
            if c.written.get(v.id).copied().unwrap_or(false) {
                return None;
            }
            let table_twin = variables.find(VariableKind::Table, &v.name)?;
            if c.written.get(table_twin.id).copied().unwrap_or(false) {
                Some((table_twin.id, v.id))
            } else {
                None
            }
        })
        .collect();
    for (table_id, entity_id) in bridge_targets {
        let mut op = Operation::new(OpKind::Each, 0);
        op.input = Some(table_id);
        op.output = Some(entity_id);
        op.frame = c.next_frame();
        c.push_linked(op);
        c.written[entity_id] = true;
    }

    // 8. Yield.
    let (this_register, this_is_table) = match variables.root_id() {
        Some(_) => {
            let entity_var = variables.find(VariableKind::Entity, crate::variable::ROOT_NAME);
            let table_var = variables.find(VariableKind::Table, crate::variable::ROOT_NAME);
            if let Some(v) = entity_var.filter(|v| c.written.get(v.id).copied().unwrap_or(false)) {
                (Some(v.id), false)
            } else if let Some(v) =
                table_var.filter(|v| c.written.get(v.id).copied().unwrap_or(false))
            {
                (Some(v.id), true)
            } else {
                (None, false)
            }
        }
        None => (None, false),
    };
    let mut yield_op = Operation::new(OpKind::Yield, 0);
    yield_op.input = this_register;
    yield_op.frame = c.next_frame();
    let idx = c.ops.len() as i32;
    yield_op.on_pass = -1;
    yield_op.on_fail = idx - 1;
    c.ops.push(yield_op);

    if c.ops.len() > config.max_program_length {
        return Err(CompileError::MalformedTerm {
            reason: format!(
                "compiled program exceeds max_program_length ({} > {})",
                c.ops.len(),
                config.max_program_length
            ),
            diag: crate::error::Diagnostic::default(),
        });
    }

    Ok(Program {
        ops: c.ops,
        variable_count: variables.len(),
        term_count: terms.len(),
        this_register,
        this_is_table,
        term_ops: c.term_ops,
        term_literal_ids: c.term_literal_ids,
    })
}

/// Emit one `And` term: either a plain Select/With, or (if the predicate
/// is transitive) the appropriate transitive lowering.
fn emit_and_term<S: StorageLookup>(
    c: &mut Compiler<'_, S>,
    variables: &mut VariableTable,
    ti: usize,
    term: &Term,
) -> Result<(), CompileError> {
    c.ensure_written_len(variables);
    let pair = term_to_pair(term, variables, c.storage);
    if pair.is_transitive() {
        emit_transitive_term(c, variables, ti, term, pair)
    } else {
        emit_plain_term(c, variables, ti, term, pair)
    }
}

fn subject_variable_id(variables: &VariableTable, term: &Term) -> Option<usize> {
    let TermArg::Variable(name) = &term.subject else {
        return None;
    };
    variables.find(VariableKind::Table, name).map(|v| v.id)
}

fn mark_reified_operands<S: StorageLookup>(c: &mut Compiler<'_, S>, pair: &Pair) {
    if let Slot::Register(r) = pair.predicate {
        c.ensure_written_len_raw(r);
        c.written[r] = true;
    }
    if let Slot::Register(r) = pair.object {
        c.ensure_written_len_raw(r);
        c.written[r] = true;
    }
}

impl<'a, S: StorageLookup> Compiler<'a, S> {
    fn ensure_written_len_raw(&mut self, id: usize) {
        if self.written.len() <= id {
            self.written.resize(id + 1, false);
        }
    }
}

fn emit_plain_term<S: StorageLookup>(
    c: &mut Compiler<'_, S>,
    variables: &mut VariableTable,
    ti: usize,
    term: &Term,
    pair: Pair,
) -> Result<(), CompileError> {
    let mut op = Operation::new(OpKind::With, 0);

    if term.has_literal_subject() {
        let subj = term.subject.as_id().expect("literal subject");
        op.kind = OpKind::With;
        op.literal_subject = Some(subj);
        op.subject_hint = SubjectHint::Literal(subj);
        // Implicit IsA substitution: allow the VM to fall back to the
        // subject's IsA ancestors if the subject does not own the pattern
        // directly, unless the filter is itself an IsA filter.
        if !is_isa_filter(&pair) {
            op.isa_subject = true;
        }
    } else {
        let subj_id = subject_variable_id(variables, term).ok_or_else(|| {
            CompileError::MalformedTerm {
                reason: "term subject is unset".to_owned(),
                diag: crate::error::Diagnostic::default(),
            }
        })?;
        c.ensure_written_len_raw(subj_id);
        if !c.written[subj_id] {
            op.kind = OpKind::Select;
            op.output = Some(subj_id);
            c.written[subj_id] = true;
            // The subject is a fresh Table-kind register seeded in bulk by
            // this Select: every row of the matched table is `this`, so
            // the public surface reports it as shared with the batch.
            op.subject_hint = SubjectHint::ThisBatch;
        } else {
            op.kind = OpKind::With;
            op.input = Some(subj_id);
            op.subject_hint = SubjectHint::Register(subj_id);
        }
    }

    if let Slot::Id(pred_id) = pair.predicate {
        if !c.storage.has_trait(pred_id, Trait::Final) && pred_id != EntityId::IS_A {
            op.predicate_isa = true;
        }
    }

    op.filter = Some(pair.clone());
    op.term_index = ti as i32;
    op.frame = c.next_frame();
    c.push_linked(op);
    mark_reified_operands(c, &pair);
    Ok(())
}

fn is_isa_filter(pair: &Pair) -> bool {
    matches!(pair.predicate, Slot::Id(id) if id == EntityId::IS_A)
}

/// Known/unknown classification of one side of a transitive pair.
enum Side {
    Literal(EntityId),
    Register(usize),
    Unknown(usize),
}

fn classify_subject<S: StorageLookup>(c: &Compiler<'_, S>, variables: &VariableTable, term: &Term) -> Side {
    if term.has_literal_subject() {
        Side::Literal(term.subject.as_id().expect("literal subject"))
    } else {
        let id = subject_variable_id(variables, term).unwrap_or(0);
        if c.written.get(id).copied().unwrap_or(false) {
            Side::Register(id)
        } else {
            Side::Unknown(id)
        }
    }
}

fn classify_object<S: StorageLookup>(c: &Compiler<'_, S>, pair: &Pair) -> Side {
    match pair.object {
        Slot::Id(id) => Side::Literal(id),
        Slot::Register(r) => {
            if c.written.get(r).copied().unwrap_or(false) {
                Side::Register(r)
            } else {
                Side::Unknown(r)
            }
        }
    }
}

fn emit_transitive_term<S: StorageLookup>(
    c: &mut Compiler<'_, S>,
    variables: &mut VariableTable,
    ti: usize,
    term: &Term,
    pair: Pair,
) -> Result<(), CompileError> {
    let relation = match pair.predicate {
        Slot::Id(id) => id,
        Slot::Register(_) => {
            // A transitive predicate given as a variable: fall back to a
            // plain lowering; the predicate's traits cannot be inspected
            // until the register is bound, which this emitter (a static,
            // single-pass compiler) does not attempt.
            return emit_plain_term(c, variables, ti, term, pair);
        }
    };
    let inclusive = pair.is_inclusive();

    let subject = classify_subject(c, variables, term);
    let object = classify_object(c, &pair);

    match (subject, object) {
        // Case 1: both known -> single membership test, reusing With; the
        // VM's dispatch recognizes `pair.is_transitive()` and performs a
        // closure-aware match instead of literal equality.
        (Side::Literal(_), Side::Literal(_))
        | (Side::Literal(_), Side::Register(_))
        | (Side::Register(_), Side::Literal(_))
        | (Side::Register(_), Side::Register(_)) => {
            let mut op = Operation::new(OpKind::With, 0);
            match classify_subject(c, variables, term) {
                Side::Literal(id) => {
                    op.literal_subject = Some(id);
                    op.subject_hint = SubjectHint::Literal(id);
                }
                Side::Register(r) => {
                    op.input = Some(r);
                    op.subject_hint = SubjectHint::Register(r);
                }
                Side::Unknown(_) => unreachable!(),
            }
            op.filter = Some(pair);
            op.term_index = ti as i32;
            op.frame = c.next_frame();
            c.push_linked(op);
        }

        // Case 2: subject known, object unknown -> SuperSet into the
        // object register.
        (subj @ (Side::Literal(_) | Side::Register(_)), Side::Unknown(out_reg)) => {
            emit_set_walk(c, ti, relation, inclusive, OpKind::SuperSet, subj, out_reg, true);
            c.ensure_written_len_raw(out_reg);
            c.written[out_reg] = true;
        }

        // Case 3: subject unknown, object known -> SubSet into the
        // subject's Table-kind register.
        (Side::Unknown(subj_reg), obj @ (Side::Literal(_) | Side::Register(_))) => {
            emit_set_walk(c, ti, relation, inclusive, OpKind::SubSet, obj, subj_reg, false);
            c.ensure_written_len_raw(subj_reg);
            c.written[subj_reg] = true;
        }

        // Case 4: neither known. Select the direct pair first (reifying
        // the object register to the table's literal object column), then
        // widen with a strict SuperSet over the same register so every
        // transitive ancestor of the direct object is also produced.
        (Side::Unknown(subj_reg), Side::Unknown(obj_reg)) => {
            let mut select = Operation::new(OpKind::Select, 0);
            select.output = Some(subj_reg);
            select.filter = Some(pair);
            select.term_index = ti as i32;
            select.frame = c.next_frame();
            c.push_linked(select);
            c.ensure_written_len_raw(subj_reg);
            c.ensure_written_len_raw(obj_reg);
            c.written[subj_reg] = true;
            c.written[obj_reg] = true;

            // Inclusive so the direct object itself is yielded before any
            // ancestor widening is tried on redo (a plain non-inclusive walk
            // would fail outright whenever the direct object has no
            // ancestors, losing the direct match entirely).
            let mut widen = Operation::new(OpKind::SuperSet, 0);
            widen.relation = Some(relation);
            widen.input = Some(obj_reg);
            widen.output = Some(obj_reg);
            widen.inclusive = true;
            widen.term_index = -1;
            widen.frame = c.next_frame();
            c.push_linked(widen);
        }
    }

    Ok(())
}

/// Emit a SubSet/SuperSet walk from `source` into `out_reg`. When the
/// relation is inclusive (carries the `TransitiveSelf` trait), the op's
/// own cursor prepends `source` itself to the enumerated closure, so the
/// first `next()` yields the starting entity and later redos walk strict
/// ancestors/descendants (spec §4.4, "Transitive lowering").
fn emit_set_walk<S: StorageLookup>(
    c: &mut Compiler<'_, S>,
    ti: usize,
    relation: EntityId,
    inclusive: bool,
    kind: OpKind,
    source: Side,
    out_reg: usize,
    source_is_subject: bool,
) {
    let mut op = Operation::new(kind, 0);
    op.relation = Some(relation);
    op.output = Some(out_reg);
    op.inclusive = inclusive;
    match source {
        Side::Literal(id) => {
            op.walk_from_literal = Some(id);
            if source_is_subject {
                op.subject_hint = SubjectHint::Literal(id);
            }
        }
        Side::Register(r) => {
            op.input = Some(r);
            if source_is_subject {
                op.subject_hint = SubjectHint::Register(r);
            }
        }
        Side::Unknown(_) => unreachable!(),
    }
    op.term_index = ti as i32;
    op.frame = c.next_frame();
    c.push_linked(op);
}

/// Emit a Not or Optional term: a leading wrapper, the term's own body
/// (compiled exactly like a one-term And conjunction), and a trailing
/// wrapper whose role (`TrailNot` vs `TrailOptional`) determines whether
/// the block can ever fail the whole row.
fn emit_wrapped<S: StorageLookup>(
    c: &mut Compiler<'_, S>,
    variables: &mut VariableTable,
    ti: usize,
    term: &Term,
    trail_role: NotRole,
) -> Result<(), CompileError> {
    let lead_idx = c.ops.len() as i32;
    let mut lead = Operation::new(OpKind::Not, c.current_frame);
    lead.not_role = Some(NotRole::Lead);
    lead.term_index = ti as i32;
    c.ops.push(lead);

    // Compile the term's body as a plain And term regardless of its real
    // operator, reusing the ordinary lowering.
    let mut body_term = term.clone();
    body_term.operator = Operator::And;
    emit_and_term(c, variables, ti, &body_term)?;

    let b = c.ops.len() as i32;
    let mut trail = Operation::new(OpKind::Not, c.current_frame);
    trail.not_role = Some(trail_role);
    trail.term_index = ti as i32;
    match trail_role {
        NotRole::TrailNot => {
            trail.on_fail = lead_idx - 1;
            trail.on_pass = lead_idx - 1;
        }
        NotRole::TrailOptional => {
            trail.on_pass = b + 1;
            trail.on_fail = lead_idx - 1;
        }
        NotRole::Lead => unreachable!(),
    }
    c.ops.push(trail);

    let lead = &mut c.ops[lead_idx as usize];
    lead.on_pass = lead_idx + 1;
    lead.on_fail = b + 1;

    Ok(())
}
