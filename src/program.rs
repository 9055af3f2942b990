//! Program emitter types (C4): the flat instruction list a compiled rule
//! evaluates, plus the `rule_str` disassembler (spec §4.4, §6).

use crate::pair::{Pair, Slot};

/// One VM instruction kind (spec §4.4 instruction semantics table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Program start placeholder.
    Input,
    /// Scan all tables matching a pair; seed the subject register.
    Select,
    /// Test whether an already-bound subject's table contains the pair.
    With,
    /// Recursively enumerate subsets along a transitive relation (tables).
    SubSet,
    /// Recursively enumerate supersets along a transitive relation (entities).
    SuperSet,
    /// Forward each entity in a table register into an entity register.
    Each,
    /// Invert the result of the wrapped sub-program.
    Not,
    /// Emit a result to the iterator.
    Yield,
}

impl OpKind {
    /// The fixed-width mnemonic used by `rule_str`, mirroring the
    /// original engine's disassembler column layout.
    pub fn mnemonic(self) -> &'static str {
        match self {
            OpKind::Input => "input   ",
            OpKind::Select => "select  ",
            OpKind::With => "with    ",
            OpKind::SubSet => "subset  ",
            OpKind::SuperSet => "superset",
            OpKind::Each => "each    ",
            OpKind::Not => "not     ",
            OpKind::Yield => "yield   ",
        }
    }
}

/// Distinguishes the two (or three) roles a control-flow op plays when
/// wrapping a Not/Optional sub-program (spec §4.4, "Not", "Optional"). Only
/// meaningful when `kind` is [`OpKind::Not`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotRole {
    /// Leading wrapper shared by Not and Optional: `!redo` on first entry
    /// enters the sub-program; on redo (sub-program exhausted) skips past
    /// it instead.
    Lead,
    /// Trailing wrapper for Not: always fails, propagating past the
    /// leading op so the block can never be satisfied twice.
    TrailNot,
    /// Trailing wrapper for Optional: `!redo` passes through on first
    /// success; on redo (caller wants another optional match) fails past
    /// the leading op, since an Optional sub-program runs at most once.
    TrailOptional,
}

/// Who a data operation reports as the "subject it matched the term
/// against" in the public iterator surface (spec §6, `subjects[..]`).
/// Decided at emission time rather than inferred from the op afterwards,
/// since only the compiler knows whether a register holds a bulk table
/// range (shared with `this`) or a specific resolved entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubjectHint {
    /// The term's subject is whatever batch `this` currently ranges over;
    /// the public surface reports entity `0` for it.
    #[default]
    ThisBatch,
    /// The term's subject was a literal entity known at compile time.
    Literal(crate::id::EntityId),
    /// The term's subject is a specific, already-bound entity register.
    Register(usize),
}

/// One program operation (spec §3, "Program").
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    /// The filter this operation evaluates against storage, if any.
    pub filter: Option<Pair>,
    /// Input register (a variable id), if this op reads one.
    pub input: Option<usize>,
    /// Output register (a variable id), if this op writes one.
    pub output: Option<usize>,
    /// A literal subject this op seeds from, bypassing variable lookup.
    pub literal_subject: Option<crate::id::EntityId>,
    /// Instruction pointer to jump to on success.
    pub on_pass: i32,
    /// Instruction pointer to jump to on failure.
    pub on_fail: i32,
    /// Register-frame index this operation writes into.
    pub frame: usize,
    /// The term index this operation was lowered from, or `-1` for
    /// scaffolding ops (Each, the synthetic Not wrappers).
    pub term_index: i32,
    /// Role of this op within a Not/Optional wrapper pair, if any.
    pub not_role: Option<NotRole>,
    /// For SubSet/SuperSet: the transitive relation to walk.
    pub relation: Option<crate::id::EntityId>,
    /// For SubSet/SuperSet: walk from this literal entity instead of a
    /// register, when the starting point is known at compile time.
    pub walk_from_literal: Option<crate::id::EntityId>,
    /// For SubSet/SuperSet: include the starting entity itself (inclusive
    /// transitive closure) before strict ancestors/descendants.
    pub inclusive: bool,
    /// With/Select over a literal subject: fall back to the subject's IsA
    /// ancestors if it does not own the pattern directly (spec §4.4,
    /// "Implicit IsA substitution").
    pub isa_subject: bool,
    /// With/Select whose predicate is a non-final literal id: also match
    /// any IsA-descendant of that predicate.
    pub predicate_isa: bool,
    /// What this op reports as its term's matched subject (spec §6).
    pub subject_hint: SubjectHint,
}

impl Operation {
    pub fn new(kind: OpKind, frame: usize) -> Self {
        Operation {
            kind,
            filter: None,
            input: None,
            output: None,
            literal_subject: None,
            on_pass: -1,
            on_fail: -1,
            frame,
            term_index: -1,
            not_role: None,
            relation: None,
            walk_from_literal: None,
            inclusive: false,
            isa_subject: false,
            predicate_isa: false,
            subject_hint: SubjectHint::ThisBatch,
        }
    }
}

/// A compiled, immutable program: the flat instruction array plus the
/// number of variables and original terms it was lowered from.
#[derive(Debug, Clone)]
pub struct Program {
    pub ops: Vec<Operation>,
    pub variable_count: usize,
    pub term_count: usize,
    /// Register id of the root `.`/`This` variable (Entity-kind
    /// preferred), if the rule has one. `None` means the rule yields a
    /// single boolean result with no bound entities.
    pub this_register: Option<usize>,
    pub this_is_table: bool,
    /// term index -> the operation index that carries that term's filter,
    /// used by the iterator façade to reify `ids[term]` and `subjects[term]`
    /// on each yield (spec §6). `None` for a term that never reached the
    /// emitter (shouldn't happen for a successfully compiled rule).
    pub term_ops: Vec<Option<usize>>,
    /// term index -> the verbatim pair of a `Nothing`-flagged term (spec
    /// §3, "subject selector flags"), which is never matched against
    /// storage and so never gets a `term_ops` entry. `ids[term]` falls
    /// back to this when `term_ops[term]` is `None`.
    pub term_literal_ids: Vec<Option<Pair>>,
}

impl Program {
    /// Number of register frames the program needs: one past the highest
    /// frame index any operation writes to.
    pub fn frame_count(&self) -> usize {
        self.ops.iter().map(|op| op.frame).max().map_or(1, |m| m + 1)
    }

    /// Disassemble the program in the format spec §6 specifies:
    /// `<ip>: [S:<frame>, P:<pass>, F:<fail>] <mnemonic> O:<out> I:<in> F:(pred,obj)`
    pub fn disassemble(&self, variable_name: impl Fn(usize) -> String) -> String {
        let mut out = String::new();
        for (ip, op) in self.ops.iter().enumerate() {
            out.push_str(&format!(
                "{ip:2}: [S:{:2}, P:{:3}, F:{:3}] {} ",
                op.frame,
                op.on_pass,
                op.on_fail,
                op.kind.mnemonic()
            ));
            if let Some(out_reg) = op.output {
                out.push_str(&format!("O:{} ", variable_name(out_reg)));
            }
            if let Some(in_reg) = op.input {
                out.push_str(&format!("I:{} ", variable_name(in_reg)));
            }
            if let Some(pair) = &op.filter {
                out.push_str(&format!(
                    "F:({},{})",
                    slot_str(pair.predicate, &variable_name),
                    slot_str(pair.object, &variable_name)
                ));
            }
            out.push('\n');
        }
        out
    }
}

fn slot_str(slot: Slot, variable_name: &impl Fn(usize) -> String) -> String {
    match slot {
        Slot::Id(id) => format!("{id:?}"),
        Slot::Register(reg) => variable_name(reg),
    }
}
