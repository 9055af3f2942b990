//! Pair model (C1, continued): a term lowered for the VM. Predicate and
//! object each carry either a concrete id or a variable register index;
//! flags record which positions are variables and whether the predicate
//! is transitive, final, or inclusive-transitive.

use crate::id::EntityId;
use crate::storage::{StorageLookup, Trait};
use crate::term::{ObjectArg, Term, TermArg};
use crate::variable::{VariableKind, VariableTable};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PairFlags: u8 {
        /// Predicate position holds a register id, not a literal.
        const PRED_VAR = 0b0001;
        /// Object position holds a register id, not a literal.
        const OBJ_VAR = 0b0010;
        /// Predicate entity carries the `Transitive` trait.
        const TRANSITIVE = 0b0100;
        /// Predicate entity carries the `Final` trait.
        const FINAL = 0b1000;
        /// Predicate entity carries the `TransitiveSelf` (inclusive) trait.
        const INCLUSIVE = 0b1_0000;
        /// The object position is the literal "no object" (`0`), distinct
        /// from an absent object or a wildcard.
        const OBJ_NONE = 0b10_0000;
    }
}

/// Either side of a compiled pair: a concrete id, or a register holding
/// one at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Id(EntityId),
    Register(usize),
}

/// A term lowered for the VM (spec §3, "Pair (compiled)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub predicate: Slot,
    pub object: Slot,
    pub flags: PairFlags,
    /// `true` for a unary term (no object position at all); `false` for a
    /// binary term, including the `OBJ_NONE` (literal `0`) case.
    pub is_unary: bool,
}

impl Pair {
    pub fn is_transitive(&self) -> bool {
        self.flags.contains(PairFlags::TRANSITIVE)
    }

    pub fn is_final(&self) -> bool {
        self.flags.contains(PairFlags::FINAL)
    }

    pub fn is_inclusive(&self) -> bool {
        self.flags.contains(PairFlags::INCLUSIVE)
    }
}

/// Lower a parsed [`Term`] into a compiled [`Pair`], resolving variable
/// names to register ids via `variables` and consulting `storage` for the
/// predicate's transitive/final/inclusive traits (spec §4.1).
pub fn term_to_pair<S: StorageLookup>(
    term: &Term,
    variables: &VariableTable,
    storage: &S,
) -> Pair {
    let mut flags = PairFlags::empty();

    let predicate = match &term.predicate {
        TermArg::Id(id) => {
            if storage.has_trait(*id, Trait::Transitive) {
                flags |= PairFlags::TRANSITIVE;
            }
            if storage.has_trait(*id, Trait::Final) {
                flags |= PairFlags::FINAL;
            }
            if storage.has_trait(*id, Trait::TransitiveSelf) {
                flags |= PairFlags::INCLUSIVE;
            }
            Slot::Id(*id)
        }
        TermArg::Variable(name) => {
            flags |= PairFlags::PRED_VAR;
            let reg = variables
                .find(VariableKind::Entity, name)
                .map(|v| v.id)
                .unwrap_or(0);
            Slot::Register(reg)
        }
    };

    let (object, is_unary) = match &term.object {
        ObjectArg::Absent => (Slot::Id(EntityId::from(0u64)), true),
        ObjectArg::NoObject => {
            flags |= PairFlags::OBJ_NONE;
            (Slot::Id(EntityId::from(0u64)), false)
        }
        ObjectArg::Value(TermArg::Id(id)) => (Slot::Id(*id), false),
        ObjectArg::Value(TermArg::Variable(name)) => {
            flags |= PairFlags::OBJ_VAR;
            let reg = variables
                .find(VariableKind::Entity, name)
                .map(|v| v.id)
                .unwrap_or(0);
            (Slot::Register(reg), false)
        }
    };

    Pair {
        predicate,
        object,
        flags,
        is_unary,
    }
}
