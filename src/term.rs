//! Term model (C1): the normalized, pre-parsed representation of a single
//! constraint, as produced by an external term parser and consumed by the
//! compiler (spec §3, "Term").

use crate::id::EntityId;
use bitflags::bitflags;

/// Either a concrete entity id or a named variable. Used for the
/// predicate/subject/object positions of a [`Term`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermArg {
    Id(EntityId),
    Variable(String),
}

impl TermArg {
    pub fn id(id: impl Into<EntityId>) -> Self {
        TermArg::Id(id.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        TermArg::Variable(name.into())
    }

    pub fn as_id(&self) -> Option<EntityId> {
        match self {
            TermArg::Id(id) => Some(*id),
            TermArg::Variable(_) => None,
        }
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self {
            TermArg::Variable(name) => Some(name),
            TermArg::Id(_) => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, TermArg::Variable(_))
    }
}

/// How a term participates in the conjunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Must hold for the row to survive (the default).
    And,
    /// Must not hold; negated terms may not introduce fresh variables.
    Not,
    /// May or may not hold; failure never eliminates the row.
    Optional,
}

bitflags! {
    /// Subject selector flags (spec §3, "subject selector flags").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubjectFlags: u8 {
        /// Match only the literal subject itself.
        const SELF = 0b0001;
        /// Also match entities whose type is a superset of (i.e. IsA) the subject.
        const SUPER_SET = 0b0010;
        /// Also match entities whose type is a subset of (i.e. IsA) the subject.
        const SUB_SET = 0b0100;
        /// Match no source at all; the term is vacuously true/false.
        const NOTHING = 0b1000;
    }
}

impl Default for SubjectFlags {
    fn default() -> Self {
        SubjectFlags::SELF
    }
}

/// What the object position of a term names, including the two special
/// cases spec.md calls out: an absent object (unary term) and the literal
/// `0` object (present but explicitly "no object", distinct from wildcard).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectArg {
    Absent,
    NoObject,
    Value(TermArg),
}

impl ObjectArg {
    pub fn as_value(&self) -> Option<&TermArg> {
        match self {
            ObjectArg::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A single constraint: "entity `subject` has id `predicate`" (unary), or
/// "entity `subject` has pair `(predicate, object)`" (binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub predicate: TermArg,
    pub subject: TermArg,
    pub object: ObjectArg,
    pub operator: Operator,
    pub subject_flags: SubjectFlags,
}

impl Term {
    /// A unary term `predicate(subject)` with default And/Self semantics.
    pub fn new(predicate: TermArg, subject: TermArg) -> Self {
        Term {
            predicate,
            subject,
            object: ObjectArg::Absent,
            operator: Operator::And,
            subject_flags: SubjectFlags::SELF,
        }
    }

    /// A binary term `predicate(subject, object)`.
    pub fn with_object(predicate: TermArg, subject: TermArg, object: TermArg) -> Self {
        Term {
            predicate,
            subject,
            object: ObjectArg::Value(object),
            operator: Operator::And,
            subject_flags: SubjectFlags::SELF,
        }
    }

    pub fn not(mut self) -> Self {
        self.operator = Operator::Not;
        self
    }

    pub fn optional(mut self) -> Self {
        self.operator = Operator::Optional;
        self
    }

    pub fn with_flags(mut self, flags: SubjectFlags) -> Self {
        self.subject_flags = flags;
        self
    }

    pub fn is_binary(&self) -> bool {
        !matches!(self.object, ObjectArg::Absent)
    }

    /// True if the subject is a concrete entity rather than a variable.
    pub fn has_literal_subject(&self) -> bool {
        matches!(self.subject, TermArg::Id(_))
    }

    /// Every variable name this term references, across predicate,
    /// subject and object positions.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars = Vec::new();
        if let TermArg::Variable(v) = &self.predicate {
            vars.push(v.as_str());
        }
        if let TermArg::Variable(v) = &self.subject {
            vars.push(v.as_str());
        }
        if let ObjectArg::Value(TermArg::Variable(v)) = &self.object {
            vars.push(v.as_str());
        }
        vars
    }
}
