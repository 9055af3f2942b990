//! Error kinds surfaced by rule compilation and iteration.
//!
//! Compile-time kinds abort rule construction (spec §7); runtime kinds are
//! only ever constructed in debug builds, since the VM's normal response to
//! an invariant violation at runtime is to treat it as "no match" and let
//! the backtracker absorb it.

use thiserror::Error;

/// A diagnostic location within the source expression used only for error
/// messages; the engine never parses this text itself (the term parser is
/// an external collaborator per spec §1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostic {
    /// The textual expression the rule was compiled from, if the caller
    /// supplied one. Purely informational.
    pub expr: Option<String>,
    /// Byte offset into `expr` where the problem was detected, if known.
    pub position: Option<usize>,
}

impl Diagnostic {
    pub fn new(expr: Option<&str>, position: Option<usize>) -> Self {
        Diagnostic {
            expr: expr.map(str::to_owned),
            position,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.expr, self.position) {
            (Some(expr), Some(pos)) => write!(f, " (in `{expr}` at {pos})"),
            (Some(expr), None) => write!(f, " (in `{expr}`)"),
            _ => Ok(()),
        }
    }
}

/// Fatal errors raised while compiling a list of terms into a [`crate::rule::Rule`].
///
/// No rule handle is returned when any of these occur; the caller must
/// fix the term list (or the query that produced it) and recompile.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("rule has no terms{0}")]
    EmptyRule(Diagnostic),

    #[error("rule cannot only have terms with Not operator{0}")]
    AllNotRule(Diagnostic),

    #[error("too many variables in rule: {found} exceeds limit of {limit}{diag}")]
    TooManyVariables {
        limit: usize,
        found: usize,
        diag: Diagnostic,
    },

    #[error("unconstrained variable '{name}'{diag}")]
    UnconstrainedVariable { name: String, diag: Diagnostic },

    #[error("missing predicate/object variable '{name}' in Not term{diag}")]
    MissingNotVariable { name: String, diag: Diagnostic },

    #[error("malformed term: {reason}{diag}")]
    MalformedTerm { reason: String, diag: Diagnostic },
}

/// Programmer-error conditions detected while evaluating a compiled rule.
///
/// Constructed only in debug builds (`debug_assertions`); in release the
/// corresponding operation instead fails quietly, which the backtracker
/// treats as an ordinary "no more matches here" signal (spec §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("register {register} read before being written")]
    UnboundRegister { register: usize },

    #[error("iterator polled after exhaustion")]
    IteratorExhausted,

    #[error("invalid jump target {label} at instruction {ip}")]
    InvalidJumpTarget { ip: usize, label: i32 },
}
