//! Rule construction entry point (spec §6, "External interfaces"): the
//! single call that turns an ordered term list into a ready-to-iterate
//! compiled program.

use crate::compiler;
use crate::config::EngineConfig;
use crate::error::{CompileError, Diagnostic};
use crate::iterator::Iter;
use crate::order::order_variables;
use crate::program::Program;
use crate::storage::StorageLookup;
use crate::term::{Operator, Term};
use crate::variable::VariableTable;

/// A compiled rule: ordered variables plus the flat instruction program,
/// ready to be iterated any number of times against the storage it was
/// compiled for. No mutable state is shared between iterators (spec §5).
#[derive(Debug, Clone)]
pub struct Rule {
    program: Program,
    variables: VariableTable,
    expr: Option<String>,
}

impl Rule {
    /// Compile `terms` into a [`Rule`]. `expr`, if given, is carried only
    /// for diagnostics and disassembly; the term parser that produced it
    /// is an external collaborator (spec §1).
    pub fn new<S: StorageLookup>(
        terms: &[Term],
        expr: Option<&str>,
        storage: &S,
        config: &EngineConfig,
    ) -> Result<Rule, CompileError> {
        let diag = Diagnostic::new(expr, None);
        if terms.is_empty() {
            tracing::warn!("rule rejected: no terms");
            return Err(CompileError::EmptyRule(diag));
        }
        if terms.iter().all(|t| matches!(t.operator, Operator::Not)) {
            tracing::warn!("rule rejected: every term is Not");
            return Err(CompileError::AllNotRule(diag));
        }

        let mut variables = VariableTable::with_limit(config.max_variables);
        let order = order_variables(terms, &mut variables, &diag)?;
        let program = compiler::compile(terms, &mut variables, &order, storage, config)?;

        tracing::debug!(
            terms = terms.len(),
            variables = variables.len(),
            ops = program.ops.len(),
            "rule compiled"
        );

        Ok(Rule {
            program,
            variables,
            expr: expr.map(str::to_owned),
        })
    }

    /// Begin a fresh evaluation cursor. Many iterators may run
    /// concurrently over the same rule and read-only storage (spec §5).
    pub fn iter<'a, S: StorageLookup>(
        &'a self,
        storage: &'a S,
        config: &'a EngineConfig,
    ) -> Iter<'a, S> {
        Iter::new(&self.program, &self.variables, storage, config)
    }

    /// Disassemble the compiled program in the `rule_str` format (spec
    /// §6, §9).
    pub fn disassemble(&self) -> String {
        self.program.disassemble(|id| self.variables.get(id).name.clone())
    }

    /// The original source expression this rule was compiled from, if any.
    pub fn expr(&self) -> Option<&str> {
        self.expr.as_deref()
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
}
