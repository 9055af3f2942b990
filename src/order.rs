//! Dependency orderer (C3): elects a root variable, computes join depths,
//! and sorts variables so the most-constrained/least-dependent one is
//! resolved first (spec §4.3).

use crate::error::{CompileError, Diagnostic};
use crate::term::{ObjectArg, Operator, SubjectFlags, Term, TermArg};
use crate::variable::{VariableKind, VariableTable, ROOT_NAME};
use std::collections::HashMap;

/// `Nothing`-flagged terms never constrain or are constrained by any
/// variable: the original engine's `crawl_variable` calls `skip_term` at
/// the top of its loop body, which excludes `Nothing` terms from the
/// dependency crawl (`examples/original_source`'s `rules.c`, `skip_term`).
fn is_nothing(term: &Term) -> bool {
    term.subject_flags.contains(SubjectFlags::NOTHING)
}

/// Runs the three-pass ordering algorithm over `terms`, registering every
/// subject/predicate/object variable into `variables` as a side effect.
/// Returns the variable ids in evaluation order.
pub fn order_variables(
    terms: &[Term],
    variables: &mut VariableTable,
    diag: &Diagnostic,
) -> Result<Vec<usize>, CompileError> {
    // Pass 1: subject collection. Every term whose subject is a variable
    // contributes a Table-kind variable and bumps its occurrence count.
    for term in terms {
        if is_nothing(term) {
            continue;
        }
        if let TermArg::Variable(name) = &term.subject {
            let id = variables
                .ensure(VariableKind::Table, name)
                .map_err(|e| CompileError::TooManyVariables {
                    limit: e.limit,
                    found: e.found,
                    diag: diag.clone(),
                })?;
            variables.get_mut(id).occurrences += 1;
        }
    }

    // Elect root: the distinguished `.` if present, else the subject
    // variable with the highest occurrence count.
    let root_id = if let Some(v) = variables.find(VariableKind::Table, ROOT_NAME) {
        Some(v.id)
    } else {
        variables
            .iter()
            .filter(|v| matches!(v.kind, VariableKind::Table))
            .max_by_key(|v| v.occurrences)
            .map(|v| v.id)
    };
    if let Some(root_id) = root_id {
        variables.get_mut(root_id).depth = Some(0);
    }

    // Pass 2: zero-depth seeding. A term with a literal subject
    // constrains whatever predicate/object variables it references
    // absolutely.
    for term in terms {
        if !is_nothing(term) && term.has_literal_subject() {
            seed_zero_depth(term, variables, diag)?;
        }
    }

    // Pass 3: depth propagation. depth(v) = 1 + min(depth(u)) over every
    // other subject variable u co-appearing with v in some term's
    // predicate/object. A `marked` guard prevents infinite recursion on
    // cyclic joins; if recursion returns while still marked, that branch
    // contributes nothing (depth remains unset).
    //
    // co_occurs[v] = the set of subject-variable ids that appear in the
    // predicate/object of a term whose subject is v, or vice-versa.
    let co_occurs = build_co_occurrence(terms, variables, diag)?;

    let subject_var_ids: Vec<usize> = variables
        .iter()
        .filter(|v| matches!(v.kind, VariableKind::Table))
        .map(|v| v.id)
        .collect();

    for &v in &subject_var_ids {
        propagate_depth(v, variables, &co_occurs);
    }

    // Pass 4: closure. Crawl predicate/object variables reachable from
    // each subject so every reachable variable has been registered, then
    // reject anything still unconstrained.
    closure_pass(terms, variables, diag)?;

    for v in variables.iter() {
        if matches!(v.kind, VariableKind::Table) && v.depth.is_none() {
            return Err(CompileError::UnconstrainedVariable {
                name: v.name.clone(),
                diag: diag.clone(),
            });
        }
    }

    // Not terms may not introduce fresh variables: every variable they
    // reference must already exist as some other term's variable.
    check_not_terms(terms, variables, diag)?;

    // Tie-break sort: (kind asc, depth asc, occurrences desc, id desc).
    let mut ids: Vec<usize> = variables.iter().map(|v| v.id).collect();
    ids.sort_by(|&a, &b| {
        let va = variables.get(a);
        let vb = variables.get(b);
        kind_rank(va.kind)
            .cmp(&kind_rank(vb.kind))
            .then(va.depth.unwrap_or(u32::MAX).cmp(&vb.depth.unwrap_or(u32::MAX)))
            .then(vb.occurrences.cmp(&va.occurrences))
            .then(vb.id.cmp(&va.id))
    });

    Ok(ids)
}

fn kind_rank(kind: VariableKind) -> u8 {
    match kind {
        VariableKind::Table => 0,
        VariableKind::Entity => 1,
        VariableKind::Unknown => 2,
    }
}

fn seed_zero_depth(
    term: &Term,
    variables: &mut VariableTable,
    diag: &Diagnostic,
) -> Result<(), CompileError> {
    if let TermArg::Variable(name) = &term.predicate {
        let id = ensure_table_var(variables, name, diag)?;
        variables.get_mut(id).depth.get_or_insert(0);
    }
    if let ObjectArg::Value(TermArg::Variable(name)) = &term.object {
        let id = ensure_table_var(variables, name, diag)?;
        variables.get_mut(id).depth.get_or_insert(0);
    }
    Ok(())
}

fn ensure_table_var(
    variables: &mut VariableTable,
    name: &str,
    diag: &Diagnostic,
) -> Result<usize, CompileError> {
    variables
        .ensure(VariableKind::Table, name)
        .map_err(|e| CompileError::TooManyVariables {
            limit: e.limit,
            found: e.found,
            diag: diag.clone(),
        })
}

/// Build, for every subject-kind variable, the set of subject-kind
/// variables it co-occurs with through a shared term (one appears as the
/// subject, the other in that term's predicate or object).
fn build_co_occurrence(
    terms: &[Term],
    variables: &mut VariableTable,
    diag: &Diagnostic,
) -> Result<HashMap<usize, Vec<usize>>, CompileError> {
    let mut co: HashMap<usize, Vec<usize>> = HashMap::new();
    for term in terms {
        if is_nothing(term) {
            continue;
        }
        let TermArg::Variable(subj_name) = &term.subject else {
            continue;
        };
        let subj_id = ensure_table_var(variables, subj_name, diag)?;

        let mut partners = Vec::new();
        if let TermArg::Variable(name) = &term.predicate {
            if let Some(v) = variables.find(VariableKind::Table, name) {
                partners.push(v.id);
            }
        }
        if let ObjectArg::Value(TermArg::Variable(name)) = &term.object {
            if let Some(v) = variables.find(VariableKind::Table, name) {
                partners.push(v.id);
            }
        }
        for p in partners {
            if p != subj_id {
                co.entry(subj_id).or_default().push(p);
                co.entry(p).or_default().push(subj_id);
            }
        }
    }
    Ok(co)
}

fn propagate_depth(
    v: usize,
    variables: &mut VariableTable,
    co_occurs: &HashMap<usize, Vec<usize>>,
) -> Option<u32> {
    if let Some(d) = variables.get(v).depth {
        return Some(d);
    }
    if variables.get(v).marked {
        // Cycle: this branch contributes nothing.
        return None;
    }
    variables.get_mut(v).marked = true;

    let mut best: Option<u32> = None;
    if let Some(partners) = co_occurs.get(&v) {
        for &u in partners {
            if let Some(d) = propagate_depth(u, variables, co_occurs) {
                best = Some(best.map_or(d, |b: u32| b.min(d)));
            }
        }
    }

    variables.get_mut(v).marked = false;
    if let Some(b) = best {
        let depth = b + 1;
        variables.get_mut(v).depth = Some(depth);
        Some(depth)
    } else {
        None
    }
}

/// A second pass that registers any predicate/object variable reachable
/// from a subject as an Entity-kind variable, so that closure::depth
/// coverage can be checked against the full variable set (spec §4.3,
/// "Closure").
fn closure_pass(
    terms: &[Term],
    variables: &mut VariableTable,
    diag: &Diagnostic,
) -> Result<(), CompileError> {
    for term in terms {
        if is_nothing(term) {
            continue;
        }
        if let TermArg::Variable(name) = &term.predicate {
            let id = variables
                .ensure(VariableKind::Entity, name)
                .map_err(|e| CompileError::TooManyVariables {
                    limit: e.limit,
                    found: e.found,
                    diag: diag.clone(),
                })?;
            inherit_depth_from_table_twin(variables, id, name);
        }
        if let ObjectArg::Value(TermArg::Variable(name)) = &term.object {
            let id = variables
                .ensure(VariableKind::Entity, name)
                .map_err(|e| CompileError::TooManyVariables {
                    limit: e.limit,
                    found: e.found,
                    diag: diag.clone(),
                })?;
            inherit_depth_from_table_twin(variables, id, name);
        }
        if let TermArg::Variable(name) = &term.subject {
            // The subject also needs an Entity-kind twin once an `Each`
            // bridges it; ensure it exists now so downstream lookups
            // never have to create variables mid-emission.
            let id = variables
                .ensure(VariableKind::Entity, name)
                .map_err(|e| CompileError::TooManyVariables {
                    limit: e.limit,
                    found: e.found,
                    diag: diag.clone(),
                })?;
            inherit_depth_from_table_twin(variables, id, name);
        }
    }
    Ok(())
}

fn inherit_depth_from_table_twin(variables: &mut VariableTable, entity_id: usize, name: &str) {
    if variables.get(entity_id).depth.is_some() {
        return;
    }
    if let Some(table_var) = variables.find(VariableKind::Table, name) {
        if let Some(d) = table_var.depth {
            variables.get_mut(entity_id).depth = Some(d);
        }
    }
}

fn check_not_terms(
    terms: &[Term],
    _variables: &VariableTable,
    diag: &Diagnostic,
) -> Result<(), CompileError> {
    use std::collections::HashSet;
    let mut introduced_elsewhere: HashSet<&str> = HashSet::new();
    for term in terms {
        if matches!(term.operator, Operator::Not) {
            continue;
        }
        for name in term.variables() {
            introduced_elsewhere.insert(name);
        }
    }
    for term in terms {
        if !matches!(term.operator, Operator::Not) {
            continue;
        }
        for name in term.variables() {
            let normalized = if name == crate::variable::ROOT_ALIAS {
                crate::variable::ROOT_NAME
            } else {
                name
            };
            if !introduced_elsewhere.contains(normalized) && !introduced_elsewhere.contains(name) {
                return Err(CompileError::MissingNotVariable {
                    name: name.to_owned(),
                    diag: diag.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityId;

    #[test]
    fn root_elected_from_highest_occurrence_subject() {
        let mut variables = VariableTable::new();
        let position = EntityId::new(1, 0);
        let velocity = EntityId::new(2, 0);
        let terms = vec![
            Term::new(TermArg::id(position), TermArg::var("This")),
            Term::new(TermArg::id(velocity), TermArg::var("This")),
        ];
        let diag = Diagnostic::default();
        order_variables(&terms, &mut variables, &diag).unwrap();
        let root = variables.find(VariableKind::Table, ".").unwrap();
        assert_eq!(root.depth, Some(0));
    }

    #[test]
    fn nothing_flagged_term_does_not_introduce_a_variable() {
        let mut variables = VariableTable::new();
        let position = EntityId::new(1, 0);
        let frozen = EntityId::new(2, 0);
        let terms = vec![
            Term::new(TermArg::id(position), TermArg::var(".")),
            Term::new(TermArg::id(frozen), TermArg::var("Ghost")).with_flags(SubjectFlags::NOTHING),
        ];
        let diag = Diagnostic::default();
        order_variables(&terms, &mut variables, &diag).unwrap();
        assert!(variables.find(VariableKind::Table, "Ghost").is_none());
    }

    #[test]
    fn unconstrained_variable_is_rejected() {
        let mut variables = VariableTable::new();
        let tag_a = EntityId::new(1, 0);
        let tag_b = EntityId::new(2, 0);
        // X and Y are two disjoint subject variables with no root `.` and
        // no joining term between them: root election picks one (the
        // last with max occurrences), leaving the other permanently
        // unreachable from any literal or co-occurrence edge.
        let terms = vec![
            Term::new(TermArg::id(tag_a), TermArg::var("X")),
            Term::new(TermArg::id(tag_b), TermArg::var("Y")),
        ];
        let diag = Diagnostic::default();
        let err = order_variables(&terms, &mut variables, &diag);
        assert!(matches!(err, Err(CompileError::UnconstrainedVariable { .. })));
    }

    #[test]
    fn not_term_with_fresh_variable_is_rejected() {
        let mut variables = VariableTable::new();
        let tag_a = EntityId::new(1, 0);
        let tag_b = EntityId::new(2, 0);
        let terms = vec![
            Term::new(TermArg::id(tag_a), TermArg::var(".")),
            Term::with_object(TermArg::id(tag_b), TermArg::var("."), TermArg::var("Ghost")).not(),
        ];
        let diag = Diagnostic::default();
        let err = order_variables(&terms, &mut variables, &diag);
        assert!(matches!(err, Err(CompileError::MissingNotVariable { .. })));
    }
}
