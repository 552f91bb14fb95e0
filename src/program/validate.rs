//! Whole-program validation.
//!
//! Runs after every layer has parsed. Declarations are collected first, in
//! layer order, then every clause is checked against them. The first failure
//! aborts with a single diagnostic.

use std::collections::{BTreeMap, HashMap};

use super::ast::{ArgType, Atom, Clause, Layer, PredicateDecl, Statement, Term};
use super::error::{DiagnosticCode, SourceDiagnostic};

type ValidateResult<T> = std::result::Result<T, SourceDiagnostic>;

/// Declarations and clauses that passed validation.
#[derive(Debug)]
pub(crate) struct Linked {
    pub decls: BTreeMap<String, PredicateDecl>,
    pub clauses: Vec<Clause>,
}

/// Link parsed layers into a validated declaration table and clause list.
///
/// `layers` must be given in `Schema`, `Policy`, `Learned` order.
pub(crate) fn link(layers: Vec<(Layer, Vec<Statement>)>) -> ValidateResult<Linked> {
    let mut decls: BTreeMap<String, PredicateDecl> = BTreeMap::new();
    let mut clauses = Vec::new();

    for (layer, statements) in layers {
        for statement in statements {
            match statement {
                Statement::Decl(decl) => {
                    if layer == Layer::Learned {
                        return Err(SourceDiagnostic::semantic(
                            layer,
                            decl.position,
                            DiagnosticCode::DeclarationNotAllowed,
                            format!(
                                "declaration of '{}' is not allowed in a learned rule",
                                decl.name
                            ),
                        ));
                    }
                    if let Some(existing) = decls.get(&decl.name) {
                        return Err(SourceDiagnostic::semantic(
                            layer,
                            decl.position,
                            DiagnosticCode::DuplicateDeclaration,
                            format!(
                                "predicate '{}' is already declared in the {} layer at {}",
                                decl.name, existing.layer, existing.position
                            ),
                        ));
                    }
                    decls.insert(decl.name.clone(), decl);
                }
                Statement::Clause(clause) => clauses.push(clause),
            }
        }
    }

    declare_learned_heads(&mut decls, &clauses)?;

    for clause in &clauses {
        check_clause(clause, &decls)?;
    }

    Ok(Linked { decls, clauses })
}

/// Protect schema predicates from learned clauses and declare learned heads
/// that nothing else declares.
fn declare_learned_heads(
    decls: &mut BTreeMap<String, PredicateDecl>,
    clauses: &[Clause],
) -> ValidateResult<()> {
    for clause in clauses.iter().filter(|c| c.layer == Layer::Learned) {
        let head = &clause.head;
        match decls.get(&head.predicate) {
            Some(decl) if decl.layer == Layer::Schema => {
                return Err(SourceDiagnostic::semantic(
                    clause.layer,
                    head.position,
                    DiagnosticCode::ReadOnlyPredicate,
                    format!(
                        "predicate '{}' is declared in the schema and cannot be defined by a learned rule",
                        head.predicate
                    ),
                ));
            }
            Some(_) => {}
            None => {
                let decl = PredicateDecl::implicit(head, Layer::Learned);
                decls.insert(decl.name.clone(), decl);
            }
        }
    }
    Ok(())
}

fn check_clause(clause: &Clause, decls: &BTreeMap<String, PredicateDecl>) -> ValidateResult<()> {
    let layer = clause.layer;

    if clause.head.args.iter().any(|t| matches!(t, Term::Wildcard)) {
        return Err(SourceDiagnostic::semantic(
            layer,
            clause.head.position,
            DiagnosticCode::UnboundVariable,
            format!("wildcard '_' is not allowed in the head of '{}'", clause.head.predicate),
        ));
    }

    // Variable name -> the concrete type an earlier argument forced on it.
    let mut var_types: HashMap<&str, (ArgType, &str)> = HashMap::new();
    for atom in std::iter::once(&clause.head).chain(clause.body_atoms()) {
        let decl = check_atom(atom, layer, decls)?;
        for (term, ty) in atom.args.iter().zip(&decl.arg_types) {
            let Term::Var(var) = term else { continue };
            if *ty == ArgType::Any {
                continue;
            }
            match var_types.get(var.as_str()) {
                Some((seen, from)) if seen != ty => {
                    return Err(SourceDiagnostic::semantic(
                        layer,
                        atom.position,
                        DiagnosticCode::TypeMismatch,
                        format!(
                            "variable '{var}' is {seen} in '{from}' but {ty} in '{}'",
                            atom.predicate
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    var_types.insert(var.as_str(), (*ty, atom.predicate.as_str()));
                }
            }
        }
    }

    let bound = clause.bound_variables();
    if let Some(var) = clause.head.variables().find(|v| !bound.contains(v)) {
        let message = if clause.is_fact() {
            format!("fact '{}' must not contain variables (found '{var}')", clause.head)
        } else {
            format!(
                "variable '{var}' in the head of '{}' is not bound by a positive body atom",
                clause.head.predicate
            )
        };
        return Err(SourceDiagnostic::semantic(
            layer,
            clause.head.position,
            DiagnosticCode::UnboundVariable,
            message,
        ));
    }

    for cmp in clause.comparisons() {
        if matches!(cmp.left, Term::Wildcard) || matches!(cmp.right, Term::Wildcard) {
            return Err(SourceDiagnostic::semantic(
                layer,
                cmp.position,
                DiagnosticCode::UnboundVariable,
                format!("wildcard '_' cannot be compared in '{cmp}'"),
            ));
        }
        if let Some(var) = cmp.variables().find(|v| !bound.contains(v)) {
            return Err(SourceDiagnostic::semantic(
                layer,
                cmp.position,
                DiagnosticCode::UnboundVariable,
                format!("variable '{var}' in '{cmp}' is not bound by a positive body atom"),
            ));
        }
    }

    Ok(())
}

fn check_atom<'a>(
    atom: &Atom,
    layer: Layer,
    decls: &'a BTreeMap<String, PredicateDecl>,
) -> ValidateResult<&'a PredicateDecl> {
    let Some(decl) = decls.get(&atom.predicate) else {
        return Err(SourceDiagnostic::semantic(
            layer,
            atom.position,
            DiagnosticCode::UndeclaredPredicate,
            format!("predicate '{}' is not declared", atom.predicate),
        ));
    };

    if decl.arity() != atom.args.len() {
        return Err(SourceDiagnostic::semantic(
            layer,
            atom.position,
            DiagnosticCode::ArityMismatch,
            format!(
                "predicate '{}' takes {} argument(s), found {}",
                atom.predicate,
                decl.arity(),
                atom.args.len()
            ),
        ));
    }

    for (i, (term, ty)) in atom.args.iter().zip(&decl.arg_types).enumerate() {
        if let Term::Const(value) = term {
            if !ty.admits(value) {
                return Err(SourceDiagnostic::semantic(
                    layer,
                    atom.position,
                    DiagnosticCode::TypeMismatch,
                    format!(
                        "argument {} of '{}' must be {ty}, found {} constant {value}",
                        i + 1,
                        atom.predicate,
                        value.type_label()
                    ),
                ));
            }
        }
    }

    Ok(decl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::parser::parse_layer;

    fn link_texts(schema: &str, policy: &str, learned: &str) -> ValidateResult<Linked> {
        link(vec![
            (Layer::Schema, parse_layer(schema, Layer::Schema)?),
            (Layer::Policy, parse_layer(policy, Layer::Policy)?),
            (Layer::Learned, parse_layer(learned, Layer::Learned)?),
        ])
    }

    const SCHEMA: &str = "Decl has_flag(S, F) bound [/name, /name].\n\
                          Decl file_size(F, N) bound [/name, /number].\n\
                          Decl big(F).";

    #[test]
    fn valid_program_links() {
        let linked = link_texts(
            SCHEMA,
            "big(F) :- file_size(F, N), N > 10.",
            "is_safe(X) :- has_flag(X, /reviewed).",
        )
        .unwrap();
        assert_eq!(linked.clauses.len(), 2);
        let implicit = &linked.decls["is_safe"];
        assert_eq!(implicit.layer, Layer::Learned);
        assert_eq!(implicit.arg_types, vec![ArgType::Any]);
    }

    #[test]
    fn undeclared_predicate() {
        let err = link_texts(SCHEMA, "big(F) :- nope(F).", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UndeclaredPredicate);
        assert_eq!(err.to_string(), "1:10 predicate 'nope' is not declared");
    }

    #[test]
    fn arity_and_constant_types() {
        let err = link_texts(SCHEMA, "big(F) :- file_size(F).", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::ArityMismatch);

        let err = link_texts(SCHEMA, "has_flag(/a, \"reviewed\").", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::TypeMismatch);
    }

    #[test]
    fn variable_forced_to_two_types() {
        let err = link_texts(SCHEMA, "big(F) :- file_size(F, N), has_flag(F, N).", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::TypeMismatch);
        assert!(err.message.contains("'N'"));
    }

    #[test]
    fn range_restriction() {
        let err = link_texts(SCHEMA, "big(F) :- file_size(G, N).", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnboundVariable);

        let err = link_texts(SCHEMA, "big(F) :- file_size(F, N), M > 3.", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnboundVariable);
        assert!(err.message.contains("'M'"));

        let err = link_texts(SCHEMA, "big(_) :- file_size(F, N).", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnboundVariable);

        let err = link_texts(SCHEMA, "big(X).", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnboundVariable);
    }

    #[test]
    fn schema_predicates_are_read_only_for_learned_rules() {
        let err = link_texts(SCHEMA, "", "big(F) :- has_flag(F, /huge).").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::ReadOnlyPredicate);
        assert_eq!(err.layer, Layer::Learned);
    }

    #[test]
    fn declarations_are_unique_and_not_learned() {
        let err = link_texts(SCHEMA, "Decl big(X).", "").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::DuplicateDeclaration);

        let err = link_texts(SCHEMA, "", "Decl fresh(X).").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::DeclarationNotAllowed);
    }

    #[test]
    fn implicit_arity_is_fixed_by_first_clause() {
        let err = link_texts(
            SCHEMA,
            "",
            "risky(F) :- big(F).\nrisky(F, N) :- file_size(F, N).",
        )
        .unwrap_err();
        assert_eq!(err.code, DiagnosticCode::ArityMismatch);
        assert_eq!(err.line, 2);
    }
}
