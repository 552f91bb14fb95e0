//! Program compiler: rule text layers in, validated immutable [`Program`] out.
//!
//! Three text layers make up a program:
//!
//! - `schema`: read-only declarations and builtin facts
//! - `policy`: hand-authored rules
//! - `learned`: append-only rules accepted through hot-loading
//!
//! Each layer is parsed independently (positions are relative to the layer)
//! and then validated as a whole. Compilation is pure: the same [`Sources`]
//! always yield the same program or the same diagnostic.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
mod validate;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::fact::Fact;

pub use ast::{
    ArgType, Atom, BodyItem, Clause, CompareOp, Comparison, Layer, Position, PredicateDecl,
    Statement, Term,
};
pub use error::{CompileError, CompileResult, DiagnosticCode, SourceDiagnostic};
pub use parser::{parse_candidate, parse_facts, parse_layer};

/// The raw text of the three program layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sources {
    pub schema: String,
    pub policy: String,
    pub learned: String,
}

impl Sources {
    pub fn new(
        schema: impl Into<String>,
        policy: impl Into<String>,
        learned: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            policy: policy.into(),
            learned: learned.into(),
        }
    }

    /// Text of a single layer. `Session` has no program text.
    pub fn layer(&self, layer: Layer) -> &str {
        match layer {
            Layer::Schema => &self.schema,
            Layer::Policy => &self.policy,
            Layer::Learned => &self.learned,
            Layer::Session => "",
        }
    }

    /// The learned layer with `candidate` appended on its own line.
    pub fn with_learned_rule(&self, candidate: &str) -> Self {
        let mut learned = self.learned.clone();
        if !learned.is_empty() && !learned.ends_with('\n') {
            learned.push('\n');
        }
        learned.push_str(candidate.trim());
        learned.push('\n');
        Self {
            schema: self.schema.clone(),
            policy: self.policy.clone(),
            learned,
        }
    }
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A compiled, validated, immutable rule program.
///
/// Programs are never mutated after compilation. A hot-load produces a new
/// program that replaces the old one wholesale.
#[derive(Debug, Clone)]
pub struct Program {
    decls: BTreeMap<String, PredicateDecl>,
    clauses: Vec<Clause>,
    /// Edge `head -> body predicate` for every rule.
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl Program {
    /// Compile the three layers into a program.
    pub fn compile(sources: &Sources) -> CompileResult<Self> {
        Self::link(sources, None)
    }

    /// Compile the layers plus one candidate learned clause.
    ///
    /// The candidate is parsed on its own, so diagnostics about it carry
    /// positions relative to the candidate text. Returns the program and the
    /// candidate clause.
    pub fn compile_with_candidate(
        sources: &Sources,
        candidate: &str,
    ) -> CompileResult<(Self, Clause)> {
        let clause = parse_candidate(candidate)?;
        let program = Self::link(sources, Some(clause.clone()))?;
        Ok((program, clause))
    }

    fn link(sources: &Sources, candidate: Option<Clause>) -> CompileResult<Self> {
        let mut layers = Vec::with_capacity(3);
        for layer in [Layer::Schema, Layer::Policy, Layer::Learned] {
            layers.push((layer, parse_layer(sources.layer(layer), layer)?));
        }
        if let Some(clause) = candidate {
            if let Some((_, learned)) = layers.last_mut() {
                learned.push(Statement::Clause(clause));
            }
        }

        let linked = validate::link(layers)?;
        let program = Self::from_parts(linked.decls, linked.clauses);
        program.check_exclusive_recursion()?;
        Ok(program)
    }

    /// Exclusive predicates are decided once all their facts are known, so
    /// none may sit on a dependency cycle. The diagnostic points at the last
    /// clause that closes the cycle.
    fn check_exclusive_recursion(&self) -> Result<(), SourceDiagnostic> {
        for scc in tarjan_scc(&self.graph) {
            let recursive = scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]);
            if !recursive {
                continue;
            }
            let members: BTreeSet<&str> = scc.iter().map(|&n| self.graph[n].as_str()).collect();
            let Some(name) = members
                .iter()
                .find(|p| self.decls.get(**p).is_some_and(|d| d.exclusive))
            else {
                continue;
            };
            let Some(clause) = self.clauses.iter().rev().find(|c| {
                members.contains(c.head.predicate.as_str())
                    && c.body_atoms().any(|a| members.contains(a.predicate.as_str()))
            }) else {
                continue;
            };
            return Err(SourceDiagnostic::semantic(
                clause.layer,
                clause.position,
                DiagnosticCode::RecursiveExclusive,
                format!("exclusive predicate '{name}' must not depend on itself"),
            ));
        }
        Ok(())
    }

    fn from_parts(decls: BTreeMap<String, PredicateDecl>, clauses: Vec<Clause>) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::with_capacity(decls.len());
        for name in decls.keys() {
            nodes.insert(name.clone(), graph.add_node(name.clone()));
        }
        for clause in &clauses {
            let head = nodes[&clause.head.predicate];
            for atom in clause.body_atoms() {
                let body = nodes[&atom.predicate];
                if graph.find_edge(head, body).is_none() {
                    graph.add_edge(head, body, ());
                }
            }
        }
        Self {
            decls,
            clauses,
            graph,
            nodes,
        }
    }

    /// An empty program: no declarations, no clauses.
    pub fn empty() -> Self {
        Self::from_parts(BTreeMap::new(), Vec::new())
    }

    pub fn decl(&self, predicate: &str) -> Option<&PredicateDecl> {
        self.decls.get(predicate)
    }

    /// All declarations, sorted by predicate name.
    pub fn decls(&self) -> impl Iterator<Item = &PredicateDecl> {
        self.decls.values()
    }

    pub fn declared_predicates(&self) -> BTreeSet<String> {
        self.decls.keys().cloned().collect()
    }

    /// All clauses in layer order, then source order.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Number of compiled clauses (rules and program facts).
    pub fn atom_count(&self) -> usize {
        self.clauses.len()
    }

    /// Number of clauses that came from the learned layer.
    pub fn learned_rule_count(&self) -> usize {
        self.clauses
            .iter()
            .filter(|c| c.layer == Layer::Learned)
            .count()
    }

    /// Clauses whose head is `predicate`.
    pub fn rules_for<'a>(&'a self, predicate: &'a str) -> impl Iterator<Item = &'a Clause> {
        self.clauses
            .iter()
            .filter(move |c| c.head.predicate == predicate)
    }

    /// Predicates `goal` depends on, including `goal` itself.
    ///
    /// Empty when `goal` is not declared.
    pub fn reachable_from(&self, goal: &str) -> BTreeSet<String> {
        let Some(&start) = self.nodes.get(goal) else {
            return BTreeSet::new();
        };
        let mut reachable = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            reachable.insert(self.graph[node].clone());
        }
        reachable
    }

    /// Predicates `goal` depends on, grouped into mutually recursive sets.
    ///
    /// Every set comes after the sets its rules read from, so evaluating them
    /// in order finishes each predicate before any dependent uses it.
    pub fn strata(&self, goal: &str) -> Vec<Vec<String>> {
        let reachable = self.reachable_from(goal);
        tarjan_scc(&self.graph)
            .into_iter()
            .filter_map(|scc| {
                let mut names: Vec<String> = scc
                    .into_iter()
                    .map(|n| self.graph[n].clone())
                    .filter(|name| reachable.contains(name))
                    .collect();
                names.sort();
                (!names.is_empty()).then_some(names)
            })
            .collect()
    }

    /// Check a ground fact against its predicate's declaration.
    ///
    /// Facts of undeclared predicates are refused.
    pub fn check_fact(&self, fact: &Fact) -> Result<(), String> {
        let Some(decl) = self.decls.get(&fact.predicate) else {
            return Err(format!(
                "fact '{fact}' uses predicate '{}', which is not declared",
                fact.predicate
            ));
        };
        if decl.arity() != fact.arity() {
            return Err(format!(
                "fact '{fact}' has {} argument(s) but '{}' takes {}",
                fact.arity(),
                decl.name,
                decl.arity()
            ));
        }
        for (i, (value, ty)) in fact.args.iter().zip(&decl.arg_types).enumerate() {
            if !ty.admits(value) {
                return Err(format!(
                    "argument {} of fact '{fact}' must be {ty}, found {}",
                    i + 1,
                    value.type_label()
                ));
            }
        }
        Ok(())
    }

    /// Render the program back into layer texts.
    ///
    /// Implicit declarations of learned heads are not rendered; compiling the
    /// result derives them again.
    pub fn to_sources(&self) -> Sources {
        let mut sources = Sources::default();
        for decl in self.decls.values() {
            if decl.layer == Layer::Learned {
                continue;
            }
            push_line(layer_text(&mut sources, decl.layer), &decl.to_string());
        }
        for clause in &self.clauses {
            push_line(layer_text(&mut sources, clause.layer), &clause.to_string());
        }
        sources
    }
}

fn layer_text(sources: &mut Sources, layer: Layer) -> &mut String {
    match layer {
        Layer::Schema | Layer::Session => &mut sources.schema,
        Layer::Policy => &mut sources.policy,
        Layer::Learned => &mut sources.learned,
    }
}

fn push_line(text: &mut String, line: &str) {
    text.push_str(line);
    text.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Value;

    fn sources() -> Sources {
        Sources::new(
            "Decl has_flag(S, F) bound [/name, /name].\n\
             Decl file_size(F, N) bound [/name, /number].\n\
             Decl next_action(A) bound [/name] exclusive.\n\
             has_flag(/readme, /reviewed).",
            "Decl big(F).\n\
             big(F) :- file_size(F, N), N > 100.\n\
             @priority(3) next_action(/split) :- big(F).",
            "is_safe(X) :- has_flag(X, /reviewed).\n",
        )
    }

    #[test]
    fn compiles_layers() {
        let program = Program::compile(&sources()).unwrap();
        assert_eq!(program.atom_count(), 4);
        assert_eq!(program.learned_rule_count(), 1);
        assert!(program.decl("next_action").unwrap().exclusive);
        assert_eq!(program.rules_for("big").count(), 1);
    }

    #[test]
    fn reachability_follows_rule_bodies() {
        let program = Program::compile(&sources()).unwrap();
        let reach = program.reachable_from("next_action");
        assert!(reach.contains("next_action"));
        assert!(reach.contains("big"));
        assert!(reach.contains("file_size"));
        assert!(!reach.contains("has_flag"));
        assert!(program.reachable_from("missing").is_empty());
    }

    #[test]
    fn strata_put_dependencies_first() {
        let program = Program::compile(&Sources::new(
            "Decl edge(A, B).",
            "Decl path(A, B).\nDecl far(A).\n\
             path(A, B) :- edge(A, B).\n\
             path(A, C) :- path(A, B), edge(B, C).\n\
             far(A) :- path(A, _).",
            "",
        ))
        .unwrap();
        let strata = program.strata("far");
        assert_eq!(
            strata,
            vec![vec!["edge".to_string()], vec!["path".to_string()], vec!["far".to_string()]]
        );
        assert!(program.strata("missing").is_empty());
    }

    #[test]
    fn recursive_exclusive_is_rejected() {
        let err = Program::compile(&Sources::new(
            "Decl step(A, B).",
            "Decl pick(A) exclusive.\npick(/start).\npick(B) :- pick(A), step(A, B).",
            "",
        ))
        .unwrap_err();
        let diagnostic = err.diagnostic();
        assert_eq!(diagnostic.code, DiagnosticCode::RecursiveExclusive);
        assert_eq!(diagnostic.layer, Layer::Policy);
        assert_eq!(diagnostic.line, 3);

        let base = Sources::new(
            "Decl step(A, B).",
            "Decl choice(A) exclusive.\nDecl seen(A).\nseen(A) :- choice(A).\nchoice(A) :- step(A, _).",
            "",
        );
        assert!(Program::compile(&base).is_ok());
        let err = Program::compile_with_candidate(&base, "choice(A) :- seen(A).").unwrap_err();
        assert_eq!(err.diagnostic().code, DiagnosticCode::RecursiveExclusive);
        assert_eq!(err.diagnostic().layer, Layer::Learned);
    }

    #[test]
    fn round_trips_through_source_text() {
        let program = Program::compile(&sources()).unwrap();
        let again = Program::compile(&program.to_sources()).unwrap();
        assert_eq!(program.declared_predicates(), again.declared_predicates());
        assert_eq!(program.atom_count(), again.atom_count());
        assert_eq!(program.learned_rule_count(), again.learned_rule_count());
    }

    #[test]
    fn candidate_positions_are_relative_to_candidate() {
        let err = Program::compile_with_candidate(&sources(), "is_safe(X) :- ").unwrap_err();
        assert!(err.is_parse());
        assert_eq!(
            err.diagnostic().to_string(),
            "1:14 mismatched input '<EOF>' expecting '('"
        );

        let err = Program::compile_with_candidate(&sources(), "file_size(X, 3) :- big(X).")
            .unwrap_err();
        assert_eq!(err.diagnostic().code, DiagnosticCode::ReadOnlyPredicate);
        assert_eq!(err.diagnostic().line, 1);
    }

    #[test]
    fn candidate_extends_learned_layer() {
        let (program, clause) =
            Program::compile_with_candidate(&sources(), "cleared(X) :- is_safe(X).").unwrap();
        assert_eq!(clause.head.predicate, "cleared");
        assert_eq!(program.learned_rule_count(), 2);
    }

    #[test]
    fn fact_checks() {
        let program = Program::compile(&sources()).unwrap();
        let ok = Fact::new("file_size", vec![Value::name("a"), Value::Int(3)]);
        assert!(program.check_fact(&ok).is_ok());
        let bad = Fact::new("file_size", vec![Value::name("a"), Value::string("3")]);
        assert!(program.check_fact(&bad).is_err());
        let unknown = Fact::new("telemetry", vec![Value::Int(1)]);
        let err = program.check_fact(&unknown).unwrap_err();
        assert!(err.contains("'telemetry'"), "{err}");
    }

    #[test]
    fn appending_learned_rules() {
        let s = Sources::new("", "", "a(1).");
        assert_eq!(s.with_learned_rule("  b(2).  ").learned, "a(1).\nb(2).\n");
    }
}
