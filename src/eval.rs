//! Goal-directed bottom-up evaluation.
//!
//! Runs the rules a goal depends on to a fixpoint over the session facts, one
//! stratum of mutually recursive predicates at a time. Every pass joins rule
//! bodies against the facts known at the start of the pass and collects new
//! heads separately, so the result never depends on the order rules are
//! tried in. Exclusive predicates are decided as soon as their stratum
//! finishes, before any dependent rule reads them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{EvalError, EvalResult};
use crate::fact::{Fact, Value};
use crate::limits::{Admission, AdmissionOp, DenyReason, LimitsEnforcer};
use crate::program::{ArgType, Atom, Clause, Program, Term};
use crate::provenance::Provenance;
use crate::store::FactStore;

/// Predicate that receives the context's operational mode, when declared.
pub const MODE_PREDICATE: &str = "current_mode";
/// Predicate that receives the context's campaign id, when declared.
pub const CAMPAIGN_PREDICATE: &str = "current_campaign";

// ---------------------------------------------------------------------------
// Context and result types
// ---------------------------------------------------------------------------

/// Per-call evaluation context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EvalContext {
    /// Operational mode, e.g. `plan` or `execute`.
    pub mode: Option<String>,
    /// Campaign the caller is working on.
    pub campaign: Option<String>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_campaign(mut self, campaign: impl Into<String>) -> Self {
        self.campaign = Some(campaign.into());
        self
    }

    /// Facts this context contributes to an evaluation of `program`.
    fn facts(&self, program: &Program) -> Vec<Fact> {
        [
            (MODE_PREDICATE, self.mode.as_deref()),
            (CAMPAIGN_PREDICATE, self.campaign.as_deref()),
        ]
        .into_iter()
        .filter_map(|(predicate, value)| {
            let value = value?;
            let decl = program.decl(predicate)?;
            if decl.arity() != 1 {
                return None;
            }
            let value = match decl.arg_types[0] {
                ArgType::String => Value::string(value),
                _ => Value::name(value),
            };
            Some(Fact::new(predicate, vec![value]).with_provenance(Provenance::Session))
        })
        .collect()
    }
}

/// Several facts of an exclusive predicate tied at the top priority.
#[derive(Debug, Clone, PartialEq)]
pub struct Ambiguity {
    pub predicate: String,
    pub priority: i64,
    /// The tied facts, sorted. All of them are kept in the result.
    pub facts: Vec<Fact>,
}

/// Result of evaluating one goal.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub goal: String,
    /// Every fact of the goal predicate, sorted.
    pub facts: Vec<Fact>,
    pub ambiguities: Vec<Ambiguity>,
    /// Facts derived by rules across all predicates the goal depends on.
    /// Program facts are not counted.
    pub derived_count: usize,
    /// Fixpoint passes run. Each stratum ends with a pass that found nothing
    /// new.
    pub passes: usize,
    /// Whether this result was served from the derived cache.
    pub from_cache: bool,
}

impl Evaluation {
    pub fn is_ambiguous(&self) -> bool {
        !self.ambiguities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate `goal` against `program` and the session `facts`.
///
/// Fails with [`EvalError::CapacityExceeded`] rather than return a truncated
/// result when derivation would pass the policy's derived-fact limit.
pub fn evaluate(
    program: &Program,
    facts: &FactStore,
    goal: &str,
    context: &EvalContext,
    limits: &LimitsEnforcer,
) -> EvalResult<Evaluation> {
    if program.decl(goal).is_none() {
        return Err(EvalError::UnknownGoal {
            goal: goal.to_string(),
        });
    }

    let mut run = Run {
        edb: facts,
        context: index(context.facts(program)),
        derived: BTreeMap::new(),
        decided: BTreeMap::new(),
        priorities: HashMap::new(),
        derived_count: 0,
    };
    let mut ambiguities = Vec::new();
    let mut passes = 0;

    for stratum in program.strata(goal) {
        let rules: Vec<&Clause> = program
            .clauses()
            .iter()
            .filter(|c| stratum.contains(&c.head.predicate))
            .collect();
        if !rules.is_empty() {
            passes += run.fixpoint(goal, &rules, limits)?;
        }

        for predicate in &stratum {
            if program.decl(predicate).is_some_and(|d| d.exclusive) {
                ambiguities.extend(run.decide(predicate));
            }
        }
    }

    let goal_facts: BTreeSet<Fact> = run.known(goal).cloned().collect();
    Ok(Evaluation {
        goal: goal.to_string(),
        facts: goal_facts.into_iter().collect(),
        ambiguities,
        derived_count: run.derived_count,
        passes,
        from_cache: false,
    })
}

type Bindings = HashMap<String, Value>;

/// State of one evaluation.
struct Run<'a> {
    edb: &'a FactStore,
    context: BTreeMap<String, BTreeSet<Fact>>,
    derived: BTreeMap<String, BTreeSet<Fact>>,
    /// Surviving facts of exclusive predicates already decided.
    decided: BTreeMap<String, BTreeSet<Fact>>,
    /// Highest priority of any rule that produced each fact.
    priorities: HashMap<Fact, i64>,
    /// Facts produced by rules with a body; program facts are not counted.
    derived_count: usize,
}

impl<'a> Run<'a> {
    /// Every fact of `predicate` currently known. Once an exclusive
    /// predicate is decided only its surviving facts are visible.
    fn known<'s>(&'s self, predicate: &'s str) -> impl Iterator<Item = &'s Fact> + 's {
        let decided = self.decided.get(predicate);
        self.edb
            .by_predicate(predicate)
            .chain(self.context.get(predicate).into_iter().flatten())
            .chain(self.derived.get(predicate).into_iter().flatten())
            .filter(move |fact| decided.is_none_or(|kept| kept.contains(*fact)))
    }

    /// Run `rules` until a pass adds nothing. Returns the passes taken.
    fn fixpoint(
        &mut self,
        goal: &str,
        rules: &[&Clause],
        limits: &LimitsEnforcer,
    ) -> EvalResult<usize> {
        let mut passes = 0;
        loop {
            passes += 1;
            let heads = self.pass(rules);

            let fresh: Vec<Fact> = heads
                .keys()
                .filter(|fact| !self.is_known(fact))
                .cloned()
                .collect();
            for (fact, priority) in heads {
                let entry = self.priorities.entry(fact).or_insert(priority);
                *entry = (*entry).max(priority);
            }

            tracing::debug!(goal, pass = passes, new = fresh.len(), "fixpoint pass");
            if fresh.is_empty() {
                return Ok(passes);
            }

            let projected = self.derived_count + count_derived(&fresh);
            if let Admission::Deny(reason) = limits.check(AdmissionOp::Derive { projected }) {
                let limit = match reason {
                    DenyReason::DerivedLimit { limit, .. } => limit,
                    _ => limits.policy().max_derived_facts,
                };
                tracing::warn!(goal, limit, projected, "derived fact capacity exceeded");
                return Err(EvalError::CapacityExceeded { limit, projected });
            }
            self.commit(fresh);
        }
    }

    /// Keep only the top-priority facts of an exclusive predicate whose
    /// rules have all run. Reports a tie at the top.
    fn decide(&mut self, predicate: &str) -> Option<Ambiguity> {
        let mut facts: BTreeSet<Fact> = self.known(predicate).cloned().collect();
        if facts.is_empty() {
            return None;
        }
        let priority_of = |fact: &Fact| {
            let derived = self.priorities.get(fact).copied();
            if self.is_extensional(fact) {
                derived.map_or(0, |p| p.max(0))
            } else {
                derived.unwrap_or(0)
            }
        };
        let top = facts.iter().map(priority_of).max().unwrap_or(0);
        facts.retain(|f| priority_of(f) == top);

        let ambiguity = (facts.len() > 1).then(|| {
            tracing::debug!(predicate, priority = top, tied = facts.len(), "ambiguous decision");
            Ambiguity {
                predicate: predicate.to_string(),
                priority: top,
                facts: facts.iter().cloned().collect(),
            }
        });
        self.decided.insert(predicate.to_string(), facts);
        ambiguity
    }

    fn is_extensional(&self, fact: &Fact) -> bool {
        self.edb.contains(fact)
            || self
                .context
                .get(&fact.predicate)
                .is_some_and(|set| set.contains(fact))
    }

    fn is_known(&self, fact: &Fact) -> bool {
        self.is_extensional(fact)
            || self
                .derived
                .get(&fact.predicate)
                .is_some_and(|set| set.contains(fact))
    }

    /// Apply every rule once against the current facts. Returns each head
    /// produced with the highest priority of the rules producing it.
    fn pass(&self, rules: &[&Clause]) -> BTreeMap<Fact, i64> {
        let mut heads: BTreeMap<Fact, i64> = BTreeMap::new();
        for rule in rules {
            for bindings in self.match_body(rule) {
                let Some(fact) = instantiate(rule, &bindings) else {
                    continue;
                };
                let entry = heads.entry(fact).or_insert(rule.priority);
                *entry = (*entry).max(rule.priority);
            }
        }
        heads
    }

    /// Join the body atoms left to right, then filter by comparisons.
    fn match_body(&self, rule: &Clause) -> Vec<Bindings> {
        let mut results = vec![Bindings::new()];
        for atom in rule.body_atoms() {
            let mut extended = Vec::new();
            for bindings in &results {
                for fact in self.known(&atom.predicate) {
                    if let Some(b) = unify(atom, bindings, fact) {
                        extended.push(b);
                    }
                }
            }
            results = extended;
            if results.is_empty() {
                return results;
            }
        }

        results.retain(|bindings| {
            rule.comparisons().all(|cmp| {
                match (resolve(&cmp.left, bindings), resolve(&cmp.right, bindings)) {
                    (Some(l), Some(r)) => cmp.op.holds(l, r),
                    _ => false,
                }
            })
        });
        results
    }

    fn commit(&mut self, fresh: Vec<Fact>) {
        self.derived_count += count_derived(&fresh);
        for fact in fresh {
            self.derived
                .entry(fact.predicate.clone())
                .or_default()
                .insert(fact);
        }
    }
}

fn count_derived(facts: &[Fact]) -> usize {
    facts
        .iter()
        .filter(|f| f.provenance == Provenance::Derived)
        .count()
}

fn index(facts: Vec<Fact>) -> BTreeMap<String, BTreeSet<Fact>> {
    let mut map: BTreeMap<String, BTreeSet<Fact>> = BTreeMap::new();
    for fact in facts {
        map.entry(fact.predicate.clone()).or_default().insert(fact);
    }
    map
}

/// Extend `bindings` so that `atom` matches `fact`.
fn unify(atom: &Atom, bindings: &Bindings, fact: &Fact) -> Option<Bindings> {
    if atom.args.len() != fact.args.len() {
        return None;
    }
    let mut out = bindings.clone();
    for (term, value) in atom.args.iter().zip(&fact.args) {
        match term {
            Term::Wildcard => {}
            Term::Const(c) => {
                if c != value {
                    return None;
                }
            }
            Term::Var(v) => match out.get(v) {
                Some(bound) if bound != value => return None,
                Some(_) => {}
                None => {
                    out.insert(v.clone(), value.clone());
                }
            },
        }
    }
    Some(out)
}

fn resolve<'b>(term: &'b Term, bindings: &'b Bindings) -> Option<&'b Value> {
    match term {
        Term::Const(c) => Some(c),
        Term::Var(v) => bindings.get(v),
        Term::Wildcard => None,
    }
}

fn instantiate(rule: &Clause, bindings: &Bindings) -> Option<Fact> {
    let args = rule
        .head
        .args
        .iter()
        .map(|t| resolve(t, bindings).cloned())
        .collect::<Option<Vec<_>>>()?;
    let provenance = if rule.is_fact() {
        Provenance::for_layer(rule.layer)
    } else {
        Provenance::Derived
    };
    Some(Fact::new(rule.head.predicate.clone(), args).with_provenance(provenance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitsPolicy;
    use crate::program::Sources;

    const SCHEMA: &str = "\
Decl has_flag(S, F) bound [/name, /name].
Decl file_size(F, N) bound [/name, /number].
Decl edge(A, B).
Decl path(A, B).
Decl next_action(A) bound [/name] exclusive.
Decl current_mode(M) bound [/name].
";

    fn program(policy: &str, learned: &str) -> Program {
        Program::compile(&Sources::new(SCHEMA, policy, learned)).unwrap()
    }

    fn store(facts: Vec<Fact>) -> FactStore {
        let mut store = FactStore::new();
        for f in facts {
            store.insert(f);
        }
        store
    }

    fn edge(a: &str, b: &str) -> Fact {
        Fact::new("edge", vec![Value::name(a), Value::name(b)])
    }

    fn unlimited() -> LimitsEnforcer {
        LimitsEnforcer::new(LimitsPolicy::unlimited())
    }

    #[test]
    fn transitive_closure() {
        let program = program(
            "path(A, B) :- edge(A, B).\npath(A, C) :- path(A, B), edge(B, C).",
            "",
        );
        let facts = store(vec![edge("a", "b"), edge("b", "c"), edge("c", "d")]);
        let eval = evaluate(&program, &facts, "path", &EvalContext::new(), &unlimited()).unwrap();
        assert_eq!(eval.facts.len(), 6);
        assert_eq!(eval.derived_count, 6);
        assert!(eval.facts.iter().all(|f| f.provenance == Provenance::Derived));
        assert!(!eval.from_cache);
    }

    #[test]
    fn comparisons_filter_bindings() {
        let program = program(
            "Decl big(F).\nbig(F) :- file_size(F, N), N > 100.",
            "",
        );
        let facts = store(vec![
            Fact::new("file_size", vec![Value::name("a"), Value::Int(50)]),
            Fact::new("file_size", vec![Value::name("b"), Value::Int(500)]),
        ]);
        let eval = evaluate(&program, &facts, "big", &EvalContext::new(), &unlimited()).unwrap();
        assert_eq!(eval.facts, vec![Fact::new("big", vec![Value::name("b")])]);
    }

    #[test]
    fn only_reachable_rules_run() {
        let program = program(
            "Decl big(F).\nbig(F) :- file_size(F, N), N > 100.\npath(A, B) :- edge(A, B).",
            "",
        );
        let facts = store(vec![edge("a", "b")]);
        let eval = evaluate(&program, &facts, "big", &EvalContext::new(), &unlimited()).unwrap();
        assert!(eval.facts.is_empty());
        assert_eq!(eval.derived_count, 0);
    }

    #[test]
    fn exclusive_keeps_highest_priority() {
        let program = program(
            "@priority(1) next_action(/lint) :- has_flag(X, /dirty).\n\
             @priority(5) next_action(/run_tests) :- has_flag(X, /reviewed).",
            "",
        );
        let facts = store(vec![
            Fact::new("has_flag", vec![Value::name("a"), Value::name("dirty")]),
            Fact::new("has_flag", vec![Value::name("a"), Value::name("reviewed")]),
        ]);
        let eval =
            evaluate(&program, &facts, "next_action", &EvalContext::new(), &unlimited()).unwrap();
        assert_eq!(eval.facts, vec![Fact::new("next_action", vec![Value::name("run_tests")])]);
        assert!(!eval.is_ambiguous());
    }

    #[test]
    fn exclusive_tie_is_reported() {
        let program = program(
            "@priority(2) next_action(/lint) :- has_flag(X, /dirty).\n\
             @priority(2) next_action(/format) :- has_flag(X, /dirty).",
            "",
        );
        let facts = store(vec![Fact::new(
            "has_flag",
            vec![Value::name("a"), Value::name("dirty")],
        )]);
        let eval =
            evaluate(&program, &facts, "next_action", &EvalContext::new(), &unlimited()).unwrap();
        assert_eq!(eval.facts.len(), 2);
        assert_eq!(eval.ambiguities.len(), 1);
        assert_eq!(eval.ambiguities[0].priority, 2);
    }

    #[test]
    fn dependents_see_only_the_decision() {
        let program = program(
            "Decl do_it(A) bound [/name].\n\
             do_it(A) :- next_action(A).\n\
             @priority(1) next_action(/lint) :- has_flag(X, /dirty).\n\
             @priority(5) next_action(/run_tests) :- has_flag(X, /reviewed).",
            "",
        );
        let facts = store(vec![
            Fact::new("has_flag", vec![Value::name("a"), Value::name("dirty")]),
            Fact::new("has_flag", vec![Value::name("a"), Value::name("reviewed")]),
        ]);
        let eval = evaluate(&program, &facts, "do_it", &EvalContext::new(), &unlimited()).unwrap();
        assert_eq!(eval.facts, vec![Fact::new("do_it", vec![Value::name("run_tests")])]);
        assert!(!eval.is_ambiguous());

        let decision =
            evaluate(&program, &facts, "next_action", &EvalContext::new(), &unlimited()).unwrap();
        assert_eq!(
            decision.facts,
            vec![Fact::new("next_action", vec![Value::name("run_tests")])]
        );
    }

    #[test]
    fn tie_under_a_dependent_is_reported() {
        let program = program(
            "Decl do_it(A) bound [/name].\n\
             do_it(A) :- next_action(A).\n\
             next_action(/lint) :- has_flag(X, /dirty).\n\
             next_action(/format) :- has_flag(X, /dirty).",
            "",
        );
        let facts = store(vec![Fact::new(
            "has_flag",
            vec![Value::name("a"), Value::name("dirty")],
        )]);
        let eval = evaluate(&program, &facts, "do_it", &EvalContext::new(), &unlimited()).unwrap();
        assert_eq!(eval.facts.len(), 2);
        assert_eq!(eval.ambiguities.len(), 1);
        assert_eq!(eval.ambiguities[0].predicate, "next_action");
    }

    #[test]
    fn context_mode_is_injected() {
        let program = program(
            "next_action(/plan) :- current_mode(/planning).\n\
             next_action(/build) :- current_mode(/executing).",
            "",
        );
        let facts = FactStore::new();
        let ctx = EvalContext::new().with_mode("planning");
        let eval = evaluate(&program, &facts, "next_action", &ctx, &unlimited()).unwrap();
        assert_eq!(eval.facts, vec![Fact::new("next_action", vec![Value::name("plan")])]);

        let eval =
            evaluate(&program, &facts, "next_action", &EvalContext::new(), &unlimited()).unwrap();
        assert!(eval.facts.is_empty());
    }

    #[test]
    fn capacity_exceeded_returns_no_partial_result() {
        let program = program(
            "path(A, B) :- edge(A, B).\npath(A, C) :- path(A, B), edge(B, C).",
            "",
        );
        let facts = store(vec![edge("a", "b"), edge("b", "c"), edge("c", "d")]);
        let limits = LimitsEnforcer::new(LimitsPolicy {
            max_derived_facts: 4,
            ..LimitsPolicy::default()
        });
        let err = evaluate(&program, &facts, "path", &EvalContext::new(), &limits).unwrap_err();
        assert!(matches!(err, EvalError::CapacityExceeded { limit: 4, .. }));
    }

    #[test]
    fn program_facts_do_not_use_derived_capacity() {
        let program = program(
            "has_flag(/a, /reviewed).\nhas_flag(/b, /reviewed).\nhas_flag(/c, /reviewed).\n\
             Decl safe(X).\nsafe(X) :- has_flag(X, /reviewed), X = /a.",
            "",
        );
        let limits = LimitsEnforcer::new(LimitsPolicy {
            max_derived_facts: 1,
            ..LimitsPolicy::default()
        });
        let eval = evaluate(&program, &FactStore::new(), "safe", &EvalContext::new(), &limits)
            .unwrap();
        assert_eq!(eval.facts, vec![Fact::new("safe", vec![Value::name("a")])]);
        assert_eq!(eval.derived_count, 1);
    }

    #[test]
    fn unknown_goal() {
        let program = program("", "");
        let err = evaluate(
            &program,
            &FactStore::new(),
            "nope",
            &EvalContext::new(),
            &unlimited(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::UnknownGoal { .. }));
    }

    #[test]
    fn program_facts_keep_layer_provenance() {
        let program = program("has_flag(/readme, /reviewed).", "");
        let eval =
            evaluate(&program, &FactStore::new(), "has_flag", &EvalContext::new(), &unlimited())
                .unwrap();
        assert_eq!(eval.facts.len(), 1);
        assert_eq!(eval.facts[0].provenance, Provenance::Builtin);
    }
}
