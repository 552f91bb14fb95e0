//! The kernel façade: one handle over program, facts, cache, and limits.
//!
//! A [`Kernel`] is shared by reference (usually behind an `Arc`) between all
//! workers. One `RwLock` guards the program, its source layers, the session
//! facts, and the derived cache as a unit. Evaluations share the lock;
//! writers take it exclusively and invalidate the cache before releasing it.
//! Compilation for hot-loads and rebuilds happens outside the lock.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use crate::cache::{CacheKey, CacheLookup, DerivedCache};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult, StoreError};
use crate::eval::{self, EvalContext, Evaluation};
use crate::fact::Fact;
use crate::feedback::{self, FeedbackConfig, FeedbackReport, RuleProposer, RuleSink};
use crate::hotload::{self, HotLoadOutcome};
use crate::limits::{Admission, AdmissionOp, LimitsEnforcer};
use crate::paths::KernelPaths;
use crate::program::{CompileError, Program, SourceDiagnostic, Sources, parse_facts};
use crate::store::SessionStore;

/// Counters reported by [`Kernel::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    /// Extensional facts in the session.
    pub fact_count: usize,
    /// Derived facts held by the cache.
    pub derived_fact_count: usize,
    /// Compiled clauses in the live program.
    pub program_atom_count: usize,
    /// Clauses in the learned layer.
    pub learned_rule_count: usize,
}

/// What [`Kernel::rebuild`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildReport {
    /// The layer files match the live program's sources.
    Unchanged,
    /// A new program was compiled and swapped in.
    Rebuilt {
        program_atom_count: usize,
        learned_rule_count: usize,
    },
    /// The new layers did not compile; the last good program stays live.
    Failed(SourceDiagnostic),
}

struct KernelState {
    sources: Arc<Sources>,
    program: Arc<Program>,
    store: SessionStore,
    cache: Mutex<DerivedCache>,
}

impl KernelState {
    /// Drop every cached evaluation. Callers hold the write lock.
    fn invalidate(&mut self) {
        self.cache
            .get_mut()
            .expect("derived cache lock poisoned")
            .invalidate();
    }
}

/// The deductive kernel.
pub struct Kernel {
    state: RwLock<KernelState>,
    limits: LimitsEnforcer,
    feedback: FeedbackConfig,
    paths: Option<KernelPaths>,
}

impl Kernel {
    /// Build a memory-only kernel from layer texts.
    ///
    /// Fails if the layers do not compile.
    pub fn in_memory(sources: Sources, config: &KernelConfig) -> KernelResult<Self> {
        let program = Program::compile(&sources)?;
        tracing::info!(
            clauses = program.atom_count(),
            learned = program.learned_rule_count(),
            "kernel started (in memory)"
        );
        Ok(Self::assemble(sources, program, SessionStore::memory_only(), config, None))
    }

    /// Open the kernel rooted at `paths`: read the layer files, compile
    /// them, and reload the session mirror when persistence is on.
    pub fn open(paths: KernelPaths, config: &KernelConfig) -> KernelResult<Self> {
        paths.ensure_dirs()?;
        let sources = paths.read_sources()?;
        let program = Program::compile(&sources)?;
        let store = if config.persist_session {
            SessionStore::with_mirror(&paths.session_db, |fact| program.check_fact(fact))?
        } else {
            SessionStore::memory_only()
        };
        tracing::info!(
            root = %paths.root.display(),
            clauses = program.atom_count(),
            learned = program.learned_rule_count(),
            facts = store.facts.len(),
            "kernel opened"
        );
        Ok(Self::assemble(sources, program, store, config, Some(paths)))
    }

    fn assemble(
        sources: Sources,
        program: Program,
        store: SessionStore,
        config: &KernelConfig,
        paths: Option<KernelPaths>,
    ) -> Self {
        Self {
            state: RwLock::new(KernelState {
                sources: Arc::new(sources),
                program: Arc::new(program),
                store,
                cache: Mutex::new(DerivedCache::new()),
            }),
            limits: LimitsEnforcer::new(config.limits_policy()),
            feedback: config.feedback_config(),
            paths,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, KernelState> {
        self.state.read().expect("kernel state lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, KernelState> {
        self.state.write().expect("kernel state lock poisoned")
    }

    fn admit(&self, op: AdmissionOp) -> KernelResult<()> {
        self.limits
            .check(op)
            .into_result()
            .map_err(|reason| KernelError::AdmissionDenied { reason })
    }

    // -----------------------------------------------------------------------
    // Facts
    // -----------------------------------------------------------------------

    /// Add facts to the session. Returns how many were new.
    ///
    /// The whole batch is admitted or refused; duplicates are no-ops.
    pub fn load_facts(&self, facts: Vec<Fact>) -> KernelResult<usize> {
        self.admit(AdmissionOp::Session)?;
        let mut state = self.write();

        for fact in &facts {
            state
                .program
                .check_fact(fact)
                .map_err(|message| KernelError::InvalidFact { message })?;
        }

        let fresh = state.store.facts.fresh(facts);
        if fresh.is_empty() {
            return Ok(0);
        }
        let incoming_bytes: usize = fresh.iter().map(Fact::estimated_bytes).sum();
        self.admit(AdmissionOp::LoadFacts {
            current: state.store.facts.len(),
            incoming: fresh.len(),
            projected_bytes: state.store.facts.estimated_bytes() + incoming_bytes,
        })?;

        let stored = state.store.insert_fresh(fresh)?;
        state.invalidate();
        tracing::info!(stored, total = state.store.facts.len(), "facts loaded");
        Ok(stored)
    }

    /// Parse a fact-only file and load its facts. Returns the parsed facts.
    pub fn load_facts_from_file(&self, path: &Path) -> KernelResult<Vec<Fact>> {
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::Io { source: e })?;
        let facts = parse_facts(&text).map_err(CompileError::from)?;
        self.load_facts(facts.clone())?;
        Ok(facts)
    }

    /// Remove every session fact of a predicate. Returns how many were removed.
    pub fn retract_predicate(&self, predicate: &str) -> KernelResult<usize> {
        let mut state = self.write();
        let removed = state.store.retract_predicate(predicate)?;
        if removed > 0 {
            state.invalidate();
            tracing::info!(predicate, removed, "facts retracted");
        }
        Ok(removed)
    }

    /// Remove every session fact.
    pub fn reset_session(&self) -> KernelResult<()> {
        let mut state = self.write();
        state.store.clear()?;
        state.invalidate();
        tracing::info!("session reset");
        Ok(())
    }

    /// Session facts of one predicate, sorted.
    pub fn facts_for(&self, predicate: &str) -> Vec<Fact> {
        self.read().store.facts.by_predicate(predicate).cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Derive every fact of `goal`.
    ///
    /// The result reflects exactly one program: the one live when the call
    /// took the shared lock.
    pub fn evaluate(&self, goal: &str, context: &EvalContext) -> KernelResult<Evaluation> {
        let state = self.read();
        let key = CacheKey::new(goal, context);
        let fact_count = state.store.facts.len();

        let started = {
            let mut cache = state.cache.lock().expect("derived cache lock poisoned");
            match cache.lookup(&key, fact_count) {
                CacheLookup::Hit(evaluation) => return Ok(evaluation),
                CacheLookup::Desync { expected, found } => {
                    tracing::warn!(?expected, ?found, "derived cache desync, recomputing");
                }
                CacheLookup::Miss => {}
            }
            cache.generation()
        };

        let evaluation = eval::evaluate(
            &state.program,
            &state.store.facts,
            goal,
            context,
            &self.limits,
        )?;

        state
            .cache
            .lock()
            .expect("derived cache lock poisoned")
            .store(started, key, evaluation.clone(), fact_count);
        Ok(evaluation)
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Compile `text` as one learned rule and, if it is valid, make it live.
    ///
    /// A rejection is `Ok(HotLoadOutcome::Rejected)`; errors are reserved for
    /// admission denials and failures to persist the learned layer.
    pub fn hot_load_rule(&self, text: &str) -> KernelResult<HotLoadOutcome> {
        self.admit(AdmissionOp::Session)?;
        let base = Arc::clone(&self.read().sources);

        let prepared = match hotload::prepare(&base, text) {
            Ok(prepared) => prepared,
            Err(e) => return Ok(reject(e)),
        };

        let mut state = self.write();
        let prepared = if Arc::ptr_eq(&state.sources, &base) {
            prepared
        } else {
            // Another writer swapped the layers while we compiled.
            match hotload::prepare(&state.sources, text) {
                Ok(prepared) => prepared,
                Err(e) => return Ok(reject(e)),
            }
        };

        if let Some(paths) = &self.paths {
            hotload::append_learned(&paths.learned, &prepared.text)?;
        }

        let rule = prepared.clause.to_string();
        let learned_rule_count = prepared.program.learned_rule_count();
        state.sources = Arc::new(prepared.sources);
        state.program = Arc::new(prepared.program);
        state.invalidate();
        tracing::info!(%rule, learned_rule_count, "rule hot-loaded");

        Ok(HotLoadOutcome::Accepted {
            rule,
            learned_rule_count,
        })
    }

    /// Ask `proposer` for rules until one is accepted, `max_attempts` are
    /// used, or `deadline` passes.
    pub fn run_feedback_loop(
        &self,
        proposer: Arc<dyn RuleProposer>,
        deadline: Instant,
        max_attempts: usize,
    ) -> FeedbackReport {
        feedback::run_feedback_loop(self, proposer, &self.feedback, deadline, max_attempts)
    }

    /// Re-read the layer files and swap in the result if it compiles.
    ///
    /// A memory-only kernel has no files and always reports `Unchanged`.
    ///
    /// Files are read and compiled outside the lock. If another writer swaps
    /// the layers in the meantime, the rebuild starts over; after
    /// `REBUILD_RETRIES` lost races it reads and compiles under the lock.
    pub fn rebuild(&self) -> KernelResult<RebuildReport> {
        let Some(paths) = &self.paths else {
            return Ok(RebuildReport::Unchanged);
        };

        for _ in 0..REBUILD_RETRIES {
            let base = Arc::clone(&self.read().sources);
            let sources = paths.read_sources()?;
            if *base == sources {
                return Ok(RebuildReport::Unchanged);
            }
            let program = match Program::compile(&sources) {
                Ok(program) => program,
                Err(e) => return Ok(rebuild_failed(e)),
            };

            let mut state = self.write();
            if !Arc::ptr_eq(&state.sources, &base) {
                tracing::debug!("layers changed during rebuild, retrying");
                continue;
            }
            return Ok(swap_rebuilt(&mut state, sources, program));
        }

        let mut state = self.write();
        let sources = paths.read_sources()?;
        if *state.sources == sources {
            return Ok(RebuildReport::Unchanged);
        }
        match Program::compile(&sources) {
            Ok(program) => Ok(swap_rebuilt(&mut state, sources, program)),
            Err(e) => Ok(rebuild_failed(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> KernelStats {
        let state = self.read();
        let derived_fact_count = state
            .cache
            .lock()
            .expect("derived cache lock poisoned")
            .derived_count();
        KernelStats {
            fact_count: state.store.facts.len(),
            derived_fact_count,
            program_atom_count: state.program.atom_count(),
            learned_rule_count: state.program.learned_rule_count(),
        }
    }

    /// Whether the session is still within its lifetime.
    pub fn check_session(&self) -> Admission {
        self.limits.check(AdmissionOp::Session)
    }

    /// The live program.
    pub fn program(&self) -> Arc<Program> {
        Arc::clone(&self.read().program)
    }

    /// The layer texts of the live program.
    pub fn sources(&self) -> Arc<Sources> {
        Arc::clone(&self.read().sources)
    }

    pub fn paths(&self) -> Option<&KernelPaths> {
        self.paths.as_ref()
    }

    pub fn limits(&self) -> &LimitsEnforcer {
        &self.limits
    }
}

impl RuleSink for Kernel {
    fn submit(&self, candidate: &str) -> KernelResult<HotLoadOutcome> {
        self.hot_load_rule(candidate)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("paths", &self.paths)
            .field("limits", self.limits.policy())
            .finish_non_exhaustive()
    }
}

/// Optimistic rebuild attempts before compiling under the write lock.
const REBUILD_RETRIES: usize = 3;

fn swap_rebuilt(state: &mut KernelState, sources: Sources, program: Program) -> RebuildReport {
    let report = RebuildReport::Rebuilt {
        program_atom_count: program.atom_count(),
        learned_rule_count: program.learned_rule_count(),
    };
    state.sources = Arc::new(sources);
    state.program = Arc::new(program);
    state.invalidate();
    tracing::info!(?report, "program rebuilt");
    report
}

fn rebuild_failed(error: CompileError) -> RebuildReport {
    let diagnostic = error.into_diagnostic();
    tracing::warn!(
        layer = %diagnostic.layer,
        %diagnostic,
        "rebuild failed, keeping last good program"
    );
    RebuildReport::Failed(diagnostic)
}

fn reject(error: CompileError) -> HotLoadOutcome {
    let diagnostic = error.into_diagnostic();
    tracing::info!(%diagnostic, code = ?diagnostic.code, "rule rejected");
    HotLoadOutcome::Rejected(diagnostic)
}
