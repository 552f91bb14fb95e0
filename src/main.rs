//! akh-kernel CLI: deductive rule kernel.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use akh_kernel::config::KernelConfig;
use akh_kernel::eval::EvalContext;
use akh_kernel::feedback::{ProposerError, RepairRequest, RuleProposer};
use akh_kernel::hotload::HotLoadOutcome;
use akh_kernel::kernel::{Kernel, RebuildReport};
use akh_kernel::paths::KernelPaths;
use akh_kernel::program::Program;
use akh_kernel::watch::SourceWatcher;

#[derive(Parser)]
#[command(name = "akh-kernel", version, about = "Deductive rule kernel")]
struct Cli {
    /// Kernel root holding the layer files (default: $XDG_DATA_HOME/akh-kernel).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the layer files and report the first diagnostic, if any.
    Check,

    /// Evaluate a goal predicate and print its facts as JSON.
    Eval {
        /// Goal predicate name.
        goal: String,

        /// Value of `current_mode`.
        #[arg(long)]
        mode: Option<String>,

        /// Value of `current_campaign`.
        #[arg(long)]
        campaign: Option<String>,

        /// Fact files to load before evaluating.
        #[arg(long = "facts")]
        facts: Vec<PathBuf>,
    },

    /// Load a fact file into the persisted session.
    Load {
        /// Path to a fact-only rule file.
        file: PathBuf,
    },

    /// Offer one rule to the learned layer.
    HotLoad {
        /// Rule text, e.g. "is_safe(X) :- has_flag(X, /reviewed)."
        rule: String,
    },

    /// Run the repair loop over candidates read from a file, one per line.
    Repair {
        /// File with one candidate rule per line.
        candidates: PathBuf,

        /// Maximum attempts (default: from kernel.toml).
        #[arg(long)]
        max_attempts: Option<usize>,

        /// Overall deadline in seconds.
        #[arg(long, default_value = "60")]
        deadline_secs: u64,
    },

    /// Show kernel statistics.
    Stats,

    /// Watch the layer files and rebuild on change until interrupted.
    Watch,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let paths = match cli.root {
        Some(root) => KernelPaths::at(root),
        None => KernelPaths::resolve()?,
    };
    let config = KernelConfig::load_or_default(&paths.config_file)?;

    match cli.command {
        Commands::Check => {
            let sources = paths.read_sources()?;
            let program = Program::compile(&sources)?;
            println!(
                "ok: {} clauses ({} learned), {} predicates",
                program.atom_count(),
                program.learned_rule_count(),
                program.declared_predicates().len()
            );
        }

        Commands::Eval {
            goal,
            mode,
            campaign,
            facts,
        } => {
            let kernel = Kernel::open(paths, &config)?;
            for file in &facts {
                let loaded = kernel.load_facts_from_file(file)?;
                tracing::debug!(file = %file.display(), count = loaded.len(), "facts loaded");
            }

            let mut context = EvalContext::new();
            if let Some(mode) = mode {
                context = context.with_mode(mode);
            }
            if let Some(campaign) = campaign {
                context = context.with_campaign(campaign);
            }

            let result = kernel.evaluate(&goal, &context)?;
            for ambiguity in &result.ambiguities {
                eprintln!(
                    "warning: {} has {} facts tied at priority {}",
                    ambiguity.predicate,
                    ambiguity.facts.len(),
                    ambiguity.priority
                );
            }
            let json = serde_json::to_string_pretty(&result.facts).into_diagnostic()?;
            println!("{json}");
        }

        Commands::Load { file } => {
            let kernel = Kernel::open(paths, &config)?;
            let before = kernel.stats().fact_count;
            let facts = kernel.load_facts_from_file(&file)?;
            let stored = kernel.stats().fact_count - before;
            println!(
                "Loaded {stored} new facts ({} in file) from {}",
                facts.len(),
                file.display()
            );
        }

        Commands::HotLoad { rule } => {
            let kernel = Kernel::open(paths, &config)?;
            match kernel.hot_load_rule(&rule)? {
                HotLoadOutcome::Accepted {
                    rule,
                    learned_rule_count,
                } => println!("accepted: {rule} ({learned_rule_count} learned rules)"),
                HotLoadOutcome::Rejected(diagnostic) => {
                    miette::bail!("rejected: {diagnostic}");
                }
            }
        }

        Commands::Repair {
            candidates,
            max_attempts,
            deadline_secs,
        } => {
            let kernel = Kernel::open(paths, &config)?;
            let text = std::fs::read_to_string(&candidates).into_diagnostic()?;
            let proposer = Arc::new(LineProposer::new(&text));
            let deadline = Instant::now() + Duration::from_secs(deadline_secs);
            let max_attempts = max_attempts.unwrap_or(config.feedback.max_attempts);

            let report = kernel.run_feedback_loop(proposer, deadline, max_attempts);
            for attempt in &report.attempts {
                println!(
                    "  {}. {} -> {:?}",
                    attempt.number,
                    attempt.candidate.as_deref().unwrap_or("<none>"),
                    attempt.outcome
                );
            }
            println!("outcome: {:?}", report.outcome);
        }

        Commands::Stats => {
            let kernel = Kernel::open(paths, &config)?;
            let stats = kernel.stats();
            println!("Facts:          {}", stats.fact_count);
            println!("Program clauses: {}", stats.program_atom_count);
            println!("Learned rules:  {}", stats.learned_rule_count);
            println!("Derived cached: {}", stats.derived_fact_count);
        }

        Commands::Watch => {
            let kernel = Arc::new(Kernel::open(paths, &config)?);
            let (tx, rx) = mpsc::channel();
            let _watcher = SourceWatcher::spawn(&kernel, &config.watch, Some(tx))?;
            println!("Watching {} (Ctrl-C to stop)", kernel.paths().map_or_else(
                || "<memory>".to_string(),
                |p| p.root.display().to_string(),
            ));
            for report in rx {
                match report {
                    RebuildReport::Unchanged => {}
                    RebuildReport::Rebuilt {
                        program_atom_count,
                        learned_rule_count,
                    } => println!(
                        "rebuilt: {program_atom_count} clauses ({learned_rule_count} learned)"
                    ),
                    RebuildReport::Failed(diagnostic) => {
                        eprintln!("rejected, keeping last good program: {diagnostic}");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Offers prepared candidates in file order.
struct LineProposer {
    lines: Mutex<std::vec::IntoIter<String>>,
}

impl LineProposer {
    fn new(text: &str) -> Self {
        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect();
        Self {
            lines: Mutex::new(lines.into_iter()),
        }
    }
}

impl RuleProposer for LineProposer {
    fn propose(&self, request: &RepairRequest) -> std::result::Result<String, ProposerError> {
        if let Some(hint) = request.repair_hint() {
            tracing::debug!(attempt = request.attempt, "{hint}");
        }
        self.lines
            .lock()
            .expect("candidate list lock poisoned")
            .next()
            .ok_or_else(|| ProposerError::failed("no more candidates"))
    }
}
