// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # akh-kernel
//!
//! A deductive rule kernel for autonomous agents: a Datalog-style program in
//! three text layers (schema, policy, learned), session facts, goal-directed
//! fixpoint evaluation, and guarded hot-loading of new rules.
//!
//! ## Architecture
//!
//! - **Program compiler** (`program`): parse and validate the layers as one program
//! - **Fact store** (`store`): in-memory session facts, mirrored to redb
//! - **Evaluator** (`eval`): naive bottom-up fixpoint restricted to the goal's dependencies
//! - **Cache** (`cache`): derived results keyed by goal and context, checked before use
//! - **Hot-loading** (`hotload`, `feedback`): compile one rule, swap it in, repair loop
//! - **Limits** (`limits`): admission control over facts, memory, and session time
//! - **Façade** (`kernel`): one thread-safe handle over all of the above
//!
//! ## Library usage
//!
//! ```no_run
//! use akh_kernel::config::KernelConfig;
//! use akh_kernel::eval::EvalContext;
//! use akh_kernel::fact::{Fact, Value};
//! use akh_kernel::kernel::Kernel;
//! use akh_kernel::program::Sources;
//!
//! let sources = Sources::new("Decl has_flag(S, F) bound [/name, /name].", "", "");
//! let kernel = Kernel::in_memory(sources, &KernelConfig::default()).unwrap();
//! kernel
//!     .load_facts(vec![Fact::new("has_flag", vec![Value::name("main_rs"), Value::name("reviewed")])])
//!     .unwrap();
//! kernel.hot_load_rule("is_safe(X) :- has_flag(X, /reviewed).").unwrap();
//! let result = kernel.evaluate("is_safe", &EvalContext::new()).unwrap();
//! assert_eq!(result.facts.len(), 1);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod eval;
pub mod fact;
pub mod feedback;
pub mod hotload;
pub mod kernel;
pub mod limits;
pub mod paths;
pub mod program;
pub mod provenance;
pub mod store;
pub mod watch;

pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KernelStats, RebuildReport};
