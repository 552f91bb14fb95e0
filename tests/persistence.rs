//! Persistence and recovery tests for the akh kernel.
//!
//! These tests verify that learned rules and session facts survive a kernel
//! restart, and that a bad layer edit never replaces a good program.

use akh_kernel::config::KernelConfig;
use akh_kernel::eval::EvalContext;
use akh_kernel::fact::{Fact, Value};
use akh_kernel::kernel::{Kernel, RebuildReport};
use akh_kernel::paths::KernelPaths;
use akh_kernel::KernelError;

const SCHEMA: &str = "Decl has_flag(S, F) bound [/name, /name].\n";

fn root(dir: &std::path::Path) -> KernelPaths {
    let paths = KernelPaths::at(dir);
    paths.ensure_dirs().unwrap();
    std::fs::write(&paths.schema, SCHEMA).unwrap();
    paths
}

fn flag(s: &str, f: &str) -> Fact {
    Fact::new("has_flag", vec![Value::name(s), Value::name(f)])
}

#[test]
fn learned_rules_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());

    // First session: learn two rules, one rejected in between.
    {
        let k = Kernel::open(paths.clone(), &KernelConfig::default()).unwrap();
        assert!(k
            .hot_load_rule("is_safe(X) :- has_flag(X, /reviewed).")
            .unwrap()
            .is_accepted());
        assert!(!k.hot_load_rule("is_safe(X) :- ").unwrap().is_accepted());
        assert!(k
            .hot_load_rule("needs_review(X) :- has_flag(X, /dirty).")
            .unwrap()
            .is_accepted());
    }

    let learned = std::fs::read_to_string(&paths.learned).unwrap();
    assert_eq!(learned.lines().count(), 2);

    let k = Kernel::open(paths, &KernelConfig::default()).unwrap();
    assert_eq!(k.stats().learned_rule_count, 2);
    assert!(k.program().decl("needs_review").is_some());
}

#[test]
fn session_facts_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());

    {
        let k = Kernel::open(paths.clone(), &KernelConfig::default()).unwrap();
        k.load_facts(vec![flag("a", "reviewed"), flag("b", "dirty")])
            .unwrap();
        assert_eq!(k.retract_predicate("nothing").unwrap(), 0);
    }

    let k = Kernel::open(paths.clone(), &KernelConfig::default()).unwrap();
    assert_eq!(k.stats().fact_count, 2);
    k.retract_predicate("has_flag").unwrap();
    drop(k);

    let k = Kernel::open(paths, &KernelConfig::default()).unwrap();
    assert_eq!(k.stats().fact_count, 0);
}

#[test]
fn session_is_not_mirrored_when_disabled() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());
    let config = KernelConfig {
        persist_session: false,
        ..KernelConfig::default()
    };

    {
        let k = Kernel::open(paths.clone(), &config).unwrap();
        k.load_facts(vec![flag("a", "reviewed")]).unwrap();
    }
    assert!(!paths.session_db.exists());

    let k = Kernel::open(paths, &config).unwrap();
    assert_eq!(k.stats().fact_count, 0);
}

#[test]
fn reset_clears_the_mirror() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());

    {
        let k = Kernel::open(paths.clone(), &KernelConfig::default()).unwrap();
        k.load_facts(vec![flag("a", "reviewed")]).unwrap();
        k.reset_session().unwrap();
    }

    let k = Kernel::open(paths, &KernelConfig::default()).unwrap();
    assert_eq!(k.stats().fact_count, 0);
}

#[test]
fn fact_file_loads_through_parser() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());
    let profile = dir.path().join("profile.mg");
    std::fs::write(
        &profile,
        "# session profile\nhas_flag(/main_rs, /reviewed).\nhas_flag(/lib_rs, /dirty).\n",
    )
    .unwrap();

    let k = Kernel::open(paths, &KernelConfig::default()).unwrap();
    let facts = k.load_facts_from_file(&profile).unwrap();
    assert_eq!(facts.len(), 2);
    assert_eq!(k.facts_for("has_flag").len(), 2);

    let broken = dir.path().join("broken.mg");
    std::fs::write(&broken, "has_flag(/a, /b)\n").unwrap();
    assert!(matches!(
        k.load_facts_from_file(&broken),
        Err(KernelError::Compile(_))
    ));

    assert!(matches!(
        k.load_facts_from_file(&dir.path().join("missing.mg")),
        Err(KernelError::Store(_))
    ));
}

#[test]
fn bad_layer_edit_keeps_last_good_program() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());
    std::fs::write(
        &paths.policy,
        "Decl ok(X).\nok(X) :- has_flag(X, /reviewed).\n",
    )
    .unwrap();

    let k = Kernel::open(paths.clone(), &KernelConfig::default()).unwrap();
    k.load_facts(vec![flag("a", "reviewed")]).unwrap();
    assert_eq!(k.evaluate("ok", &EvalContext::new()).unwrap().facts.len(), 1);

    std::fs::write(&paths.policy, "Decl ok(X).\nok(X) :- missing(X).\n").unwrap();
    let RebuildReport::Failed(diagnostic) = k.rebuild().unwrap() else {
        panic!("expected a failed rebuild");
    };
    assert_eq!(diagnostic.line, 2);
    assert_eq!(k.evaluate("ok", &EvalContext::new()).unwrap().facts.len(), 1);
}

#[test]
fn broken_layer_refuses_to_open() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());
    std::fs::write(&paths.policy, "ok(X) :- ").unwrap();
    assert!(matches!(
        Kernel::open(paths, &KernelConfig::default()),
        Err(KernelError::Compile(_))
    ));
}

#[test]
fn config_file_is_read_from_root() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());
    std::fs::write(&paths.config_file, "[limits]\nmax_facts = 1\n").unwrap();

    let config = KernelConfig::load_or_default(&paths.config_file).unwrap();
    let k = Kernel::open(paths, &config).unwrap();
    k.load_facts(vec![flag("a", "reviewed")]).unwrap();
    assert!(matches!(
        k.load_facts(vec![flag("b", "reviewed")]),
        Err(KernelError::AdmissionDenied { .. })
    ));
}

#[test]
fn mirrored_facts_of_dropped_predicates_are_discarded() {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = root(dir.path());
    let with_tags = format!("{SCHEMA}Decl tag(S) bound [/name].\n");
    std::fs::write(&paths.schema, &with_tags).unwrap();

    {
        let k = Kernel::open(paths.clone(), &KernelConfig::default()).unwrap();
        k.load_facts(vec![
            flag("a", "reviewed"),
            Fact::new("tag", vec![Value::name("a")]),
        ])
        .unwrap();
    }

    // The schema no longer declares `tag`.
    std::fs::write(&paths.schema, SCHEMA).unwrap();
    {
        let k = Kernel::open(paths.clone(), &KernelConfig::default()).unwrap();
        assert_eq!(k.stats().fact_count, 1);
        assert!(k.facts_for("tag").is_empty());
    }

    // Restoring the declaration does not bring the dropped fact back.
    std::fs::write(&paths.schema, &with_tags).unwrap();
    let k = Kernel::open(paths, &KernelConfig::default()).unwrap();
    assert_eq!(k.stats().fact_count, 1);
}
