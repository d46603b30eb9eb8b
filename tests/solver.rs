// tests/solver.rs

//! Solver scenarios: install plans, unsat explanations, upgrades, ordering.

mod common;

use common::{pkg, sel};
use kiln::solver::{ResolverType, SolverType};
use kiln::{Error, MemoryDatabase, Package, Solver, SolverOptions};

fn fingerprints(packages: &[Package]) -> Vec<String> {
    packages.iter().map(|p| p.fingerprint()).collect()
}

fn position(order: &[String], fp: &str) -> usize {
    order.iter().position(|f| f == fp).unwrap()
}

#[test]
fn test_install_pulls_transitive_requirements_in_order() {
    let world = vec![
        pkg("x", "a", "1.0").with_requires(vec![sel("x", "b")]),
        pkg("x", "b", "1.0").with_requires(vec![sel("x", "d")]),
        pkg("x", "d", "1.0").with_requires(vec![sel("x", "h")]),
        pkg("x", "h", "1.0").with_requires(vec![sel("x", "g")]),
        pkg("x", "c", "1.0"),
        pkg("x", "e", "1.0"),
        pkg("x", "f", "1.0"),
        pkg("x", "g", "1.0"),
    ];
    let definitions = MemoryDatabase::from_packages(&world).unwrap();
    let installed = MemoryDatabase::from_packages(&[pkg("x", "c", "1.0")]).unwrap();
    let solver = Solver::new(&definitions, &installed, SolverOptions::default());

    let plan = solver.install(&[sel("x", "a")]).unwrap().order();
    let trues = fingerprints(&plan.trues());
    assert_eq!(trues.len(), 6);
    assert!(trues.contains(&"x/c-1.0".to_string()));
    assert!(!trues.contains(&"x/e-1.0".to_string()));
    assert!(!trues.contains(&"x/f-1.0".to_string()));

    let chain = ["x/g-1.0", "x/h-1.0", "x/d-1.0", "x/b-1.0", "x/a-1.0"];
    for pair in chain.windows(2) {
        assert!(position(&trues, pair[0]) < position(&trues, pair[1]));
    }
    plan.ensure_order().unwrap();
}

#[test]
fn test_unsatisfiable_request_is_explained() {
    let world = vec![
        pkg("x", "a", "1.0").with_requires(vec![sel("x", "b")]),
        pkg("x", "b", "1.0").with_conflicts(vec![sel("x", "c")]),
        pkg("x", "c", "1.0"),
    ];
    let definitions = MemoryDatabase::from_packages(&world).unwrap();
    let installed = MemoryDatabase::from_packages(&[pkg("x", "c", "1.0")]).unwrap();
    let solver = Solver::new(&definitions, &installed, SolverOptions::default());

    match solver.install(&[sel("x", "a")]) {
        Err(Error::Unsatisfiable { explanation }) => {
            for clause in [
                "(x/a-1.0)",
                "(x/c-1.0)",
                "(¬x/a-1.0 ∨ x/b-1.0)",
                "(¬x/b-1.0 ∨ ¬x/c-1.0)",
            ] {
                assert!(explanation.contains(clause), "missing {} in {}", clause, explanation);
            }
            assert_eq!(explanation.matches(" ∧ ").count(), 3);
        }
        other => panic!("expected an unsatisfiable error, got {:?}", other),
    }
}

#[test]
fn test_unrelated_request_keeps_conflicting_packages_out() {
    let world = vec![
        pkg("x", "a", "1.0").with_requires(vec![sel("x", "b")]),
        pkg("x", "b", "1.0").with_conflicts(vec![sel("x", "c")]),
        pkg("x", "c", "1.0"),
        pkg("x", "d", "1.0"),
        pkg("x", "f", "1.0"),
    ];
    let definitions = MemoryDatabase::from_packages(&world).unwrap();
    let installed = MemoryDatabase::from_packages(&[pkg("x", "c", "1.0")]).unwrap();
    let solver = Solver::new(&definitions, &installed, SolverOptions::default());

    let result = solver.install(&[sel("x", "d"), sel("x", "f")]).unwrap();
    for (fp, value) in [
        ("x/d-1.0", true),
        ("x/f-1.0", true),
        ("x/c-1.0", true),
        ("x/a-1.0", false),
        ("x/b-1.0", false),
    ] {
        assert_eq!(result.search(fp).unwrap().value, value, "{}", fp);
    }
}

#[test]
fn test_upgrade_replaces_older_version() {
    let definitions = MemoryDatabase::from_packages(&[
        pkg("x", "a", "1.1").with_requires(vec![pkg("x", "b", "1.0")]),
        pkg("x", "b", "1.0"),
    ])
    .unwrap();
    let installed = MemoryDatabase::from_packages(&[
        pkg("x", "a", "1.0").with_requires(vec![pkg("x", "b", "1.0")]),
        pkg("x", "b", "1.0"),
    ])
    .unwrap();
    let solver = Solver::new(&definitions, &installed, SolverOptions::default());

    let plan = solver.upgrade(true, false).unwrap();
    assert_eq!(fingerprints(&plan.uninstall), vec!["x/a-1.0"]);

    let install = fingerprints(&plan.install.trues());
    assert!(install.contains(&"x/a-1.1".to_string()));
    assert!(install.contains(&"x/b-1.0".to_string()));
    assert!(!install.contains(&"x/a-1.0".to_string()));
}

#[test]
fn test_best_matching_version_is_selected() {
    let definitions = MemoryDatabase::from_packages(&[
        pkg("x", "a", "1.0").with_requires(vec![pkg("x", "b", ">=1.0")]),
        pkg("x", "b", "0.9"),
        pkg("x", "b", "1.0"),
        pkg("x", "b", "1.2"),
    ])
    .unwrap();
    let installed = MemoryDatabase::new();
    let solver = Solver::new(&definitions, &installed, SolverOptions::default());

    let result = solver.install(&[sel("x", "a")]).unwrap();
    let trues = fingerprints(&result.trues());
    assert!(trues.contains(&"x/b-1.2".to_string()));
    assert!(!trues.contains(&"x/b-1.0".to_string()));
    assert!(!trues.contains(&"x/b-0.9".to_string()));
}

#[test]
fn test_requirement_satisfied_by_provider() {
    let definitions = MemoryDatabase::from_packages(&[
        pkg("app", "mailer", "1.0").with_requires(vec![sel("virtual", "mta")]),
        pkg("net", "postfix", "3.8").with_provides(vec![sel("virtual", "mta")]),
    ])
    .unwrap();
    let installed = MemoryDatabase::new();
    let solver = Solver::new(&definitions, &installed, SolverOptions::default());

    let plan = solver.install(&[sel("app", "mailer")]).unwrap().order();
    let trues = fingerprints(&plan.trues());
    assert_eq!(trues, vec!["net/postfix-3.8", "app/mailer-1.0"]);
}

#[test]
fn test_plan_is_deterministic() {
    let mut world = vec![
        pkg("x", "top", "1.0").with_requires(vec![sel("x", "left"), sel("x", "right")]),
        pkg("x", "left", "1.0").with_requires(vec![sel("x", "base")]),
        pkg("x", "right", "1.0").with_requires(vec![sel("x", "base")]),
        pkg("x", "base", "1.0"),
        pkg("x", "other", "1.0"),
    ];
    let installed = MemoryDatabase::new();

    let first = {
        let definitions = MemoryDatabase::from_packages(&world).unwrap();
        let solver = Solver::new(&definitions, &installed, SolverOptions::default());
        solver.install(&[sel("x", "top")]).unwrap().order()
    };

    world.reverse();
    let definitions = MemoryDatabase::from_packages(&world).unwrap();
    let parallel = Solver::new(
        &definitions,
        &installed,
        SolverOptions {
            solver_type: SolverType::ParallelSimple,
            concurrency: 3,
            ..Default::default()
        },
    );
    for _ in 0..3 {
        assert_eq!(parallel.install(&[sel("x", "top")]).unwrap().order(), first);
    }

    let trues = fingerprints(&first.trues());
    assert_eq!(trues.first().map(String::as_str), Some("x/base-1.0"));
    assert_eq!(trues.last().map(String::as_str), Some("x/top-1.0"));
}

#[test]
fn test_qlearning_recovers_partial_install() {
    let definitions = MemoryDatabase::from_packages(&[
        pkg("x", "a", "1.0").with_requires(vec![sel("x", "b")]),
        pkg("x", "b", "1.0").with_conflicts(vec![sel("x", "c")]),
        pkg("x", "c", "1.0"),
        pkg("x", "d", "1.0"),
    ])
    .unwrap();
    let installed = MemoryDatabase::from_packages(&[pkg("x", "c", "1.0")]).unwrap();
    let solver = Solver::new(
        &definitions,
        &installed,
        SolverOptions {
            resolver: ResolverType::QLearning,
            ..Default::default()
        },
    );

    let result = solver.install(&[sel("x", "a"), sel("x", "d")]).unwrap();
    let trues = fingerprints(&result.trues());
    assert!(trues.contains(&"x/d-1.0".to_string()));
    assert!(trues.contains(&"x/c-1.0".to_string()));
    assert!(!trues.contains(&"x/a-1.0".to_string()));
}

#[test]
fn test_uninstall_reports_requiring_package() {
    let installed = MemoryDatabase::from_packages(&[
        pkg("x", "a", "1.0").with_requires(vec![sel("x", "b")]),
        pkg("x", "b", "1.0"),
    ])
    .unwrap();
    let definitions = MemoryDatabase::new();
    let solver = Solver::new(&definitions, &installed, SolverOptions::default());

    let err = solver.uninstall(true, false, &[sel("x", "b")]).unwrap_err();
    assert_eq!(err.kind(), kiln::ErrorKind::DependencyCycleInDeletion);
}
