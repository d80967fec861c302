mod pkg_box;
mod properties;

use std::io::{Write, stderr};

use insta::assert_snapshot;
use modsolve::{
    Budget, BudgetLimit, GoalOrder, InstalledPreference, LogMode, PackagePath, PackagePreference,
    PlanError, PlanId, QualifiedName, Qualifier, RootFailure, SolveError, Solver, SolverConfig,
    Stanza, UserConstraint, Variable, Version, VersionRange,
    conflict::{NodeFailure, Outcome},
    utils::Universe,
};
use pkg_box::PkgBox;
use tracing_test::traced_test;

/// Solves the request and formats the resulting plan, or panics with a
/// description of the failure.
fn solve_snapshot(solver: &Solver<Universe>, goals: &[&str], config: &SolverConfig) -> String {
    let request = request(solver, goals);
    match solver.solve(&request, config) {
        Ok(plan) => plan.display(solver.provider()).to_string(),
        Err(SolveError::Unsolvable(conflict)) => {
            let graph = conflict.graph();
            let mut output = stderr();
            writeln!(output, "UNSOLVABLE:").unwrap();
            graph.graphviz(&mut output, solver.provider()).unwrap();
            writeln!(output, "\n").unwrap();
            panic!(
                "expected a plan, but the request is unsolvable\n{}",
                conflict.display_user_friendly(solver.provider())
            )
        }
        Err(error) => panic!("expected a plan, got: {error}"),
    }
}

/// Solves the request and expects it to be unsolvable.
fn solve_unsat(solver: &Solver<Universe>, goals: &[&str], config: &SolverConfig) -> SolveError {
    let request = request(solver, goals);
    match solver.solve(&request, config) {
        Ok(plan) => panic!(
            "expected unsat, but a plan was found:\n{}",
            plan.display(solver.provider())
        ),
        Err(error) => error,
    }
}

fn request(solver: &Solver<Universe>, goals: &[&str]) -> modsolve::Request {
    let names = goals.iter().map(|goal| {
        solver
            .provider()
            .lookup_name(goal)
            .unwrap_or_else(|| panic!("unknown package {goal}"))
    });
    modsolve::Request::new().goals(names.collect::<Vec<_>>())
}

/// The search in this universe picks `a 2` first and only finds out that `b`
/// needs `a 1` after every version of the unrelated `x` was tried.
fn backjump_universe() -> Solver<Universe> {
    PkgBox::from_packages(&[
        ("a", 2, vec![]),
        ("a", 1, vec![]),
        ("x", 3, vec![]),
        ("x", 2, vec![]),
        ("x", 1, vec![]),
        ("b", 1, vec!["a 1"]),
    ])
    .solver()
}

fn in_order() -> SolverConfig {
    SolverConfig::default()
        .with_goal_order(GoalOrder::InOrder)
        .with_count_conflicts(false)
}

#[test]
fn test_resolve_dependency() {
    let solver = PkgBox::from_packages(&[
        ("a", 1, vec!["b >=2"]),
        ("b", 1, vec![]),
        ("b", 2, vec![]),
    ])
    .solver();
    assert_snapshot!(solve_snapshot(&solver, &["a"], &SolverConfig::default()), @r###"
    b 2
    a 1 -> b
    "###);
}

#[test]
fn test_prefer_oldest() {
    let solver = PkgBox::from_packages(&[("a", 1, vec![]), ("a", 2, vec![]), ("a", 3, vec![])])
        .solver();
    let config = SolverConfig::default()
        .with_version_preference(modsolve::VersionPreference::Oldest);
    assert_snapshot!(solve_snapshot(&solver, &["a"], &config), @"a 1");
}

#[test]
fn test_version_preference_of_a_package() {
    let mut pkgs = PkgBox::from_packages(&[("a", 1, vec![]), ("a", 2, vec![]), ("a", 3, vec![])]);
    let a = pkgs.name("a");
    let solver = pkgs.solver();
    let request = request(&solver, &["a"]).preferences([PackagePreference::Version(
        a,
        VersionRange::between(1u32, 3u32),
    )]);
    let plan = solver.solve(&request, &SolverConfig::default()).unwrap();
    assert_snapshot!(plan.display(solver.provider()), @"a 2");
}

#[test]
fn test_conflicting_dependencies() {
    let solver = PkgBox::from_packages(&[
        ("p", 1, vec!["r 1"]),
        ("q", 1, vec!["r 2"]),
        ("r", 1, vec![]),
        ("r", 2, vec![]),
    ])
    .solver();
    let error = solve_unsat(&solver, &["p", "q"], &SolverConfig::default());
    let SolveError::Unsolvable(conflict) = error else {
        panic!("expected a conflict, got: {error}");
    };

    let provider = solver.provider();
    let root = conflict.root().variable;
    assert!(matches!(root, Variable::Package(_)));
    assert!(conflict.conflict_set().contains(&root));
    for name in ["p", "q", "r"] {
        let name = provider.lookup_name(name).unwrap();
        let variable = Variable::Package(QualifiedName::top_level(name));
        assert!(
            conflict.conflict_set().contains(&variable),
            "{} is missing from {:?}",
            variable.display(provider),
            conflict.conflict_set()
        );
    }
    assert!(conflict.chain().last().is_some_and(|step| step.resumed_at.is_none()));
    assert!(
        conflict
            .explanation()
            .iter()
            .all(|(variable, _)| matches!(variable, Variable::Package(_)))
    );
    assert!(
        conflict
            .display_user_friendly(provider)
            .to_string()
            .starts_with("The following packages are incompatible")
    );
}

#[test]
fn test_backjumping_skips_unrelated_decisions() {
    let solver = backjump_universe();
    let request = request(&solver, &["a", "x", "b"]);

    let naive = solver
        .solve(&request, &in_order().with_backjumping(false))
        .unwrap();
    let backjumped = solver.solve(&request, &in_order()).unwrap();

    assert_eq!(
        naive.display(solver.provider()).to_string(),
        backjumped.display(solver.provider()).to_string()
    );
    assert!(backjumped.stats().steps < naive.stats().steps);
    assert!(backjumped.stats().backjumps >= 1);
    assert_eq!(naive.stats().backjumps, 0);

    assert_snapshot!(backjumped.display(solver.provider()), @r###"
    a 1
    x 3
    b 1 -> a
    "###);
}

#[test]
fn test_build_tools_are_linked() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1).deps(&["b"]).tools(&["t"]).add();
    pkgs.package("b", 1).tools(&["t"]).add();
    pkgs.package("t", 1).add();
    pkgs.package("t", 2).add();
    let (a, b, t) = (pkgs.name("a"), pkgs.name("b"), pkgs.name("t"));
    let solver = pkgs.solver();

    let plan = solver
        .solve(&request(&solver, &["a"]), &SolverConfig::default())
        .unwrap();
    let exe = |owner| {
        QualifiedName::new(
            PackagePath::top_level().with_qualifier(Qualifier::Exe(owner, t)),
            t,
        )
    };
    let a_tool = plan.lookup(exe(a)).unwrap();
    let b_tool = plan.lookup(exe(b)).unwrap();
    assert_eq!(a_tool.id, b_tool.id);
    assert_eq!(a_tool.version, Version::from(2));
    assert_eq!(plan.len(), 3);
    assert_eq!(plan.aliases().count(), 1);

    let graph = plan.to_graph();
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 3);
}

#[test]
fn test_build_tools_are_resolved_independently() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1).deps(&["t 1"]).tools(&["t 2"]).add();
    pkgs.package("t", 1).add();
    pkgs.package("t", 2).add();
    let solver = pkgs.solver();

    let plan = solve_snapshot(&solver, &["a"], &SolverConfig::default());
    assert!(plan.contains("a:t:exe.t 2"), "{plan}");
    assert!(plan.contains("\nt 1\n") || plan.starts_with("t 1\n"), "{plan}");
}

#[test]
fn test_single_instance_forces_linking() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1).deps(&["b"]).tools(&["t"]).add();
    pkgs.package("b", 1).tools(&["t"]).add();
    pkgs.package("t", 1).add();
    pkgs.package("t", 2).add();
    pkgs.single_instance("t");
    let solver = pkgs.solver();

    let config = SolverConfig::default().with_prefer_linked(false);
    let plan = solver.solve(&request(&solver, &["a"]), &config).unwrap();
    let built_tools = plan
        .iter()
        .filter(|package| package.name == solver.provider().lookup_name("t").unwrap())
        .count();
    assert_eq!(built_tools, 1);
}

#[test]
fn test_flag_defaults() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1)
        .flag("debug", false)
        .when("debug", &["d"], &[])
        .add();
    let solver = pkgs.solver();
    assert_snapshot!(solve_snapshot(&solver, &["a"], &SolverConfig::default()), @"a 1 -debug");
}

#[test]
fn test_flag_constraint() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1)
        .flag("debug", false)
        .when("debug", &["d"], &[])
        .add();
    let scope = pkgs.any("a");
    let debug = pkgs.flag("debug");
    let solver = pkgs.solver();

    let request = request(&solver, &["a"]).constraints([UserConstraint::Flag(scope, debug, true)]);
    let result = solver.solve(&request, &SolverConfig::default());
    assert!(matches!(result, Err(SolveError::Unsolvable(_))));
}

#[test]
fn test_flag_is_flipped_when_the_default_fails() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1)
        .flag("new", true)
        .when("new", &["b 2"], &["b 1"])
        .add();
    pkgs.package("b", 1).add();
    let solver = pkgs.solver();
    assert_snapshot!(solve_snapshot(&solver, &["a"], &SolverConfig::default()), @r###"
    b 1
    a 1 -new -> b
    "###);
}

#[test]
fn test_manual_flag_keeps_default_first() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1).manual_flag("static", false).add();
    let name = pkgs.name("a");
    let flag = pkgs.flag("static");
    let solver = pkgs.solver();

    let request =
        request(&solver, &["a"]).preferences([PackagePreference::Flag(name, flag, true)]);
    let plan = solver.solve(&request, &SolverConfig::default()).unwrap();
    assert_snapshot!(plan.display(solver.provider()), @"a 1 -static");
}

#[test]
fn test_stanzas_are_disabled_by_default() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1).stanza(Stanza::Tests, &["t"]).add();
    pkgs.package("t", 1).add();
    let name = pkgs.name("a");
    let solver = pkgs.solver();

    assert_snapshot!(solve_snapshot(&solver, &["a"], &SolverConfig::default()), @"a 1");

    let request = request(&solver, &["a"])
        .preferences([PackagePreference::Stanzas(name, vec![Stanza::Tests])]);
    let plan = solver.solve(&request, &SolverConfig::default()).unwrap();
    assert_snapshot!(plan.display(solver.provider()), @r###"
    t 1
    a 1 *test -> t
    "###);
}

#[test]
fn test_stanza_requires_flag() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1)
        .flag("testing", false)
        .stanza(Stanza::Tests, &[])
        .stanza_requires(Stanza::Tests, "testing", true)
        .add();
    let scope = pkgs.any("a");
    let solver = pkgs.solver();

    let request =
        request(&solver, &["a"]).constraints([UserConstraint::Stanza(scope, Stanza::Tests, true)]);
    let plan = solver.solve(&request, &SolverConfig::default()).unwrap();
    assert_snapshot!(plan.display(solver.provider()), @"a 1 +testing *test");
}

#[test]
fn test_exclusive_flags() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1)
        .flag("fast", true)
        .flag("safe", true)
        .exclusive("fast", "safe")
        .add();
    let (fast, safe) = (pkgs.flag("fast"), pkgs.flag("safe"));
    let solver = pkgs.solver();

    let plan = solver
        .solve(&request(&solver, &["a"]), &SolverConfig::default())
        .unwrap();
    let package = plan.iter().next().unwrap();
    assert_ne!(package.flag(fast), package.flag(safe));
}

#[test]
fn test_budget_is_enforced() {
    let solver = backjump_universe();
    let config = in_order().with_budget(Budget {
        max_steps: Some(2),
        ..Budget::unlimited()
    });
    let error = solve_unsat(&solver, &["a", "x", "b"], &config);
    let SolveError::BudgetExceeded(exhausted) = error else {
        panic!("expected the budget to run out, got: {error}");
    };
    assert_eq!(exhausted.limit, BudgetLimit::Steps);
    assert!(exhausted.steps >= 2);
}

#[test]
fn test_independent_goals() {
    let solver = PkgBox::from_packages(&[
        ("a", 1, vec!["c 1"]),
        ("b", 1, vec!["c 2"]),
        ("c", 1, vec![]),
        ("c", 2, vec![]),
    ])
    .solver();

    let error = solve_unsat(&solver, &["a", "b"], &SolverConfig::default());
    assert!(matches!(error, SolveError::Unsolvable(_)));

    let config = SolverConfig::default().with_independent_goals(true);
    let plan = solve_snapshot(&solver, &["a", "b"], &config);
    assert_snapshot!(plan, @r###"
    0:c 1
    0:a 1 -> 0:c
    1:c 2
    1:b 1 -> 1:c
    "###);

    let parallel = solver
        .solve_parallel(&request(&solver, &["a", "b"]), &config)
        .unwrap();
    assert_eq!(parallel.display(solver.provider()).to_string(), plan);
}

#[test]
fn test_root_failures() {
    let mut pkgs = PkgBox::from_packages(&[("a", 1, vec![])]);
    let missing = pkgs.name("missing");
    let scope = pkgs.any("a");
    let solver = pkgs.solver();

    let error = solve_unsat(&solver, &["a", "missing"], &SolverConfig::default());
    assert!(matches!(
        error,
        SolveError::UnsatisfiableRoot(RootFailure::UnknownPackage(name)) if name == missing
    ));

    let request = request(&solver, &["a"]).constraints([UserConstraint::Version(
        scope,
        VersionRange::higher_than(5u32),
    )]);
    let error = solver.solve(&request, &SolverConfig::default()).unwrap_err();
    assert!(matches!(
        error,
        SolveError::UnsatisfiableRoot(RootFailure::NoAdmissibleInstance(_))
    ));
}

#[test]
fn test_installed_preference() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1).installed().add();
    pkgs.package("a", 2).add();
    let solver = pkgs.solver();

    assert_snapshot!(solve_snapshot(&solver, &["a"], &SolverConfig::default()), @"a 1 (installed)");

    let config =
        SolverConfig::default().with_installed_preference(InstalledPreference::PreferLatest);
    assert_snapshot!(solve_snapshot(&solver, &["a"], &config), @"a 2");

    let config = SolverConfig::default()
        .with_installed_preference(InstalledPreference::PreferLatest)
        .with_new_installs(false);
    assert_snapshot!(solve_snapshot(&solver, &["a"], &config), @"a 1 (installed)");
}

#[test]
fn test_setup_cycle_uses_installed_instance() {
    let mut pkgs = PkgBox::new();
    pkgs.package("u", 2).setup(&["v"]).add();
    pkgs.package("u", 1).installed().add();
    pkgs.package("v", 1).deps(&["u"]).add();
    let u = pkgs.top_level("u");
    let solver = pkgs.solver();

    let request = request(&solver, &["u"])
        .constraints([UserConstraint::Source(modsolve::ConstraintScope::Qualified(u))]);
    let config =
        SolverConfig::default().with_installed_preference(InstalledPreference::PreferLatest);
    let plan = solver.solve(&request, &config).unwrap();
    assert_snapshot!(plan.display(solver.provider()), @r###"
    u@installed 1 (installed)
    u:setup.v 1 -> u@installed
    u 2 -> u:setup.v
    "###);
    assert!(
        plan.topological_order()
            .any(|id| matches!(id, PlanId::Preinstalled(_)))
    );
}

#[test]
fn test_setup_cycle_without_installed_instance() {
    let mut pkgs = PkgBox::new();
    pkgs.package("u", 2).setup(&["v"]).add();
    pkgs.package("v", 1).deps(&["u"]).add();
    let solver = pkgs.solver();

    let error = solve_unsat(&solver, &["u"], &SolverConfig::default());
    assert!(
        matches!(
            error,
            SolveError::Plan(PlanError::SetupCycleWithoutInstalled { .. })
        ),
        "{error}"
    );
}

#[test]
fn test_library_cycles_are_rejected() {
    let solver = PkgBox::from_packages(&[("a", 1, vec!["b"]), ("b", 1, vec!["a"])]).solver();
    let error = solve_unsat(&solver, &["a"], &SolverConfig::default());
    assert!(matches!(error, SolveError::Unsolvable(_)));
}

#[test]
fn test_solving_is_deterministic() {
    let solver = PkgBox::from_packages(&[
        ("a", 1, vec!["b", "c"]),
        ("a", 2, vec!["b 1", "c 2"]),
        ("b", 1, vec!["d"]),
        ("b", 2, vec!["d 2"]),
        ("c", 1, vec![]),
        ("c", 2, vec!["d 1"]),
        ("d", 1, vec![]),
        ("d", 2, vec![]),
    ])
    .solver();
    let first = solve_snapshot(&solver, &["a"], &SolverConfig::default());
    let second = solve_snapshot(&solver, &["a"], &SolverConfig::default());
    assert_eq!(first, second);
}

#[test]
#[traced_test]
fn test_failed_search_is_logged() {
    let solver = PkgBox::from_packages(&[
        ("p", 1, vec!["r 1"]),
        ("q", 1, vec!["r 2"]),
        ("r", 1, vec![]),
        ("r", 2, vec![]),
    ])
    .solver();
    let config = SolverConfig::default().with_log_mode(LogMode::Full);
    let error = solve_unsat(&solver, &["p", "q"], &config);
    let SolveError::Unsolvable(conflict) = error else {
        panic!("expected a conflict, got: {error}");
    };

    assert!(!conflict.log().entries().is_empty());
    assert!(!conflict.log().display(solver.provider()).to_string().is_empty());
    assert!(conflict.stats().steps > 0);
    assert!(logs_contain("Searching for a solution"));
    assert!(logs_contain("UNSOLVABLE"));
}

fn count_attempts(node: &NodeFailure) -> usize {
    node.attempts
        .iter()
        .map(|attempt| match &attempt.outcome {
            Outcome::Rejected(_) => 1,
            Outcome::Failed(child) => 1 + count_attempts(child),
        })
        .sum()
}

#[test]
fn test_failure_tree_is_pruned_without_full_log() {
    let mut packages = Vec::new();
    for name in ["x1", "x2", "x3"] {
        for version in 1..=3 {
            packages.push((name, version, vec![]));
        }
    }
    packages.push(("y", 1, vec!["w 2"]));
    packages.push(("w", 1, vec![]));
    let solver = PkgBox::from_packages(&packages).solver();
    let goals = ["x1", "x2", "x3", "y"];
    let config = in_order().with_backjumping(false);

    let error = solve_unsat(&solver, &goals, &config.clone().with_log_mode(LogMode::Off));
    let SolveError::Unsolvable(pruned) = error else {
        panic!("expected a conflict, got: {error}");
    };
    assert_eq!(pruned.stats().steps, 66);
    assert_eq!(count_attempts(pruned.root()), 4);

    let error = solve_unsat(&solver, &goals, &config.with_log_mode(LogMode::Full));
    let SolveError::Unsolvable(full) = error else {
        panic!("expected a conflict, got: {error}");
    };
    assert_eq!(full.stats().steps, 66);
    assert_eq!(count_attempts(full.root()), 66);
    assert_eq!(full.explanation(), pruned.explanation());
}

#[test]
fn test_single_instance_conflict() {
    let mut pkgs = PkgBox::new();
    pkgs.package("a", 1).deps(&["b"]).tools(&["t 1"]).add();
    pkgs.package("b", 1).tools(&["t 2"]).add();
    pkgs.package("t", 1).add();
    pkgs.package("t", 2).add();
    pkgs.single_instance("t");
    let (a, b, t) = (pkgs.name("a"), pkgs.name("b"), pkgs.name("t"));
    let solver = pkgs.solver();

    let error = solve_unsat(&solver, &["a"], &SolverConfig::default());
    let SolveError::Unsolvable(conflict) = error else {
        panic!("expected a conflict, got: {error}");
    };
    let exe = |owner| {
        Variable::Package(QualifiedName::new(
            PackagePath::top_level().with_qualifier(Qualifier::Exe(owner, t)),
            t,
        ))
    };
    assert!(conflict.conflict_set().contains(&exe(a)));
    assert!(conflict.conflict_set().contains(&exe(b)));
}

#[test]
fn test_out_of_range_versions_are_not_tried() {
    let solver = PkgBox::from_packages(&[
        ("a", 1, vec!["b 1"]),
        ("b", 3, vec![]),
        ("b", 2, vec![]),
        ("b", 1, vec![]),
    ])
    .solver();
    let plan = solver
        .solve(&request(&solver, &["a"]), &SolverConfig::default())
        .unwrap();
    assert_eq!(plan.stats().steps, 2);
    assert_snapshot!(plan.display(solver.provider()), @r###"
    b 1
    a 1 -> b
    "###);
}
