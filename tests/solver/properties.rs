//! Compares the solver against a brute force search on small random
//! universes, and the search with backjumping against the search without on
//! universes that use every kind of choice.

use modsolve::{
    Budget, GoalOrder, PackagePreference, SolveError, Solver, SolverConfig, Stanza,
    utils::Universe,
};
use proptest::prelude::*;

use crate::pkg_box::PkgBox;

/// A dependency of a package on versions `lo..=hi` of another package.
#[derive(Clone, Debug)]
struct Dep {
    target: usize,
    lo: u32,
    hi: u32,
}

/// A package version and its dependencies.
#[derive(Clone, Debug)]
struct Release {
    version: u32,
    deps: Vec<Dep>,
}

#[derive(Clone, Debug)]
struct Problem {
    packages: Vec<Vec<Release>>,
    goals: Vec<usize>,
}

fn name(index: usize) -> String {
    format!("p{index}")
}

fn dep(packages: usize, max_version: u32) -> impl Strategy<Value = Dep> {
    (0..packages, 1..=max_version, 0..max_version).prop_map(move |(target, lo, span)| Dep {
        target,
        lo,
        hi: (lo + span).min(max_version),
    })
}

fn problem() -> impl Strategy<Value = Problem> {
    (1..=4usize, 1..=3u32).prop_flat_map(|(packages, max_version)| {
        let package = proptest::collection::vec(
            proptest::collection::vec(dep(packages, max_version), 0..=2),
            1..=max_version as usize,
        );
        (
            proptest::collection::vec(package, packages),
            proptest::collection::vec(0..packages, 1..=2),
        )
            .prop_map(|(packages, goals)| Problem {
                packages: packages
                    .into_iter()
                    .enumerate()
                    .map(|(index, versions)| {
                        versions
                            .into_iter()
                            .enumerate()
                            .map(|(version, deps)| Release {
                                version: version as u32 + 1,
                                deps: deps.into_iter().filter(|d| d.target != index).collect(),
                            })
                            .collect()
                    })
                    .collect(),
                goals,
            })
    })
}

impl Problem {
    fn solver(&self) -> Solver<Universe> {
        let mut pkgs = PkgBox::new();
        for (index, versions) in self.packages.iter().enumerate() {
            for version in versions {
                let deps: Vec<String> = version
                    .deps
                    .iter()
                    .map(|d| format!("{} {}..{}", name(d.target), d.lo, d.hi + 1))
                    .collect();
                let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                pkgs.package(&name(index), version.version).deps(&deps).add();
            }
        }
        pkgs.solver()
    }

    fn request(&self, solver: &Solver<Universe>) -> modsolve::Request {
        let goals = self
            .goals
            .iter()
            .filter_map(|&goal| solver.provider().lookup_name(&name(goal)));
        modsolve::Request::new().goals(goals.collect::<Vec<_>>())
    }

    /// Tries every combination of versions (or absence) of all packages.
    fn has_solution(&self) -> bool {
        let count = self.packages.len();
        let mut selection = vec![None; count];
        self.search(0, &mut selection)
    }

    fn search(&self, index: usize, selection: &mut Vec<Option<u32>>) -> bool {
        if index == selection.len() {
            return self.is_valid(selection);
        }
        let options = std::iter::once(None).chain(
            self.packages[index]
                .iter()
                .map(|version| Some(version.version)),
        );
        for option in options {
            selection[index] = option;
            if self.search(index + 1, selection) {
                return true;
            }
        }
        selection[index] = None;
        false
    }

    fn deps_of(&self, package: usize, version: u32) -> &[Dep] {
        self.packages[package]
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.deps.as_slice())
            .unwrap_or_default()
    }

    fn is_valid(&self, selection: &[Option<u32>]) -> bool {
        if self.goals.iter().any(|&goal| selection[goal].is_none()) {
            return false;
        }
        for (package, version) in selection.iter().enumerate() {
            let Some(version) = *version else { continue };
            for dep in self.deps_of(package, version) {
                match selection[dep.target] {
                    Some(selected) if (dep.lo..=dep.hi).contains(&selected) => {}
                    _ => return false,
                }
            }
        }
        !self.has_cycle(selection)
    }

    fn has_cycle(&self, selection: &[Option<u32>]) -> bool {
        // 0 = unvisited, 1 = on the stack, 2 = done
        fn visit(
            problem: &Problem,
            selection: &[Option<u32>],
            node: usize,
            marks: &mut [u8],
        ) -> bool {
            match marks[node] {
                1 => return true,
                2 => return false,
                _ => {}
            }
            marks[node] = 1;
            if let Some(version) = selection[node] {
                for dep in problem.deps_of(node, version) {
                    if visit(problem, selection, dep.target, marks) {
                        return true;
                    }
                }
            }
            marks[node] = 2;
            false
        }

        let mut marks = vec![0u8; selection.len()];
        (0..selection.len()).any(|node| visit(self, selection, node, &mut marks))
    }
}

/// A flag `f` of a release that selects between two sets of dependencies.
#[derive(Clone, Debug)]
struct FlagSpec {
    default: bool,
    manual: bool,
    then: Vec<Dep>,
    otherwise: Vec<Dep>,
    /// Declares a second flag `g` that may not be enabled together with `f`
    exclusive: bool,
}

/// The test suite of a release.
#[derive(Clone, Debug)]
struct StanzaSpec {
    deps: Vec<Dep>,
    /// Enabling the tests requires `f` to have this value
    requires_flag: Option<bool>,
}

#[derive(Clone, Debug)]
struct RichRelease {
    version: u32,
    installed: bool,
    deps: Vec<Dep>,
    tool: Option<Dep>,
    setup: Option<Dep>,
    flag: Option<FlagSpec>,
    tests: Option<StanzaSpec>,
}

#[derive(Clone, Debug)]
struct RichPackage {
    single_instance: bool,
    releases: Vec<RichRelease>,
}

#[derive(Clone, Debug)]
struct RichProblem {
    packages: Vec<RichPackage>,
    goals: Vec<usize>,
    /// Goals whose tests are preferably enabled
    with_tests: Vec<usize>,
}

fn flag_spec(packages: usize, max_version: u32) -> impl Strategy<Value = FlagSpec> {
    (
        any::<bool>(),
        any::<bool>(),
        proptest::collection::vec(dep(packages, max_version), 0..=1),
        proptest::collection::vec(dep(packages, max_version), 0..=1),
        any::<bool>(),
    )
        .prop_map(|(default, manual, then, otherwise, exclusive)| FlagSpec {
            default,
            manual,
            then,
            otherwise,
            exclusive,
        })
}

fn stanza_spec(packages: usize, max_version: u32) -> impl Strategy<Value = StanzaSpec> {
    (
        proptest::collection::vec(dep(packages, max_version), 0..=1),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(deps, requires_flag)| StanzaSpec {
            deps,
            requires_flag,
        })
}

fn rich_release(packages: usize, max_version: u32) -> impl Strategy<Value = RichRelease> {
    (
        proptest::bool::weighted(0.2),
        proptest::collection::vec(dep(packages, max_version), 0..=2),
        proptest::option::weighted(0.2, dep(packages, max_version)),
        proptest::option::weighted(0.2, dep(packages, max_version)),
        proptest::option::weighted(0.4, flag_spec(packages, max_version)),
        proptest::option::weighted(0.3, stanza_spec(packages, max_version)),
    )
        .prop_map(|(installed, deps, tool, setup, flag, tests)| RichRelease {
            version: 0,
            installed,
            deps,
            tool,
            setup,
            flag,
            tests,
        })
}

fn rich_problem() -> impl Strategy<Value = RichProblem> {
    (1..=4usize, 1..=3u32).prop_flat_map(|(packages, max_version)| {
        let package = (
            proptest::bool::weighted(0.3),
            proptest::collection::vec(rich_release(packages, max_version), 1..=max_version as usize),
        );
        (
            proptest::collection::vec(package, packages),
            proptest::collection::vec(0..packages, 1..=2),
            proptest::collection::vec(0..packages, 0..=1),
        )
            .prop_map(|(packages, goals, with_tests)| RichProblem {
                packages: packages
                    .into_iter()
                    .enumerate()
                    .map(|(index, (single_instance, releases))| RichPackage {
                        single_instance,
                        releases: releases
                            .into_iter()
                            .enumerate()
                            .map(|(version, release)| RichRelease {
                                version: version as u32 + 1,
                                deps: release
                                    .deps
                                    .into_iter()
                                    .filter(|d| d.target != index)
                                    .collect(),
                                ..release
                            })
                            .collect(),
                    })
                    .collect(),
                goals,
                with_tests,
            })
    })
}

fn dep_specs(deps: &[Dep]) -> Vec<String> {
    deps.iter()
        .map(|d| format!("{} {}..{}", name(d.target), d.lo, d.hi + 1))
        .collect()
}

fn as_strs(specs: &[String]) -> Vec<&str> {
    specs.iter().map(String::as_str).collect()
}

impl RichProblem {
    fn solver(&self) -> Solver<Universe> {
        let mut pkgs = PkgBox::new();
        for (index, package) in self.packages.iter().enumerate() {
            let package_name = name(index);
            if package.single_instance {
                pkgs.single_instance(&package_name);
            }
            for release in &package.releases {
                let deps = dep_specs(&release.deps);
                let tools = dep_specs(release.tool.as_slice());
                let setup = dep_specs(release.setup.as_slice());
                let mut builder = pkgs
                    .package(&package_name, release.version)
                    .deps(&as_strs(&deps))
                    .tools(&as_strs(&tools))
                    .setup(&as_strs(&setup));
                if release.installed {
                    builder = builder.installed();
                }
                if let Some(flag) = &release.flag {
                    builder = if flag.manual {
                        builder.manual_flag("f", flag.default)
                    } else {
                        builder.flag("f", flag.default)
                    };
                    let then = dep_specs(&flag.then);
                    let otherwise = dep_specs(&flag.otherwise);
                    builder = builder.when("f", &as_strs(&then), &as_strs(&otherwise));
                    if flag.exclusive {
                        builder = builder.flag("g", true).exclusive("f", "g");
                    }
                }
                if let Some(tests) = &release.tests {
                    let deps = dep_specs(&tests.deps);
                    builder = builder.stanza(Stanza::Tests, &as_strs(&deps));
                    if let (Some(value), Some(_)) = (tests.requires_flag, &release.flag) {
                        builder = builder.stanza_requires(Stanza::Tests, "f", value);
                    }
                }
                builder.add();
            }
        }
        pkgs.solver()
    }

    fn request(&self, solver: &Solver<Universe>) -> modsolve::Request {
        let lookup = |&index: &usize| solver.provider().lookup_name(&name(index));
        let goals: Vec<_> = self.goals.iter().filter_map(lookup).collect();
        let preferences: Vec<_> = self
            .with_tests
            .iter()
            .filter_map(lookup)
            .map(|goal| PackagePreference::Stanzas(goal, vec![Stanza::Tests]))
            .collect();
        modsolve::Request::new().goals(goals).preferences(preferences)
    }
}

/// The outcome of a solve, reduced to what has to be the same no matter how
/// much of the search tree was skipped.
#[derive(Debug, PartialEq, Eq)]
enum Summary {
    Plan(String),
    Unsolvable,
    Failed(String),
}

fn summarize(
    solver: &Solver<Universe>,
    result: &Result<modsolve::SolverInstallPlan, SolveError>,
) -> Summary {
    match result {
        Ok(plan) => Summary::Plan(plan.display(solver.provider()).to_string()),
        Err(SolveError::Unsolvable(_)) => Summary::Unsolvable,
        Err(error) => Summary::Failed(error.to_string()),
    }
}

fn steps(result: &Result<modsolve::SolverInstallPlan, SolveError>) -> Option<u64> {
    match result {
        Ok(plan) => Some(plan.stats().steps),
        Err(SolveError::Unsolvable(conflict)) => Some(conflict.stats().steps),
        Err(_) => None,
    }
}

fn in_order() -> SolverConfig {
    SolverConfig::default()
        .with_goal_order(GoalOrder::InOrder)
        .with_count_conflicts(false)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_solver_agrees_with_brute_force(problem in problem()) {
        let solver = problem.solver();
        let request = problem.request(&solver);
        let result = solver.solve(&request, &SolverConfig::default());
        match result {
            Ok(plan) => {
                prop_assert!(problem.has_solution(), "{}", plan.display(solver.provider()));
                for goal in &problem.goals {
                    let goal = solver.provider().lookup_name(&name(*goal)).unwrap();
                    prop_assert!(plan.iter().any(|package| package.name == goal));
                }
            }
            Err(SolveError::Unsolvable(conflict)) => {
                prop_assert!(
                    !problem.has_solution(),
                    "{}",
                    conflict.display_user_friendly(solver.provider())
                );
            }
            Err(error) => prop_assert!(false, "unexpected error: {error}"),
        }
    }

    #[test]
    fn test_solving_is_deterministic(problem in problem()) {
        let solver = problem.solver();
        let request = problem.request(&solver);
        let config = SolverConfig::default();
        let display = |result: Result<modsolve::SolverInstallPlan, SolveError>| {
            result.ok().map(|plan| plan.display(solver.provider()).to_string())
        };
        let first = display(solver.solve(&request, &config));
        let second = display(solver.solve(&request, &config));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_backjumping_finds_the_same_plan(problem in problem()) {
        let solver = problem.solver();
        let request = problem.request(&solver);
        let naive = solver.solve(&request, &in_order().with_backjumping(false));
        let backjumped = solver.solve(&request, &in_order());
        match (naive, backjumped) {
            (Ok(naive), Ok(backjumped)) => {
                prop_assert_eq!(
                    naive.display(solver.provider()).to_string(),
                    backjumped.display(solver.provider()).to_string()
                );
                prop_assert!(backjumped.stats().steps <= naive.stats().steps);
            }
            (Err(SolveError::Unsolvable(naive)), Err(SolveError::Unsolvable(backjumped))) => {
                prop_assert!(backjumped.stats().steps <= naive.stats().steps);
            }
            (naive, backjumped) => prop_assert!(
                false,
                "naive: {:?}, backjumped: {:?}",
                naive.map(|plan| plan.len()),
                backjumped.map(|plan| plan.len())
            ),
        }
    }

    #[test]
    fn test_backjumping_finds_the_same_plan_with_every_kind_of_choice(problem in rich_problem()) {
        let solver = problem.solver();
        let request = problem.request(&solver);
        let config = in_order().with_budget(Budget {
            max_steps: Some(20_000),
            ..Budget::unlimited()
        });
        let naive = solver.solve(&request, &config.clone().with_backjumping(false));
        if matches!(naive, Err(SolveError::BudgetExceeded(_))) {
            return Ok(());
        }
        let backjumped = solver.solve(&request, &config);
        prop_assert!(
            !matches!(naive, Err(SolveError::Internal(_))),
            "{:?}",
            naive.as_ref().err()
        );
        prop_assert!(
            !matches!(backjumped, Err(SolveError::Internal(_))),
            "{:?}",
            backjumped.as_ref().err()
        );

        prop_assert_eq!(summarize(&solver, &naive), summarize(&solver, &backjumped));
        if let (Some(naive), Some(backjumped)) = (steps(&naive), steps(&backjumped)) {
            prop_assert!(backjumped <= naive);
        }
    }
}
