use std::time::Instant;

use crate::{
    config::SolverConfig,
    error::{RootFailure, SolveError},
    log::SearchStats,
    plan::{PlanAssembler, SolverInstallPlan},
    qualified::{PackagePath, QualifiedName},
    request::Request,
    PackageIndex,
};

pub use cache::SolverCache;
use explorer::{Explorer, Solution};
use state::Assignment;

mod builder;
mod cache;
pub(crate) mod condition;
mod explorer;
mod linking;
mod preference;
pub(crate) mod state;
mod validator;
mod variable_map;

/// Drives the search for an install plan.
///
/// A solver holds on to the [`PackageIndex`] it was created with. Every call
/// to [`Solver::solve`] is independent of previous calls: nothing learned in
/// one solve carries over to the next.
pub struct Solver<D: PackageIndex> {
    provider: D,
}

/// A part of a request that is searched on its own.
struct Subproblem {
    roots: Vec<QualifiedName>,
}

impl<D: PackageIndex> Solver<D> {
    /// Creates a solver that obtains packages from the given index.
    pub fn new(provider: D) -> Self {
        Self { provider }
    }

    /// Returns the package index used by this solver.
    pub fn provider(&self) -> &D {
        &self.provider
    }

    /// Solves the request and returns a validated install plan.
    ///
    /// Fails without searching if a top-level goal names an unknown package
    /// or if every instance of a goal is ruled out by the user constraints.
    /// If the search exhausts every alternative, the returned
    /// [`SolveError::Unsolvable`] describes the conflict and carries the log
    /// of the search. The log is only kept for failed solves.
    ///
    /// With independent goals enabled, every goal is searched on its own and
    /// the results are combined into a single plan.
    pub fn solve(
        &self,
        request: &Request,
        config: &SolverConfig,
    ) -> Result<SolverInstallPlan, SolveError> {
        let started = Instant::now();
        let cache = SolverCache::new(&self.provider, request, config);
        let subproblems = self.prepare(&cache)?;

        let mut solutions = Vec::with_capacity(subproblems.len());
        for subproblem in &subproblems {
            solutions.push(Explorer::new(&cache, subproblem.roots.iter().copied()).run()?);
        }

        let plan = self.finish(request, &subproblems, solutions)?;
        tracing::info!(
            "found a plan of {} packages in {:?}",
            plan.len(),
            started.elapsed()
        );
        Ok(plan)
    }

    /// Checks the top-level goals and splits the request into the parts
    /// that are searched separately.
    fn prepare(&self, cache: &SolverCache<'_, D>) -> Result<Vec<Subproblem>, SolveError> {
        let request = cache.request();
        let independent = cache.config().independent_goals;

        let mut roots = Vec::with_capacity(request.goals.len());
        for (index, &name) in request.goals.iter().enumerate() {
            let path = if independent {
                PackagePath::independent(index as u32)
            } else {
                PackagePath::top_level()
            };
            let qpn = QualifiedName::new(path, name);

            if cache.candidates(name).is_none() {
                tracing::info!(
                    "the requested package {} does not exist",
                    self.provider.display_name(name)
                );
                return Err(SolveError::UnsatisfiableRoot(RootFailure::UnknownPackage(
                    name,
                )));
            }
            if cache.admissible_candidates(qpn).is_empty() {
                tracing::info!(
                    "no instance of the requested package {} is admissible",
                    self.provider.display_name(name)
                );
                return Err(SolveError::UnsatisfiableRoot(
                    RootFailure::NoAdmissibleInstance(name),
                ));
            }
            roots.push(qpn);
        }

        Ok(if independent {
            roots
                .into_iter()
                .map(|root| Subproblem { roots: vec![root] })
                .collect()
        } else {
            vec![Subproblem { roots }]
        })
    }

    /// Merges the solutions of all subproblems and turns them into a plan.
    fn finish(
        &self,
        request: &Request,
        subproblems: &[Subproblem],
        solutions: Vec<Solution>,
    ) -> Result<SolverInstallPlan, SolveError> {
        let mut assignment = Assignment::default();
        let mut stats = SearchStats::default();
        for solution in solutions {
            assignment.packages.extend(solution.assignment.packages);
            assignment.flags.extend(solution.assignment.flags);
            assignment.stanzas.extend(solution.assignment.stanzas);
            stats.merge(solution.stats);
        }

        let roots: Vec<QualifiedName> = subproblems
            .iter()
            .flat_map(|subproblem| subproblem.roots.iter().copied())
            .collect();
        let plan = PlanAssembler::new(&self.provider, &request.environment, &assignment)
            .assemble(&roots, stats)?;
        Ok(plan)
    }
}

impl<D: PackageIndex + Sync> Solver<D> {
    /// Like [`Solver::solve`], but searches independent goals on separate
    /// threads.
    ///
    /// Without independent goals there is only a single search and this is
    /// the same as [`Solver::solve`]. If more than one subproblem fails, the
    /// failure of the first failing goal is returned.
    pub fn solve_parallel(
        &self,
        request: &Request,
        config: &SolverConfig,
    ) -> Result<SolverInstallPlan, SolveError> {
        let cache = SolverCache::new(&self.provider, request, config);
        let subproblems = self.prepare(&cache)?;
        if subproblems.len() <= 1 {
            return self.solve(request, config);
        }

        tracing::info!("solving {} goals in parallel", subproblems.len());
        let provider = &self.provider;
        let results: Vec<Result<Solution, SolveError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = subproblems
                .iter()
                .map(|subproblem| {
                    scope.spawn(move || {
                        let cache = SolverCache::new(provider, request, config);
                        Explorer::new(&cache, subproblem.roots.iter().copied()).run()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let solutions = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        self.finish(request, &subproblems, solutions)
    }
}
