use std::time::Duration;

use crate::{
    conflict::Conflict, log::SolveLog, plan::PlanId, qualified::QualifiedName,
    qualified::Variable, version::Version, version::VersionRange, NameId,
};

/// The reasons a solve can fail.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// A top-level goal cannot be satisfied by any instance. Detected before
    /// the search starts.
    #[error(transparent)]
    UnsatisfiableRoot(RootFailure),

    /// The search explored every alternative without finding a solution.
    #[error("no solution satisfies the requested goals")]
    Unsolvable(Box<Conflict>),

    /// The search was stopped because it exceeded its budget. Retrying with
    /// a larger budget or narrower constraints may succeed.
    #[error("the search was aborted after {} steps: {}", .0.steps, .0.limit)]
    BudgetExceeded(Box<BudgetExhausted>),

    /// The solver violated one of its own invariants.
    #[error(transparent)]
    Internal(#[from] InternalError),

    /// A found assignment could not be turned into a valid plan.
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Describes a top-level goal that cannot be satisfied at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RootFailure {
    /// The package index does not know the package.
    #[error("the requested package {0:?} does not exist")]
    UnknownPackage(NameId),

    /// Every instance of the package is ruled out by the user constraints or
    /// because new installs are disabled.
    #[error("no instance of the requested package {0:?} satisfies the constraints")]
    NoAdmissibleInstance(NameId),
}

impl RootFailure {
    /// Returns the requested package that cannot be satisfied.
    pub fn name(&self) -> NameId {
        match self {
            RootFailure::UnknownPackage(name) | RootFailure::NoAdmissibleInstance(name) => *name,
        }
    }
}

/// The budget limit that stopped a search.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetLimit {
    /// Too many nodes were visited.
    #[error("the step limit was reached")]
    Steps,
    /// Too many backjumps were performed.
    #[error("the backjump limit was reached")]
    Backjumps,
    /// The search took too long.
    #[error("the time limit was reached")]
    Timeout,
}

/// Describes a search that was stopped because it ran out of budget.
#[derive(Debug)]
pub struct BudgetExhausted {
    /// The limit that was hit
    pub limit: BudgetLimit,
    /// The number of visited nodes
    pub steps: u64,
    /// The number of performed backjumps
    pub backjumps: u64,
    /// The time spent searching
    pub elapsed: Duration,
    /// The log of the search up to the point it was stopped
    pub log: SolveLog,
}

/// A violated solver invariant. These errors indicate a bug in the solver,
/// not a problem with the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    /// A failure directly caused by choosing a value for a variable did not
    /// include that variable in its conflict set.
    #[error("the conflict set of a failure caused by deciding {0:?} does not contain it")]
    IncompleteConflictSet(Variable),

    /// A choice was applied to a variable of a different kind.
    #[error("the choice for {0:?} does not fit the kind of the variable")]
    MismatchedChoice(Variable),

    /// The explorer tried to decide a goal that is not open.
    #[error("{0:?} was selected but is not an open goal")]
    UnknownGoal(Variable),

    /// The explorer tried to continue without a choice node.
    #[error("the search stack is unexpectedly empty")]
    EmptySearchStack,

    /// The search state referred to a package that was never decided.
    #[error("the package {0:?} was expected to be decided")]
    UndecidedPackage(QualifiedName),
}

/// The reasons a found assignment can be rejected while assembling a plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The library dependencies of the plan form a cycle.
    #[error("the library dependencies form a cycle: {0:?}")]
    Cycle(Vec<PlanId>),

    /// A cycle through setup or build-tool dependencies could not be broken
    /// because no installed instance of the package is available.
    #[error("the build-time dependency cycle through {package:?} cannot be broken without an installed instance")]
    SetupCycleWithoutInstalled {
        /// The package that would have to be replaced by an installed
        /// instance
        package: QualifiedName,
        /// The packages on the cycle
        cycle: Vec<PlanId>,
    },

    /// A dependency was never decided.
    #[error("{package:?} depends on {dependency:?}, which is not part of the plan")]
    MissingDependency {
        /// The package with the dependency
        package: PlanId,
        /// The missing package
        dependency: PlanId,
    },

    /// A dependency edge is not satisfied by the version in the plan.
    #[error("{package:?} requires {dependency:?} {range}, but the plan contains version {version}")]
    Inconsistent {
        /// The package with the dependency
        package: PlanId,
        /// The package the dependency points to
        dependency: PlanId,
        /// The required range
        range: VersionRange,
        /// The version in the plan
        version: Version,
    },

    /// The same package appears more than once.
    #[error("{0:?} appears more than once in the plan")]
    Duplicate(PlanId),
}
