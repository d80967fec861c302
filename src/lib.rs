//! Implements a modular dependency solver for packages with versions,
//! configuration flags and optional components (test suites and benchmarks).
//!
//! The solver explores a lazily constructed search tree. Every node of the
//! tree decides a single [`Variable`]: which instance of a package to use, the
//! value of one of its flags or whether one of its optional stanzas is
//! enabled. Every choice is validated against the constraints that are active
//! on the current path and every rejected choice is annotated with a conflict
//! set: the variables that are responsible for the rejection. When all
//! choices of a node are rejected, the search does not simply backtrack to the
//! previous decision but jumps back to the most recent decision that is part
//! of the conflict, skipping every decision in between that could not have
//! caused it.
//!
//! A found assignment is finally converted into a [`SolverInstallPlan`]: a
//! validated, topologically ordered graph of [`ConfiguredPackage`]s.
//!
//! The solver does not know where packages come from. Everything it knows
//! about the available packages is obtained through a [`PackageIndex`], see
//! [`utils::Universe`] for a simple in-memory implementation.

#![deny(missing_docs)]

pub mod config;
pub mod conflict;
mod error;
pub(crate) mod internal;
pub mod log;
pub mod package;
pub mod plan;
pub mod qualified;
pub mod request;
#[cfg(feature = "serde")]
pub mod snapshot;
mod solver;
pub mod utils;
pub mod version;

use std::fmt::Display;

pub use config::{Budget, GoalOrder, InstalledPreference, SolverConfig, VersionPreference};
pub use conflict::{Conflict, FailReason};
pub use error::{BudgetExhausted, BudgetLimit, InternalError, PlanError, RootFailure, SolveError};
pub use internal::{
    id::{FlagId, NameId, SolvableId},
    mapping::Mapping,
};
pub use log::{LogEntry, LogMode, SearchStats, SolveLog};
pub use package::{
    ChoiceRule, CondBranch, CondTree, Condition, Dependency, DependencyKind, Environment,
    FlagDecl, Instance, Location, PlatformTest, Stanza,
};
pub use plan::{ConfiguredPackage, PlanDependency, PlanId, SolverInstallPlan};
pub use qualified::{Choice, Namespace, PackagePath, QualifiedName, Qualifier, Variable};
pub use request::{ConstraintScope, PackagePreference, Request, UserConstraint};
pub use solver::{Solver, SolverCache};
pub use version::{Version, VersionRange};

/// An object that is used by the solver to query certain properties of
/// different internalized objects.
pub trait Interner {
    /// Returns an object that can be used to display the given solvable in a
    /// user-friendly way.
    ///
    /// When formatting the solvable, it should it include both the name of
    /// the package and its version.
    fn display_solvable(&self, solvable: SolvableId) -> impl Display + '_;

    /// Returns an object that can be used to display the given name in a
    /// user-friendly way.
    fn display_name(&self, name: NameId) -> impl Display + '_;

    /// Returns an object that can be used to display the given flag name in a
    /// user-friendly way.
    fn display_flag(&self, flag: FlagId) -> impl Display + '_;

    /// Returns the name of the package for the given solvable.
    fn solvable_name(&self, solvable: SolvableId) -> NameId;
}

/// Gives the solver access to the packages that are available in the system.
///
/// The index is read-only for the duration of a solve. Implementations must
/// be deterministic: asking the same question twice has to produce the same
/// answer, in the same order.
pub trait PackageIndex: Interner {
    /// Obtains the instances that should be considered when a package with
    /// the given name is requested. Returns `None` if the package is not
    /// known at all.
    fn candidates(&self, name: NameId) -> Option<Candidates>;

    /// Returns the description of a single instance.
    fn instance(&self, solvable: SolvableId) -> &Instance;
}

/// A list of candidate solvables for a specific package. This is returned from
/// [`PackageIndex::candidates`].
#[derive(Default, Clone, Debug)]
pub struct Candidates {
    /// All instances of the package, installed and buildable, in catalog
    /// order. The order does not influence the result of a solve, only ties
    /// between otherwise equal candidates.
    pub candidates: Vec<SolvableId>,

    /// If true, at most one instance of the package may be built as part of
    /// a plan. Every other occurrence of the package must either link to
    /// that instance or use an installed instance.
    pub single_instance: bool,
}
