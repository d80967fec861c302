//! Solver-wide parameters.
//!
//! A [`SolverConfig`] is an immutable value that is handed to the solver
//! once and consulted by every stage of the search. Nothing in the solver
//! reads global state.

use std::time::Duration;

use crate::log::LogMode;

/// Decides which open goal the solver works on next.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GoalOrder {
    /// Goals are processed in the order in which they were discovered.
    InOrder,
    /// Goals with at most one plausible choice are processed first, all
    /// others in the order in which they were discovered.
    #[default]
    ReallyEasyFirst,
    /// Goals are sorted by their number of plausible choices, fewest first.
    FewestChoices,
}

/// The order in which versions of a package are tried.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VersionPreference {
    /// Highest version first
    #[default]
    Latest,
    /// Lowest version first
    Oldest,
}

/// Whether installed instances are preferred over newer source instances.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstalledPreference {
    /// Installed instances are tried before any source instance.
    #[default]
    PreferInstalled,
    /// Only the version order matters. For equal versions the installed
    /// instance still wins.
    PreferLatest,
}

/// Limits on the amount of work a single solve may perform. When any limit
/// is hit the solve fails with [`crate::SolveError::BudgetExceeded`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Budget {
    /// The maximum number of search tree nodes that may be visited.
    pub max_steps: Option<u64>,
    /// The maximum number of backjumps.
    pub max_backjumps: Option<u64>,
    /// The maximum wall-clock time of a solve.
    pub timeout: Option<Duration>,
}

impl Budget {
    /// A budget without limits.
    pub const fn unlimited() -> Self {
        Self {
            max_steps: None,
            max_backjumps: None,
            timeout: None,
        }
    }
}

/// The parameters of a solve.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SolverConfig {
    /// How the next goal is picked
    pub goal_order: GoalOrder,
    /// Prefer goals that were involved in many conflicts
    pub count_conflicts: bool,
    /// Solve each top-level goal in its own namespace
    pub independent_goals: bool,
    /// The global version order
    pub version_preference: VersionPreference,
    /// The global installed-vs-latest preference
    pub installed_preference: InstalledPreference,
    /// Whether instances that still have to be built may be chosen
    pub allow_new_installs: bool,
    /// Try linking to an already chosen instance before anything else
    pub prefer_linked: bool,
    /// Use conflict sets to skip irrelevant decisions when backtracking
    pub backjumping: bool,
    /// Limits on the search
    pub budget: Budget,
    /// How much of the search is recorded in the returned log
    pub log_mode: LogMode,
    /// The maximum number of log entries that are kept
    pub log_limit: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            goal_order: GoalOrder::default(),
            count_conflicts: true,
            independent_goals: false,
            version_preference: VersionPreference::default(),
            installed_preference: InstalledPreference::default(),
            allow_new_installs: true,
            prefer_linked: true,
            backjumping: true,
            budget: Budget::unlimited(),
            log_mode: LogMode::default(),
            log_limit: 10_000,
        }
    }
}

impl SolverConfig {
    /// Sets the goal order.
    pub fn with_goal_order(mut self, goal_order: GoalOrder) -> Self {
        self.goal_order = goal_order;
        self
    }

    /// Enables or disables the conflict counting heuristic.
    pub fn with_count_conflicts(mut self, count_conflicts: bool) -> Self {
        self.count_conflicts = count_conflicts;
        self
    }

    /// Enables or disables independent goals.
    pub fn with_independent_goals(mut self, independent_goals: bool) -> Self {
        self.independent_goals = independent_goals;
        self
    }

    /// Sets the global version preference.
    pub fn with_version_preference(mut self, preference: VersionPreference) -> Self {
        self.version_preference = preference;
        self
    }

    /// Sets the global installed preference.
    pub fn with_installed_preference(mut self, preference: InstalledPreference) -> Self {
        self.installed_preference = preference;
        self
    }

    /// Allows or forbids choosing instances that have to be built.
    pub fn with_new_installs(mut self, allow: bool) -> Self {
        self.allow_new_installs = allow;
        self
    }

    /// Enables or disables preferring links.
    pub fn with_prefer_linked(mut self, prefer_linked: bool) -> Self {
        self.prefer_linked = prefer_linked;
        self
    }

    /// Enables or disables backjumping. Without backjumping the search falls
    /// back to chronological backtracking.
    pub fn with_backjumping(mut self, backjumping: bool) -> Self {
        self.backjumping = backjumping;
        self
    }

    /// Sets the search budget.
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Sets how the search is logged.
    pub fn with_log_mode(mut self, log_mode: LogMode) -> Self {
        self.log_mode = log_mode;
        self
    }

    /// Sets the maximum number of log entries.
    pub fn with_log_limit(mut self, log_limit: usize) -> Self {
        self.log_limit = log_limit;
        self
    }
}
