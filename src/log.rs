//! A structured trace of the search.
//!
//! The log records which values were tried for which variables, why choices
//! were rejected and where the search jumped back to. Entries only hold ids
//! and are turned into text when they are displayed, so a caller that only
//! looks at the final failure does not pay for formatting every step.

use std::fmt::{self, Display, Formatter};

use crate::{
    conflict::{ConflictSet, FailReason},
    internal::arena::ArenaId,
    qualified::{Choice, Variable},
    Interner,
};

/// Controls how much of the search is kept in the [`SolveLog`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LogMode {
    /// Nothing is recorded.
    Off,
    /// Only the path that is currently explored is kept. Entries of a
    /// subtree are dropped as soon as the search moves on to a sibling, so
    /// after a failed search the log describes the last explored path and
    /// how it failed.
    #[default]
    Path,
    /// Every event of the search is kept. The failure tree of an
    /// unsolvable request then also keeps the subtrees of every failed
    /// branch instead of only the last one.
    Full,
}

/// A single event of the search.
#[derive(Clone, Debug)]
pub enum LogEntry {
    /// A value was tried for a variable.
    Tried {
        /// The number of decisions above this one
        depth: usize,
        /// The variable that was decided
        variable: Variable,
        /// The tried value
        choice: Choice,
    },
    /// The validator rejected a value.
    Rejected {
        /// The number of decisions above this one
        depth: usize,
        /// The variable that was decided
        variable: Variable,
        /// The rejected value
        choice: Choice,
        /// Why the value was rejected
        reason: FailReason,
        /// The conflict set of the rejection
        conflict: ConflictSet,
    },
    /// No value of a variable led to a solution.
    Exhausted {
        /// The number of decisions above this one
        depth: usize,
        /// The variable that failed
        variable: Variable,
        /// The conflict set of the failure
        conflict: ConflictSet,
    },
    /// The search skipped decisions that are not part of a conflict.
    Backjumped {
        /// The depth the search continues at
        depth: usize,
        /// The variable at which the search continues, `None` if the search
        /// ended
        to: Option<Variable>,
        /// The number of skipped decisions
        skipped: usize,
    },
    /// All goals were satisfied.
    Solved {
        /// The number of decisions on the path to the solution
        depth: usize,
    },
}

/// Counters of the work a search performed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchStats {
    /// The number of choices that were tried
    pub steps: u64,
    /// The number of backjumps that skipped at least one decision
    pub backjumps: u64,
}

impl SearchStats {
    /// Adds the counters of another search.
    pub fn merge(&mut self, other: SearchStats) {
        self.steps += other.steps;
        self.backjumps += other.backjumps;
    }
}

/// A lazily rendered trace of the search.
#[derive(Clone, Debug)]
pub struct SolveLog {
    mode: LogMode,
    limit: usize,
    entries: Vec<LogEntry>,
    truncated: bool,

    /// The variables indexed by id, filled in when the search finishes.
    variables: Vec<Variable>,
}

impl SolveLog {
    pub(crate) fn new(mode: LogMode, limit: usize) -> Self {
        Self {
            mode,
            limit,
            entries: Vec::new(),
            truncated: false,
            variables: Vec::new(),
        }
    }

    /// Returns a marker to which the log can later be rewound.
    pub(crate) fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    /// Drops every entry recorded after `mark` when only the current path is
    /// kept. Recording continues from the mark.
    pub(crate) fn rewind(&mut self, mark: usize) {
        if self.mode == LogMode::Path && mark < self.entries.len() {
            self.entries.truncate(mark);
            self.truncated = false;
        }
    }

    /// Appends an entry. The entry is only constructed if it is actually
    /// recorded.
    pub(crate) fn push(&mut self, entry: impl FnOnce() -> LogEntry) {
        if self.mode == LogMode::Off {
            return;
        }
        if self.entries.len() >= self.limit {
            self.truncated = true;
            return;
        }
        self.entries.push(entry());
    }

    /// Stores the variables the conflict sets in the log refer to.
    pub(crate) fn finish(&mut self, variables: Vec<Variable>) {
        self.variables = variables;
    }

    /// Returns the recorded entries.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Returns true if entries were dropped because the log reached its
    /// limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Returns the variables of a conflict set recorded in this log.
    pub fn conflict_variables<'a>(
        &'a self,
        conflict: &'a ConflictSet,
    ) -> impl Iterator<Item = Variable> + 'a {
        conflict
            .iter()
            .filter_map(|id| self.variables.get(id.to_usize()).copied())
    }

    /// Returns an object that renders the log, one entry per line.
    pub fn display<'a, I: Interner>(&'a self, interner: &'a I) -> DisplayLog<'a, I> {
        DisplayLog {
            log: self,
            interner,
        }
    }
}

/// Renders a [`SolveLog`], see [`SolveLog::display`].
pub struct DisplayLog<'a, I: Interner> {
    log: &'a SolveLog,
    interner: &'a I,
}

impl<I: Interner> DisplayLog<'_, I> {
    fn fmt_conflict(&self, f: &mut Formatter<'_>, conflict: &ConflictSet) -> fmt::Result {
        for (index, variable) in self.log.conflict_variables(conflict).enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", variable.display(self.interner))?;
        }
        Ok(())
    }
}

impl<I: Interner> Display for DisplayLog<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let interner = self.interner;
        for entry in &self.log.entries {
            match entry {
                LogEntry::Tried {
                    depth,
                    variable,
                    choice,
                } => writeln!(
                    f,
                    "[{depth:_>3}] trying: {} = {}",
                    variable.display(interner),
                    choice.display(interner)
                )?,
                LogEntry::Rejected {
                    depth,
                    variable,
                    choice,
                    reason,
                    conflict,
                } => {
                    write!(
                        f,
                        "[{depth:_>3}] rejecting: {} = {} ({}; conflict: ",
                        variable.display(interner),
                        choice.display(interner),
                        reason.display(interner)
                    )?;
                    self.fmt_conflict(f, conflict)?;
                    writeln!(f, ")")?;
                }
                LogEntry::Exhausted {
                    depth,
                    variable,
                    conflict,
                } => {
                    write!(
                        f,
                        "[{depth:_>3}] fail: {} (conflict: ",
                        variable.display(interner)
                    )?;
                    self.fmt_conflict(f, conflict)?;
                    writeln!(f, ")")?;
                }
                LogEntry::Backjumped { depth, to, skipped } => match to {
                    Some(variable) => writeln!(
                        f,
                        "[{depth:_>3}] backjumping to {} (skipped {skipped})",
                        variable.display(interner)
                    )?,
                    None => writeln!(f, "[{depth:_>3}] giving up (skipped {skipped})")?,
                },
                LogEntry::Solved { depth } => writeln!(f, "[{depth:_>3}] done")?,
            }
        }
        if self.log.truncated {
            writeln!(f, "...")?;
        }
        Ok(())
    }
}
