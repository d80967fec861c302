//! Depth-first traversal of the search tree with conflict-directed
//! backjumping.
//!
//! The explorer keeps an explicit stack of choice nodes. Every node knows
//! its goal, its branches, which branch is tried next and the conflict set
//! accumulated from its failed branches. When every branch of a node failed,
//! the node's conflict set is passed upwards and all nodes whose variable is
//! not part of it are skipped: changing their value cannot resolve the
//! conflict.
//!
//! Unless the log keeps every event, a node only remembers the failure of
//! the last of its branches that got past the validator. The failure tree
//! that is reported in the end therefore follows the last explored path and
//! never grows beyond the current path and the rejected siblings along it.

use std::time::Instant;

use crate::{
    config::GoalOrder,
    conflict::{Attempt, BackjumpStep, Conflict, ConflictSet, NodeFailure, Outcome},
    error::{BudgetExhausted, BudgetLimit, InternalError, SolveError},
    internal::{id::VariableId, mapping::Mapping},
    log::{LogEntry, LogMode, SearchStats, SolveLog},
    qualified::{Choice, QualifiedName, Variable},
    solver::{
        builder::{self, Branch},
        cache::SolverCache,
        preference::{self, GoalCandidate},
        state::{Assignment, Mark, OpenGoal},
        validator::{Failure, Validator},
    },
    PackageIndex,
};

/// A satisfying assignment together with the counters of the search that
/// found it.
pub(crate) struct Solution {
    pub assignment: Assignment,
    pub stats: SearchStats,
}

/// A choice node on the current path.
struct Frame {
    goal: OpenGoal,
    branches: Vec<Branch>,
    /// The index of the branch that is tried next
    next: usize,
    /// The union of the conflict sets of all failed branches, the variable
    /// itself and the reason of the goal.
    conflict: ConflictSet,
    attempts: Vec<Attempt>,
    /// The state right after the goal was closed
    mark: Mark,
    log_mark: usize,
}

impl Frame {
    fn current_choice(&self) -> Option<Choice> {
        match self.branches.get(self.next.checked_sub(1)?)? {
            Branch::Open(choice) => Some(*choice),
            Branch::RuledOut(_) => None,
        }
    }
}

/// Records the failure of a branch. Unless `keep_subtrees` is set, the
/// failure replaces the subtree of an earlier failed branch.
fn record_failure(attempts: &mut Vec<Attempt>, attempt: Attempt, keep_subtrees: bool) {
    if !keep_subtrees {
        attempts.retain(|attempt| matches!(attempt.outcome, Outcome::Rejected(_)));
    }
    attempts.push(attempt);
}

enum Step {
    /// Pick the next open goal and push a node for it.
    Descend,
    /// Try the next branch of the node on top of the stack.
    TryNext,
}

pub(crate) struct Explorer<'c, 'p, D: PackageIndex> {
    validator: Validator<'c, 'p, D>,
    log: SolveLog,
    conflict_counts: Mapping<VariableId, u32>,
    stats: SearchStats,
    started: Instant,
    /// Keep the failed subtrees of every branch, not only of the last one
    keep_subtrees: bool,
}

impl<'c, 'p, D: PackageIndex> Explorer<'c, 'p, D> {
    /// Constructs an explorer that has to satisfy the given top-level
    /// packages.
    pub fn new(
        cache: &'c SolverCache<'p, D>,
        roots: impl IntoIterator<Item = QualifiedName>,
    ) -> Self {
        let config = cache.config();
        let mut validator = Validator::new(cache);
        for root in roots {
            validator.add_root_goal(root);
        }
        Self {
            validator,
            log: SolveLog::new(config.log_mode, config.log_limit),
            conflict_counts: Mapping::new(),
            stats: SearchStats::default(),
            started: Instant::now(),
            keep_subtrees: config.log_mode == LogMode::Full,
        }
    }

    /// Runs the search until the first solution is found or every
    /// alternative failed.
    pub fn run(mut self) -> Result<Solution, SolveError> {
        let provider = self.validator.cache().provider();
        let backjumping = self.validator.cache().config().backjumping;

        tracing::info!(
            "╤══ Searching for a solution of {} goals",
            self.validator.state().open_goals().count()
        );

        let mut stack: Vec<Frame> = Vec::new();
        let mut chain: Vec<BackjumpStep> = Vec::new();
        let mut step = Step::Descend;

        loop {
            match step {
                Step::Descend => {
                    let Some(variable) = self.select_goal() else {
                        let depth = stack.len();
                        self.log.push(|| LogEntry::Solved { depth });
                        tracing::info!(
                            "╘══ Solved after {} steps and {} backjumps",
                            self.stats.steps,
                            self.stats.backjumps
                        );
                        return Ok(self.into_solution());
                    };

                    let state = self.validator.state_mut();
                    let goal = state
                        .close_goal(&variable)
                        .ok_or(InternalError::UnknownGoal(variable))?;
                    let mark = state.mark();
                    let branches = builder::branches(&self.validator, &goal)?;
                    tracing::debug!(
                        "├─ deciding {} ({} branches)",
                        variable.display(provider),
                        branches.len()
                    );

                    stack.push(Frame {
                        conflict: ConflictSet::singleton(goal.id).with(&goal.reason),
                        goal,
                        branches,
                        next: 0,
                        attempts: Vec::new(),
                        mark,
                        log_mark: self.log.checkpoint(),
                    });
                    step = Step::TryNext;
                }
                Step::TryNext => {
                    let depth = stack.len().saturating_sub(1);
                    let exhausted = match stack.last() {
                        Some(frame) => frame.next >= frame.branches.len(),
                        None => return Err(InternalError::EmptySearchStack.into()),
                    };
                    if exhausted {
                        let Some(frame) = stack.pop() else {
                            return Err(InternalError::EmptySearchStack.into());
                        };
                        if let Some(conflict) =
                            self.exhausted(frame, &mut stack, &mut chain, backjumping)?
                        {
                            return Err(SolveError::Unsolvable(Box::new(conflict)));
                        }
                        continue;
                    }

                    let Some(frame) = stack.last_mut() else {
                        return Err(InternalError::EmptySearchStack.into());
                    };
                    let index = frame.next;
                    frame.next += 1;
                    let choice = match &frame.branches[index] {
                        Branch::Open(choice) => *choice,
                        Branch::RuledOut(conflict) => {
                            self.count_conflict(conflict);
                            frame.conflict.union(conflict);
                            continue;
                        }
                    };

                    self.validator.state_mut().undo_to(frame.mark);
                    self.log.rewind(frame.log_mark);
                    chain.clear();
                    self.stats.steps += 1;
                    self.check_budget()?;

                    let variable = frame.goal.variable;
                    self.log.push(|| LogEntry::Tried {
                        depth,
                        variable,
                        choice,
                    });
                    tracing::trace!(
                        "│ trying {} = {}",
                        variable.display(provider),
                        choice.display(provider)
                    );

                    match self.validator.apply(&frame.goal, choice) {
                        Ok(()) => step = Step::Descend,
                        Err(Failure::Internal(error)) => return Err(error.into()),
                        Err(Failure::Rejected(rejection)) => {
                            if !rejection.conflict.contains(frame.goal.id) {
                                return Err(InternalError::IncompleteConflictSet(variable).into());
                            }
                            tracing::trace!(
                                "│ rejected {} = {}: {}",
                                variable.display(provider),
                                choice.display(provider),
                                rejection.reason.display(provider)
                            );

                            self.count_conflict(&rejection.conflict);
                            frame.conflict.union(&rejection.conflict);
                            self.log.push(|| LogEntry::Rejected {
                                depth,
                                variable,
                                choice,
                                reason: rejection.reason.clone(),
                                conflict: rejection.conflict.clone(),
                            });
                            frame.attempts.push(Attempt {
                                choice,
                                outcome: Outcome::Rejected(rejection.reason),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Handles a node whose branches all failed. Pops every node that is not
    /// part of the conflict and records the failure at the node the search
    /// resumes at. Returns the final conflict if no such node exists.
    fn exhausted(
        &mut self,
        frame: Frame,
        stack: &mut Vec<Frame>,
        chain: &mut Vec<BackjumpStep>,
        backjumping: bool,
    ) -> Result<Option<Conflict>, SolveError> {
        let provider = self.validator.cache().provider();
        let conflict = frame.conflict;
        let variable = frame.goal.variable;
        let depth = stack.len();
        let mut record = NodeFailure {
            variable,
            attempts: frame.attempts,
            conflict: self.variables_of(&conflict),
        };

        self.log.push(|| LogEntry::Exhausted {
            depth,
            variable,
            conflict: conflict.clone(),
        });
        tracing::debug!(
            "├─ no choice for {} succeeded, conflict: {:?}",
            variable.display(provider),
            record.conflict
        );

        // Skipped nodes still appear in the failure tree so it stays rooted
        // at the first goal.
        let mut skipped = 0;
        if backjumping {
            while let Some(parent) = stack.last() {
                if conflict.contains(parent.goal.id) {
                    break;
                }
                let Some(parent) = stack.pop() else {
                    break;
                };
                record = wrap_failure(
                    parent,
                    record,
                    self.variables_of(&conflict),
                    self.keep_subtrees,
                );
                skipped += 1;
            }
        }

        let resumed_at = stack.last().map(|parent| parent.goal.variable);
        if skipped > 0 {
            self.stats.backjumps += 1;
            let depth = stack.len();
            self.log.push(|| LogEntry::Backjumped {
                depth,
                to: resumed_at,
                skipped,
            });
            match resumed_at {
                Some(target) => tracing::debug!(
                    "├─ backjumped over {skipped} decisions to {}",
                    target.display(provider)
                ),
                None => tracing::debug!("├─ backjumped over {skipped} decisions to the root"),
            }
            self.check_budget()?;
        }
        chain.push(BackjumpStep {
            variable,
            resumed_at,
            conflict: record.conflict.clone(),
        });

        let Some(parent) = stack.last_mut() else {
            tracing::info!("╘══ UNSOLVABLE after {} steps", self.stats.steps);
            let variables = self.variables_of(&conflict);
            let mut log = std::mem::replace(&mut self.log, SolveLog::new(Default::default(), 0));
            log.finish(self.validator.variables().as_slice().to_vec());
            return Ok(Some(Conflict {
                conflict: variables,
                root: record,
                chain: std::mem::take(chain),
                log,
                stats: self.stats,
            }));
        };

        let Some(choice) = parent.current_choice() else {
            return Err(InternalError::EmptySearchStack.into());
        };
        record_failure(
            &mut parent.attempts,
            Attempt {
                choice,
                outcome: Outcome::Failed(Box::new(record)),
            },
            self.keep_subtrees,
        );
        parent.conflict.union(&conflict);
        Ok(None)
    }

    /// Picks the open goal that is decided next.
    fn select_goal(&self) -> Option<Variable> {
        let state = self.validator.state();
        let config = self.validator.cache().config();
        let goals: Vec<&OpenGoal> = state.open_goals().collect();
        let candidates = goals.iter().enumerate().map(|(position, goal)| GoalCandidate {
            position,
            plausible_choices: match config.goal_order {
                GoalOrder::InOrder => 0,
                _ => builder::plausible_choices(&self.validator, goal),
            },
            conflicts: self.conflict_counts.get(goal.id).copied().unwrap_or(0),
        });
        let position = preference::select_goal(candidates, config)?;
        goals.get(position).map(|goal| goal.variable)
    }

    fn count_conflict(&mut self, conflict: &ConflictSet) {
        for id in conflict.iter() {
            let count = self.conflict_counts.get(id).copied().unwrap_or(0);
            self.conflict_counts.insert(id, count + 1);
        }
    }

    fn check_budget(&mut self) -> Result<(), SolveError> {
        let budget = self.validator.cache().config().budget;
        let elapsed = self.started.elapsed();
        let limit = if budget.max_steps.is_some_and(|max| self.stats.steps > max) {
            BudgetLimit::Steps
        } else if budget
            .max_backjumps
            .is_some_and(|max| self.stats.backjumps > max)
        {
            BudgetLimit::Backjumps
        } else if budget.timeout.is_some_and(|timeout| elapsed > timeout) {
            BudgetLimit::Timeout
        } else {
            return Ok(());
        };

        tracing::info!("╘══ Search aborted: {limit}");
        let mut log = std::mem::replace(&mut self.log, SolveLog::new(Default::default(), 0));
        log.finish(self.validator.variables().as_slice().to_vec());
        Err(SolveError::BudgetExceeded(Box::new(BudgetExhausted {
            limit,
            steps: self.stats.steps,
            backjumps: self.stats.backjumps,
            elapsed,
            log,
        })))
    }

    fn variables_of(&self, conflict: &ConflictSet) -> Vec<Variable> {
        let variables = self.validator.variables();
        conflict.iter().map(|id| variables.variable(id)).collect()
    }

    fn into_solution(self) -> Solution {
        Solution {
            assignment: self.validator.state().assignment(),
            stats: self.stats,
        }
    }
}

/// Turns a node that was skipped by a backjump into a failure record whose
/// last attempt failed with `child`.
fn wrap_failure(
    frame: Frame,
    child: NodeFailure,
    conflict: Vec<Variable>,
    keep_subtrees: bool,
) -> NodeFailure {
    let choice = frame.current_choice();
    let mut attempts = frame.attempts;
    if let Some(choice) = choice {
        record_failure(
            &mut attempts,
            Attempt {
                choice,
                outcome: Outcome::Failed(Box::new(child)),
            },
            keep_subtrees,
        );
    }
    NodeFailure {
        variable: frame.goal.variable,
        attempts,
        conflict,
    }
}
