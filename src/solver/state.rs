use std::collections::BTreeMap;

use ahash::HashMap;
use indexmap::IndexMap;

use crate::{
    conflict::ConflictSet,
    internal::id::VariableId,
    package::{DependencyKind, Stanza},
    qualified::{QualifiedName, Variable},
    version::VersionRange,
    FlagId, SolvableId,
};

/// The value assigned to a package variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PackageValue {
    /// A specific instance was chosen.
    Instance(SolvableId),
    /// The package shares the instance of another qualified package.
    Linked(QualifiedName),
}

/// A version range some package currently requires of another package.
#[derive(Clone, Debug)]
pub(crate) struct ActiveRange {
    /// The package that imposes the range
    pub consumer: QualifiedName,
    pub range: VersionRange,
    /// The decisions that made the dependency active
    pub origin: ConflictSet,
}

/// An activated dependency between two qualified packages.
#[derive(Clone, Debug)]
pub(crate) struct Edge {
    pub from: QualifiedName,
    pub to: QualifiedName,
    pub kind: DependencyKind,
    pub origin: ConflictSet,
}

/// A variable that still has to be decided.
#[derive(Clone, Debug)]
pub(crate) struct OpenGoal {
    pub variable: Variable,
    pub id: VariableId,
    /// Why the goal exists, e.g. the origin of the dependency that opened it.
    pub reason: ConflictSet,
}

/// A single change to the state that can be undone.
#[derive(Debug)]
enum Undo {
    Package(QualifiedName),
    Flag(QualifiedName, FlagId),
    Stanza(QualifiedName, Stanza),
    Range(QualifiedName),
    Edge,
    GoalOpened(Variable),
    GoalClosed(u64, OpenGoal),
}

/// A position in the trail of a [`SearchState`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Mark(usize);

/// The partial assignment along the currently explored path, together with
/// everything the assignment implies: the active version ranges, the
/// dependency edges and the goals that are still open.
///
/// Every change is recorded on a trail so the state can be reset to any
/// earlier [`Mark`] in time proportional to the number of undone changes.
#[derive(Default)]
pub(crate) struct SearchState {
    packages: IndexMap<QualifiedName, PackageValue, ahash::RandomState>,
    flags: HashMap<(QualifiedName, FlagId), bool>,
    stanzas: HashMap<(QualifiedName, Stanza), bool>,
    ranges: HashMap<QualifiedName, Vec<ActiveRange>>,
    edges: Vec<Edge>,

    /// Open goals keyed by the order in which they were opened.
    goals: BTreeMap<u64, OpenGoal>,
    goal_keys: HashMap<Variable, u64>,
    next_goal_key: u64,

    trail: Vec<Undo>,
}

impl SearchState {
    pub fn mark(&self) -> Mark {
        Mark(self.trail.len())
    }

    /// Undoes every change made after `mark`.
    pub fn undo_to(&mut self, mark: Mark) {
        while self.trail.len() > mark.0 {
            let Some(undo) = self.trail.pop() else {
                break;
            };
            match undo {
                Undo::Package(qpn) => {
                    let removed = self.packages.pop();
                    debug_assert_eq!(removed.map(|(k, _)| k), Some(qpn));
                }
                Undo::Flag(qpn, flag) => {
                    self.flags.remove(&(qpn, flag));
                }
                Undo::Stanza(qpn, stanza) => {
                    self.stanzas.remove(&(qpn, stanza));
                }
                Undo::Range(qpn) => {
                    if let Some(ranges) = self.ranges.get_mut(&qpn) {
                        ranges.pop();
                        if ranges.is_empty() {
                            self.ranges.remove(&qpn);
                        }
                    }
                }
                Undo::Edge => {
                    self.edges.pop();
                }
                Undo::GoalOpened(variable) => {
                    if let Some(key) = self.goal_keys.remove(&variable) {
                        self.goals.remove(&key);
                    }
                }
                Undo::GoalClosed(key, goal) => {
                    self.goal_keys.insert(goal.variable, key);
                    self.goals.insert(key, goal);
                }
            }
        }
    }

    pub fn package(&self, qpn: &QualifiedName) -> Option<PackageValue> {
        self.packages.get(qpn).copied()
    }

    /// Follows a link and returns the qualified package that owns the
    /// instance of `qpn`.
    pub fn resolve_link(&self, qpn: QualifiedName) -> QualifiedName {
        match self.packages.get(&qpn) {
            Some(PackageValue::Linked(target)) => *target,
            _ => qpn,
        }
    }

    /// Returns the instance used for `qpn`, following links. The second
    /// element is the link target if `qpn` is linked.
    pub fn instance_of(&self, qpn: &QualifiedName) -> Option<(SolvableId, Option<QualifiedName>)> {
        match self.packages.get(qpn)? {
            PackageValue::Instance(solvable) => Some((*solvable, None)),
            PackageValue::Linked(target) => match self.packages.get(target)? {
                PackageValue::Instance(solvable) => Some((*solvable, Some(*target))),
                PackageValue::Linked(_) => None,
            },
        }
    }

    /// All decided packages in the order in which they were decided.
    pub fn packages(&self) -> impl Iterator<Item = (&QualifiedName, &PackageValue)> {
        self.packages.iter()
    }

    pub fn assign_package(&mut self, qpn: QualifiedName, value: PackageValue) {
        let previous = self.packages.insert(qpn, value);
        debug_assert!(previous.is_none(), "package decided twice");
        self.trail.push(Undo::Package(qpn));
    }

    pub fn flag(&self, qpn: QualifiedName, flag: FlagId) -> Option<bool> {
        self.flags.get(&(qpn, flag)).copied()
    }

    pub fn assign_flag(&mut self, qpn: QualifiedName, flag: FlagId, value: bool) {
        self.flags.insert((qpn, flag), value);
        self.trail.push(Undo::Flag(qpn, flag));
    }

    pub fn stanza(&self, qpn: QualifiedName, stanza: Stanza) -> Option<bool> {
        self.stanzas.get(&(qpn, stanza)).copied()
    }

    pub fn assign_stanza(&mut self, qpn: QualifiedName, stanza: Stanza, value: bool) {
        self.stanzas.insert((qpn, stanza), value);
        self.trail.push(Undo::Stanza(qpn, stanza));
    }

    /// Returns the ranges that are currently required of `qpn`.
    pub fn ranges(&self, qpn: &QualifiedName) -> &[ActiveRange] {
        self.ranges.get(qpn).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn add_range(&mut self, qpn: QualifiedName, range: ActiveRange) {
        self.ranges.entry(qpn).or_default().push(range);
        self.trail.push(Undo::Range(qpn));
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
        self.trail.push(Undo::Edge);
    }

    /// Opens a goal unless the variable already has an open goal. Returns
    /// true if a new goal was opened.
    pub fn open_goal(&mut self, variable: Variable, id: VariableId, reason: ConflictSet) -> bool {
        if self.goal_keys.contains_key(&variable) {
            return false;
        }
        let key = self.next_goal_key;
        self.next_goal_key += 1;
        self.goal_keys.insert(variable, key);
        self.goals.insert(
            key,
            OpenGoal {
                variable,
                id,
                reason,
            },
        );
        self.trail.push(Undo::GoalOpened(variable));
        true
    }

    /// Removes a goal from the set of open goals, typically because it is
    /// about to be decided.
    pub fn close_goal(&mut self, variable: &Variable) -> Option<OpenGoal> {
        let key = self.goal_keys.remove(variable)?;
        let goal = self.goals.remove(&key)?;
        self.trail.push(Undo::GoalClosed(key, goal.clone()));
        Some(goal)
    }

    /// The open goals in the order in which they were opened.
    pub fn open_goals(&self) -> impl Iterator<Item = &OpenGoal> {
        self.goals.values()
    }

    /// Returns the qualified packages that are linked to `target`.
    pub fn linked_to(&self, target: QualifiedName) -> impl Iterator<Item = QualifiedName> + '_ {
        self.packages.iter().filter_map(move |(qpn, value)| match value {
            PackageValue::Linked(t) if *t == target => Some(*qpn),
            _ => None,
        })
    }

    /// Takes a snapshot of the decisions.
    pub fn assignment(&self) -> Assignment {
        Assignment {
            packages: self
                .packages
                .iter()
                .map(|(qpn, value)| (*qpn, *value))
                .collect(),
            flags: self.flags.clone(),
            stanzas: self.stanzas.clone(),
        }
    }
}

/// A complete set of decisions that satisfies every goal.
#[derive(Clone, Debug, Default)]
pub(crate) struct Assignment {
    /// Decided packages in the order in which they were decided.
    pub packages: IndexMap<QualifiedName, PackageValue, ahash::RandomState>,
    pub flags: HashMap<(QualifiedName, FlagId), bool>,
    pub stanzas: HashMap<(QualifiedName, Stanza), bool>,
}

impl Assignment {
    /// Returns the qualified package that owns the instance of `qpn`.
    pub fn resolve_link(&self, qpn: QualifiedName) -> QualifiedName {
        match self.packages.get(&qpn) {
            Some(PackageValue::Linked(target)) => *target,
            _ => qpn,
        }
    }

    pub fn flag(&self, qpn: QualifiedName, flag: FlagId) -> Option<bool> {
        self.flags.get(&(qpn, flag)).copied()
    }

    pub fn stanza(&self, qpn: QualifiedName, stanza: Stanza) -> Option<bool> {
        self.stanzas.get(&(qpn, stanza)).copied()
    }
}
