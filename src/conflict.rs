//! Types to examine why a problem was unsatisfiable, and to report the causes
//! to the user.

use std::{
    fmt,
    fmt::{Display, Formatter},
};

use ahash::HashMap;
use bitvec::vec::BitVec;
use itertools::Itertools;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::{
    internal::{arena::ArenaId, id::VariableId},
    log::{SearchStats, SolveLog},
    package::ChoiceRule,
    qualified::{Choice, QualifiedName, Variable},
    request::{ConstraintScope, UserConstraint},
    version::VersionRange,
    Interner, SolvableId,
};

/// A set of variables whose joint assignment caused a failure.
///
/// Any assignment that agrees with the failing assignment on all variables of
/// the set fails in the same way, which is what allows the solver to skip
/// decisions that are not part of the set when backtracking.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConflictSet {
    bits: BitVec,
}

impl ConflictSet {
    /// Constructs an empty set.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Constructs a set with a single variable.
    pub(crate) fn singleton(id: VariableId) -> Self {
        let mut set = Self::new();
        set.insert(id);
        set
    }

    pub(crate) fn insert(&mut self, id: VariableId) {
        let index = id.to_usize();
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits.set(index, true);
    }

    pub(crate) fn contains(&self, id: VariableId) -> bool {
        self.bits.get(id.to_usize()).is_some_and(|bit| *bit)
    }

    /// Adds all variables of `other` to this set.
    pub(crate) fn union(&mut self, other: &ConflictSet) {
        if other.bits.len() > self.bits.len() {
            self.bits.resize(other.bits.len(), false);
        }
        for index in other.bits.iter_ones() {
            self.bits.set(index, true);
        }
    }

    /// Returns the union of this set and `other`.
    pub(crate) fn with(mut self, other: &ConflictSet) -> Self {
        self.union(other);
        self
    }

    /// Returns this set extended with a single variable.
    pub(crate) fn with_variable(mut self, id: VariableId) -> Self {
        self.insert(id);
        self
    }

    /// Iterates over the ids in the set in ascending order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.bits.iter_ones().map(VariableId::from_usize)
    }

    /// Returns the number of variables in the set.
    pub fn len(&self) -> usize {
        self.bits.count_ones()
    }

    /// Returns true if the set does not contain any variable.
    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }
}

impl fmt::Debug for ConflictSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.bits.iter_ones()).finish()
    }
}

/// Describes why the validator rejected a choice.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailReason {
    /// The instance lies outside the range another package requires.
    VersionMismatch {
        /// The package the instance was chosen for
        package: QualifiedName,
        /// The rejected instance
        instance: SolvableId,
        /// The package that requires the range
        required_by: QualifiedName,
        /// The required range
        range: VersionRange,
    },
    /// A user constraint forbids the choice.
    UserConstraint {
        /// The package the choice was made for
        package: QualifiedName,
        /// The violated constraint
        constraint: UserConstraint,
    },
    /// The instance would have to be built, but new installs are disabled.
    NewInstallsDisallowed {
        /// The package the instance was chosen for
        package: QualifiedName,
        /// The rejected instance
        instance: SolvableId,
    },
    /// No known instance satisfies all ranges required of the package.
    NoMatchingInstance {
        /// The package that cannot be satisfied
        package: QualifiedName,
        /// Every active requirement on the package together with the
        /// package that imposes it
        requirements: Vec<(QualifiedName, VersionRange)>,
    },
    /// A package depends on a package that is not known.
    UnknownPackage {
        /// The unknown package
        package: QualifiedName,
        /// The package with the dependency
        required_by: QualifiedName,
    },
    /// A restriction a package places on its own flags and stanzas does not
    /// hold.
    ChoiceRule {
        /// The package that declares the rule
        package: QualifiedName,
        /// The violated rule
        rule: ChoiceRule,
    },
    /// The package may only be built once, but another occurrence of it
    /// already builds an instance.
    SingleInstance {
        /// The package the instance was chosen for
        package: QualifiedName,
        /// The occurrence that already builds an instance
        other: QualifiedName,
    },
    /// The library dependencies form a cycle.
    Cycle {
        /// The packages on the cycle, starting and ending with the same
        /// package
        packages: Vec<QualifiedName>,
    },
}

impl FailReason {
    /// Returns an object that formats the reason in a user-friendly way.
    pub fn display<'i, I: Interner>(&'i self, interner: &'i I) -> DisplayFailReason<'i, I> {
        DisplayFailReason {
            reason: self,
            interner,
        }
    }
}

/// Formats a [`FailReason`], see [`FailReason::display`].
pub struct DisplayFailReason<'i, I: Interner> {
    reason: &'i FailReason,
    interner: &'i I,
}

/// Formats a requirement on a package, omitting the range when it is
/// unrestricted.
struct DisplayRequirement<'i, I: Interner> {
    package: QualifiedName,
    range: &'i VersionRange,
    interner: &'i I,
}

impl<I: Interner> Display for DisplayRequirement<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if *self.range == VersionRange::full() {
            write!(f, "{}", self.package.display(self.interner))
        } else {
            write!(f, "{} {}", self.package.display(self.interner), self.range)
        }
    }
}

impl<I: Interner> Display for DisplayFailReason<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let interner = self.interner;
        match self.reason {
            FailReason::VersionMismatch {
                package,
                required_by,
                range,
                ..
            } => write!(
                f,
                "{} requires {}",
                required_by.display(interner),
                DisplayRequirement {
                    package: *package,
                    range,
                    interner
                }
            ),
            FailReason::UserConstraint { constraint, .. } => {
                write!(f, "it violates the constraint ")?;
                display_constraint(f, constraint, interner)
            }
            FailReason::NewInstallsDisallowed { .. } => {
                write!(f, "it is not installed and new installs are disabled")
            }
            FailReason::NoMatchingInstance {
                package,
                requirements,
            } => {
                let mut requirements = requirements.iter().peekable();
                let Some((first_by, first_range)) = requirements.next() else {
                    return write!(f, "no version of {} exists", package.display(interner));
                };
                write!(
                    f,
                    "{} requires {}",
                    first_by.display(interner),
                    DisplayRequirement {
                        package: *package,
                        range: first_range,
                        interner
                    }
                )?;
                if requirements.peek().is_none() {
                    return write!(f, ", but no such version exists");
                }
                for (required_by, range) in requirements {
                    write!(
                        f,
                        ", but {} requires {}",
                        required_by.display(interner),
                        DisplayRequirement {
                            package: *package,
                            range,
                            interner
                        }
                    )?;
                }
                Ok(())
            }
            FailReason::UnknownPackage {
                package,
                required_by,
            } => write!(
                f,
                "{} requires {}, which does not exist",
                required_by.display(interner),
                package.display(interner)
            ),
            FailReason::ChoiceRule { package, rule } => match rule {
                ChoiceRule::StanzaRequiresFlag {
                    stanza,
                    flag,
                    value,
                } => write!(
                    f,
                    "the {stanza} stanza of {} requires flag {}{}",
                    package.display(interner),
                    if *value { "+" } else { "-" },
                    interner.display_flag(*flag)
                ),
                ChoiceRule::ExclusiveFlags(a, b) => write!(
                    f,
                    "flags {} and {} of {} are mutually exclusive",
                    interner.display_flag(*a),
                    interner.display_flag(*b),
                    package.display(interner)
                ),
            },
            FailReason::SingleInstance { package, other } => write!(
                f,
                "{} may only be built once, but {} already builds it",
                package.display(interner),
                other.display(interner)
            ),
            FailReason::Cycle { packages } => write!(
                f,
                "of the dependency cycle {}",
                packages
                    .iter()
                    .format_with(" -> ", |qpn, f| f(&qpn.display(interner)))
            ),
        }
    }
}

fn display_constraint(
    f: &mut Formatter<'_>,
    constraint: &UserConstraint,
    interner: &impl Interner,
) -> fmt::Result {
    let scope = match constraint.scope() {
        ConstraintScope::Any(name) => interner.display_name(*name).to_string(),
        ConstraintScope::Qualified(qpn) => qpn.display(interner).to_string(),
    };
    match constraint {
        UserConstraint::Version(_, range) => write!(f, "{scope} {range}"),
        UserConstraint::Installed(_) => write!(f, "{scope} installed"),
        UserConstraint::Source(_) => write!(f, "{scope} source"),
        UserConstraint::Flag(_, flag, value) => write!(
            f,
            "{scope} {}{}",
            if *value { "+" } else { "-" },
            interner.display_flag(*flag)
        ),
        UserConstraint::Stanza(_, stanza, value) => write!(
            f,
            "{scope} {} {stanza}",
            if *value { "with" } else { "without" }
        ),
    }
}

/// What happened after the solver made a choice for a variable.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    /// The choice was rejected immediately.
    Rejected(FailReason),
    /// The choice was accepted, but a later goal could not be satisfied.
    Failed(Box<NodeFailure>),
}

/// A choice the solver tried for a variable.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attempt {
    /// The tried value
    pub choice: Choice,
    /// Why the choice did not lead to a solution
    pub outcome: Outcome,
}

/// Explains why no choice for a variable led to a solution.
///
/// Choices that were skipped because they could not possibly have resolved
/// the conflict are not listed.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeFailure {
    /// The variable that could not be decided
    pub variable: Variable,
    /// The choices that were tried, in order
    pub attempts: Vec<Attempt>,
    /// The conflict set with which the variable failed
    pub conflict: Vec<Variable>,
}

/// One step of the final cascade of failures: the variable whose node failed
/// and the conflict set it passed on.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackjumpStep {
    /// The variable whose node failed
    pub variable: Variable,
    /// The variable the search resumed at, `None` if the search ended
    pub resumed_at: Option<Variable>,
    /// The conflict set that was passed upwards
    pub conflict: Vec<Variable>,
}

/// Represents the cause of the solver being unable to find a solution.
#[derive(Debug)]
pub struct Conflict {
    pub(crate) conflict: Vec<Variable>,
    pub(crate) root: NodeFailure,
    pub(crate) chain: Vec<BackjumpStep>,
    pub(crate) log: SolveLog,
    pub(crate) stats: SearchStats,
}

impl Conflict {
    /// The conflict set of the final failure.
    pub fn conflict_set(&self) -> &[Variable] {
        &self.conflict
    }

    /// The tree of failures that led to the final failure, rooted at the
    /// first goal the solver tried to satisfy.
    pub fn root(&self) -> &NodeFailure {
        &self.root
    }

    /// The cascade of failing nodes that ended the search, deepest first.
    pub fn chain(&self) -> &[BackjumpStep] {
        &self.chain
    }

    /// The log of the search.
    pub fn log(&self) -> &SolveLog {
        &self.log
    }

    /// The amount of work the search performed before it gave up.
    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    /// Returns the shortest sequence of decisions from the start of the search
    /// that reproduces the final failure.
    ///
    /// The decisions are taken from the last path the solver explored. The
    /// path is cut after the last decision that takes part in the conflict
    /// of the deepest failing node.
    pub fn explanation(&self) -> Vec<(Variable, Choice)> {
        let mut path = Vec::new();
        let mut node = &self.root;
        while let Some(Attempt {
            choice,
            outcome: Outcome::Failed(child),
        }) = node.attempts.last()
        {
            path.push((node.variable, *choice));
            node = &**child;
        }

        let cut = path
            .iter()
            .rposition(|(variable, _)| node.conflict.contains(variable))
            .map_or(0, |index| index + 1);
        path.truncate(cut);
        path
    }

    /// Generates a graph representation of the conflict (see [`ConflictGraph`]
    /// for details)
    pub fn graph(&self) -> ConflictGraph {
        let mut graph = DiGraph::<ConflictNode, ConflictEdge>::default();
        let mut nodes: HashMap<Variable, NodeIndex> = HashMap::default();
        let root_node = graph.add_node(ConflictNode::Root);

        let mut stack = vec![(root_node, None, &self.root)];
        while let Some((parent, choice, failure)) = stack.pop() {
            let node = *nodes
                .entry(failure.variable)
                .or_insert_with(|| graph.add_node(ConflictNode::Variable(failure.variable)));
            graph.add_edge(parent, node, ConflictEdge::Explored(choice));

            for attempt in &failure.attempts {
                match &attempt.outcome {
                    Outcome::Rejected(reason) => {
                        let reason_node = graph.add_node(ConflictNode::Reason(reason.clone()));
                        graph.add_edge(node, reason_node, ConflictEdge::Rejected(attempt.choice));
                    }
                    Outcome::Failed(child) => stack.push((node, Some(attempt.choice), &**child)),
                }
            }
        }

        ConflictGraph { graph, root_node }
    }

    /// Returns an object that implements [`fmt::Display`], which explains
    /// the conflict in a user-friendly way.
    pub fn display_user_friendly<'a, I: Interner>(&'a self, interner: &'a I) -> DisplayUnsat<'a, I> {
        DisplayUnsat {
            conflict: self,
            interner,
        }
    }
}

/// A node in the graph representation of a [`Conflict`]
#[derive(Clone, Debug)]
pub enum ConflictNode {
    /// The start of the search
    Root,
    /// A variable the solver tried to decide
    Variable(Variable),
    /// The reason a choice was rejected
    Reason(FailReason),
}

/// An edge in the graph representation of a [`Conflict`]
#[derive(Copy, Clone, Debug)]
pub enum ConflictEdge {
    /// The search reached the target variable after making the choice (no
    /// choice for edges leaving the root).
    Explored(Option<Choice>),
    /// The choice was rejected for the target reason.
    Rejected(Choice),
}

/// Represents a conflict as a directed graph: variable nodes are connected
/// by the choices that led from one to the other, rejected choices point to
/// the reason of their rejection.
pub struct ConflictGraph {
    graph: DiGraph<ConflictNode, ConflictEdge>,
    root_node: NodeIndex,
}

impl ConflictGraph {
    /// Returns the underlying graph.
    pub fn graph(&self) -> &DiGraph<ConflictNode, ConflictEdge> {
        &self.graph
    }

    /// Returns the node from which the search started.
    pub fn root(&self) -> NodeIndex {
        self.root_node
    }

    /// Writes a graphviz graph that represents this instance to the specified
    /// output.
    pub fn graphviz(
        &self,
        f: &mut impl std::io::Write,
        interner: &impl Interner,
    ) -> Result<(), std::io::Error> {
        let graph = &self.graph;
        let label = |node: NodeIndex| match &graph[node] {
            ConflictNode::Root => "root".to_string(),
            ConflictNode::Variable(variable) => variable.display(interner).to_string(),
            ConflictNode::Reason(reason) => reason.display(interner).to_string(),
        };

        write!(f, "digraph {{")?;
        for edge in graph.edge_references() {
            let (color, choice) = match edge.weight() {
                ConflictEdge::Explored(choice) => ("black", *choice),
                ConflictEdge::Rejected(choice) => ("red", Some(*choice)),
            };
            let choice = choice
                .map(|choice| choice.display(interner).to_string())
                .unwrap_or_default();
            write!(
                f,
                "\"{}\" -> \"{}\"[color={color}, label=\"{}\"];",
                label(edge.source()).replace('"', "'"),
                label(edge.target()).replace('"', "'"),
                choice.replace('"', "'"),
            )?;
        }
        write!(f, "}}")
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ChildOrder {
    HasRemainingSiblings,
    Last,
}

struct Indenter {
    levels: Vec<ChildOrder>,
}

impl Indenter {
    fn new() -> Self {
        Self { levels: Vec::new() }
    }

    fn push_level_with_order(&self, order: ChildOrder) -> Self {
        let mut levels = self.levels.clone();
        levels.push(order);
        Self { levels }
    }

    fn get_indent(&self) -> String {
        let mut s = String::new();
        let deepest_level = self.levels.len().saturating_sub(1);

        for (level, &order) in self.levels.iter().enumerate() {
            let tree_prefix = match (level == deepest_level, order) {
                (true, ChildOrder::HasRemainingSiblings) => "├─",
                (true, ChildOrder::Last) => "└─",
                (false, ChildOrder::HasRemainingSiblings) => "│ ",
                (false, ChildOrder::Last) => "  ",
            };
            s.push_str(tree_prefix);
            s.push(' ');
        }

        s
    }
}

/// A struct implementing [`fmt::Display`] that generates a user-friendly
/// representation of a conflict
pub struct DisplayUnsat<'i, I: Interner> {
    conflict: &'i Conflict,
    interner: &'i I,
}

impl<I: Interner> DisplayUnsat<'_, I> {
    fn fmt_choice(&self, f: &mut Formatter<'_>, variable: Variable, choice: Choice) -> fmt::Result {
        let interner = self.interner;
        match (variable, choice) {
            (_, Choice::Instance(solvable)) => write!(f, "{}", interner.display_solvable(solvable)),
            (Variable::Package(qpn), Choice::Link(target)) => write!(
                f,
                "linking {} to {}",
                qpn.display(interner),
                target.display(interner)
            ),
            (Variable::Flag(qpn, flag), Choice::Flag(value)) => write!(
                f,
                "{} with {}{}",
                qpn.display(interner),
                if value { "+" } else { "-" },
                interner.display_flag(flag)
            ),
            (Variable::Stanza(qpn, stanza), Choice::Stanza(value)) => write!(
                f,
                "{} {} the {stanza} stanza",
                qpn.display(interner),
                if value { "with" } else { "without" }
            ),
            (variable, choice) => write!(
                f,
                "{} = {}",
                variable.display(interner),
                choice.display(interner)
            ),
        }
    }
}

impl<I: Interner> Display for DisplayUnsat<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        enum DisplayOp<'a> {
            Node(&'a NodeFailure),
            Attempt(Variable, &'a Attempt),
        }

        writeln!(f, "The following packages are incompatible")?;

        let interner = self.interner;
        let mut stack = vec![(
            DisplayOp::Node(&self.conflict.root),
            Indenter::new().push_level_with_order(ChildOrder::Last),
        )];

        while let Some((op, indenter)) = stack.pop() {
            let indent = indenter.get_indent();
            match op {
                DisplayOp::Node(node) => {
                    if node.attempts.is_empty() {
                        writeln!(
                            f,
                            "{indent}{} has no candidates",
                            node.variable.display(interner)
                        )?;
                        continue;
                    }

                    writeln!(
                        f,
                        "{indent}{} cannot be satisfied",
                        node.variable.display(interner)
                    )?;

                    // Pushed in reverse so the first attempt is printed first
                    let last = node.attempts.len() - 1;
                    for (index, attempt) in node.attempts.iter().enumerate().rev() {
                        let order = if index == last {
                            ChildOrder::Last
                        } else {
                            ChildOrder::HasRemainingSiblings
                        };
                        stack.push((
                            DisplayOp::Attempt(node.variable, attempt),
                            indenter.push_level_with_order(order),
                        ));
                    }
                }
                DisplayOp::Attempt(variable, attempt) => {
                    write!(f, "{indent}")?;
                    self.fmt_choice(f, variable, attempt.choice)?;
                    match &attempt.outcome {
                        Outcome::Rejected(reason) => {
                            writeln!(f, " is rejected: {}", reason.display(interner))?;
                        }
                        Outcome::Failed(child) => {
                            writeln!(f, " is possible, but")?;
                            stack.push((
                                DisplayOp::Node(child),
                                indenter.push_level_with_order(ChildOrder::Last),
                            ));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
