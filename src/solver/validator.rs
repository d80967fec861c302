//! Checks every choice the explorer makes against the constraints that are
//! active on the current path.
//!
//! The validator owns the [`SearchState`]. Applying a choice either extends
//! the state (assigning the variable, activating dependencies and opening
//! new goals) or fails with a [`Rejection`] that carries the conflict set of
//! the failure. A rejected choice may leave partial changes behind, the
//! explorer always resets the state to the mark it took before the choice.

use ahash::{HashMap, HashSet};

use crate::{
    conflict::{ConflictSet, FailReason},
    error::InternalError,
    internal::id::VariableId,
    package::{ChoiceRule, CondTree, Condition, Dependency, DependencyKind, Instance, Stanza},
    qualified::{Choice, QualifiedName, Variable},
    request::UserConstraint,
    solver::{
        cache::SolverCache,
        condition, linking,
        state::{ActiveRange, Edge, OpenGoal, PackageValue, SearchState},
        variable_map::VariableMap,
    },
    FlagId, PackageIndex, SolvableId,
};

/// A choice that is inconsistent with the current path.
#[derive(Debug, Clone)]
pub(crate) struct Rejection {
    pub reason: FailReason,
    pub conflict: ConflictSet,
}

/// The ways applying a choice can fail.
#[derive(Debug)]
pub(crate) enum Failure {
    Rejected(Rejection),
    Internal(InternalError),
}

impl From<InternalError> for Failure {
    fn from(value: InternalError) -> Self {
        Failure::Internal(value)
    }
}

impl From<Rejection> for Failure {
    fn from(value: Rejection) -> Self {
        Failure::Rejected(value)
    }
}

fn reject(reason: FailReason, conflict: ConflictSet) -> Failure {
    Failure::Rejected(Rejection { reason, conflict })
}

/// How a dependency tree is walked.
#[derive(Copy, Clone)]
enum Walk {
    /// Activate every dependency whose conditions are decided.
    Fresh,
    /// The flag was just decided. Only activate the parts of the tree that
    /// became decided because of it.
    FlagDecided(FlagId),
}

pub(crate) struct Validator<'c, 'p, D: PackageIndex> {
    cache: &'c SolverCache<'p, D>,
    variables: VariableMap,
    state: SearchState,
}

impl<'c, 'p, D: PackageIndex> Validator<'c, 'p, D> {
    pub fn new(cache: &'c SolverCache<'p, D>) -> Self {
        Self {
            cache,
            variables: VariableMap::default(),
            state: SearchState::default(),
        }
    }

    pub fn cache(&self) -> &'c SolverCache<'p, D> {
        self.cache
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SearchState {
        &mut self.state
    }

    pub fn variables(&self) -> &VariableMap {
        &self.variables
    }

    fn var(&mut self, variable: Variable) -> VariableId {
        self.variables.intern(variable)
    }

    /// Opens the goal of a top-level package.
    pub fn add_root_goal(&mut self, qpn: QualifiedName) {
        let variable = Variable::Package(qpn);
        let id = self.var(variable);
        self.state.open_goal(variable, id, ConflictSet::new());
    }

    /// Applies a choice for the variable of `goal`. The goal must already be
    /// closed.
    pub fn apply(&mut self, goal: &OpenGoal, choice: Choice) -> Result<(), Failure> {
        match (goal.variable, choice) {
            (Variable::Package(qpn), Choice::Instance(solvable)) => {
                self.choose_instance(qpn, goal.id, solvable)
            }
            (Variable::Package(qpn), Choice::Link(target)) => {
                self.choose_link(qpn, goal.id, target)
            }
            (Variable::Flag(qpn, flag), Choice::Flag(value)) => {
                self.choose_flag(qpn, flag, goal.id, value)
            }
            (Variable::Stanza(qpn, stanza), Choice::Stanza(value)) => {
                self.choose_stanza(qpn, stanza, goal.id, value)
            }
            (variable, _) => Err(InternalError::MismatchedChoice(variable).into()),
        }
    }

    fn choose_instance(
        &mut self,
        qpn: QualifiedName,
        qid: VariableId,
        solvable: SolvableId,
    ) -> Result<(), Failure> {
        let cache = self.cache;
        let instance = cache.instance(solvable);
        let own = ConflictSet::singleton(qid);

        if !cache.config().allow_new_installs && !instance.is_installed() {
            return Err(reject(
                FailReason::NewInstallsDisallowed {
                    package: qpn,
                    instance: solvable,
                },
                own,
            ));
        }

        if let Some(constraint) = cache.rejecting_constraint(qpn, instance) {
            return Err(reject(
                FailReason::UserConstraint {
                    package: qpn,
                    constraint: constraint.clone(),
                },
                own,
            ));
        }

        if instance.is_installed() {
            if let Some(constraint) = self.installed_constraint_violation(qpn, instance) {
                return Err(reject(
                    FailReason::UserConstraint {
                        package: qpn,
                        constraint: constraint.clone(),
                    },
                    own,
                ));
            }
        }

        if let Some(active) = self
            .state
            .ranges(&qpn)
            .iter()
            .find(|active| !active.range.contains(&instance.version))
        {
            return Err(reject(
                FailReason::VersionMismatch {
                    package: qpn,
                    instance: solvable,
                    required_by: active.consumer,
                    range: active.range.clone(),
                },
                own.with(&active.origin),
            ));
        }

        if !instance.is_installed() && cache.is_single_instance(qpn.name) {
            let other = self.state.packages().find_map(|(other, value)| match value {
                PackageValue::Instance(s)
                    if other.name == qpn.name
                        && *other != qpn
                        && !cache.instance(*s).is_installed() =>
                {
                    Some(*other)
                }
                _ => None,
            });
            if let Some(other) = other {
                let other_id = self.var(Variable::Package(other));
                return Err(reject(
                    FailReason::SingleInstance {
                        package: qpn,
                        other,
                    },
                    own.with_variable(other_id),
                ));
            }
        }

        tracing::trace!(
            "│ │ assigned {} = {}",
            qpn.display(cache.provider()),
            cache.provider().display_solvable(solvable)
        );
        self.state
            .assign_package(qpn, PackageValue::Instance(solvable));

        if !instance.is_installed() {
            for decl in &instance.flags {
                let variable = Variable::Flag(qpn, decl.name);
                let id = self.var(variable);
                self.state.open_goal(variable, id, own.clone());
            }
            for &stanza in &instance.stanzas {
                let variable = Variable::Stanza(qpn, stanza);
                let id = self.var(variable);
                self.state.open_goal(variable, id, own.clone());
            }
        }

        self.activate_tree(qpn, instance, &instance.library, &own, Walk::Fresh)?;

        if !instance.is_installed() {
            for dependency in &instance.setup {
                self.activate(qpn, dependency, own.clone())?;
            }
        }

        Ok(())
    }

    /// Installed instances have fixed flags and no stanzas. Returns the
    /// first flag or stanza constraint such an instance cannot meet.
    pub(crate) fn installed_constraint_violation(
        &self,
        qpn: QualifiedName,
        instance: &Instance,
    ) -> Option<&'p UserConstraint> {
        self.cache
            .request()
            .constraints
            .iter()
            .filter(|constraint| constraint.scope().matches(&qpn))
            .find(|constraint| match constraint {
                UserConstraint::Flag(_, flag, value) => instance
                    .flag(*flag)
                    .is_some_and(|decl| decl.default != *value),
                UserConstraint::Stanza(_, _, enabled) => *enabled,
                _ => false,
            })
    }

    fn choose_link(
        &mut self,
        qpn: QualifiedName,
        qid: VariableId,
        target: QualifiedName,
    ) -> Result<(), Failure> {
        let cache = self.cache;
        let target_id = self.var(Variable::Package(target));
        let Some(PackageValue::Instance(solvable)) = self.state.package(&target) else {
            return Err(InternalError::UndecidedPackage(target).into());
        };
        let instance = cache.instance(solvable);
        let base = ConflictSet::singleton(qid).with_variable(target_id);

        if let Some(constraint) = cache.rejecting_constraint(qpn, instance) {
            return Err(reject(
                FailReason::UserConstraint {
                    package: qpn,
                    constraint: constraint.clone(),
                },
                base,
            ));
        }

        if let Some(active) = self
            .state
            .ranges(&qpn)
            .iter()
            .find(|active| !active.range.contains(&instance.version))
        {
            return Err(reject(
                FailReason::VersionMismatch {
                    package: qpn,
                    instance: solvable,
                    required_by: active.consumer,
                    range: active.range.clone(),
                },
                base.with(&active.origin),
            ));
        }

        if let Some((constraint, variable)) =
            linking::violated_choice_constraint(cache.request(), &self.state, qpn, target)
        {
            let id = self.var(variable);
            return Err(reject(
                FailReason::UserConstraint {
                    package: qpn,
                    constraint: constraint.clone(),
                },
                base.with_variable(id),
            ));
        }

        tracing::trace!(
            "│ │ linked {} to {}",
            qpn.display(cache.provider()),
            target.display(cache.provider())
        );
        self.state.assign_package(qpn, PackageValue::Linked(target));

        // Edges that pointed at the package now point at the target.
        let consumers: Vec<QualifiedName> = self
            .state
            .edges()
            .iter()
            .filter(|edge| edge.kind == DependencyKind::Library && edge.to == qpn)
            .map(|edge| edge.from)
            .collect();
        for consumer in consumers {
            self.check_library_cycle(consumer, qpn)?;
        }

        Ok(())
    }

    fn choose_flag(
        &mut self,
        qpn: QualifiedName,
        flag: FlagId,
        fid: VariableId,
        value: bool,
    ) -> Result<(), Failure> {
        let cache = self.cache;
        let own = ConflictSet::singleton(fid);

        let violates = |constraint: &UserConstraint| {
            matches!(constraint, UserConstraint::Flag(_, f, v) if *f == flag && *v != value)
        };
        if let Some(constraint) = cache.request().constraints_for(&qpn).find(|&c| violates(c)) {
            return Err(reject(
                FailReason::UserConstraint {
                    package: qpn,
                    constraint: constraint.clone(),
                },
                own,
            ));
        }
        let qid = self.var(Variable::Package(qpn));
        let linked: Vec<QualifiedName> = self.state.linked_to(qpn).collect();
        for other in linked {
            if let Some(constraint) = cache.request().constraints_for(&other).find(|&c| violates(c))
            {
                let other_id = self.var(Variable::Package(other));
                return Err(reject(
                    FailReason::UserConstraint {
                        package: other,
                        constraint: constraint.clone(),
                    },
                    own.with_variable(qid).with_variable(other_id),
                ));
            }
        }

        let Some(PackageValue::Instance(solvable)) = self.state.package(&qpn) else {
            return Err(InternalError::UndecidedPackage(qpn).into());
        };
        let instance = cache.instance(solvable);

        self.state.assign_flag(qpn, flag, value);

        for rule in &instance.rules {
            match *rule {
                ChoiceRule::StanzaRequiresFlag {
                    stanza,
                    flag: required,
                    value: required_value,
                } if required == flag
                    && required_value != value
                    && self.state.stanza(qpn, stanza) == Some(true) =>
                {
                    let sid = self.var(Variable::Stanza(qpn, stanza));
                    return Err(reject(
                        FailReason::ChoiceRule {
                            package: qpn,
                            rule: rule.clone(),
                        },
                        own.with_variable(qid).with_variable(sid),
                    ));
                }
                ChoiceRule::ExclusiveFlags(a, b) if value && (a == flag || b == flag) => {
                    let other = if a == flag { b } else { a };
                    let both = other == flag || self.state.flag(qpn, other) == Some(true);
                    if both {
                        let other_id = self.var(Variable::Flag(qpn, other));
                        return Err(reject(
                            FailReason::ChoiceRule {
                                package: qpn,
                                rule: rule.clone(),
                            },
                            own.with_variable(qid).with_variable(other_id),
                        ));
                    }
                }
                _ => {}
            }
        }

        let base = ConflictSet::singleton(qid);
        self.activate_tree(qpn, instance, &instance.library, &base, Walk::FlagDecided(flag))?;
        for (stanza, tree) in &instance.stanza_deps {
            if self.state.stanza(qpn, *stanza) == Some(true) {
                let sid = self.var(Variable::Stanza(qpn, *stanza));
                let origin = base.clone().with_variable(sid);
                self.activate_tree(qpn, instance, tree, &origin, Walk::FlagDecided(flag))?;
            }
        }

        Ok(())
    }

    fn choose_stanza(
        &mut self,
        qpn: QualifiedName,
        stanza: Stanza,
        sid: VariableId,
        enabled: bool,
    ) -> Result<(), Failure> {
        let cache = self.cache;
        let own = ConflictSet::singleton(sid);

        let violates = |constraint: &UserConstraint| {
            matches!(constraint, UserConstraint::Stanza(_, s, v) if *s == stanza && *v != enabled)
        };
        if let Some(constraint) = cache.request().constraints_for(&qpn).find(|&c| violates(c)) {
            return Err(reject(
                FailReason::UserConstraint {
                    package: qpn,
                    constraint: constraint.clone(),
                },
                own,
            ));
        }
        let qid = self.var(Variable::Package(qpn));
        let linked: Vec<QualifiedName> = self.state.linked_to(qpn).collect();
        for other in linked {
            if let Some(constraint) = cache.request().constraints_for(&other).find(|&c| violates(c))
            {
                let other_id = self.var(Variable::Package(other));
                return Err(reject(
                    FailReason::UserConstraint {
                        package: other,
                        constraint: constraint.clone(),
                    },
                    own.with_variable(qid).with_variable(other_id),
                ));
            }
        }

        let Some(PackageValue::Instance(solvable)) = self.state.package(&qpn) else {
            return Err(InternalError::UndecidedPackage(qpn).into());
        };
        let instance = cache.instance(solvable);

        self.state.assign_stanza(qpn, stanza, enabled);
        if !enabled {
            return Ok(());
        }

        for rule in &instance.rules {
            if let ChoiceRule::StanzaRequiresFlag {
                stanza: ruled,
                flag,
                value,
            } = *rule
            {
                if ruled == stanza && self.state.flag(qpn, flag) == Some(!value) {
                    let fid = self.var(Variable::Flag(qpn, flag));
                    return Err(reject(
                        FailReason::ChoiceRule {
                            package: qpn,
                            rule: rule.clone(),
                        },
                        own.with_variable(qid).with_variable(fid),
                    ));
                }
            }
        }

        if let Some(tree) = instance.stanza_tree(stanza) {
            let origin = own.with_variable(qid);
            self.activate_tree(qpn, instance, tree, &origin, Walk::Fresh)?;
        }

        Ok(())
    }

    /// Returns the value of a flag of the package as far as it is known.
    /// Installed instances always use the declared defaults.
    fn flag_value(&self, qpn: QualifiedName, instance: &Instance, flag: FlagId) -> Option<bool> {
        if instance.is_installed() {
            Some(instance.flag(flag).is_some_and(|decl| decl.default))
        } else {
            self.state.flag(qpn, flag)
        }
    }

    /// Adds the variables of the flags a condition refers to to `origin`.
    /// Flags of installed instances are fixed and never part of a conflict.
    fn condition_origin(
        &mut self,
        qpn: QualifiedName,
        instance: &Instance,
        condition: &Condition,
        origin: &ConflictSet,
    ) -> ConflictSet {
        let mut origin = origin.clone();
        if !instance.is_installed() {
            let mut flags = Vec::new();
            condition.for_each_flag(&mut |flag| flags.push(flag));
            for flag in flags {
                origin.insert(self.var(Variable::Flag(qpn, flag)));
            }
        }
        origin
    }

    fn activate_tree(
        &mut self,
        qpn: QualifiedName,
        instance: &'p Instance,
        tree: &'p CondTree,
        origin: &ConflictSet,
        walk: Walk,
    ) -> Result<(), Failure> {
        if let Walk::Fresh = walk {
            for dependency in &tree.dependencies {
                if instance.is_installed() && dependency.kind != DependencyKind::Library {
                    continue;
                }
                self.activate(qpn, dependency, origin.clone())?;
            }
        }

        for branch in &tree.branches {
            let environment = &self.cache.request().environment;
            let current = |flag: FlagId| self.flag_value(qpn, instance, flag);
            let after = condition::evaluate(&branch.condition, environment, &current);
            let next_walk = match walk {
                Walk::Fresh => Walk::Fresh,
                Walk::FlagDecided(decided) => {
                    if !condition::references_flag(&branch.condition, decided) {
                        Walk::FlagDecided(decided)
                    } else {
                        let masked = |flag: FlagId| {
                            if flag == decided {
                                None
                            } else {
                                self.flag_value(qpn, instance, flag)
                            }
                        };
                        match condition::evaluate(&branch.condition, environment, &masked) {
                            Some(_) => Walk::FlagDecided(decided),
                            None => Walk::Fresh,
                        }
                    }
                }
            };

            let Some(holds) = after else {
                continue;
            };
            let subtree = if holds { &branch.then } else { &branch.otherwise };
            let branch_origin = self.condition_origin(qpn, instance, &branch.condition, origin);
            self.activate_tree(qpn, instance, subtree, &branch_origin, next_walk)?;
        }

        Ok(())
    }

    /// Activates a single dependency of `consumer`.
    fn activate(
        &mut self,
        consumer: QualifiedName,
        dependency: &Dependency,
        origin: ConflictSet,
    ) -> Result<(), Failure> {
        let cache = self.cache;
        let target = consumer.dependency(dependency.name, dependency.kind);
        let target_variable = Variable::Package(target);
        let target_id = self.var(target_variable);

        tracing::trace!(
            "│ │ activating {} -> {} {}",
            consumer.display(cache.provider()),
            target.display(cache.provider()),
            dependency.range
        );

        self.state.add_edge(Edge {
            from: consumer,
            to: target,
            kind: dependency.kind,
            origin: origin.clone(),
        });
        self.state.add_range(
            target,
            ActiveRange {
                consumer,
                range: dependency.range.clone(),
                origin: origin.clone(),
            },
        );

        if let Some((solvable, link)) = self.state.instance_of(&target) {
            if !dependency.range.contains(&cache.instance(solvable).version) {
                let mut conflict = origin.with_variable(target_id);
                if let Some(link) = link {
                    conflict.insert(self.var(Variable::Package(link)));
                }
                return Err(reject(
                    FailReason::VersionMismatch {
                        package: target,
                        instance: solvable,
                        required_by: consumer,
                        range: dependency.range.clone(),
                    },
                    conflict,
                ));
            }
            if dependency.kind == DependencyKind::Library {
                self.check_library_cycle(consumer, target)?;
            }
            return Ok(());
        }

        if cache.candidates(target.name).is_none() {
            return Err(reject(
                FailReason::UnknownPackage {
                    package: target,
                    required_by: consumer,
                },
                origin.with_variable(target_id),
            ));
        }

        self.check_satisfiable(target, target_id)?;
        self.state.open_goal(target_variable, target_id, origin);
        Ok(())
    }

    /// Fails if no admissible candidate of `qpn` satisfies every range that
    /// is currently required of it.
    fn check_satisfiable(&self, qpn: QualifiedName, id: VariableId) -> Result<(), Failure> {
        let cache = self.cache;
        let ranges = self.state.ranges(&qpn);
        let satisfiable = cache.admissible_candidates(qpn).iter().any(|&solvable| {
            let version = &cache.instance(solvable).version;
            ranges.iter().all(|active| active.range.contains(version))
        });
        if satisfiable {
            return Ok(());
        }

        let mut conflict = ConflictSet::singleton(id);
        for active in ranges {
            conflict.union(&active.origin);
        }
        Err(reject(
            FailReason::NoMatchingInstance {
                package: qpn,
                requirements: ranges
                    .iter()
                    .map(|active| (active.consumer, active.range.clone()))
                    .collect(),
            },
            conflict,
        ))
    }

    /// Fails if the library edge `consumer -> target` closes a cycle of
    /// library edges between decided packages.
    fn check_library_cycle(
        &mut self,
        consumer: QualifiedName,
        target: QualifiedName,
    ) -> Result<(), Failure> {
        let state = &self.state;
        let start = state.resolve_link(target);
        let goal = state.resolve_link(consumer);

        let edges = state.edges();
        let mut adjacency: HashMap<QualifiedName, Vec<usize>> = HashMap::default();
        for (index, edge) in edges.iter().enumerate() {
            if edge.kind == DependencyKind::Library {
                adjacency
                    .entry(state.resolve_link(edge.from))
                    .or_default()
                    .push(index);
            }
        }

        // Breadth-first search from the target back to the consumer,
        // remembering the edge through which every node was reached.
        let mut reached_by: HashMap<QualifiedName, usize> = HashMap::default();
        let mut visited: HashSet<QualifiedName> = HashSet::default();
        visited.insert(start);
        let mut queue = std::collections::VecDeque::from([start]);
        let mut found = false;
        while let Some(node) = queue.pop_front() {
            if node == goal {
                found = true;
                break;
            }
            for &index in adjacency.get(&node).into_iter().flatten() {
                let next = state.resolve_link(edges[index].to);
                if visited.insert(next) {
                    reached_by.insert(next, index);
                    queue.push_back(next);
                }
            }
        }
        if !found {
            return Ok(());
        }

        let mut path = Vec::new();
        let mut node = goal;
        while node != start {
            let Some(&index) = reached_by.get(&node) else {
                break;
            };
            path.push(index);
            node = state.resolve_link(edges[index].from);
        }
        path.reverse();

        let mut packages = vec![goal, start];
        let mut involved = vec![consumer, target, goal, start];
        let mut conflict = ConflictSet::new();
        for &index in &path {
            let edge = &edges[index];
            packages.push(state.resolve_link(edge.to));
            involved.extend([edge.from, edge.to]);
            involved.extend([state.resolve_link(edge.from), state.resolve_link(edge.to)]);
            conflict.union(&edge.origin);
        }
        if let Some(edge) = edges
            .iter()
            .rev()
            .find(|edge| edge.from == consumer && edge.to == target)
        {
            conflict.union(&edge.origin);
        }

        for qpn in involved {
            conflict.insert(self.var(Variable::Package(qpn)));
        }

        Err(reject(FailReason::Cycle { packages }, conflict))
    }
}
