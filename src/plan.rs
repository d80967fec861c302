//! The result of a successful solve: a validated, topologically ordered
//! graph of configured packages.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    fmt::{self, Display, Formatter},
};

use ahash::{HashMap, HashSet};
use indexmap::IndexMap;
use itertools::Itertools;
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};

use crate::{
    error::PlanError,
    log::SearchStats,
    package::{DependencyKind, Environment, Instance, Location, Stanza},
    qualified::QualifiedName,
    solver::{condition, state::Assignment, state::PackageValue},
    version::{Version, VersionRange},
    FlagId, Interner, NameId, PackageIndex, SolvableId,
};

/// Identifies a package in a [`SolverInstallPlan`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlanId {
    /// The package the solver decided for a qualified name.
    Configured(QualifiedName),
    /// An installed instance that replaces a package which would otherwise
    /// have to be built as part of its own setup.
    Preinstalled(SolvableId),
}

impl PlanId {
    /// Returns an object that formats the id.
    pub fn display<'i, I: Interner>(&self, interner: &'i I) -> DisplayPlanId<'i, I> {
        DisplayPlanId {
            id: *self,
            interner,
        }
    }
}

/// Formats a [`PlanId`], see [`PlanId::display`].
pub struct DisplayPlanId<'i, I: Interner> {
    id: PlanId,
    interner: &'i I,
}

impl<I: Interner> Display for DisplayPlanId<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.id {
            PlanId::Configured(qpn) => write!(f, "{}", qpn.display(self.interner)),
            PlanId::Preinstalled(solvable) => write!(
                f,
                "{}@installed",
                self.interner
                    .display_name(self.interner.solvable_name(solvable))
            ),
        }
    }
}

/// A resolved dependency edge.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlanDependency {
    /// The package the edge points to
    pub target: PlanId,
    /// What the dependency is needed for
    pub kind: DependencyKind,
    /// The intersection of all ranges the package requires of the target
    /// for this kind of dependency
    pub range: VersionRange,
}

/// A single package of a plan, fully configured.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfiguredPackage {
    /// The id of the package in the plan
    pub id: PlanId,
    /// The chosen instance
    pub solvable: SolvableId,
    /// The name of the package
    pub name: NameId,
    /// The version of the chosen instance
    pub version: Version,
    /// Whether the instance is installed or has to be built
    pub location: Location,
    /// The value of every declared flag, ordered by flag id
    pub flags: Vec<(FlagId, bool)>,
    /// The enabled optional stanzas
    pub stanzas: Vec<Stanza>,
    /// The resolved dependencies
    pub dependencies: Vec<PlanDependency>,
}

impl ConfiguredPackage {
    /// Returns the value of a flag.
    pub fn flag(&self, flag: FlagId) -> Option<bool> {
        self.flags
            .iter()
            .find_map(|(f, value)| (*f == flag).then_some(*value))
    }

    /// Returns true if the stanza is enabled.
    pub fn has_stanza(&self, stanza: Stanza) -> bool {
        self.stanzas.contains(&stanza)
    }
}

/// A validated build plan.
///
/// The packages are stored in topological order: every package comes after
/// all of its dependencies, so building the packages in order never builds
/// a package before something it needs.
#[derive(Clone, Debug)]
pub struct SolverInstallPlan {
    packages: IndexMap<PlanId, ConfiguredPackage, ahash::RandomState>,
    /// Qualified names that share the package of another qualified name.
    aliases: IndexMap<QualifiedName, QualifiedName, ahash::RandomState>,
    stats: SearchStats,
}

impl SolverInstallPlan {
    /// Validates a set of packages and orders them topologically.
    ///
    /// Fails if a package appears twice, if a dependency is missing or does
    /// not satisfy the range required of it, or if the dependencies form a
    /// cycle.
    pub fn from_packages(
        packages: impl IntoIterator<Item = ConfiguredPackage>,
    ) -> Result<Self, PlanError> {
        Self::build(packages, IndexMap::default(), SearchStats::default())
    }

    fn build(
        packages: impl IntoIterator<Item = ConfiguredPackage>,
        aliases: IndexMap<QualifiedName, QualifiedName, ahash::RandomState>,
        stats: SearchStats,
    ) -> Result<Self, PlanError> {
        let mut by_id: IndexMap<PlanId, ConfiguredPackage, ahash::RandomState> =
            IndexMap::default();
        for package in packages {
            if by_id.contains_key(&package.id) {
                return Err(PlanError::Duplicate(package.id));
            }
            by_id.insert(package.id, package);
        }

        for package in by_id.values() {
            for dependency in &package.dependencies {
                let Some(target) = by_id.get(&dependency.target) else {
                    return Err(PlanError::MissingDependency {
                        package: package.id,
                        dependency: dependency.target,
                    });
                };
                if !dependency.range.contains(&target.version) {
                    return Err(PlanError::Inconsistent {
                        package: package.id,
                        dependency: dependency.target,
                        range: dependency.range.clone(),
                        version: target.version.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm. Among the packages whose dependencies are all
        // placed, the one that was added first goes next, so the order only
        // depends on the input order.
        let count = by_id.len();
        let mut pending = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (index, package) in by_id.values().enumerate() {
            for target in package.dependencies.iter().map(|d| d.target).unique() {
                if let Some(target) = by_id.get_index_of(&target) {
                    pending[index] += 1;
                    dependents[target].push(index);
                }
            }
        }
        let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
            .filter(|&index| pending[index] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &dependent in &dependents[index] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
        if order.len() < count {
            let graph = dependency_graph(&by_id);
            let cycle = tarjan_scc(&graph)
                .into_iter()
                .map(|component| {
                    component
                        .into_iter()
                        .map(|node| graph[node])
                        .sorted()
                        .collect::<Vec<_>>()
                })
                .filter(|ids| ids.len() > 1 || has_self_edge(&by_id, ids[0]))
                .min()
                .unwrap_or_default();
            return Err(PlanError::Cycle(cycle));
        }

        let mut slots: Vec<Option<ConfiguredPackage>> = by_id.into_values().map(Some).collect();
        let mut packages = IndexMap::with_capacity_and_hasher(count, Default::default());
        for index in order {
            if let Some(package) = slots[index].take() {
                packages.insert(package.id, package);
            }
        }

        Ok(Self {
            packages,
            aliases,
            stats,
        })
    }

    /// Returns the package with the given id.
    pub fn get(&self, id: &PlanId) -> Option<&ConfiguredPackage> {
        self.packages.get(id)
    }

    /// Returns the package that was decided for a qualified name, following
    /// links.
    pub fn lookup(&self, qpn: QualifiedName) -> Option<&ConfiguredPackage> {
        let resolved = self.aliases.get(&qpn).copied().unwrap_or(qpn);
        self.packages.get(&PlanId::Configured(resolved))
    }

    /// Returns the ids of all packages, dependencies first.
    pub fn topological_order(&self) -> impl Iterator<Item = PlanId> + '_ {
        self.packages.keys().copied()
    }

    /// Iterates over all packages, dependencies first.
    pub fn iter(&self) -> impl Iterator<Item = &ConfiguredPackage> {
        self.packages.values()
    }

    /// Returns the number of packages in the plan.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns true if the plan does not contain any package.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Returns the direct dependencies of a package.
    pub fn dependencies_of(&self, id: &PlanId) -> impl Iterator<Item = &ConfiguredPackage> + '_ {
        self.packages
            .get(id)
            .into_iter()
            .flat_map(|package| &package.dependencies)
            .filter_map(|dependency| self.packages.get(&dependency.target))
    }

    /// Returns the qualified names that were linked to another qualified
    /// name, together with their link target.
    pub fn aliases(&self) -> impl Iterator<Item = (QualifiedName, QualifiedName)> + '_ {
        self.aliases.iter().map(|(qpn, target)| (*qpn, *target))
    }

    /// The amount of work the search performed to find the plan.
    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    /// Returns the plan as a graph with an edge from every package to each
    /// of its dependencies.
    pub fn to_graph(&self) -> DiGraph<PlanId, DependencyKind> {
        dependency_graph(&self.packages)
    }

    /// Returns an object that formats the plan, one package per line in
    /// topological order.
    pub fn display<'a, I: Interner>(&'a self, interner: &'a I) -> DisplayPlan<'a, I> {
        DisplayPlan {
            plan: self,
            interner,
        }
    }
}

/// Formats a [`SolverInstallPlan`], see [`SolverInstallPlan::display`].
pub struct DisplayPlan<'a, I: Interner> {
    plan: &'a SolverInstallPlan,
    interner: &'a I,
}

impl<I: Interner> Display for DisplayPlan<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let interner = self.interner;
        for package in self.plan.iter() {
            write!(f, "{} {}", package.id.display(interner), package.version)?;
            if package.location == Location::Installed {
                write!(f, " (installed)")?;
            }
            for (flag, value) in &package.flags {
                write!(
                    f,
                    " {}{}",
                    if *value { "+" } else { "-" },
                    interner.display_flag(*flag)
                )?;
            }
            for stanza in &package.stanzas {
                write!(f, " *{stanza}")?;
            }
            if !package.dependencies.is_empty() {
                write!(
                    f,
                    " -> {}",
                    package
                        .dependencies
                        .iter()
                        .format_with(", ", |dependency, f| f(&dependency.target.display(interner)))
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn has_self_edge(
    packages: &IndexMap<PlanId, ConfiguredPackage, ahash::RandomState>,
    id: PlanId,
) -> bool {
    packages
        .get(&id)
        .is_some_and(|package| package.dependencies.iter().any(|d| d.target == id))
}

fn dependency_graph(
    packages: &IndexMap<PlanId, ConfiguredPackage, ahash::RandomState>,
) -> DiGraph<PlanId, DependencyKind> {
    let mut graph = DiGraph::default();
    let mut nodes: HashMap<PlanId, NodeIndex> = HashMap::default();
    for id in packages.keys() {
        nodes.insert(*id, graph.add_node(*id));
    }
    for package in packages.values() {
        for dependency in &package.dependencies {
            if let (Some(&from), Some(&to)) = (nodes.get(&package.id), nodes.get(&dependency.target))
            {
                graph.add_edge(from, to, dependency.kind);
            }
        }
    }
    graph
}

/// Converts a satisfying assignment into a validated plan.
pub(crate) struct PlanAssembler<'a, D: PackageIndex> {
    provider: &'a D,
    environment: &'a Environment,
    assignment: &'a Assignment,
    packages: IndexMap<PlanId, ConfiguredPackage, ahash::RandomState>,
}

impl<'a, D: PackageIndex> PlanAssembler<'a, D> {
    pub fn new(provider: &'a D, environment: &'a Environment, assignment: &'a Assignment) -> Self {
        Self {
            provider,
            environment,
            assignment,
            packages: IndexMap::default(),
        }
    }

    /// Builds the plan. `roots` are the qualified names of the top-level
    /// goals, packages that are not reachable from them after breaking
    /// setup cycles are dropped.
    pub fn assemble(
        mut self,
        roots: &[QualifiedName],
        stats: SearchStats,
    ) -> Result<SolverInstallPlan, PlanError> {
        let mut aliases = IndexMap::default();
        for (&qpn, value) in &self.assignment.packages {
            match *value {
                PackageValue::Instance(solvable) => {
                    let package = self.configure(qpn, solvable)?;
                    self.packages.insert(package.id, package);
                }
                PackageValue::Linked(target) => {
                    aliases.insert(qpn, target);
                }
            }
        }

        let substituted = self.break_setup_cycles()?;
        if substituted {
            self.prune(roots);
        }

        tracing::debug!(
            "assembled a plan of {} packages ({} linked)",
            self.packages.len(),
            aliases.len()
        );
        SolverInstallPlan::build(self.packages.into_values(), aliases, stats)
    }

    /// Configures the package decided for `qpn`.
    fn configure(
        &self,
        qpn: QualifiedName,
        solvable: SolvableId,
    ) -> Result<ConfiguredPackage, PlanError> {
        let instance = self.provider.instance(solvable);
        let assignment = self.assignment;

        let mut flags: Vec<(FlagId, bool)> = instance
            .flags
            .iter()
            .map(|decl| {
                let value = if instance.is_installed() {
                    decl.default
                } else {
                    assignment.flag(qpn, decl.name).unwrap_or(decl.default)
                };
                (decl.name, value)
            })
            .collect();
        flags.sort_by_key(|(flag, _)| *flag);

        let stanzas: Vec<Stanza> = if instance.is_installed() {
            Vec::new()
        } else {
            instance
                .stanzas
                .iter()
                .copied()
                .filter(|stanza| assignment.stanza(qpn, *stanza) == Some(true))
                .collect()
        };

        let mut dependencies = Vec::new();
        for (kind, name, range) in resolved_dependencies(instance, &flags, &stanzas, self.environment)
        {
            let target = assignment.resolve_link(qpn.dependency(name, kind));
            if !assignment.packages.contains_key(&target) {
                return Err(PlanError::MissingDependency {
                    package: PlanId::Configured(qpn),
                    dependency: PlanId::Configured(target),
                });
            }
            add_dependency(&mut dependencies, PlanId::Configured(target), kind, range);
        }

        Ok(ConfiguredPackage {
            id: PlanId::Configured(qpn),
            solvable,
            name: instance.name,
            version: instance.version.clone(),
            location: instance.location,
            flags,
            stanzas,
            dependencies,
        })
    }

    /// Breaks every dependency cycle that passes through a setup or build
    /// tool edge by replacing the package that is needed to build itself
    /// with an installed instance. Returns true if anything was replaced.
    fn break_setup_cycles(&mut self) -> Result<bool, PlanError> {
        let mut substituted = false;
        // Every round redirects one edge, a plan has finitely many edges.
        let max_rounds = self
            .packages
            .values()
            .map(|package| package.dependencies.len())
            .sum::<usize>()
            + 1;

        for _ in 0..max_rounds {
            let graph = dependency_graph(&self.packages);
            let Some(component) = tarjan_scc(&graph)
                .into_iter()
                .map(|component| {
                    let mut ids: Vec<PlanId> =
                        component.into_iter().map(|node| graph[node]).collect();
                    ids.sort();
                    ids
                })
                .filter(|ids| ids.len() > 1 || has_self_edge(&self.packages, ids[0]))
                .min()
            else {
                return Ok(substituted);
            };

            let members: HashSet<PlanId> = component.iter().copied().collect();
            let Some((consumer, redirect)) = self.cycle_entry(&component, &members) else {
                return Err(PlanError::Cycle(component));
            };
            self.substitute(consumer, redirect, &component)?;
            substituted = true;
        }

        Err(PlanError::Cycle(
            self.packages.keys().copied().sorted().collect(),
        ))
    }

    /// Finds the edge of a cycle that has to be redirected: the first build
    /// time edge `u -> v` of the component determines the package `u` that
    /// is needed to build itself, the edge returned is an edge `w -> u` of
    /// the component where `w` is reachable from `v` without passing `u`.
    /// Returns the consumer `w` and the index of the edge.
    fn cycle_entry(
        &self,
        component: &[PlanId],
        members: &HashSet<PlanId>,
    ) -> Option<(PlanId, usize)> {
        for &built in component {
            let package = self.packages.get(&built)?;
            for dependency in &package.dependencies {
                if !dependency.kind.is_build_time() || !members.contains(&dependency.target) {
                    continue;
                }

                let mut seen: HashSet<PlanId> = HashSet::default();
                let mut stack = vec![dependency.target];
                while let Some(id) = stack.pop() {
                    if id == built || !seen.insert(id) {
                        continue;
                    }
                    let Some(node) = self.packages.get(&id) else {
                        continue;
                    };
                    for (index, edge) in node.dependencies.iter().enumerate() {
                        if edge.target == built {
                            if let PlanId::Configured(_) = built {
                                return Some((id, index));
                            }
                        }
                        if members.contains(&edge.target) {
                            stack.push(edge.target);
                        }
                    }
                }
            }
        }
        None
    }

    /// Redirects dependency `index` of `consumer` to an installed instance.
    fn substitute(
        &mut self,
        consumer: PlanId,
        index: usize,
        component: &[PlanId],
    ) -> Result<(), PlanError> {
        let Some(dependency) = self
            .packages
            .get(&consumer)
            .and_then(|package| package.dependencies.get(index))
            .cloned()
        else {
            return Err(PlanError::Cycle(component.to_vec()));
        };
        let PlanId::Configured(target) = dependency.target else {
            return Err(PlanError::Cycle(component.to_vec()));
        };
        let Some(replacement) = self.preinstalled(target, &dependency.range)? else {
            return Err(PlanError::SetupCycleWithoutInstalled {
                package: target,
                cycle: component.to_vec(),
            });
        };

        tracing::debug!("replacing {target:?} by an installed instance to break a setup cycle");
        if let Some(package) = self.packages.get_mut(&consumer) {
            if let Some(edge) = package.dependencies.get_mut(index) {
                edge.target = replacement;
            }
        }
        Ok(())
    }

    /// Adds the latest installed instance of `qpn` that satisfies `range` to
    /// the plan. Its library dependencies are resolved in the scope of `qpn`:
    /// to the package decided there if it fits, otherwise to another
    /// installed instance.
    fn preinstalled(
        &mut self,
        qpn: QualifiedName,
        range: &VersionRange,
    ) -> Result<Option<PlanId>, PlanError> {
        let Some(solvable) = self.latest_installed(qpn.name, range) else {
            return Ok(None);
        };
        let id = PlanId::Preinstalled(solvable);
        if self.packages.contains_key(&id) {
            return Ok(Some(id));
        }

        let instance = self.provider.instance(solvable);
        let flags: Vec<(FlagId, bool)> = instance
            .flags
            .iter()
            .map(|decl| (decl.name, decl.default))
            .sorted_by_key(|(flag, _)| *flag)
            .collect();

        // Reserve the id first so dependency cycles among installed
        // instances terminate.
        self.packages.insert(
            id,
            ConfiguredPackage {
                id,
                solvable,
                name: instance.name,
                version: instance.version.clone(),
                location: instance.location,
                flags: flags.clone(),
                stanzas: Vec::new(),
                dependencies: Vec::new(),
            },
        );

        let mut dependencies = Vec::new();
        for (kind, name, dep_range) in resolved_dependencies(instance, &flags, &[], self.environment) {
            let decided = self.assignment.resolve_link(qpn.dependency(name, kind));
            let fits = self.packages.get(&PlanId::Configured(decided)).is_some_and(|package| {
                package.location == Location::Installed && dep_range.contains(&package.version)
            });
            let target = if fits {
                PlanId::Configured(decided)
            } else {
                match self.preinstalled(decided, &dep_range)? {
                    Some(target) => target,
                    None => {
                        return Err(PlanError::MissingDependency {
                            package: id,
                            dependency: PlanId::Configured(decided),
                        })
                    }
                }
            };
            add_dependency(&mut dependencies, target, kind, dep_range);
        }
        if let Some(package) = self.packages.get_mut(&id) {
            package.dependencies = dependencies;
        }

        Ok(Some(id))
    }

    fn latest_installed(&self, name: NameId, range: &VersionRange) -> Option<SolvableId> {
        let candidates = self.provider.candidates(name)?;
        candidates
            .candidates
            .iter()
            .copied()
            .filter(|&solvable| {
                let instance = self.provider.instance(solvable);
                instance.is_installed() && range.contains(&instance.version)
            })
            .max_by(|&a, &b| {
                let (va, vb) = (&self.provider.instance(a).version, &self.provider.instance(b).version);
                va.cmp(vb).then_with(|| b.cmp(&a))
            })
    }

    /// Drops every package that is no longer reachable from the roots.
    fn prune(&mut self, roots: &[QualifiedName]) {
        let mut reachable: HashSet<PlanId> = HashSet::default();
        let mut stack: Vec<PlanId> = roots
            .iter()
            .map(|qpn| PlanId::Configured(self.assignment.resolve_link(*qpn)))
            .collect();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(package) = self.packages.get(&id) {
                stack.extend(package.dependencies.iter().map(|d| d.target));
            }
        }
        self.packages.retain(|id, _| reachable.contains(id));
    }
}

/// Resolves the conditional dependencies of an instance against its final
/// flags and stanzas. Installed instances only keep library dependencies.
fn resolved_dependencies(
    instance: &Instance,
    flags: &[(FlagId, bool)],
    stanzas: &[Stanza],
    environment: &Environment,
) -> Vec<(DependencyKind, NameId, VersionRange)> {
    let flag = |id: FlagId| {
        Some(
            flags
                .iter()
                .find_map(|(f, value)| (*f == id).then_some(*value))
                .unwrap_or(false),
        )
    };

    let mut collected = Vec::new();
    condition::collect_dependencies(&instance.library, environment, &flag, &mut collected);
    for stanza in stanzas {
        if let Some(tree) = instance.stanza_tree(*stanza) {
            condition::collect_dependencies(tree, environment, &flag, &mut collected);
        }
    }

    let mut dependencies: Vec<(DependencyKind, NameId, VersionRange)> = collected
        .into_iter()
        .filter(|dependency| !instance.is_installed() || dependency.kind == DependencyKind::Library)
        .map(|dependency| (dependency.kind, dependency.name, dependency.range.clone()))
        .collect();
    if !instance.is_installed() {
        dependencies.extend(
            instance
                .setup
                .iter()
                .map(|dependency| (dependency.kind, dependency.name, dependency.range.clone())),
        );
    }
    dependencies
}

/// Adds an edge, intersecting the range with an existing edge of the same
/// kind to the same target.
fn add_dependency(
    dependencies: &mut Vec<PlanDependency>,
    target: PlanId,
    kind: DependencyKind,
    range: VersionRange,
) {
    match dependencies
        .iter_mut()
        .find(|dependency| dependency.target == target && dependency.kind == kind)
    {
        Some(existing) => existing.range = existing.range.intersection(&range),
        None => dependencies.push(PlanDependency {
            target,
            kind,
            range,
        }),
    }
}
