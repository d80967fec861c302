use elsa::FrozenMap;

use crate::{
    config::SolverConfig, package::Instance, qualified::QualifiedName, request::Request,
    request::UserConstraint, solver::preference, Candidates, NameId, PackageIndex, SolvableId,
};

/// Keeps a cache of previously computed and/or requested information about
/// packages and their instances.
///
/// Everything cached here only depends on the inputs of a solve, never on the
/// state of the search, so entries stay valid for the whole solve.
pub struct SolverCache<'p, D: PackageIndex> {
    provider: &'p D,
    request: &'p Request,
    config: &'p SolverConfig,

    /// A mapping from package name to the candidates of the package. `None`
    /// if the package is unknown.
    candidates: FrozenMap<NameId, Box<Option<Candidates>>, ahash::RandomState>,

    /// A mapping from package name to its candidates in the order in which
    /// they should be tried.
    sorted_candidates: FrozenMap<NameId, Vec<SolvableId>, ahash::RandomState>,

    /// A mapping from a qualified package to the sorted candidates that are
    /// not ruled out by a user constraint or the new-install policy.
    admissible_candidates: FrozenMap<QualifiedName, Vec<SolvableId>, ahash::RandomState>,
}

impl<'p, D: PackageIndex> SolverCache<'p, D> {
    /// Constructs a new cache for a single solve.
    pub(crate) fn new(provider: &'p D, request: &'p Request, config: &'p SolverConfig) -> Self {
        Self {
            provider,
            request,
            config,
            candidates: Default::default(),
            sorted_candidates: Default::default(),
            admissible_candidates: Default::default(),
        }
    }

    /// Returns the [`PackageIndex`] used by this cache.
    pub fn provider(&self) -> &'p D {
        self.provider
    }

    /// Returns the request that is being solved.
    pub fn request(&self) -> &'p Request {
        self.request
    }

    /// Returns the configuration of the solve.
    pub fn config(&self) -> &'p SolverConfig {
        self.config
    }

    /// Returns the instance with the given id.
    pub fn instance(&self, solvable: SolvableId) -> &'p Instance {
        self.provider.instance(solvable)
    }

    /// Returns the candidates for the package with the given name. This will
    /// either ask the [`PackageIndex`] for the entries or a cached value.
    pub fn candidates(&self, name: NameId) -> Option<&Candidates> {
        let cached = match self.candidates.get(&name) {
            Some(cached) => cached,
            None => {
                let candidates = self.provider.candidates(name);
                tracing::trace!(
                    "Got {} candidates for package {}",
                    candidates.as_ref().map_or(0, |c| c.candidates.len()),
                    self.provider.display_name(name)
                );
                self.candidates.insert(name, Box::new(candidates))
            }
        };
        cached.as_ref()
    }

    /// Returns true if at most one instance of the package may be built.
    pub fn is_single_instance(&self, name: NameId) -> bool {
        self.candidates(name).is_some_and(|c| c.single_instance)
    }

    /// Returns all candidates of a package in the order in which the solver
    /// tries them.
    pub fn sorted_candidates(&self, name: NameId) -> &[SolvableId] {
        if let Some(sorted) = self.sorted_candidates.get(&name) {
            return sorted;
        }

        let mut sorted = self
            .candidates(name)
            .map(|c| c.candidates.clone())
            .unwrap_or_default();
        preference::sort_candidates(self, name, &mut sorted);
        self.sorted_candidates.insert(name, sorted)
    }

    /// Returns the sorted candidates of a qualified package that are allowed
    /// by the user constraints and the new-install policy.
    pub(crate) fn admissible_candidates(&self, qpn: QualifiedName) -> &[SolvableId] {
        if let Some(admissible) = self.admissible_candidates.get(&qpn) {
            return admissible;
        }

        let admissible = self
            .sorted_candidates(qpn.name)
            .iter()
            .copied()
            .filter(|&solvable| self.is_admissible(qpn, solvable))
            .collect();
        self.admissible_candidates.insert(qpn, admissible)
    }

    /// Returns true if no user constraint or policy rules out the instance
    /// for the qualified package.
    pub(crate) fn is_admissible(&self, qpn: QualifiedName, solvable: SolvableId) -> bool {
        let instance = self.instance(solvable);
        (self.config.allow_new_installs || instance.is_installed())
            && self.rejecting_constraint(qpn, instance).is_none()
    }

    /// Returns the first user constraint that rules out the instance for the
    /// qualified package.
    pub(crate) fn rejecting_constraint(
        &self,
        qpn: QualifiedName,
        instance: &Instance,
    ) -> Option<&'p UserConstraint> {
        self.request
            .constraints
            .iter()
            .filter(|constraint| constraint.scope().matches(&qpn))
            .find(|constraint| !constraint.admits_instance(instance))
    }
}
