//! The description of what should be solved: the top-level goals together
//! with the constraints and preferences of the user.

use crate::{
    config::{InstalledPreference, VersionPreference},
    package::{Environment, Instance, Location, Stanza},
    qualified::QualifiedName,
    version::VersionRange,
    FlagId, NameId,
};

/// Selects the qualified packages a user constraint applies to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstraintScope {
    /// Every occurrence of the package, regardless of how it is reached.
    Any(NameId),
    /// Only the package reached through a specific path.
    Qualified(QualifiedName),
}

impl ConstraintScope {
    /// Returns true if the scope covers the qualified name.
    pub fn matches(&self, qpn: &QualifiedName) -> bool {
        match self {
            ConstraintScope::Any(name) => *name == qpn.name,
            ConstraintScope::Qualified(scoped) => scoped == qpn,
        }
    }

    /// Returns the package name the scope refers to.
    pub fn name(&self) -> NameId {
        match self {
            ConstraintScope::Any(name) => *name,
            ConstraintScope::Qualified(qpn) => qpn.name,
        }
    }
}

/// A hard requirement of the user. Violating choices are pruned from the
/// search.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UserConstraint {
    /// The version must lie in the range.
    Version(ConstraintScope, VersionRange),
    /// Only installed instances may be used.
    Installed(ConstraintScope),
    /// Only instances built from source may be used.
    Source(ConstraintScope),
    /// The flag must have the given value.
    Flag(ConstraintScope, FlagId, bool),
    /// The stanza must (or must not) be enabled.
    Stanza(ConstraintScope, Stanza, bool),
}

impl UserConstraint {
    /// Returns the scope of the constraint.
    pub fn scope(&self) -> &ConstraintScope {
        match self {
            UserConstraint::Version(scope, _)
            | UserConstraint::Installed(scope)
            | UserConstraint::Source(scope)
            | UserConstraint::Flag(scope, _, _)
            | UserConstraint::Stanza(scope, _, _) => scope,
        }
    }

    /// Returns false if this constraint rules out choosing `instance` for the
    /// package. Flag and stanza constraints never rule out an instance.
    pub fn admits_instance(&self, instance: &Instance) -> bool {
        match self {
            UserConstraint::Version(_, range) => range.contains(&instance.version),
            UserConstraint::Installed(_) => instance.location == Location::Installed,
            UserConstraint::Source(_) => instance.location == Location::Source,
            UserConstraint::Flag(..) | UserConstraint::Stanza(..) => true,
        }
    }
}

/// A soft wish of the user. Preferences only change the order in which the
/// solver tries alternatives, they never rule out a solution.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PackagePreference {
    /// Versions in the range are tried first.
    Version(NameId, VersionRange),
    /// Overrides the global version order for the package.
    VersionOrder(NameId, VersionPreference),
    /// Overrides the global installed-vs-latest preference for the package.
    Installed(NameId, InstalledPreference),
    /// The given flag value is tried first.
    Flag(NameId, FlagId, bool),
    /// The given stanzas are tried enabled first.
    Stanzas(NameId, Vec<Stanza>),
}

impl PackagePreference {
    /// Returns the package the preference is about.
    pub fn name(&self) -> NameId {
        match self {
            PackagePreference::Version(name, _)
            | PackagePreference::VersionOrder(name, _)
            | PackagePreference::Installed(name, _)
            | PackagePreference::Flag(name, _, _)
            | PackagePreference::Stanzas(name, _) => *name,
        }
    }
}

/// Describes the problem that is passed to the solver.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Request {
    pub(crate) goals: Vec<NameId>,
    pub(crate) constraints: Vec<UserConstraint>,
    pub(crate) preferences: Vec<PackagePreference>,
    pub(crate) environment: Environment,
}

impl Request {
    /// Creates a new empty [`Request`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds top-level goals. Each goal is a package that has to be part of
    /// the plan. Duplicate goals are ignored.
    pub fn goals(mut self, goals: impl IntoIterator<Item = NameId>) -> Self {
        for goal in goals {
            if !self.goals.contains(&goal) {
                self.goals.push(goal);
            }
        }
        self
    }

    /// Adds user constraints.
    pub fn constraints(mut self, constraints: impl IntoIterator<Item = UserConstraint>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    /// Adds user preferences.
    pub fn preferences(mut self, preferences: impl IntoIterator<Item = PackagePreference>) -> Self {
        self.preferences.extend(preferences);
        self
    }

    /// Sets the environment conditions are evaluated against.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Returns the top-level goals.
    pub fn goal_names(&self) -> &[NameId] {
        &self.goals
    }

    /// Returns the user constraints that apply to the qualified package.
    pub(crate) fn constraints_for<'a>(
        &'a self,
        qpn: &'a QualifiedName,
    ) -> impl Iterator<Item = &'a UserConstraint> + 'a {
        self.constraints
            .iter()
            .filter(move |c| c.scope().matches(qpn))
    }

    /// Returns the preferences for the package.
    pub(crate) fn preferences_for(
        &self,
        name: NameId,
    ) -> impl Iterator<Item = &PackagePreference> + '_ {
        self.preferences.iter().filter(move |p| p.name() == name)
    }
}
