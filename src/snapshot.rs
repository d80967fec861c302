//! Provides [`UniverseSnapshot`], an object that captures everything the
//! solver can learn from a [`PackageIndex`]. This makes it possible to
//! abstract over ecosystem specific code, store a package universe on disk
//! and solve against it later.
//!
//! The [`UniverseSnapshot`] implements [`PackageIndex`] itself, so it can be
//! handed to a [`crate::Solver`] directly.

use std::{collections::VecDeque, fmt::Display};

use ahash::HashSet;

use crate::{
    package::{CondTree, Instance},
    Candidates, FlagId, Interner, Mapping, NameId, PackageIndex, SolvableId,
};

/// A single package in a [`UniverseSnapshot`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Package {
    /// The name of this package
    pub name: String,

    /// All instances of this package in catalog order
    pub instances: Vec<SolvableId>,

    /// Whether at most one instance of the package may be built
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub single_instance: bool,
}

/// A single instance in a [`UniverseSnapshot`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Solvable {
    /// The string representation of the instance
    pub display: String,

    /// The description of the instance
    pub instance: Instance,
}

/// A serializable snapshot of a [`PackageIndex`].
#[derive(Clone, Default, Debug, serde::Serialize, serde::Deserialize)]
pub struct UniverseSnapshot {
    /// All packages in the snapshot
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub packages: Mapping<NameId, Package>,

    /// All instances in the snapshot
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub solvables: Mapping<SolvableId, Solvable>,

    /// The names of all flags in the snapshot
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub flags: Mapping<FlagId, String>,
}

impl UniverseSnapshot {
    /// Constructs a snapshot from a [`PackageIndex`], capturing every
    /// package that is reachable from the given `names`. Dependencies are
    /// followed through all branches of conditional dependency trees, so the
    /// snapshot can answer every question a solve starting from `names` might
    /// ask.
    pub fn from_index(index: &impl PackageIndex, names: impl IntoIterator<Item = NameId>) -> Self {
        let mut result = Self::default();

        let mut queue: VecDeque<NameId> = names.into_iter().collect();
        let mut seen: HashSet<NameId> = queue.iter().copied().collect();
        let mut flags: HashSet<FlagId> = HashSet::default();

        while let Some(name) = queue.pop_front() {
            let Some(Candidates {
                candidates,
                single_instance,
            }) = index.candidates(name)
            else {
                continue;
            };

            for &solvable in &candidates {
                let instance = index.instance(solvable);
                let mut referenced = Vec::new();
                referenced_names(&instance.library, &mut referenced);
                for (_, tree) in &instance.stanza_deps {
                    referenced_names(tree, &mut referenced);
                }
                referenced.extend(instance.setup.iter().map(|dependency| dependency.name));
                for dependency in referenced {
                    if seen.insert(dependency) {
                        queue.push_back(dependency);
                    }
                }

                flags.extend(instance.flags.iter().map(|decl| decl.name));
                referenced_flags(&instance.library, &mut flags);
                for (_, tree) in &instance.stanza_deps {
                    referenced_flags(tree, &mut flags);
                }

                result.solvables.insert(
                    solvable,
                    Solvable {
                        display: index.display_solvable(solvable).to_string(),
                        instance: instance.clone(),
                    },
                );
            }

            result.packages.insert(
                name,
                Package {
                    name: index.display_name(name).to_string(),
                    instances: candidates,
                    single_instance,
                },
            );
        }

        for flag in flags {
            result
                .flags
                .insert(flag, index.display_flag(flag).to_string());
        }

        tracing::debug!(
            "captured a snapshot of {} packages and {} instances",
            result.packages.len(),
            result.solvables.len()
        );
        result
    }

    /// Returns the id of the package with the given name.
    pub fn lookup_name(&self, name: &str) -> Option<NameId> {
        self.packages
            .iter()
            .find_map(|(id, package)| (package.name == name).then_some(id))
    }

    /// Returns the id of the flag with the given name.
    pub fn lookup_flag(&self, flag: &str) -> Option<FlagId> {
        self.flags
            .iter()
            .find_map(|(id, name)| (name == flag).then_some(id))
    }

    fn solvable(&self, solvable: SolvableId) -> &Solvable {
        match self.solvables.get(solvable) {
            Some(solvable) => solvable,
            None => panic!("the snapshot does not contain {solvable:?}"),
        }
    }
}

fn referenced_names(tree: &CondTree, out: &mut Vec<NameId>) {
    out.extend(tree.dependencies.iter().map(|dependency| dependency.name));
    for branch in &tree.branches {
        referenced_names(&branch.then, out);
        referenced_names(&branch.otherwise, out);
    }
}

fn referenced_flags(tree: &CondTree, out: &mut HashSet<FlagId>) {
    for branch in &tree.branches {
        branch.condition.for_each_flag(&mut |flag| {
            out.insert(flag);
        });
        referenced_flags(&branch.then, out);
        referenced_flags(&branch.otherwise, out);
    }
}

impl Interner for UniverseSnapshot {
    fn display_solvable(&self, solvable: SolvableId) -> impl Display + '_ {
        &self.solvable(solvable).display
    }

    fn display_name(&self, name: NameId) -> impl Display + '_ {
        self.packages
            .get(name)
            .map_or("<unknown>", |package| package.name.as_str())
    }

    fn display_flag(&self, flag: FlagId) -> impl Display + '_ {
        self.flags.get(flag).map_or("<unknown>", String::as_str)
    }

    fn solvable_name(&self, solvable: SolvableId) -> NameId {
        self.solvable(solvable).instance.name
    }
}

impl PackageIndex for UniverseSnapshot {
    fn candidates(&self, name: NameId) -> Option<Candidates> {
        let package = self.packages.get(name)?;
        Some(Candidates {
            candidates: package.instances.clone(),
            single_instance: package.single_instance,
        })
    }

    fn instance(&self, solvable: SolvableId) -> &Instance {
        &self.solvable(solvable).instance
    }
}
