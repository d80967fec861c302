use std::fmt::{Display, Formatter};

use ahash::HashMap;

use crate::{
    internal::arena::Arena, Candidates, FlagId, Instance, Interner, Location, Mapping, NameId,
    PackageIndex, SolvableId, Version,
};

/// An in-memory [`PackageIndex`].
///
/// A universe stores and interns everything the solver needs to know about
/// the available packages: package names, flag names and the instances of
/// every package. Ids handed out by the universe stay valid for its whole
/// lifetime, nothing is ever removed.
#[derive(Default)]
pub struct Universe {
    /// Interned package names
    names: Arena<NameId, String>,

    /// Map from package names to the id of their interned counterpart
    names_to_ids: HashMap<String, NameId>,

    /// Interned flag names
    flags: Arena<FlagId, String>,

    /// Map from flag names to the id of their interned counterpart
    flags_to_ids: HashMap<String, FlagId>,

    /// All registered instances
    instances: Arena<SolvableId, Instance>,

    /// The instances of every package, in registration order
    packages: Mapping<NameId, Candidates>,
}

impl Universe {
    /// Creates an empty universe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a package name and returns its id. Names are deduplicated.
    pub fn intern_name(&mut self, name: impl Into<String> + AsRef<str>) -> NameId {
        if let Some(id) = self.names_to_ids.get(name.as_ref()) {
            return *id;
        }

        let name = name.into();
        let id = self.names.alloc(name.clone());
        self.names_to_ids.insert(name, id);
        id
    }

    /// Interns a flag name and returns its id. Flag names are shared by all
    /// packages.
    pub fn intern_flag(&mut self, flag: impl Into<String> + AsRef<str>) -> FlagId {
        if let Some(id) = self.flags_to_ids.get(flag.as_ref()) {
            return *id;
        }

        let flag = flag.into();
        let id = self.flags.alloc(flag.clone());
        self.flags_to_ids.insert(flag, id);
        id
    }

    /// Returns the id of a package name if it was interned before.
    pub fn lookup_name(&self, name: &str) -> Option<NameId> {
        self.names_to_ids.get(name).copied()
    }

    /// Returns the id of a flag name if it was interned before.
    pub fn lookup_flag(&self, flag: &str) -> Option<FlagId> {
        self.flags_to_ids.get(flag).copied()
    }

    /// Returns the string of an interned package name.
    ///
    /// Panics if the name was not interned by this universe.
    pub fn resolve_name(&self, name: NameId) -> &str {
        &self.names[name]
    }

    /// Returns the string of an interned flag name.
    ///
    /// Panics if the flag was not interned by this universe.
    pub fn resolve_flag(&self, flag: FlagId) -> &str {
        &self.flags[flag]
    }

    /// Registers a new instance and returns its id. The package of the
    /// instance becomes known to the solver, even if its name was only
    /// interned before.
    pub fn add_instance(&mut self, instance: Instance) -> SolvableId {
        let name = instance.name;
        let id = self.instances.alloc(instance);
        match self.packages.get_mut(name) {
            Some(candidates) => candidates.candidates.push(id),
            None => {
                self.packages.insert(
                    name,
                    Candidates {
                        candidates: vec![id],
                        single_instance: false,
                    },
                );
            }
        }
        id
    }

    /// Marks a package as single-instance: at most one instance of it may
    /// be built as part of a plan.
    pub fn set_single_instance(&mut self, name: NameId, single_instance: bool) {
        match self.packages.get_mut(name) {
            Some(candidates) => candidates.single_instance = single_instance,
            None => {
                self.packages.insert(
                    name,
                    Candidates {
                        candidates: Vec::new(),
                        single_instance,
                    },
                );
            }
        }
    }

    /// Finds the instance of a package with the given version and location.
    pub fn find_instance(
        &self,
        name: NameId,
        version: &Version,
        location: Location,
    ) -> Option<SolvableId> {
        self.packages.get(name)?.candidates.iter().copied().find(|&id| {
            let instance = &self.instances[id];
            &instance.version == version && instance.location == location
        })
    }

    /// Iterates over all package names that have instances.
    pub fn package_names(&self) -> impl Iterator<Item = NameId> + '_ {
        self.packages.iter().map(|(name, _)| name)
    }

    /// Iterates over all instances in registration order.
    pub fn instances(&self) -> impl Iterator<Item = (SolvableId, &Instance)> {
        self.instances.iter()
    }

    /// Returns the number of registered instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if no instance was registered.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Formats an instance as `name=version`, installed instances are marked.
struct DisplayInstance<'a> {
    name: &'a str,
    instance: &'a Instance,
}

impl Display for DisplayInstance<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.instance.version)?;
        if self.instance.is_installed() {
            write!(f, " (installed)")?;
        }
        Ok(())
    }
}

impl Interner for Universe {
    fn display_solvable(&self, solvable: SolvableId) -> impl Display + '_ {
        let instance = &self.instances[solvable];
        DisplayInstance {
            name: self.resolve_name(instance.name),
            instance,
        }
    }

    fn display_name(&self, name: NameId) -> impl Display + '_ {
        self.resolve_name(name)
    }

    fn display_flag(&self, flag: FlagId) -> impl Display + '_ {
        self.resolve_flag(flag)
    }

    fn solvable_name(&self, solvable: SolvableId) -> NameId {
        self.instances[solvable].name
    }
}

impl PackageIndex for Universe {
    fn candidates(&self, name: NameId) -> Option<Candidates> {
        self.packages.get(name).cloned()
    }

    fn instance(&self, solvable: SolvableId) -> &Instance {
        &self.instances[solvable]
    }
}
