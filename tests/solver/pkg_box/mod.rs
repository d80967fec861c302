// A tiny packaging ecosystem to test the solver with. Every package is
// identified by a name and an integer version. Dependencies are written as
// strings: `foo` accepts any version, `foo 2` only version 2, `foo 1..3`
// versions 1 and 2 (the end is excluded) and `foo >=2` anything from 2 up.
//
// Let's call it `PkgBox`.

mod parser;

use modsolve::{
    ChoiceRule, CondTree, Condition, ConstraintScope, Dependency, DependencyKind, FlagDecl,
    FlagId, Instance, Location, NameId, QualifiedName, Request, SolvableId, Solver, Stanza,
    utils::Universe,
};
use parser::parse_spec;

/// Builds a [`Universe`] from a compact description of packages.
#[derive(Default)]
pub struct PkgBox {
    universe: Universe,
}

impl PkgBox {
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a universe of source instances that only have library
    /// dependencies.
    pub fn from_packages(packages: &[(&str, u32, Vec<&str>)]) -> Self {
        let mut result = Self::new();
        for (name, version, deps) in packages {
            result.package(name, *version).deps(deps).add();
        }
        result
    }

    /// Starts the description of a new instance.
    pub fn package(&mut self, name: &str, version: u32) -> PackageBuilder<'_> {
        let name = self.universe.intern_name(name);
        PackageBuilder {
            instance: Instance::new(name, version, Location::Source),
            universe: &mut self.universe,
        }
    }

    pub fn single_instance(&mut self, name: &str) {
        let name = self.universe.intern_name(name);
        self.universe.set_single_instance(name, true);
    }

    pub fn name(&mut self, name: &str) -> NameId {
        self.universe.intern_name(name)
    }

    pub fn flag(&mut self, flag: &str) -> FlagId {
        self.universe.intern_flag(flag)
    }

    pub fn top_level(&mut self, name: &str) -> QualifiedName {
        QualifiedName::top_level(self.name(name))
    }

    pub fn any(&mut self, name: &str) -> ConstraintScope {
        ConstraintScope::Any(self.name(name))
    }

    /// Creates a request for the given top-level packages.
    pub fn request(&mut self, goals: &[&str]) -> Request {
        let goals: Vec<NameId> = goals.iter().map(|goal| self.name(goal)).collect();
        Request::new().goals(goals)
    }

    pub fn solver(self) -> Solver<Universe> {
        Solver::new(self.universe)
    }
}

/// Describes a single instance, see [`PkgBox::package`].
pub struct PackageBuilder<'a> {
    universe: &'a mut Universe,
    instance: Instance,
}

impl PackageBuilder<'_> {
    fn dependencies(&mut self, specs: &[&str], kind: DependencyKind) -> Vec<Dependency> {
        specs
            .iter()
            .map(|spec| {
                let (name, range) = parse_spec(spec);
                Dependency {
                    name: self.universe.intern_name(name),
                    range,
                    kind,
                }
            })
            .collect()
    }

    /// Marks the instance as installed.
    pub fn installed(mut self) -> Self {
        self.instance.location = Location::Installed;
        self
    }

    /// Adds unconditional library dependencies.
    pub fn deps(mut self, specs: &[&str]) -> Self {
        let deps = self.dependencies(specs, DependencyKind::Library);
        self.instance.library.dependencies.extend(deps);
        self
    }

    /// Adds unconditional build tool dependencies.
    pub fn tools(mut self, specs: &[&str]) -> Self {
        let deps = self.dependencies(specs, DependencyKind::BuildTool);
        self.instance.library.dependencies.extend(deps);
        self
    }

    /// Adds dependencies of the setup script.
    pub fn setup(mut self, specs: &[&str]) -> Self {
        let deps = self.dependencies(specs, DependencyKind::Setup);
        self.instance.setup.extend(deps);
        self
    }

    /// Declares an automatic flag.
    pub fn flag(mut self, name: &str, default: bool) -> Self {
        let flag = self.universe.intern_flag(name);
        self.instance.flags.push(FlagDecl::new(flag, default));
        self
    }

    /// Declares a manual flag.
    pub fn manual_flag(mut self, name: &str, default: bool) -> Self {
        let flag = self.universe.intern_flag(name);
        self.instance.flags.push(FlagDecl::new(flag, default).manual());
        self
    }

    /// Adds library dependencies that depend on the value of a flag.
    pub fn when(mut self, flag: &str, then: &[&str], otherwise: &[&str]) -> Self {
        let flag = self.universe.intern_flag(flag);
        let then = CondTree::new(self.dependencies(then, DependencyKind::Library));
        let otherwise = CondTree::new(self.dependencies(otherwise, DependencyKind::Library));
        let library = std::mem::take(&mut self.instance.library);
        self.instance.library = library.with_branch(Condition::flag(flag), then, otherwise);
        self
    }

    /// Offers an optional stanza with the given dependencies.
    pub fn stanza(mut self, stanza: Stanza, specs: &[&str]) -> Self {
        let tree = CondTree::new(self.dependencies(specs, DependencyKind::Library));
        self.instance.stanzas.push(stanza);
        self.instance.stanza_deps.push((stanza, tree));
        self
    }

    /// Enabling the stanza requires the flag to have the given value.
    pub fn stanza_requires(mut self, stanza: Stanza, flag: &str, value: bool) -> Self {
        let flag = self.universe.intern_flag(flag);
        self.instance
            .rules
            .push(ChoiceRule::StanzaRequiresFlag { stanza, flag, value });
        self
    }

    /// The two flags may not both be enabled.
    pub fn exclusive(mut self, a: &str, b: &str) -> Self {
        let a = self.universe.intern_flag(a);
        let b = self.universe.intern_flag(b);
        self.instance.rules.push(ChoiceRule::ExclusiveFlags(a, b));
        self
    }

    pub fn add(self) -> SolvableId {
        self.universe.add_instance(self.instance)
    }
}
