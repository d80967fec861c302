//! Describes a single instance of a package as the solver sees it: its
//! version, where it comes from, the flags and stanzas it offers and its
//! (conditional) dependencies.

use std::fmt::{Display, Formatter};

use crate::{
    version::{Version, VersionRange},
    FlagId, NameId,
};

/// Where an instance of a package comes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Location {
    /// The instance is already installed. It can be used as is, its flags
    /// are fixed and it does not offer optional stanzas.
    Installed,
    /// The instance has to be built from source.
    Source,
}

/// An optional component of a package that has its own dependencies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stanza {
    /// The test suites of a package
    Tests,
    /// The benchmarks of a package
    Benchmarks,
}

impl Display for Stanza {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Stanza::Tests => write!(f, "test"),
            Stanza::Benchmarks => write!(f, "bench"),
        }
    }
}

/// A boolean configuration flag declared by a package.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlagDecl {
    /// The name of the flag
    pub name: FlagId,
    /// The value the package author prefers.
    pub default: bool,
    /// Manual flags are only meant to be changed by the user. The solver
    /// still explores both values but always tries the default first, even
    /// when a preference says otherwise.
    pub manual: bool,
}

impl FlagDecl {
    /// Constructs an automatic flag with the given default.
    pub fn new(name: FlagId, default: bool) -> Self {
        Self {
            name,
            default,
            manual: false,
        }
    }

    /// Marks the flag as manual.
    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}

/// What a dependency is needed for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DependencyKind {
    /// A regular library (run-time) dependency.
    Library,
    /// An executable that is needed while building the package. Build tools
    /// are resolved independently from the library dependencies.
    BuildTool,
    /// A dependency of the package's build system itself.
    Setup,
}

impl DependencyKind {
    /// Returns true for dependencies that are only needed to build the
    /// package, not to use it.
    pub fn is_build_time(self) -> bool {
        !matches!(self, DependencyKind::Library)
    }
}

/// A requirement on a range of versions of another package.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dependency {
    /// The package that is required
    pub name: NameId,
    /// The versions of the package that are acceptable
    pub range: VersionRange,
    /// What the dependency is needed for
    pub kind: DependencyKind,
}

impl Dependency {
    /// A library dependency on the given range.
    pub fn library(name: NameId, range: VersionRange) -> Self {
        Self {
            name,
            range,
            kind: DependencyKind::Library,
        }
    }

    /// A build-tool dependency on the given range.
    pub fn build_tool(name: NameId, range: VersionRange) -> Self {
        Self {
            name,
            range,
            kind: DependencyKind::BuildTool,
        }
    }

    /// A setup dependency on the given range.
    pub fn setup(name: NameId, range: VersionRange) -> Self {
        Self {
            name,
            range,
            kind: DependencyKind::Setup,
        }
    }
}

/// A fact about the platform a plan is made for.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlatformTest {
    /// True if the operating system matches.
    Os(String),
    /// True if the CPU architecture matches.
    Arch(String),
    /// True if the compiler has the given name and its version is in range.
    Compiler(String, VersionRange),
}

/// The environment a solve runs against. Conditions can inspect it through
/// [`PlatformTest`]s, it never changes during a solve.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Environment {
    /// The name of the operating system, e.g. `linux`
    pub os: String,
    /// The name of the architecture, e.g. `x86_64`
    pub arch: String,
    /// The compiler name and version
    pub compiler: Option<(String, Version)>,
}

impl Environment {
    /// Evaluates a platform test against this environment.
    pub fn test(&self, test: &PlatformTest) -> bool {
        match test {
            PlatformTest::Os(os) => self.os.eq_ignore_ascii_case(os),
            PlatformTest::Arch(arch) => self.arch.eq_ignore_ascii_case(arch),
            PlatformTest::Compiler(name, range) => match &self.compiler {
                Some((compiler, version)) => {
                    compiler.eq_ignore_ascii_case(name) && range.contains(version)
                }
                None => false,
            },
        }
    }
}

/// A boolean expression that decides whether a conditional branch applies.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Condition {
    /// A constant
    Lit(bool),
    /// The value of a flag of the package that declares the condition
    Flag(FlagId),
    /// A test on the environment
    Platform(PlatformTest),
    /// Negation
    Not(Box<Condition>),
    /// Conjunction
    And(Box<Condition>, Box<Condition>),
    /// Disjunction
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Shorthand for `Condition::Flag`.
    pub fn flag(flag: FlagId) -> Self {
        Condition::Flag(flag)
    }

    /// Negates this condition.
    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Combines two conditions with a logical and.
    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    /// Combines two conditions with a logical or.
    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    /// Calls `f` for every flag referenced by this condition.
    pub fn for_each_flag(&self, f: &mut impl FnMut(FlagId)) {
        match self {
            Condition::Lit(_) | Condition::Platform(_) => {}
            Condition::Flag(flag) => f(*flag),
            Condition::Not(inner) => inner.for_each_flag(f),
            Condition::And(lhs, rhs) | Condition::Or(lhs, rhs) => {
                lhs.for_each_flag(f);
                rhs.for_each_flag(f);
            }
        }
    }
}

/// A tree of dependencies where parts of the tree only apply when a
/// [`Condition`] holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CondTree {
    /// Dependencies that apply whenever this tree applies.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Vec::is_empty")
    )]
    pub dependencies: Vec<Dependency>,
    /// Conditional sub-trees.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Vec::is_empty")
    )]
    pub branches: Vec<CondBranch>,
}

impl CondTree {
    /// Constructs a tree without conditions.
    pub fn new(dependencies: Vec<Dependency>) -> Self {
        Self {
            dependencies,
            branches: Vec::new(),
        }
    }

    /// Adds a conditional branch to the tree.
    pub fn with_branch(mut self, condition: Condition, then: CondTree, otherwise: CondTree) -> Self {
        self.branches.push(CondBranch {
            condition,
            then,
            otherwise,
        });
        self
    }

    /// Returns true if the tree contains no dependencies at all.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
            && self
                .branches
                .iter()
                .all(|b| b.then.is_empty() && b.otherwise.is_empty())
    }
}

/// A conditional part of a [`CondTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CondBranch {
    /// The condition that selects between the two sub-trees
    pub condition: Condition,
    /// Applies when the condition holds
    pub then: CondTree,
    /// Applies when the condition does not hold
    #[cfg_attr(feature = "serde", serde(default))]
    pub otherwise: CondTree,
}

/// Restrictions a package places on its own flag and stanza choices.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChoiceRule {
    /// Enabling the stanza requires the flag to have the given value.
    StanzaRequiresFlag {
        /// The stanza the rule is about
        stanza: Stanza,
        /// The flag that is constrained
        flag: FlagId,
        /// The value the flag must have
        value: bool,
    },
    /// The two flags may not both be enabled.
    ExclusiveFlags(FlagId, FlagId),
}

/// A single version of a package as offered by a
/// [`crate::PackageIndex`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instance {
    /// The name of the package
    pub name: NameId,
    /// The version of this instance
    pub version: Version,
    /// Whether this instance is installed or has to be built
    pub location: Location,
    /// The flags the package declares
    #[cfg_attr(feature = "serde", serde(default))]
    pub flags: Vec<FlagDecl>,
    /// The optional stanzas the package offers
    #[cfg_attr(feature = "serde", serde(default))]
    pub stanzas: Vec<Stanza>,
    /// Library and build-tool dependencies
    #[cfg_attr(feature = "serde", serde(default))]
    pub library: CondTree,
    /// Dependencies of the build system
    #[cfg_attr(feature = "serde", serde(default))]
    pub setup: Vec<Dependency>,
    /// Dependencies that only apply when a stanza is enabled
    #[cfg_attr(feature = "serde", serde(default))]
    pub stanza_deps: Vec<(Stanza, CondTree)>,
    /// Restrictions on flag and stanza choices
    #[cfg_attr(feature = "serde", serde(default))]
    pub rules: Vec<ChoiceRule>,
}

impl Instance {
    /// Constructs an instance without flags, stanzas or dependencies.
    pub fn new(name: NameId, version: impl Into<Version>, location: Location) -> Self {
        Self {
            name,
            version: version.into(),
            location,
            flags: Vec::new(),
            stanzas: Vec::new(),
            library: CondTree::default(),
            setup: Vec::new(),
            stanza_deps: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Returns true if the instance is already installed.
    pub fn is_installed(&self) -> bool {
        self.location == Location::Installed
    }

    /// Returns the declaration of the given flag.
    pub fn flag(&self, flag: FlagId) -> Option<&FlagDecl> {
        self.flags.iter().find(|decl| decl.name == flag)
    }

    /// Returns the dependency tree of a stanza, if the package offers it.
    pub fn stanza_tree(&self, stanza: Stanza) -> Option<&CondTree> {
        self.stanza_deps
            .iter()
            .find(|(s, _)| *s == stanza)
            .map(|(_, tree)| tree)
    }

    /// Returns true if the package offers the stanza.
    pub fn has_stanza(&self, stanza: Stanza) -> bool {
        self.stanzas.contains(&stanza)
    }
}
