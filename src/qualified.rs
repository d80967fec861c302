//! Qualified package names and solver variables.
//!
//! The same package can be needed in different roles, for instance as a
//! library and as a dependency of another package's build system. Each role
//! is resolved independently, so the solver never talks about a bare
//! [`NameId`] but about a [`QualifiedName`]: a package name together with the
//! [`PackagePath`] it was reached through.

use std::fmt::{Display, Formatter};

use crate::{
    package::{DependencyKind, Stanza},
    FlagId, Interner, NameId, SolvableId,
};

/// Separates goals that should be solved completely independently from each
/// other.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Namespace {
    /// The shared namespace of all regular goals.
    Default,
    /// The namespace of the n-th top-level goal when independent goals are
    /// enabled.
    Independent(u32),
}

/// The role in which a package is required.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Qualifier {
    /// Top-level goals and (transitive) library dependencies.
    TopLevel,
    /// Dependencies of the build system of the given package.
    Setup(NameId),
    /// The build tool (second) needed by the given package (first).
    Exe(NameId, NameId),
}

/// The full path through which a package is reached.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackagePath {
    /// The namespace
    pub namespace: Namespace,
    /// The qualifier within the namespace
    pub qualifier: Qualifier,
}

impl PackagePath {
    /// The path of regular top-level goals.
    pub const fn top_level() -> Self {
        Self {
            namespace: Namespace::Default,
            qualifier: Qualifier::TopLevel,
        }
    }

    /// The path of the n-th independent goal.
    pub const fn independent(index: u32) -> Self {
        Self {
            namespace: Namespace::Independent(index),
            qualifier: Qualifier::TopLevel,
        }
    }

    /// Returns a path with the same namespace but a different qualifier.
    pub const fn with_qualifier(self, qualifier: Qualifier) -> Self {
        Self {
            namespace: self.namespace,
            qualifier,
        }
    }
}

impl Default for PackagePath {
    fn default() -> Self {
        Self::top_level()
    }
}

/// A package name qualified with the path it was reached through. This is
/// the key of everything the solver decides about a package.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QualifiedName {
    /// The path the package is reached through
    pub path: PackagePath,
    /// The name of the package
    pub name: NameId,
}

impl QualifiedName {
    /// Constructs a new qualified name.
    pub const fn new(path: PackagePath, name: NameId) -> Self {
        Self { path, name }
    }

    /// A top-level qualified name.
    pub const fn top_level(name: NameId) -> Self {
        Self::new(PackagePath::top_level(), name)
    }

    /// Returns the qualified name under which a dependency of this package
    /// on `name` is resolved.
    ///
    /// Library dependencies stay in the path of the package. Setup
    /// dependencies move to the setup scope of the package and every build
    /// tool gets a scope of its own, so both are resolved independently from
    /// the libraries the package links against.
    pub fn dependency(self, name: NameId, kind: DependencyKind) -> Self {
        let path = match kind {
            DependencyKind::Library => self.path,
            DependencyKind::Setup => self.path.with_qualifier(Qualifier::Setup(self.name)),
            DependencyKind::BuildTool => {
                self.path.with_qualifier(Qualifier::Exe(self.name, name))
            }
        };
        Self::new(path, name)
    }

    /// Returns an object that can be used to format the qualified name, e.g.
    /// `foo`, `bar:setup.foo` or `1:bar:exe.happy`.
    pub fn display<'i, I: Interner>(&self, interner: &'i I) -> DisplayQualifiedName<'i, I> {
        DisplayQualifiedName {
            name: *self,
            interner,
        }
    }
}

/// Formats a [`QualifiedName`], see [`QualifiedName::display`].
pub struct DisplayQualifiedName<'i, I: Interner> {
    name: QualifiedName,
    interner: &'i I,
}

impl<I: Interner> Display for DisplayQualifiedName<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Namespace::Independent(index) = self.name.path.namespace {
            write!(f, "{index}:")?;
        }
        match self.name.path.qualifier {
            Qualifier::TopLevel => {}
            Qualifier::Setup(parent) => write!(f, "{}:setup.", self.interner.display_name(parent))?,
            Qualifier::Exe(parent, tool) => write!(
                f,
                "{}:{}:exe.",
                self.interner.display_name(parent),
                self.interner.display_name(tool)
            )?,
        }
        write!(f, "{}", self.interner.display_name(self.name.name))
    }
}

/// A single decision the solver has to make.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Variable {
    /// Which instance of the package to use.
    Package(QualifiedName),
    /// The value of a flag of an already chosen package.
    Flag(QualifiedName, FlagId),
    /// Whether an optional stanza of an already chosen package is enabled.
    Stanza(QualifiedName, Stanza),
}

impl Variable {
    /// Returns the package this variable is about.
    pub fn package(&self) -> QualifiedName {
        match *self {
            Variable::Package(qpn) | Variable::Flag(qpn, _) | Variable::Stanza(qpn, _) => qpn,
        }
    }

    /// Returns an object that formats the variable, e.g. `foo`,
    /// `foo:+debug` or `foo:*test`.
    pub fn display<'i, I: Interner>(&self, interner: &'i I) -> DisplayVariable<'i, I> {
        DisplayVariable {
            variable: *self,
            interner,
        }
    }
}

/// Formats a [`Variable`], see [`Variable::display`].
pub struct DisplayVariable<'i, I: Interner> {
    variable: Variable,
    interner: &'i I,
}

impl<I: Interner> Display for DisplayVariable<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.variable {
            Variable::Package(qpn) => write!(f, "{}", qpn.display(self.interner)),
            Variable::Flag(qpn, flag) => write!(
                f,
                "{}:+{}",
                qpn.display(self.interner),
                self.interner.display_flag(flag)
            ),
            Variable::Stanza(qpn, stanza) => {
                write!(f, "{}:*{}", qpn.display(self.interner), stanza)
            }
        }
    }
}

/// A value the solver can assign to a [`Variable`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Choice {
    /// Use a specific instance for a package variable.
    Instance(SolvableId),
    /// Share the instance, flags and stanzas of another qualified package
    /// with the same name.
    Link(QualifiedName),
    /// The value of a flag variable.
    Flag(bool),
    /// Whether a stanza is enabled.
    Stanza(bool),
}

impl Choice {
    /// Returns an object that formats the choice, e.g. `foo=1.2`,
    /// `link to bar:setup.foo`, `+` or `-`.
    pub fn display<'i, I: Interner>(&self, interner: &'i I) -> DisplayChoice<'i, I> {
        DisplayChoice {
            choice: *self,
            interner,
        }
    }
}

/// Formats a [`Choice`], see [`Choice::display`].
pub struct DisplayChoice<'i, I: Interner> {
    choice: Choice,
    interner: &'i I,
}

impl<I: Interner> Display for DisplayChoice<'_, I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.choice {
            Choice::Instance(solvable) => write!(f, "{}", self.interner.display_solvable(solvable)),
            Choice::Link(target) => write!(f, "link to {}", target.display(self.interner)),
            Choice::Flag(true) | Choice::Stanza(true) => write!(f, "+"),
            Choice::Flag(false) | Choice::Stanza(false) => write!(f, "-"),
        }
    }
}
