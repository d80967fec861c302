//! Defines helpers that make it easier to set up packages for the solver
//! without implementing a custom [`crate::PackageIndex`].

mod universe;

pub use universe::Universe;
