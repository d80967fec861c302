//! Linking lets a qualified package share the instance of another qualified
//! package with the same name instead of choosing (and building) an instance
//! of its own.

use crate::{
    qualified::{QualifiedName, Variable},
    request::{Request, UserConstraint},
    solver::{
        cache::SolverCache,
        state::{PackageValue, SearchState},
    },
    PackageIndex,
};

/// Returns the qualified packages `qpn` can link to: every decided package
/// with the same name that builds its own instance, in decision order.
pub(crate) fn link_targets<D: PackageIndex>(
    state: &SearchState,
    cache: &SolverCache<'_, D>,
    qpn: QualifiedName,
) -> Vec<QualifiedName> {
    state
        .packages()
        .filter_map(|(other, value)| match value {
            PackageValue::Instance(solvable)
                if other.name == qpn.name
                    && *other != qpn
                    && !cache.instance(*solvable).is_installed() =>
            {
                Some(*other)
            }
            _ => None,
        })
        .collect()
}

/// Returns the first flag or stanza constraint on `qpn` that is violated by
/// the decided values of `target`, together with the variable of `target`
/// that violates it.
pub(crate) fn violated_choice_constraint<'r>(
    request: &'r Request,
    state: &SearchState,
    qpn: QualifiedName,
    target: QualifiedName,
) -> Option<(&'r UserConstraint, Variable)> {
    request
        .constraints
        .iter()
        .filter(|constraint| constraint.scope().matches(&qpn))
        .find_map(|constraint| match *constraint {
            UserConstraint::Flag(_, flag, value)
                if state.flag(target, flag).is_some_and(|actual| actual != value) =>
            {
                Some((constraint, Variable::Flag(target, flag)))
            }
            UserConstraint::Stanza(_, stanza, enabled)
                if state
                    .stanza(target, stanza)
                    .is_some_and(|actual| actual != enabled) =>
            {
                Some((constraint, Variable::Stanza(target, stanza)))
            }
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{qualified::PackagePath, ConstraintScope, FlagId, NameId, SolvableId};

    #[test]
    fn test_flag_constraint_on_linked_package() {
        let target = QualifiedName::top_level(NameId(0));
        let linked = QualifiedName::new(PackagePath::independent(0), NameId(0));
        let request = Request::new().constraints([UserConstraint::Flag(
            ConstraintScope::Qualified(linked),
            FlagId(0),
            true,
        )]);

        let mut state = SearchState::default();
        state.assign_package(target, PackageValue::Instance(SolvableId(0)));
        assert_eq!(
            violated_choice_constraint(&request, &state, linked, target),
            None
        );

        state.assign_flag(target, FlagId(0), false);
        let (constraint, variable) =
            violated_choice_constraint(&request, &state, linked, target).unwrap();
        assert_eq!(variable, Variable::Flag(target, FlagId(0)));
        assert!(matches!(constraint, UserConstraint::Flag(_, _, true)));
    }
}
