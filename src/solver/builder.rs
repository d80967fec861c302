//! Expands a single node of the search tree on demand.
//!
//! The search tree is never materialized. When the explorer decides to work
//! on a goal, the builder enumerates the branches of that goal's choice node
//! in preference order. Instances outside a version range that is already
//! imposed on the package are marked as ruled out up front, every other
//! cross-package check is left to the validator.

use crate::{
    conflict::ConflictSet,
    error::InternalError,
    package::FlagDecl,
    qualified::{Choice, QualifiedName, Variable},
    request::UserConstraint,
    solver::{
        linking, preference,
        state::{OpenGoal, PackageValue},
        validator::Validator,
    },
    PackageIndex, SolvableId,
};

/// A branch of a choice node.
#[derive(Clone, Debug)]
pub(crate) enum Branch {
    /// A choice the validator still has to check.
    Open(Choice),
    /// An instance that lies outside a range already required of the
    /// package. Carries the conflict set the validator would report for it.
    RuledOut(ConflictSet),
}

/// Returns the branches of the choice node for `goal`, in the order in which
/// they should be tried.
pub(crate) fn branches<D: PackageIndex>(
    validator: &Validator<'_, '_, D>,
    goal: &OpenGoal,
) -> Result<Vec<Branch>, InternalError> {
    let cache = validator.cache();
    let state = validator.state();
    let request = cache.request();

    Ok(match goal.variable {
        Variable::Package(qpn) => preference::order_package_branches(
            linking::link_targets(state, cache, qpn),
            cache.sorted_candidates(qpn.name),
            cache.config(),
        )
        .into_iter()
        .map(|choice| match choice {
            Choice::Instance(solvable) => out_of_range(validator, goal, qpn, solvable)
                .map_or(Branch::Open(choice), Branch::RuledOut),
            _ => Branch::Open(choice),
        })
        .collect(),
        Variable::Flag(qpn, flag) => {
            let instance = cache.instance(decided_instance(validator, qpn)?);
            let decl = instance
                .flag(flag)
                .copied()
                .unwrap_or_else(|| FlagDecl::new(flag, false));
            preference::flag_order(request, qpn.name, &decl)
                .map(|value| Branch::Open(Choice::Flag(value)))
                .to_vec()
        }
        Variable::Stanza(qpn, stanza) => preference::stanza_order(request, qpn.name, stanza)
            .map(|value| Branch::Open(Choice::Stanza(value)))
            .to_vec(),
    })
}

/// Returns the conflict set of choosing `solvable` for `qpn` if the first
/// check of the validator that fails for it is an active version range.
/// Instances that fail an earlier check are left to the validator.
fn out_of_range<D: PackageIndex>(
    validator: &Validator<'_, '_, D>,
    goal: &OpenGoal,
    qpn: QualifiedName,
    solvable: SolvableId,
) -> Option<ConflictSet> {
    let cache = validator.cache();
    let instance = cache.instance(solvable);
    if !cache.is_admissible(qpn, solvable)
        || (instance.is_installed()
            && validator
                .installed_constraint_violation(qpn, instance)
                .is_some())
    {
        return None;
    }
    validator
        .state()
        .ranges(&qpn)
        .iter()
        .find(|active| !active.range.contains(&instance.version))
        .map(|active| ConflictSet::singleton(goal.id).with(&active.origin))
}

fn decided_instance<D: PackageIndex>(
    validator: &Validator<'_, '_, D>,
    qpn: QualifiedName,
) -> Result<SolvableId, InternalError> {
    match validator.state().package(&qpn) {
        Some(PackageValue::Instance(solvable)) => Ok(solvable),
        _ => Err(InternalError::UndecidedPackage(qpn)),
    }
}

/// Estimates the number of branches of `goal` that are not known to fail
/// already. Used to order goals, so it only has to be cheap and never count
/// a branch the validator would accept as failing.
pub(crate) fn plausible_choices<D: PackageIndex>(
    validator: &Validator<'_, '_, D>,
    goal: &OpenGoal,
) -> usize {
    let cache = validator.cache();
    let state = validator.state();

    match goal.variable {
        Variable::Package(qpn) => {
            let ranges = state.ranges(&qpn);
            let fits = |solvable| {
                let version = &cache.instance(solvable).version;
                ranges.iter().all(|active| active.range.contains(version))
            };
            let links = linking::link_targets(state, cache, qpn)
                .into_iter()
                .filter(|target| {
                    state
                        .instance_of(target)
                        .is_some_and(|(solvable, _)| fits(solvable))
                })
                .count();
            let instances = cache
                .admissible_candidates(qpn)
                .iter()
                .filter(|&&solvable| fits(solvable))
                .count();
            links + instances
        }
        Variable::Flag(qpn, flag) => {
            let fixed = cache
                .request()
                .constraints_for(&qpn)
                .any(|constraint| matches!(constraint, UserConstraint::Flag(_, f, _) if *f == flag));
            if fixed {
                1
            } else {
                2
            }
        }
        Variable::Stanza(qpn, stanza) => {
            let fixed = cache.request().constraints_for(&qpn).any(
                |constraint| matches!(constraint, UserConstraint::Stanza(_, s, _) if *s == stanza),
            );
            if fixed {
                1
            } else {
                2
            }
        }
    }
}
