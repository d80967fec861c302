//! Evaluation of conditional dependency trees.
//!
//! Conditions are evaluated with three-valued logic: a condition that
//! references a flag that has not been decided yet evaluates to `None`,
//! unless the value of the condition is already determined by the decided
//! parts (e.g. `false && x`).

use crate::{
    package::{CondTree, Condition, Dependency, Environment},
    FlagId,
};

/// Evaluates a condition. `flag` returns the value of a flag of the package
/// the condition belongs to, or `None` if it is not decided yet.
pub(crate) fn evaluate(
    condition: &Condition,
    environment: &Environment,
    flag: &impl Fn(FlagId) -> Option<bool>,
) -> Option<bool> {
    match condition {
        Condition::Lit(value) => Some(*value),
        Condition::Flag(id) => flag(*id),
        Condition::Platform(test) => Some(environment.test(test)),
        Condition::Not(inner) => evaluate(inner, environment, flag).map(|value| !value),
        Condition::And(lhs, rhs) => {
            match (
                evaluate(lhs, environment, flag),
                evaluate(rhs, environment, flag),
            ) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }
        }
        Condition::Or(lhs, rhs) => {
            match (
                evaluate(lhs, environment, flag),
                evaluate(rhs, environment, flag),
            ) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        }
    }
}

/// Returns true if the condition mentions the flag.
pub(crate) fn references_flag(condition: &Condition, flag: FlagId) -> bool {
    let mut found = false;
    condition.for_each_flag(&mut |id| found |= id == flag);
    found
}

/// Collects the dependencies of a tree whose conditions can be fully
/// evaluated. Branches with undecided conditions are skipped.
pub(crate) fn collect_dependencies<'t>(
    tree: &'t CondTree,
    environment: &Environment,
    flag: &impl Fn(FlagId) -> Option<bool>,
    out: &mut Vec<&'t Dependency>,
) {
    out.extend(tree.dependencies.iter());
    for branch in &tree.branches {
        match evaluate(&branch.condition, environment, flag) {
            Some(true) => collect_dependencies(&branch.then, environment, flag, out),
            Some(false) => collect_dependencies(&branch.otherwise, environment, flag, out),
            None => {}
        }
    }
}
