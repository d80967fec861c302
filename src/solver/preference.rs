//! Reorders the branches of a choice node and picks the next goal.
//!
//! Nothing in here removes a branch, it only decides in which order the
//! explorer tries them. All orderings are total so the result never depends
//! on hash map iteration order.

use std::cmp::{Ordering, Reverse};

use crate::{
    config::{GoalOrder, InstalledPreference, SolverConfig, VersionPreference},
    package::{FlagDecl, Stanza},
    qualified::{Choice, QualifiedName},
    request::{PackagePreference, Request},
    solver::cache::SolverCache,
    NameId, PackageIndex, SolvableId, VersionRange,
};

/// The per-package view on the preferences of the user.
struct PackagePreferences<'a> {
    preferred_ranges: Vec<&'a VersionRange>,
    version_preference: VersionPreference,
    installed_preference: InstalledPreference,
}

impl<'a> PackagePreferences<'a> {
    fn new(request: &'a Request, config: &SolverConfig, name: NameId) -> Self {
        let mut preferences = Self {
            preferred_ranges: Vec::new(),
            version_preference: config.version_preference,
            installed_preference: config.installed_preference,
        };
        for preference in request.preferences_for(name) {
            match preference {
                PackagePreference::Version(_, range) => preferences.preferred_ranges.push(range),
                PackagePreference::VersionOrder(_, order) => {
                    preferences.version_preference = *order
                }
                PackagePreference::Installed(_, installed) => {
                    preferences.installed_preference = *installed
                }
                PackagePreference::Flag(..) | PackagePreference::Stanzas(..) => {}
            }
        }
        preferences
    }
}

/// Sorts the candidates of a package in the order in which they should be
/// tried:
///
/// 1. versions inside a range the user prefers,
/// 2. installed instances, unless the package prefers the latest version,
/// 3. the preferred version order,
/// 4. installed before source instances of the same version,
/// 5. the id of the instance, to make the order total.
pub(crate) fn sort_candidates<D: PackageIndex>(
    cache: &SolverCache<'_, D>,
    name: NameId,
    candidates: &mut [SolvableId],
) {
    let preferences = PackagePreferences::new(cache.request(), cache.config(), name);
    let in_preferred_range = |solvable: SolvableId| {
        let version = &cache.instance(solvable).version;
        preferences.preferred_ranges.is_empty()
            || preferences
                .preferred_ranges
                .iter()
                .any(|range| range.contains(version))
    };

    candidates.sort_by(|&a, &b| {
        let (inst_a, inst_b) = (cache.instance(a), cache.instance(b));
        in_preferred_range(b)
            .cmp(&in_preferred_range(a))
            .then_with(|| match preferences.installed_preference {
                InstalledPreference::PreferInstalled => {
                    inst_b.is_installed().cmp(&inst_a.is_installed())
                }
                InstalledPreference::PreferLatest => Ordering::Equal,
            })
            .then_with(|| match preferences.version_preference {
                VersionPreference::Latest => inst_b.version.cmp(&inst_a.version),
                VersionPreference::Oldest => inst_a.version.cmp(&inst_b.version),
            })
            .then_with(|| inst_b.is_installed().cmp(&inst_a.is_installed()))
            .then_with(|| a.cmp(&b))
    });
}

/// Combines the link options and the instances of a package node into the
/// ordered list of branches.
pub(crate) fn order_package_branches(
    links: Vec<QualifiedName>,
    instances: &[SolvableId],
    config: &SolverConfig,
) -> Vec<Choice> {
    let links = links.into_iter().map(Choice::Link);
    let instances = instances.iter().copied().map(Choice::Instance);
    if config.prefer_linked {
        links.chain(instances).collect()
    } else {
        instances.chain(links).collect()
    }
}

/// Returns the values of a flag in the order in which they should be tried.
///
/// The default of the package comes first unless the user prefers the other
/// value. Manual flags always try their default first.
pub(crate) fn flag_order(request: &Request, name: NameId, decl: &FlagDecl) -> [bool; 2] {
    let preferred = if decl.manual {
        decl.default
    } else {
        request
            .preferences_for(name)
            .find_map(|preference| match preference {
                PackagePreference::Flag(_, flag, value) if *flag == decl.name => Some(*value),
                _ => None,
            })
            .unwrap_or(decl.default)
    };
    [preferred, !preferred]
}

/// Returns the values of a stanza in the order in which they should be
/// tried. Stanzas are disabled first unless the user asked for them.
pub(crate) fn stanza_order(request: &Request, name: NameId, stanza: Stanza) -> [bool; 2] {
    let enable_first = request.preferences_for(name).any(|preference| {
        matches!(preference, PackagePreference::Stanzas(_, stanzas) if stanzas.contains(&stanza))
    });
    [enable_first, !enable_first]
}

/// A candidate for the next goal together with the data the goal order
/// needs.
pub(crate) struct GoalCandidate {
    /// The position of the goal in the order in which goals were opened
    pub position: usize,
    /// The number of choices of the goal that are not known to fail
    pub plausible_choices: usize,
    /// How often the variable of the goal took part in a conflict
    pub conflicts: u32,
}

/// Returns the index of the goal that should be decided next.
pub(crate) fn select_goal(
    candidates: impl IntoIterator<Item = GoalCandidate>,
    config: &SolverConfig,
) -> Option<usize> {
    candidates
        .into_iter()
        .min_by_key(|candidate| {
            let primary = match config.goal_order {
                GoalOrder::InOrder => 0,
                GoalOrder::ReallyEasyFirst => usize::from(candidate.plausible_choices > 1),
                GoalOrder::FewestChoices => candidate.plausible_choices,
            };
            let conflicts = if config.count_conflicts {
                candidate.conflicts
            } else {
                0
            };
            (primary, Reverse(conflicts), candidate.position)
        })
        .map(|candidate| candidate.position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlagId;

    fn candidate(position: usize, plausible_choices: usize, conflicts: u32) -> GoalCandidate {
        GoalCandidate {
            position,
            plausible_choices,
            conflicts,
        }
    }

    #[test]
    fn test_goal_orders() {
        let goals = || {
            vec![
                candidate(0, 3, 0),
                candidate(1, 1, 0),
                candidate(2, 2, 5),
                candidate(3, 0, 0),
            ]
        };

        let config = SolverConfig::default().with_count_conflicts(false);
        assert_eq!(
            select_goal(goals(), &config.clone().with_goal_order(GoalOrder::InOrder)),
            Some(0)
        );
        assert_eq!(
            select_goal(goals(), &config.clone().with_goal_order(GoalOrder::ReallyEasyFirst)),
            Some(1)
        );
        assert_eq!(
            select_goal(goals(), &config.with_goal_order(GoalOrder::FewestChoices)),
            Some(3)
        );

        let config = SolverConfig::default().with_goal_order(GoalOrder::InOrder);
        assert_eq!(select_goal(goals(), &config), Some(2));
    }

    #[test]
    fn test_flag_order_respects_manual_flags() {
        let request = Request::new().preferences([PackagePreference::Flag(
            NameId(0),
            FlagId(0),
            false,
        )]);
        let auto = FlagDecl::new(FlagId(0), true);
        assert_eq!(flag_order(&request, NameId(0), &auto), [false, true]);
        assert_eq!(flag_order(&request, NameId(0), &auto.manual()), [true, false]);
    }
}
