// Copyright 2024 Cornell University
// released under MIT License

//! Decides which enabled transition an automaton takes when several are
//! enabled in the same tick.

use log::{debug, info};
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::config::{ClassKind, StateArbitration};
use crate::errors::PolicyError;
use crate::ir::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    /// Pre-empts every other class; ties go to the earliest declared
    Exclusive,
    /// Tried in ascending rank after the exclusive transitions
    Ranked(u32),
    /// Chosen at random among the enabled ones, last
    Default,
}

impl From<(ClassKind, u32)> for PriorityClass {
    fn from((kind, rank): (ClassKind, u32)) -> Self {
        match kind {
            ClassKind::Exclusive => PriorityClass::Exclusive,
            ClassKind::Ranked => PriorityClass::Ranked(rank),
            ClassKind::Default => PriorityClass::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    First,
    Random,
}

/// A group of transitions of equal priority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub tie_break: TieBreak,
    /// Ordinals in declaration order
    pub ordinals: Vec<usize>,
}

/// Selection procedure for one state. Tiers are tried in order and the first
/// tier with an enabled member decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateArbiter {
    classes: Vec<PriorityClass>,
    tiers: Vec<Tier>,
}

impl StateArbiter {
    /// `classes[i]` is the class of the state's `i`-th outgoing transition
    pub fn new(classes: Vec<PriorityClass>) -> Self {
        let mut tiers = vec![];

        let exclusive: Vec<usize> = Self::ordinals_where(&classes, |c| c == PriorityClass::Exclusive);
        if !exclusive.is_empty() {
            tiers.push(Tier {
                tie_break: TieBreak::First,
                ordinals: exclusive,
            });
        }

        let mut ranks: Vec<u32> = classes
            .iter()
            .filter_map(|c| match c {
                PriorityClass::Ranked(rank) => Some(*rank),
                _ => None,
            })
            .collect();
        ranks.sort_unstable();
        ranks.dedup();
        for rank in ranks {
            tiers.push(Tier {
                tie_break: TieBreak::Random,
                ordinals: Self::ordinals_where(&classes, |c| c == PriorityClass::Ranked(rank)),
            });
        }

        let default: Vec<usize> = Self::ordinals_where(&classes, |c| c == PriorityClass::Default);
        if !default.is_empty() {
            tiers.push(Tier {
                tie_break: TieBreak::Random,
                ordinals: default,
            });
        }

        Self { classes, tiers }
    }

    fn ordinals_where(classes: &[PriorityClass], pred: impl Fn(PriorityClass) -> bool) -> Vec<usize> {
        classes
            .iter()
            .enumerate()
            .filter(|(_, c)| pred(**c))
            .map(|(ii, _)| ii)
            .collect()
    }

    pub fn classes(&self) -> &[PriorityClass] {
        &self.classes
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Picks the ordinal of the transition to take, given which outgoing
    /// transitions are enabled. `None` means stay in the current state.
    pub fn select(&self, enabled: &[bool], rng: &mut impl Rng) -> Option<usize> {
        debug_assert_eq!(enabled.len(), self.classes.len());
        for tier in self.tiers.iter() {
            let candidates: Vec<usize> = tier
                .ordinals
                .iter()
                .copied()
                .filter(|ii| enabled.get(*ii).copied().unwrap_or(false))
                .collect();
            match (candidates.len(), tier.tie_break) {
                (0, _) => continue,
                (1, _) | (_, TieBreak::First) => return Some(candidates[0]),
                (n, TieBreak::Random) => return Some(candidates[rng.gen_range(0..n)]),
            }
        }
        None
    }
}

/// Arbiters for every state that has outgoing transitions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArbitrationPolicy {
    arbiters: FxHashMap<(AutomatonId, StateId), StateArbiter>,
}

impl ArbitrationPolicy {
    pub fn arbiter(&self, automaton: AutomatonId, state: StateId) -> Option<&StateArbiter> {
        self.arbiters.get(&(automaton, state))
    }

    /// Combines the configured priorities with the automata. States with a
    /// single outgoing transition need no entry; states with several must have
    /// one assigning a class to each transition.
    pub fn resolve(
        automata: &Automata,
        entries: &[StateArbitration],
    ) -> Result<Self, Vec<PolicyError>> {
        let mut errors = vec![];
        let mut arbiters = FxHashMap::default();

        for entry in entries {
            let Some((aid, automaton)) = automata.iter().find(|(_, a)| a.label == entry.automaton)
            else {
                errors.push(PolicyError::UnknownAutomaton {
                    automaton: entry.automaton.clone(),
                });
                continue;
            };
            let Some(sid) = automaton.state_id(&entry.state) else {
                errors.push(PolicyError::UnknownState {
                    automaton: entry.automaton.clone(),
                    state: entry.state.clone(),
                });
                continue;
            };
            if arbiters.contains_key(&(aid, sid)) {
                errors.push(PolicyError::DuplicateEntry {
                    automaton: entry.automaton.clone(),
                    state: entry.state.clone(),
                });
                continue;
            }
            if let Some(classes) = Self::entry_classes(automaton, sid, entry, &mut errors) {
                debug!("{}.{}: {:?}", automaton.label, entry.state, classes);
                arbiters.insert((aid, sid), StateArbiter::new(classes));
            }
        }

        for (aid, automaton) in automata.iter() {
            for (sid, state) in automaton.states() {
                let outgoing = state.outgoing();
                if outgoing.is_empty() || arbiters.contains_key(&(aid, sid)) {
                    continue;
                }
                if outgoing.len() == 1 {
                    arbiters.insert((aid, sid), StateArbiter::new(vec![PriorityClass::Default]));
                } else {
                    errors.push(PolicyError::MissingArbitration {
                        automaton: automaton.label.clone(),
                        state: state.name().to_string(),
                        transitions: outgoing.len(),
                        span: automaton[outgoing[0]].span,
                    });
                }
            }
        }

        if errors.is_empty() {
            info!("arbitration resolved for {} state(s)", arbiters.len());
            Ok(Self { arbiters })
        } else {
            Err(errors)
        }
    }

    fn entry_classes(
        automaton: &Automaton,
        state: StateId,
        entry: &StateArbitration,
        errors: &mut Vec<PolicyError>,
    ) -> Option<Vec<PriorityClass>> {
        let transitions = automaton.outgoing(state).len();
        let before = errors.len();
        let mut classes: Vec<Option<PriorityClass>> = vec![None; transitions];

        for priority in entry.transitions.iter() {
            let ordinal = priority.ordinal;
            if ordinal >= transitions {
                errors.push(PolicyError::OrdinalOutOfRange {
                    automaton: entry.automaton.clone(),
                    state: entry.state.clone(),
                    ordinal,
                    transitions,
                });
                continue;
            }
            if classes[ordinal].is_some() {
                errors.push(PolicyError::DuplicateOrdinal {
                    automaton: entry.automaton.clone(),
                    state: entry.state.clone(),
                    ordinal,
                });
                continue;
            }
            let rank = match (priority.class, priority.rank) {
                (ClassKind::Ranked, None) => {
                    errors.push(PolicyError::MissingRank {
                        automaton: entry.automaton.clone(),
                        state: entry.state.clone(),
                        ordinal,
                    });
                    continue;
                }
                (_, rank) => rank.unwrap_or_default(),
            };
            classes[ordinal] = Some(PriorityClass::from((priority.class, rank)));
        }

        for (ordinal, class) in classes.iter().enumerate() {
            if class.is_none() {
                errors.push(PolicyError::UnassignedTransition {
                    automaton: entry.automaton.clone(),
                    state: entry.state.clone(),
                    ordinal,
                });
            }
        }

        if errors.len() > before {
            return None;
        }
        classes.into_iter().collect()
    }
}
