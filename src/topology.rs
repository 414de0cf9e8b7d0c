// Copyright 2024 Cornell University
// released under MIT License

//! Pairs every send with the receives that can consume it and derives the
//! channel set of a program.

use cranelift_entity::PrimaryMap;
use itertools::Itertools;
use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::errors::TopologyError;
use crate::ir::*;

/// A unidirectional link carrying one payload from one automaton to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub sender: String,
    pub receiver: String,
    pub payload: String,
    pub sender_id: AutomatonId,
    pub receiver_id: AutomatonId,
    /// Identifier in generated code, derived only from the triple
    pub name: String,
}

impl Channel {
    pub fn name_for(sender: &str, receiver: &str, payload: &str) -> String {
        format!("chan_{}_{}_{}", sender, receiver, payload)
    }

    pub fn triple(&self) -> (&str, &str, &str) {
        (&self.sender, &self.receiver, &self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyWarning {
    /// Several transitions of one automaton are candidates for the same end
    /// of a channel. The first declared one is the primary endpoint.
    AmbiguousEndpoint {
        automaton: String,
        /// Start states of the candidates, in declaration order
        states: Vec<String>,
        communication: String,
        candidates: usize,
        span: Span,
    },
}

impl std::fmt::Display for TopologyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyWarning::AmbiguousEndpoint {
                automaton,
                states,
                communication,
                candidates,
                ..
            } => write!(
                f,
                "{}.{}: {} transitions perform `{}`, the first declared one is the primary endpoint",
                automaton,
                states.iter().unique().join("/"),
                candidates,
                communication
            ),
        }
    }
}

impl TopologyWarning {
    pub fn span(&self) -> Span {
        match self {
            TopologyWarning::AmbiguousEndpoint { span, .. } => *span,
        }
    }
}

/// The resolved channels of a program and which transition uses which channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    channels: PrimaryMap<ChannelId, Channel>,
    bindings: FxHashMap<(AutomatonId, TransitionId), ChannelId>,
    warnings: Vec<TopologyWarning>,
}

impl Topology {
    /// Channels in order of first appearance
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &Channel)> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The channel a transition communicates over
    pub fn channel_of(&self, automaton: AutomatonId, transition: TransitionId) -> Option<ChannelId> {
        self.bindings.get(&(automaton, transition)).copied()
    }

    pub fn find(&self, sender: &str, receiver: &str, payload: &str) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|(_, c)| c.triple() == (sender, receiver, payload))
            .map(|(id, _)| id)
    }

    pub fn warnings(&self) -> &[TopologyWarning] {
        &self.warnings
    }

    /// Distinct payloads in order of first appearance
    pub fn payloads(&self) -> Vec<&str> {
        let mut payloads: Vec<&str> = vec![];
        for channel in self.channels.values() {
            if !payloads.contains(&channel.payload.as_str()) {
                payloads.push(&channel.payload);
            }
        }
        payloads
    }

    /// Channel triples in order, as `(sender, receiver, payload)`
    pub fn triples(&self) -> Vec<(String, String, String)> {
        self.channels
            .values()
            .map(|c| (c.sender.clone(), c.receiver.clone(), c.payload.clone()))
            .collect()
    }
}

impl std::ops::Index<ChannelId> for Topology {
    type Output = Channel;

    fn index(&self, index: ChannelId) -> &Self::Output {
        &self.channels[index]
    }
}

/// Single-use resolution state over one set of automata
pub struct Resolver<'a> {
    automata: &'a Automata,
    labels: FxHashMap<&'a str, AutomatonId>,
    triples: FxHashMap<(&'a str, &'a str, &'a str), ChannelId>,
    topology: Topology,
    errors: Vec<TopologyError>,
}

impl<'a> Resolver<'a> {
    pub fn new(automata: &'a Automata) -> Self {
        let labels = automata
            .iter()
            .map(|(id, a)| (a.label.as_str(), id))
            .collect();
        Self {
            automata,
            labels,
            triples: FxHashMap::default(),
            topology: Topology::default(),
            errors: vec![],
        }
    }

    /// Whether `partner` has a transition that completes `comm` as performed by `automaton`
    fn has_counterpart(&self, automaton: &Automaton, partner: &Automaton, comm: &Communication) -> bool {
        partner.transitions().any(|(_, t)| {
            t.comm.direction != comm.direction
                && t.comm.partner == automaton.label
                && t.comm.payload == comm.payload
        })
    }

    fn channel(&mut self, sender: &'a str, receiver: &'a str, payload: &'a str) -> ChannelId {
        if let Some(id) = self.triples.get(&(sender, receiver, payload)) {
            return *id;
        }
        let id = self.topology.channels.push(Channel {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            payload: payload.to_string(),
            sender_id: self.labels[sender],
            receiver_id: self.labels[receiver],
            name: Channel::name_for(sender, receiver, payload),
        });
        info!(
            "channel {}: {} -> {} carrying `{}`",
            self.topology.channels[id].name, sender, receiver, payload
        );
        self.triples.insert((sender, receiver, payload), id);
        id
    }

    fn resolve_transition(&mut self, aid: AutomatonId, tid: TransitionId) {
        let automata = self.automata;
        let automaton = &automata[aid];
        let tr = &automaton[tid];
        let comm = &tr.comm;

        let partner = self.labels.get(comm.partner.as_str()).copied();
        let matched = partner
            .map(|pid| self.has_counterpart(automaton, &automata[pid], comm))
            .unwrap_or(false);
        if !matched {
            self.errors.push(TopologyError::UnmatchedCommunication {
                automaton: automaton.label.clone(),
                state: automaton.state_name(tr.start).to_string(),
                payload: comm.payload.clone(),
                partner: comm.partner.clone(),
                direction: comm.direction,
                partner_declared: partner.is_some(),
                span: tr.span,
            });
            return;
        }

        let (sender, receiver) = match comm.direction {
            Direction::Send => (automaton.label.as_str(), comm.partner.as_str()),
            Direction::Receive => (comm.partner.as_str(), automaton.label.as_str()),
        };
        let id = self.channel(sender, receiver, &comm.payload);
        debug!("{}: {} uses {}", automaton.label, automaton.format_transition(tid), id);
        self.topology.bindings.insert((aid, tid), id);
    }

    /// Receives of one triple compete across the whole automaton, sends only
    /// when they leave the same state.
    fn check_ambiguity(&mut self, aid: AutomatonId) {
        let automata = self.automata;
        let automaton = &automata[aid];
        let mut groups: Vec<((&Communication, Option<StateId>), Vec<TransitionId>)> = vec![];
        for (tid, tr) in automaton.transitions() {
            let scope = match tr.comm.direction {
                Direction::Receive => None,
                Direction::Send => Some(tr.start),
            };
            let key = (&tr.comm, scope);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(tid),
                None => groups.push((key, vec![tid])),
            }
        }

        for ((comm, _), members) in groups.into_iter().filter(|(_, m)| m.len() > 1) {
            let warning = TopologyWarning::AmbiguousEndpoint {
                automaton: automaton.label.clone(),
                states: members
                    .iter()
                    .map(|tid| automaton.state_name(automaton[*tid].start).to_string())
                    .collect(),
                communication: comm.to_string(),
                candidates: members.len(),
                span: automaton[members[0]].span,
            };
            warn!("{}", warning);
            self.topology.warnings.push(warning);
        }
    }

    /// Resolves every communication. All unmatched communications are
    /// reported together, ordered by position in the input.
    pub fn resolve(mut self) -> Result<Topology, Vec<TopologyError>> {
        let automata = self.automata;
        for (aid, automaton) in automata.iter() {
            for (tid, _) in automaton.transitions() {
                self.resolve_transition(aid, tid);
            }
            self.check_ambiguity(aid);
        }

        if self.errors.is_empty() {
            info!("resolved {} channel(s)", self.topology.len());
            Ok(self.topology)
        } else {
            let mut errors = self.errors;
            errors.sort_by_key(|e| e.span());
            Err(errors)
        }
    }
}

/// Resolves the channel topology of `automata`
pub fn resolve(automata: &Automata) -> Result<Topology, Vec<TopologyError>> {
    Resolver::new(automata).resolve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn resolve_str(input: &str) -> Result<Topology, Vec<TopologyError>> {
        let automata = parse_program(input).unwrap();
        resolve(&automata)
    }

    #[test]
    fn test_ping_pong_has_one_channel() {
        let input = std::fs::read_to_string("tests/ping_pong.cta").unwrap();
        let topology = resolve_str(&input).unwrap();
        assert_eq!(
            topology.triples(),
            vec![("A".to_string(), "B".to_string(), "x".to_string())]
        );
        let (id, channel) = topology.channels().next().unwrap();
        assert_eq!(channel.name, "chan_A_B_x");
        assert_eq!(channel.sender_id, AutomatonId::from_u32(0));
        assert_eq!(channel.receiver_id, AutomatonId::from_u32(1));
        assert_eq!(
            topology.channel_of(AutomatonId::from_u32(0), TransitionId::from_u32(0)),
            Some(id)
        );
        assert_eq!(
            topology.channel_of(AutomatonId::from_u32(1), TransitionId::from_u32(0)),
            Some(id)
        );
        assert!(topology.warnings().is_empty());
    }

    #[test]
    fn test_unmatched_send() {
        let input = std::fs::read_to_string("tests/unmatched.cta").unwrap();
        let errors = resolve_str(&input).unwrap_err();
        assert_eq!(errors.len(), 1);
        let TopologyError::UnmatchedCommunication {
            automaton,
            state,
            payload,
            partner_declared,
            ..
        } = &errors[0];
        assert_eq!((automaton.as_str(), state.as_str(), payload.as_str()), ("A", "a0", "x"));
        assert!(!partner_declared);
    }

    #[test]
    fn test_all_unmatched_communications_are_reported() {
        // B expects `y` where A sends `x`, and C is never declared
        let input = "Cta A = Init a0;a0 B!x(true) a1;a1 C?z(true) a2;Cta B = Init b0;b0 A?y(true) b1;";
        let errors = resolve_str(input).unwrap_err();
        let found: Vec<(String, String, bool)> = errors
            .iter()
            .map(|e| match e {
                TopologyError::UnmatchedCommunication {
                    automaton,
                    payload,
                    partner_declared,
                    ..
                } => (automaton.clone(), payload.clone(), *partner_declared),
            })
            .collect();
        assert_eq!(
            found,
            vec![
                ("A".to_string(), "x".to_string(), true),
                ("A".to_string(), "z".to_string(), false),
                ("B".to_string(), "y".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_every_channel_has_both_endpoints() {
        let input = std::fs::read_to_string("tests/producer_consumer.cta").unwrap();
        let automata = parse_program(&input).unwrap();
        let topology = resolve(&automata).unwrap();
        assert_eq!(
            topology.triples(),
            vec![
                ("Q".to_string(), "W".to_string(), "log".to_string()),
                ("W".to_string(), "Q".to_string(), "data".to_string()),
                ("Q".to_string(), "W".to_string(), "end".to_string()),
            ]
        );
        assert_eq!(topology.payloads(), vec!["log", "data", "end"]);

        for (cid, channel) in topology.channels() {
            let bound = |aid: AutomatonId, direction: Direction| {
                automata[aid].transitions().any(|(tid, t)| {
                    t.comm.direction == direction && topology.channel_of(aid, tid) == Some(cid)
                })
            };
            assert!(bound(channel.sender_id, Direction::Send));
            assert!(bound(channel.receiver_id, Direction::Receive));
        }

        // both sends of `log` share one channel
        let log = topology.find("Q", "W", "log").unwrap();
        let q = AutomatonId::from_u32(0);
        assert_eq!(topology.channel_of(q, TransitionId::from_u32(0)), Some(log));
        assert_eq!(topology.channel_of(q, TransitionId::from_u32(3)), Some(log));
    }

    #[test]
    fn test_duplicate_communication_in_one_state_warns() {
        let input = "Cta A = Init a0;a0 B!x(x < 3) a1;a0 B!x(x >= 3) a2;Cta B = Init b0;b0 A?x(true) b1;";
        let topology = resolve_str(input).unwrap();
        assert_eq!(topology.len(), 1);
        assert_eq!(topology.warnings().len(), 1);
        assert_eq!(
            topology.warnings()[0].to_string(),
            "A.a0: 2 transitions perform `B!x`, the first declared one is the primary endpoint"
        );
    }

    #[test]
    fn test_duplicate_receives_in_different_states_warn() {
        let input = "Cta A = Init a0;a0 B!x(true) a1;Cta B = Init b0;b0 A?x(x < 3) b1;b1 A?x(true) b2;";
        let topology = resolve_str(input).unwrap();
        assert_eq!(topology.len(), 1);
        assert_eq!(topology.warnings().len(), 1);
        let TopologyWarning::AmbiguousEndpoint {
            automaton,
            states,
            candidates,
            span,
            ..
        } = &topology.warnings()[0];
        assert_eq!(automaton, "B");
        assert_eq!(states, &vec!["b0".to_string(), "b1".to_string()]);
        assert_eq!(*candidates, 2);
        // the first declared receive is the primary endpoint
        assert_eq!(span.0, input.find("b0 A?x").unwrap());
        assert_eq!(
            topology.warnings()[0].to_string(),
            "B.b0/b1: 2 transitions perform `A?x`, the first declared one is the primary endpoint"
        );
    }

    #[test]
    fn test_repeated_sends_from_different_states_do_not_warn() {
        let input = std::fs::read_to_string("tests/producer_consumer.cta").unwrap();
        let topology = resolve_str(&input).unwrap();
        assert!(topology.warnings().is_empty());
    }
}
