// Copyright 2024 Cornell University
// released under MIT License

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use std::ops::Index;

use crate::policy::ArbitrationPolicy;
use crate::serialize::serialize_transition;
use crate::topology::Topology;

/// Byte range `(start, end)` into the notation text that was parsed
pub type Span = (usize, usize);

/// All automata of a program, in declaration order
pub type Automata = PrimaryMap<AutomatonId, Automaton>;

#[derive(Clone, Copy, Hash, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct AutomatonId(u32);
entity_impl!(AutomatonId, "cta");

#[derive(Clone, Copy, Hash, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct StateId(u32);
entity_impl!(StateId, "state");

#[derive(Clone, Copy, Hash, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct TransitionId(u32);
entity_impl!(TransitionId, "tr");

#[derive(Clone, Copy, Hash, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct ChannelId(u32);
entity_impl!(ChannelId, "chan");

/// A single Communicating Timed Automaton
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Automaton {
    /// The label following `Cta`, unique across a program
    pub label: String,

    /// The state named by the `Init` clause
    pub initial_state: StateId,

    /// States in discovery order
    states: PrimaryMap<StateId, State>,
    state_index: FxHashMap<String, StateId>,

    /// Transitions in declaration order
    transitions: PrimaryMap<TransitionId, Transition>,

    /// States without outgoing transitions, in discovery order
    end_states: Vec<StateId>,

    /// The declaration this automaton was parsed from
    pub source_text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    name: String,
    outgoing: Vec<TransitionId>,
}

impl State {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Outgoing transitions in declaration order. The position of a transition
    /// in this list is its *ordinal*, which is what arbitration policies refer to.
    pub fn outgoing(&self) -> &[TransitionId] {
        &self.outgoing
    }
}

impl Automaton {
    /// Creates an automaton containing only its initial state
    pub fn new(label: String, initial_state: &str, source_text: String, span: Span) -> Self {
        let mut automaton = Self {
            label,
            initial_state: StateId::default(),
            states: PrimaryMap::new(),
            state_index: FxHashMap::default(),
            transitions: PrimaryMap::new(),
            end_states: vec![],
            source_text,
            span,
        };
        automaton.initial_state = automaton.add_state(initial_state);
        automaton.end_states = vec![automaton.initial_state];
        automaton
    }

    /// Interns a state name, returning the existing id if the state was already seen
    pub fn add_state(&mut self, name: &str) -> StateId {
        if let Some(id) = self.state_index.get(name) {
            return *id;
        }
        let id = self.states.push(State {
            name: name.to_string(),
            outgoing: vec![],
        });
        self.state_index.insert(name.to_string(), id);
        id
    }

    /// Adds a transition and keeps the end-state set in sync
    pub fn add_transition(&mut self, transition: Transition) -> TransitionId {
        let start = transition.start;
        let id = self.transitions.push(transition);
        self.states[start].outgoing.push(id);
        self.end_states = self
            .states
            .iter()
            .filter(|(_, state)| state.outgoing.is_empty())
            .map(|(id, _)| id)
            .collect();
        id
    }

    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.state_index.get(name).copied()
    }

    pub fn state_name(&self, id: StateId) -> &str {
        &self.states[id].name
    }

    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> {
        self.states.iter()
    }

    /// The ordered state list
    pub fn state_list(&self) -> Vec<&str> {
        self.states.values().map(|s| s.name()).collect()
    }

    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &Transition)> {
        self.transitions.iter()
    }

    pub fn outgoing(&self, state: StateId) -> &[TransitionId] {
        &self.states[state].outgoing
    }

    pub fn end_states(&self) -> &[StateId] {
        &self.end_states
    }

    pub fn is_end_state(&self, state: StateId) -> bool {
        self.states[state].outgoing.is_empty()
    }

    /// Pretty-prints a transition in notation syntax
    pub fn format_transition(&self, transition: TransitionId) -> String {
        serialize_transition(self, &self.transitions[transition])
    }

    /// Checks the structural invariants of the automaton, returning a
    /// description of every violation found
    pub fn validate(&self) -> Vec<String> {
        let mut violations = vec![];
        if !self.states.is_valid(self.initial_state) {
            violations.push(format!("{}: initial state is not a known state", self.label));
        }
        for (name, id) in self.state_index.iter() {
            if self.states[*id].name != *name {
                violations.push(format!("{}: state `{}` is interned twice", self.label, name));
            }
        }
        if self.state_index.len() != self.states.len() {
            violations.push(format!("{}: state list contains duplicates", self.label));
        }
        for (id, tr) in self.transitions.iter() {
            if !self.states.is_valid(tr.start) || !self.states.is_valid(tr.end) {
                violations.push(format!("{}: {} has an unknown endpoint", self.label, id));
            } else if !self.states[tr.start].outgoing.contains(&id) {
                violations.push(format!(
                    "{}: {} is missing from the outgoing list of `{}`",
                    self.label,
                    id,
                    self.state_name(tr.start)
                ));
            }
        }
        for (id, state) in self.states.iter() {
            let recorded_end = self.end_states.contains(&id);
            if recorded_end != state.outgoing.is_empty() {
                violations.push(format!(
                    "{}: end-state record for `{}` disagrees with its transitions",
                    self.label, state.name
                ));
            }
        }
        violations
    }
}

impl Index<TransitionId> for Automaton {
    type Output = Transition;

    fn index(&self, index: TransitionId) -> &Self::Output {
        &self.transitions[index]
    }
}

impl Index<StateId> for Automaton {
    type Output = State;

    fn index(&self, index: StateId) -> &Self::Output {
        &self.states[index]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub start: StateId,
    pub end: StateId,
    pub comm: Communication,
    pub guard: Guard,
    pub resets_clock: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// `partner!payload` or `partner?payload`
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Communication {
    pub direction: Direction,
    pub partner: String,
    pub payload: String,
}

/// A clock guard: the text as written plus its parsed form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    text: String,
    expr: GuardExpr,
}

impl Guard {
    pub fn new(text: String, expr: GuardExpr) -> Self {
        Self { text, expr }
    }

    /// The guard `true`, used for empty parentheses
    pub fn always() -> Self {
        Self {
            text: String::new(),
            expr: GuardExpr::Const(true),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &GuardExpr {
        &self.expr
    }

    /// Evaluates the guard for a sampled clock value
    pub fn holds(&self, x: u64) -> bool {
        self.expr.eval(x)
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum RelOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Numeric operand of a comparison
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Term {
    Clock,
    Int(u64),
}

impl Term {
    fn eval(&self, x: u64) -> u64 {
        match self {
            Term::Clock => x,
            Term::Int(value) => *value,
        }
    }
}

/// Boolean guard expressions. Chained comparisons such as `9 <= x <= 15`
/// are stored as a conjunction of pairwise comparisons.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum GuardExpr {
    Const(bool),
    Compare(RelOp, Term, Term),
    Not(Box<GuardExpr>),
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
}

impl GuardExpr {
    pub fn eval(&self, x: u64) -> bool {
        match self {
            GuardExpr::Const(b) => *b,
            GuardExpr::Compare(op, lhs, rhs) => {
                let (l, r) = (lhs.eval(x), rhs.eval(x));
                match op {
                    RelOp::Lt => l < r,
                    RelOp::Le => l <= r,
                    RelOp::Gt => l > r,
                    RelOp::Ge => l >= r,
                    RelOp::Eq => l == r,
                    RelOp::Ne => l != r,
                }
            }
            GuardExpr::Not(inner) => !inner.eval(x),
            GuardExpr::And(lhs, rhs) => lhs.eval(x) && rhs.eval(x),
            GuardExpr::Or(lhs, rhs) => lhs.eval(x) || rhs.eval(x),
        }
    }
}

/// A fully analysed program: the unit handed to a backend
#[derive(Debug, Clone)]
pub struct Program {
    pub automata: Automata,
    pub topology: Topology,
    pub policy: ArbitrationPolicy,
}
