// Copyright 2024 Cornell University
// released under MIT License

//! Deterministic reference execution of a program, used to check the
//! arbitration and clock rules the generated code follows. Automata are
//! stepped round-robin in declaration order, one tick each.

use std::fmt;

use cranelift_entity::SecondaryMap;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::EmitConfig;
use crate::ir::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    pub channel_depth: usize,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            channel_depth: 2,
            seed: 0,
        }
    }
}

impl From<&EmitConfig> for SimConfig {
    fn from(config: &EmitConfig) -> Self {
        Self {
            channel_depth: config.channel_depth,
            seed: config.seed.unwrap_or_default() as u64,
        }
    }
}

/// A transition taken during simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub tick: u64,
    pub automaton: String,
    pub from: String,
    pub to: String,
    pub communication: String,
    /// Value of the automaton's clock when the transition was taken
    pub clock: u64,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>4}] {}: {} --{}--> {} (x = {})",
            self.tick, self.automaton, self.from, self.communication, self.to, self.clock
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimReport {
    pub steps: Vec<Step>,
    pub ticks: u64,
    /// Whether every automaton reached an end state
    pub halted: bool,
}

#[derive(Debug, Clone, Default)]
struct Runner {
    state: StateId,
    epoch: u64,
    halted: bool,
}

pub struct Simulation<'a> {
    program: &'a Program,
    config: SimConfig,
    rng: StdRng,
    now: u64,
    runners: SecondaryMap<AutomatonId, Runner>,
    /// Number of messages waiting in each channel
    fill: SecondaryMap<ChannelId, usize>,
}

impl<'a> Simulation<'a> {
    pub fn new(program: &'a Program, config: SimConfig) -> Self {
        let mut runners = SecondaryMap::new();
        for (aid, automaton) in program.automata.iter() {
            runners[aid] = Runner {
                state: automaton.initial_state,
                epoch: 0,
                halted: false,
            };
        }
        Self {
            program,
            config,
            rng: StdRng::seed_from_u64(config.seed),
            now: 0,
            runners,
            fill: SecondaryMap::new(),
        }
    }

    pub fn all_halted(&self) -> bool {
        self.program
            .automata
            .keys()
            .all(|aid| self.runners[aid].halted)
    }

    /// Current state of every automaton, in declaration order
    pub fn states(&self) -> Vec<(&str, &str)> {
        self.program
            .automata
            .iter()
            .map(|(aid, a)| (a.label.as_str(), a.state_name(self.runners[aid].state)))
            .collect()
    }

    fn enabled(&self, aid: AutomatonId, automaton: &Automaton, x: u64) -> Vec<bool> {
        automaton
            .outgoing(self.runners[aid].state)
            .iter()
            .map(|tid| {
                let tr = &automaton[*tid];
                let Some(cid) = self.program.topology.channel_of(aid, *tid) else {
                    return false;
                };
                let room = match tr.comm.direction {
                    Direction::Send => self.fill[cid] < self.config.channel_depth,
                    Direction::Receive => self.fill[cid] > 0,
                };
                room && tr.guard.holds(x)
            })
            .collect()
    }

    /// Gives every automaton one tick, then advances time. Returns the
    /// transitions taken.
    pub fn tick(&mut self) -> Vec<Step> {
        let program = self.program;
        let mut steps = vec![];
        for (aid, automaton) in program.automata.iter() {
            let runner = &self.runners[aid];
            if runner.halted {
                continue;
            }
            if automaton.is_end_state(runner.state) {
                debug!("{} halted in {}", automaton.label, automaton.state_name(runner.state));
                self.runners[aid].halted = true;
                continue;
            }

            let state = runner.state;
            let x = self.now - runner.epoch;
            let enabled = self.enabled(aid, automaton, x);
            let Some(arbiter) = program.policy.arbiter(aid, state) else {
                continue;
            };
            let Some(ordinal) = arbiter.select(&enabled, &mut self.rng) else {
                continue;
            };

            let tid = automaton.outgoing(state)[ordinal];
            let tr = &automaton[tid];
            if let Some(cid) = program.topology.channel_of(aid, tid) {
                match tr.comm.direction {
                    Direction::Send => self.fill[cid] += 1,
                    Direction::Receive => self.fill[cid] -= 1,
                }
            }
            let runner = &mut self.runners[aid];
            runner.state = tr.end;
            if tr.resets_clock {
                runner.epoch = self.now;
            }

            let step = Step {
                tick: self.now,
                automaton: automaton.label.clone(),
                from: automaton.state_name(state).to_string(),
                to: automaton.state_name(tr.end).to_string(),
                communication: tr.comm.to_string(),
                clock: x,
            };
            debug!("{}", step);
            steps.push(step);
        }
        self.now += 1;
        steps
    }

    /// Ticks until every automaton halted or `max_ticks` elapsed
    pub fn run(&mut self, max_ticks: u64) -> SimReport {
        let mut steps = vec![];
        let start = self.now;
        while !self.all_halted() && self.now - start < max_ticks {
            steps.extend(self.tick());
        }
        SimReport {
            steps,
            ticks: self.now - start,
            halted: self.all_halted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze;
    use crate::config::Config;

    fn program(input: &str, config: &Config) -> Program {
        analyze(input, config).unwrap()
    }

    #[test]
    fn test_ping_pong_halts() {
        let input = std::fs::read_to_string("tests/ping_pong.cta").unwrap();
        let program = program(&input, &Config::default());
        let mut sim = Simulation::new(&program, SimConfig::default());
        let report = sim.run(100);

        assert!(report.halted);
        assert_eq!(report.ticks, 2);
        let taken: Vec<String> = report.steps.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            taken,
            vec![
                "[   0] A: a0 --B!x--> a1 (x = 0)",
                "[   0] B: b0 --A?x--> b1 (x = 0)",
            ]
        );
        assert_eq!(sim.states(), vec![("A", "a1"), ("B", "b1")]);
    }

    #[test]
    fn test_guards_wait_for_the_clock() {
        let input = "Cta A = Init a0;a0 B!x(x >= 3) a1;Cta B = Init b0;b0 A?x(true) b1;";
        let program = program(input, &Config::default());
        let report = Simulation::new(&program, SimConfig::default()).run(100);
        let ticks: Vec<u64> = report.steps.iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![3, 3]);
        assert!(report.halted);
    }

    #[test]
    fn test_full_channel_disables_send() {
        let input = "Cta A = Init a0;a0 B!x(true) a1;a1 B!x(true) a2;a2 B!x(true) a3;\
                     Cta B = Init b0;b0 A?x(x >= 10) b1;b1 A?x(true) b2;b2 A?x(true) b3;";
        let program = program(input, &Config::default());
        let report = Simulation::new(&program, SimConfig::default()).run(100);
        let sends: Vec<u64> = report
            .steps
            .iter()
            .filter(|s| s.automaton == "A")
            .map(|s| s.tick)
            .collect();
        assert_eq!(sends, vec![0, 1, 11]);
        let receives: Vec<u64> = report
            .steps
            .iter()
            .filter(|s| s.automaton == "B")
            .map(|s| s.tick)
            .collect();
        assert_eq!(receives, vec![10, 11, 12]);
        assert!(report.halted);
        assert_eq!(report.ticks, 14);
    }

    #[test]
    fn test_clock_reset_is_local() {
        // A resets its clock at tick 2; B never does
        let input = "Cta A = Init a0;a0 B!x(x >= 2,{x}) a1;a1 B!y(x >= 2) a2;\
                     Cta B = Init b0;b0 A?x(true) b1;b1 A?y(true) b2;";
        let program = program(input, &Config::default());
        let report = Simulation::new(&program, SimConfig::default()).run(100);
        let a: Vec<(u64, u64)> = report
            .steps
            .iter()
            .filter(|s| s.automaton == "A")
            .map(|s| (s.tick, s.clock))
            .collect();
        assert_eq!(a, vec![(2, 2), (4, 2)]);
        let b: Vec<(u64, u64)> = report
            .steps
            .iter()
            .filter(|s| s.automaton == "B")
            .map(|s| (s.tick, s.clock))
            .collect();
        assert_eq!(b, vec![(2, 2), (4, 4)]);
    }

    #[test]
    fn test_deterministic_for_a_seed() {
        let input = std::fs::read_to_string("tests/producer_consumer.cta").unwrap();
        let config = Config::load("tests/producer_consumer.yaml").unwrap();
        let program = program(&input, &config);
        let sim_config = SimConfig::from(&config.emit);
        assert_eq!(sim_config.seed, 42);

        let first = Simulation::new(&program, sim_config).run(60);
        let second = Simulation::new(&program, sim_config).run(60);
        assert_eq!(first, second);
        assert!(!first.steps.is_empty());
        assert_eq!(first.steps[0].to_string(), "[   0] Q: q0 --W!log--> q1 (x = 0)");
    }

    #[test]
    fn test_stuck_automaton_does_not_halt() {
        // B never sends, so A waits forever
        let input = "Cta A = Init a0;a0 B?x(true) a1;Cta B = Init b0;b0 A!x(false) b1;";
        let program = program(input, &Config::default());
        let report = Simulation::new(&program, SimConfig::default()).run(25);
        assert!(report.steps.is_empty());
        assert!(!report.halted);
        assert_eq!(report.ticks, 25);
    }
}
