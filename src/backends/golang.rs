// Copyright 2024 Cornell University
// released under MIT License

//! Go backend: one goroutine per automaton, one buffered channel per
//! resolved channel, and a shared tick counter serving as global time.

use std::io::Write;

use itertools::Itertools;
use log::info;
use pest::Parser;
use rustc_hash::FxHashMap;

use crate::config::EmitConfig;
use crate::errors::EmitError;
use crate::ir::*;
use crate::parser::{CtaParser, Rule};
use crate::policy::{PriorityClass, StateArbiter, TieBreak};

pub fn worker_name(label: &str) -> String {
    format!("run_{}", label)
}

pub fn payload_type(payload: &str) -> String {
    format!("msg_{}", payload)
}

/// Makes sure every identifier we generate is used for exactly one thing
pub fn check_names(program: &Program) -> Result<(), Vec<EmitError>> {
    let mut owners: FxHashMap<String, String> = FxHashMap::default();
    let mut errors = vec![];
    let mut claim = |name: String, owner: String| match owners.get(&name) {
        Some(first) if *first != owner => errors.push(EmitError::NameCollision {
            name,
            first: first.clone(),
            second: owner,
        }),
        Some(_) => {}
        None => {
            owners.insert(name, owner);
        }
    };

    for automaton in program.automata.values() {
        claim(
            worker_name(&automaton.label),
            format!("automaton `{}`", automaton.label),
        );
    }
    for payload in program.topology.payloads() {
        claim(payload_type(payload), format!("payload `{}`", payload));
    }
    for (_, channel) in program.topology.channels() {
        claim(
            channel.name.clone(),
            format!(
                "channel {} -> {} : {}",
                channel.sender, channel.receiver, channel.payload
            ),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Writes the Go program. Output only depends on `program` and `config`.
pub fn to_go(program: &Program, config: &EmitConfig, out: &mut impl Write) -> std::io::Result<()> {
    // header
    writeln!(out, "// Code generated by ctac. DO NOT EDIT.")?;
    writeln!(out)?;
    writeln!(out, "package {}", config.package)?;
    writeln!(out)?;
    writeln!(out, "import (")?;
    for import in ["fmt", "math/rand", "sync", "sync/atomic", "time"] {
        writeln!(out, "\t\"{}\"", import)?;
    }
    writeln!(out, ")")?;
    writeln!(out)?;

    writeln!(out, "/* Automata:")?;
    for automaton in program.automata.values() {
        for line in automaton.source_text.lines() {
            writeln!(out, "\t{}", line)?;
        }
    }
    writeln!(out, "*/")?;
    writeln!(out)?;

    // parameters
    writeln!(out, "const (")?;
    writeln!(out, "\tchannelDepth = {}", config.channel_depth)?;
    writeln!(
        out,
        "\ttickInterval = {} * time.Millisecond",
        config.tick_interval_ms
    )?;
    writeln!(
        out,
        "\tpollInterval = {} * time.Millisecond",
        config.poll_interval_ms
    )?;
    if let Some(seed) = config.seed {
        writeln!(out, "\tseed         int64 = {}", seed)?;
    }
    writeln!(out, ")")?;
    writeln!(out)?;

    writeln!(out, "// global time in ticks, advanced by main")?;
    writeln!(out, "var clock atomic.Int64")?;
    writeln!(out)?;

    // payloads and channels
    for payload in program.topology.payloads() {
        writeln!(out, "type {} struct{{}}", payload_type(payload))?;
    }
    writeln!(out)?;
    writeln!(out, "var (")?;
    for (_, channel) in program.topology.channels() {
        writeln!(
            out,
            "\t// {} -> {} : {}",
            channel.sender, channel.receiver, channel.payload
        )?;
        writeln!(
            out,
            "\t{} = make(chan {}, channelDepth)",
            channel.name,
            payload_type(&channel.payload)
        )?;
    }
    writeln!(out, ")")?;
    writeln!(out)?;

    helpers_to_go(out)?;

    for (aid, automaton) in program.automata.iter() {
        worker_to_go(program, config, aid, automaton, out)?;
    }

    main_to_go(program, config, out)?;
    Ok(())
}

fn helpers_to_go(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "// pickFirst returns the first enabled candidate, or -1.")?;
    writeln!(out, "func pickFirst(enabled []bool, candidates ...int) int {{")?;
    writeln!(out, "\tfor _, c := range candidates {{")?;
    writeln!(out, "\t\tif enabled[c] {{")?;
    writeln!(out, "\t\t\treturn c")?;
    writeln!(out, "\t\t}}")?;
    writeln!(out, "\t}}")?;
    writeln!(out, "\treturn -1")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(
        out,
        "// pickRandom returns an enabled candidate chosen uniformly at random, or -1."
    )?;
    writeln!(
        out,
        "func pickRandom(rng *rand.Rand, enabled []bool, candidates ...int) int {{"
    )?;
    writeln!(out, "\tvar live []int")?;
    writeln!(out, "\tfor _, c := range candidates {{")?;
    writeln!(out, "\t\tif enabled[c] {{")?;
    writeln!(out, "\t\t\tlive = append(live, c)")?;
    writeln!(out, "\t\t}}")?;
    writeln!(out, "\t}}")?;
    writeln!(out, "\tif len(live) == 0 {{")?;
    writeln!(out, "\t\treturn -1")?;
    writeln!(out, "\t}}")?;
    writeln!(out, "\treturn live[rng.Intn(len(live))]")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    Ok(())
}

/// `len(ch) < cap(ch)` for sends, `len(ch) > 0` for receives
fn channel_ready(direction: Direction, channel: &str) -> String {
    match direction {
        Direction::Send => format!("len({0}) < cap({0})", channel),
        Direction::Receive => format!("len({}) > 0", channel),
    }
}

fn worker_to_go(
    program: &Program,
    config: &EmitConfig,
    aid: AutomatonId,
    automaton: &Automaton,
    out: &mut impl Write,
) -> std::io::Result<()> {
    let label = &automaton.label;
    writeln!(out, "// {} executes automaton {}:", worker_name(label), label)?;
    writeln!(out, "//")?;
    for line in automaton.source_text.lines() {
        writeln!(out, "//\t{}", line.trim())?;
    }
    writeln!(
        out,
        "func {}(rng *rand.Rand, wg *sync.WaitGroup) {{",
        worker_name(label)
    )?;
    writeln!(out, "\tdefer wg.Done()")?;
    writeln!(
        out,
        "\tstate := \"{}\"",
        automaton.state_name(automaton.initial_state)
    )?;
    writeln!(out, "\tepoch := clock.Load()")?;
    if config.trace {
        writeln!(out, "\tfmt.Printf(\"{}: initial state %s\\n\", state)", label)?;
    }
    writeln!(out, "\tfor {{")?;
    // one clock sample per iteration, shared by guards and resets
    writeln!(out, "\t\tnow := clock.Load()")?;
    writeln!(out, "\t\tx := now - epoch")?;
    writeln!(out, "\t\t_ = x")?;
    writeln!(out, "\t\tchoice := -1")?;
    writeln!(out, "\t\tswitch state {{")?;

    for (sid, state) in automaton.states() {
        if state.outgoing().is_empty() {
            continue;
        }
        writeln!(out, "\t\tcase \"{}\":", state.name())?;

        // enabledness, sampled once per tick
        writeln!(out, "\t\t\tenabled := []bool{{")?;
        for tid in state.outgoing() {
            let tr = &automaton[*tid];
            let ready = match program.topology.channel_of(aid, *tid) {
                Some(cid) => channel_ready(tr.comm.direction, &program.topology[cid].name),
                None => "false".to_string(),
            };
            writeln!(out, "\t\t\t\t({}) && {},", tr.guard.expr(), ready)?;
        }
        writeln!(out, "\t\t\t}}")?;

        let fallback;
        let arbiter = match program.policy.arbiter(aid, sid) {
            Some(arbiter) => arbiter,
            None => {
                fallback = StateArbiter::new(vec![PriorityClass::Default; state.outgoing().len()]);
                &fallback
            }
        };
        for tier in arbiter.tiers() {
            let ordinals = tier.ordinals.iter().join(", ");
            writeln!(out, "\t\t\tif choice < 0 {{")?;
            match tier.tie_break {
                TieBreak::First => {
                    writeln!(out, "\t\t\t\tchoice = pickFirst(enabled, {})", ordinals)?
                }
                TieBreak::Random => writeln!(
                    out,
                    "\t\t\t\tchoice = pickRandom(rng, enabled, {})",
                    ordinals
                )?,
            }
            writeln!(out, "\t\t\t}}")?;
        }

        // perform the chosen transition
        writeln!(out, "\t\t\tswitch choice {{")?;
        for (ordinal, tid) in state.outgoing().iter().enumerate() {
            let tr = &automaton[*tid];
            writeln!(out, "\t\t\tcase {}:", ordinal)?;
            if let Some(cid) = program.topology.channel_of(aid, *tid) {
                let channel = &program.topology[cid];
                match tr.comm.direction {
                    Direction::Send => {
                        writeln!(
                            out,
                            "\t\t\t\t// send {} to {}",
                            tr.comm.payload, tr.comm.partner
                        )?;
                        writeln!(
                            out,
                            "\t\t\t\t{} <- {}{{}}",
                            channel.name,
                            payload_type(&tr.comm.payload)
                        )?;
                    }
                    Direction::Receive => {
                        writeln!(
                            out,
                            "\t\t\t\t// receive {} from {}",
                            tr.comm.payload, tr.comm.partner
                        )?;
                        writeln!(out, "\t\t\t\t<-{}", channel.name)?;
                    }
                }
            }
            writeln!(
                out,
                "\t\t\t\tstate = \"{}\"",
                automaton.state_name(tr.end)
            )?;
            if tr.resets_clock {
                writeln!(out, "\t\t\t\tepoch = now")?;
            }
        }
        writeln!(out, "\t\t\t}}")?;
    }

    if !automaton.end_states().is_empty() {
        let cases = automaton
            .end_states()
            .iter()
            .map(|s| format!("\"{}\"", automaton.state_name(*s)))
            .join(", ");
        writeln!(out, "\t\tcase {}:", cases)?;
        if config.trace {
            writeln!(out, "\t\t\tfmt.Printf(\"{}: halted in state %s\\n\", state)", label)?;
        }
        writeln!(out, "\t\t\treturn")?;
    }
    writeln!(out, "\t\t}}")?;

    writeln!(out, "\t\tif choice < 0 {{")?;
    writeln!(out, "\t\t\ttime.Sleep(pollInterval)")?;
    writeln!(out, "\t\t\tcontinue")?;
    writeln!(out, "\t\t}}")?;
    if config.trace {
        writeln!(out, "\t\tfmt.Printf(\"{}: moved to state %s\\n\", state)", label)?;
    }
    writeln!(out, "\t}}")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    Ok(())
}

fn main_to_go(program: &Program, config: &EmitConfig, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "func main() {{")?;
    match config.seed {
        Some(_) => writeln!(out, "\tbase := seed")?,
        None => writeln!(out, "\tbase := time.Now().UnixNano()")?,
    }
    writeln!(out, "\tvar wg sync.WaitGroup")?;
    writeln!(out, "\twg.Add({})", program.automata.len())?;
    for (ii, automaton) in program.automata.values().enumerate() {
        writeln!(
            out,
            "\tgo {}(rand.New(rand.NewSource(base+{})), &wg)",
            worker_name(&automaton.label),
            ii
        )?;
    }
    writeln!(out)?;
    writeln!(out, "\tdone := make(chan struct{{}})")?;
    writeln!(out, "\tgo func() {{")?;
    writeln!(out, "\t\twg.Wait()")?;
    writeln!(out, "\t\tclose(done)")?;
    writeln!(out, "\t}}()")?;
    writeln!(out)?;
    writeln!(out, "\tticker := time.NewTicker(tickInterval)")?;
    writeln!(out, "\tdefer ticker.Stop()")?;
    writeln!(out, "\tfor {{")?;
    writeln!(out, "\t\tselect {{")?;
    writeln!(out, "\t\tcase <-done:")?;
    writeln!(out, "\t\t\tfmt.Println(\"all automata halted\")")?;
    writeln!(out, "\t\t\treturn")?;
    writeln!(out, "\t\tcase <-ticker.C:")?;
    writeln!(out, "\t\t\tclock.Add(1)")?;
    writeln!(out, "\t\t}}")?;
    writeln!(out, "\t}}")?;
    writeln!(out, "}}")?;
    Ok(())
}

/// Checks names, then renders the program into a string
pub fn emit_to_string(program: &Program, config: &EmitConfig) -> Result<String, Vec<EmitError>> {
    check_names(program)?;
    let mut out = Vec::new();
    to_go(program, config, &mut out).map_err(|e| vec![EmitError::Io(e)])?;
    info!(
        "generated {} worker(s) and {} channel(s), {} bytes of Go",
        program.automata.len(),
        program.topology.len(),
        out.len()
    );
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Reads the channel triples back from the annotations of generated code,
/// in declaration order
pub fn recover_channels(go_source: &str) -> Vec<(String, String, String)> {
    go_source
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("//"))
        .filter_map(|line| CtaParser::parse(Rule::channel_note, line).ok())
        .filter_map(|mut pairs| {
            let note = pairs.next()?;
            let mut inner = note.into_inner();
            let sender = inner.next()?.as_str().to_string();
            let receiver = inner.next()?.as_str().to_string();
            let payload = inner.next()?.as_str().to_string();
            Some((sender, receiver, payload))
        })
        .collect()
}
