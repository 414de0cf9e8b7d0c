// Copyright 2024 Cornell University
// released under MIT License

use std::fmt;
use std::io::Write;

use crate::ir::*;

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
        };
        write!(f, "{}", op)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Clock => write!(f, "x"),
            Term::Int(value) => write!(f, "{}", value),
        }
    }
}

impl GuardExpr {
    fn precedence(&self) -> u8 {
        match self {
            GuardExpr::Or(..) => 1,
            GuardExpr::And(..) => 2,
            GuardExpr::Not(_) => 3,
            GuardExpr::Const(_) | GuardExpr::Compare(..) => 4,
        }
    }

    fn fmt_with(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        let parens = self.precedence() < min_precedence;
        if parens {
            write!(f, "(")?;
        }
        match self {
            GuardExpr::Const(b) => write!(f, "{}", b)?,
            GuardExpr::Compare(op, lhs, rhs) => write!(f, "{} {} {}", lhs, op, rhs)?,
            GuardExpr::Not(inner) => match inner.as_ref() {
                GuardExpr::Const(_) => write!(f, "!{}", inner)?,
                _ => write!(f, "!({})", inner)?,
            },
            // both operators are left associative
            GuardExpr::And(lhs, rhs) => {
                lhs.fmt_with(f, 2)?;
                write!(f, " && ")?;
                rhs.fmt_with(f, 3)?;
            }
            GuardExpr::Or(lhs, rhs) => {
                lhs.fmt_with(f, 1)?;
                write!(f, " || ")?;
                rhs.fmt_with(f, 2)?;
            }
        }
        if parens {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for GuardExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 0)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "!"),
            Direction::Receive => write!(f, "?"),
        }
    }
}

impl fmt::Display for Communication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.partner, self.direction, self.payload)
    }
}

/// `a0 B!x(x < 3,{x}) a1`
pub fn serialize_transition(automaton: &Automaton, tr: &Transition) -> String {
    let reset = if tr.resets_clock { ",{x}" } else { "" };
    format!(
        "{} {}({}{}) {}",
        automaton.state_name(tr.start),
        tr.comm,
        tr.guard.expr(),
        reset,
        automaton.state_name(tr.end)
    )
}

pub fn serialize_automaton(out: &mut impl Write, automaton: &Automaton) -> std::io::Result<()> {
    writeln!(
        out,
        "Cta {} = Init {};",
        automaton.label,
        automaton.state_name(automaton.initial_state)
    )?;
    for (_, tr) in automaton.transitions() {
        writeln!(out, "    {};", serialize_transition(automaton, tr))?;
    }
    Ok(())
}

/// Writes automata back out in notation syntax. The output parses to the same
/// automata, with guards in canonical form.
pub fn serialize(out: &mut impl Write, automata: &Automata) -> std::io::Result<()> {
    for (ii, automaton) in automata.values().enumerate() {
        if ii > 0 {
            writeln!(out)?;
        }
        serialize_automaton(out, automaton)?;
    }
    Ok(())
}

pub fn serialize_to_string(automata: &Automata) -> String {
    let mut out = Vec::new();
    // writing into a Vec cannot fail
    let _ = serialize(&mut out, automata);
    String::from_utf8_lossy(&out).into_owned()
}
