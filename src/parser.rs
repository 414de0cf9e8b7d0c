// Copyright 2024 Cornell University
// released under MIT License

use log::{debug, info};
use pest::error::InputLocation;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::PrattParser;
use pest::Parser;
use pest_derive::Parser;
use rustc_hash::FxHashMap;

use crate::errors::{ParseError, ParseErrorKind};
use crate::ir::*;
use crate::lexer::{scan, Clause, Declaration};

#[derive(Parser)]
#[grammar = "cta.pest"]
pub(crate) struct CtaParser;

lazy_static::lazy_static! {
    static ref PRATT_PARSER: PrattParser<Rule> = {
        use pest::pratt_parser::{Assoc::*, Op};
        use Rule::*;

        // Precedence is defined lowest to highest
        PrattParser::new()
            .op(Op::infix(or, Left))
            .op(Op::infix(and, Left))
            .op(Op::prefix(not))
    };
}

/// Operand of a comparison chain before its type is known
enum Operand {
    Num(Term),
    Cond(GuardExpr),
}

/// Parses guard text (the contents of a transition's parentheses, without the
/// reset marker). Empty text is the guard `true`.
pub fn parse_guard(text: &str) -> Result<Guard, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Guard::always());
    }
    let mut pairs = CtaParser::parse(Rule::guard, text).map_err(|e| e.variant.message().to_string())?;
    let guard_pair = pairs
        .next()
        .ok_or_else(|| "empty parse result".to_string())?;
    let expr_pair = guard_pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::guard_expr)
        .ok_or_else(|| "expected a guard expression".to_string())?;
    let expr = parse_guard_expr(expr_pair.into_inner())?;
    Ok(Guard::new(text.to_string(), expr))
}

fn parse_guard_expr(pairs: Pairs<Rule>) -> Result<GuardExpr, String> {
    PRATT_PARSER
        .map_primary(|primary| match primary.as_rule() {
            Rule::comparison => parse_comparison(primary),
            rule => Err(format!("expected a comparison, found {:?}", rule)),
        })
        .map_infix(|lhs, op, rhs| {
            let (lhs, rhs) = (Box::new(lhs?), Box::new(rhs?));
            match op.as_rule() {
                Rule::and => Ok(GuardExpr::And(lhs, rhs)),
                Rule::or => Ok(GuardExpr::Or(lhs, rhs)),
                rule => Err(format!("expected `&&` or `||`, found {:?}", rule)),
            }
        })
        .map_prefix(|op, arg| match op.as_rule() {
            Rule::not => Ok(GuardExpr::Not(Box::new(arg?))),
            rule => Err(format!("expected `!`, found {:?}", rule)),
        })
        .parse(pairs)
}

/// `a op1 b op2 c` is read as `a op1 b && b op2 c`; a lone operand must
/// already be a condition
fn parse_comparison(pair: Pair<Rule>) -> Result<GuardExpr, String> {
    let text = pair.as_str().to_string();
    let mut operands = vec![];
    let mut ops = vec![];
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::relop => ops.push(parse_relop(inner.as_str())?),
            _ => operands.push(parse_operand(inner)?),
        }
    }

    if ops.is_empty() {
        return match operands.pop() {
            Some(Operand::Cond(expr)) => Ok(expr),
            Some(Operand::Num(term)) => Err(format!(
                "`{}` is a number, not a condition (compare it, e.g. `{} < 10`)",
                term, term
            )),
            None => Err("empty comparison".to_string()),
        };
    }

    let terms = operands
        .into_iter()
        .map(|operand| match operand {
            Operand::Num(term) => Ok(term),
            Operand::Cond(_) => Err(format!(
                "in `{}`: comparison operands must be the clock `x` or integer literals",
                text
            )),
        })
        .collect::<Result<Vec<Term>, String>>()?;

    let mut comparisons = ops
        .iter()
        .zip(terms.windows(2))
        .map(|(op, pair)| GuardExpr::Compare(*op, pair[0], pair[1]));
    let first = comparisons
        .next()
        .ok_or_else(|| "empty comparison".to_string())?;
    Ok(comparisons.fold(first, |acc, cmp| {
        GuardExpr::And(Box::new(acc), Box::new(cmp))
    }))
}

fn parse_operand(pair: Pair<Rule>) -> Result<Operand, String> {
    match pair.as_rule() {
        Rule::clock => Ok(Operand::Num(Term::Clock)),
        Rule::integer => {
            // the generated clock is a signed 64-bit integer
            let value = pair
                .as_str()
                .parse::<i64>()
                .map_err(|e| format!("invalid integer `{}`: {}", pair.as_str(), e))?;
            Ok(Operand::Num(Term::Int(value as u64)))
        }
        Rule::boolean => Ok(Operand::Cond(GuardExpr::Const(pair.as_str() == "true"))),
        Rule::paren => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| "empty parentheses".to_string())?;
            parse_guard_expr(inner.into_inner()).map(Operand::Cond)
        }
        rule => Err(format!("unexpected operand {:?}", rule)),
    }
}

fn parse_relop(op: &str) -> Result<RelOp, String> {
    match op {
        "<" => Ok(RelOp::Lt),
        "<=" => Ok(RelOp::Le),
        ">" => Ok(RelOp::Gt),
        ">=" => Ok(RelOp::Ge),
        "==" => Ok(RelOp::Eq),
        "!=" => Ok(RelOp::Ne),
        other => Err(format!("unknown comparison operator `{}`", other)),
    }
}

/// Parses the clauses of one declaration into an `Automaton`
pub struct ParserContext<'a> {
    decl: &'a Declaration<'a>,
}

impl<'a> ParserContext<'a> {
    pub fn new(decl: &'a Declaration<'a>) -> Self {
        Self { decl }
    }

    fn malformed(clause: &Clause, err: pest::error::Error<Rule>) -> ParseError {
        let pos = match err.location {
            InputLocation::Pos(pos) => pos,
            InputLocation::Span((start, _)) => start,
        };
        ParseError::new(
            ParseErrorKind::Malformed(format!(
                "{} (at column {})",
                err.variant.message(),
                pos + 1
            )),
            clause.text,
            clause.offset,
        )
    }

    // Helper for pairs the grammar guarantees
    fn expect_pair<'i>(
        clause: &Clause,
        pair: Option<Pair<'i, Rule>>,
        what: &str,
    ) -> Result<Pair<'i, Rule>, ParseError> {
        pair.ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::Malformed(format!("expected {}", what)),
                clause.text,
                clause.offset,
            )
        })
    }

    /// `Cta A = Init a0` → (`A`, `a0`)
    fn parse_header(&self) -> Result<(String, String), ParseError> {
        let clause = &self.decl.header;
        // without `=` the grammar reports the header as malformed
        let has_init = match clause.text.split_once('=') {
            Some((_, rest)) => rest.split_whitespace().next() == Some("Init"),
            None => true,
        };
        if !has_init {
            return Err(ParseError::new(
                ParseErrorKind::MissingInit,
                clause.text,
                clause.offset,
            ));
        }
        let mut pairs =
            CtaParser::parse(Rule::header, clause.text).map_err(|e| Self::malformed(clause, e))?;
        let header = Self::expect_pair(clause, pairs.next(), "a header")?;
        let mut inner = header.into_inner();
        let label = Self::expect_pair(clause, inner.next(), "a label")?;
        let state = Self::expect_pair(clause, inner.next(), "an initial state")?;
        Ok((label.as_str().to_string(), state.as_str().to_string()))
    }

    fn parse_transition(&self, automaton: &mut Automaton, clause: &Clause) -> Result<(), ParseError> {
        let open = match (clause.text.find('('), clause.text.rfind(')')) {
            (Some(open), Some(close)) if open < close => open,
            _ => {
                return Err(ParseError::new(
                    ParseErrorKind::MissingGuard,
                    clause.text,
                    clause.offset,
                ))
            }
        };
        let comm_text = &clause.text[..open];
        if !comm_text.contains('!') && !comm_text.contains('?') {
            return Err(ParseError::new(
                ParseErrorKind::MissingMarker,
                clause.text,
                clause.offset,
            ));
        }

        let mut pairs = CtaParser::parse(Rule::transition, clause.text)
            .map_err(|e| Self::malformed(clause, e))?;
        let transition = Self::expect_pair(clause, pairs.next(), "a transition")?;
        let mut inner = transition
            .into_inner()
            .filter(|p| p.as_rule() != Rule::EOI);

        let start = Self::expect_pair(clause, inner.next(), "a start state")?;
        let comm_pair = Self::expect_pair(clause, inner.next(), "a communication")?;
        let guard_group = Self::expect_pair(clause, inner.next(), "a guard")?;
        let end = Self::expect_pair(clause, inner.next(), "an end state")?;

        // partner, marker, payload
        let mut comm_inner = comm_pair.into_inner();
        let partner = Self::expect_pair(clause, comm_inner.next(), "a partner label")?;
        let marker = Self::expect_pair(clause, comm_inner.next(), "`!` or `?`")?;
        let payload = Self::expect_pair(clause, comm_inner.next(), "a payload")?;
        let direction = match marker.as_rule() {
            Rule::send => Direction::Send,
            _ => Direction::Receive,
        };

        let mut resets_clock = false;
        let mut guard_text = "";
        for pair in guard_group.into_inner() {
            match pair.as_rule() {
                Rule::raw_guard => guard_text = pair.as_str(),
                Rule::reset => resets_clock = true,
                _ => {}
            }
        }
        let guard = parse_guard(guard_text).map_err(|reason| {
            ParseError::new(ParseErrorKind::InvalidGuard(reason), clause.text, clause.offset)
        })?;

        let start = automaton.add_state(start.as_str());
        let end = automaton.add_state(end.as_str());
        let id = automaton.add_transition(Transition {
            start,
            end,
            comm: Communication {
                direction,
                partner: partner.as_str().to_string(),
                payload: payload.as_str().to_string(),
            },
            guard,
            resets_clock,
            span: (clause.offset, clause.end()),
        });
        debug!("{}: parsed {}", automaton.label, automaton.format_transition(id));
        Ok(())
    }

    /// Parses the whole declaration. Fails on the first malformed clause.
    pub fn parse_automaton(&self) -> Result<Automaton, ParseError> {
        let (label, initial) = self.parse_header()?;
        let whole = &self.decl.whole;
        let mut automaton = Automaton::new(
            label,
            &initial,
            whole.text.to_string(),
            (whole.offset, whole.end()),
        );
        for clause in self.decl.transitions.iter() {
            self.parse_transition(&mut automaton, clause)?;
        }
        Ok(automaton)
    }
}

/// Parses a concatenation of `Cta` declarations into automata, in
/// declaration order
pub fn parse_program(input: &str) -> Result<Automata, ParseError> {
    let declarations = scan(input)?;
    info!("found {} automaton declaration(s)", declarations.len());

    let mut automata = Automata::new();
    let mut labels: FxHashMap<String, AutomatonId> = FxHashMap::default();
    for decl in declarations.iter() {
        let automaton = ParserContext::new(decl).parse_automaton()?;
        if labels.contains_key(&automaton.label) {
            return Err(ParseError::new(
                ParseErrorKind::DuplicateLabel(automaton.label.clone()),
                decl.header.text,
                decl.header.offset,
            ));
        }
        debug_assert!(automaton.validate().is_empty());
        info!(
            "parsed automaton {}: {} state(s), {} transition(s), end states [{}]",
            automaton.label,
            automaton.state_list().len(),
            automaton.transitions().count(),
            automaton
                .end_states()
                .iter()
                .map(|s| automaton.state_name(*s))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let label = automaton.label.clone();
        let id = automata.push(automaton);
        labels.insert(label, id);
    }
    Ok(automata)
}

/// Reads and parses a notation file
pub fn parse_file(filename: impl AsRef<std::path::Path>) -> anyhow::Result<Automata> {
    let input = std::fs::read_to_string(filename.as_ref())?;
    Ok(parse_program(&input)?)
}
