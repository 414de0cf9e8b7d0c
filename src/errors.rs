// Copyright 2024 Cornell University
// released under MIT License

use crate::diagnostic::{DiagnosticHandler, Level};
use crate::ir::{Direction, Span};
use thiserror::Error;

/// What went wrong while parsing a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The header clause has no `= Init <state>` part
    MissingInit,
    /// A header or transition clause is not terminated by `;`
    MissingTerminator,
    /// The communication has neither `!` nor `?`
    MissingMarker,
    /// The guard parentheses are absent
    MissingGuard,
    /// The guard does not conform to the guard grammar
    InvalidGuard(String),
    /// Any other structural mismatch, with the parser's explanation
    Malformed(String),
    /// Two declarations share a label
    DuplicateLabel(String),
    /// Non-blank text before the first `Cta` marker
    StrayText,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::MissingInit => write!(f, "missing `= Init <state>` clause"),
            ParseErrorKind::MissingTerminator => write!(f, "clause is not terminated by `;`"),
            ParseErrorKind::MissingMarker => {
                write!(f, "communication is missing a send (`!`) or receive (`?`) marker")
            }
            ParseErrorKind::MissingGuard => write!(f, "transition has no guard in parentheses"),
            ParseErrorKind::InvalidGuard(reason) => write!(f, "invalid guard: {reason}"),
            ParseErrorKind::Malformed(reason) => write!(f, "malformed clause: {reason}"),
            ParseErrorKind::DuplicateLabel(label) => {
                write!(f, "automaton `{label}` is declared more than once")
            }
            ParseErrorKind::StrayText => write!(f, "text before the first `Cta` declaration"),
        }
    }
}

/// Fatal error in the notation. `snippet` is the offending clause and
/// `offset` its approximate byte offset in the input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at offset {offset}: `{snippet}`")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub snippet: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, snippet: &str, offset: usize) -> Self {
        Self {
            kind,
            snippet: snippet.to_string(),
            offset,
        }
    }

    pub fn span(&self) -> Span {
        (self.offset, self.offset + self.snippet.len())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("{automaton}.{state}: {} `{payload}` {} `{partner}` has no matching {}{}",
        verb(.direction), preposition(.direction), counterpart(.direction),
        undeclared_note(.partner_declared))]
    UnmatchedCommunication {
        automaton: String,
        state: String,
        payload: String,
        partner: String,
        direction: Direction,
        partner_declared: bool,
        span: Span,
    },
}

impl TopologyError {
    pub fn span(&self) -> Span {
        match self {
            TopologyError::UnmatchedCommunication { span, .. } => *span,
        }
    }
}

fn undeclared_note(partner_declared: &bool) -> &'static str {
    if *partner_declared {
        ""
    } else {
        " (no such automaton is declared)"
    }
}

fn verb(direction: &Direction) -> &'static str {
    match direction {
        Direction::Send => "send of",
        Direction::Receive => "receive of",
    }
}

fn preposition(direction: &Direction) -> &'static str {
    match direction {
        Direction::Send => "to",
        Direction::Receive => "from",
    }
}

fn counterpart(direction: &Direction) -> &'static str {
    match direction {
        Direction::Send => "receive",
        Direction::Receive => "send",
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("state `{automaton}.{state}` has {transitions} outgoing transitions but no arbitration entry")]
    MissingArbitration {
        automaton: String,
        state: String,
        transitions: usize,
        span: Span,
    },
    #[error("arbitration entry refers to unknown automaton `{automaton}`")]
    UnknownAutomaton { automaton: String },
    #[error("arbitration entry refers to unknown state `{automaton}.{state}`")]
    UnknownState { automaton: String, state: String },
    #[error("arbitration for `{automaton}.{state}` is given more than once")]
    DuplicateEntry { automaton: String, state: String },
    #[error("`{automaton}.{state}` has {transitions} outgoing transitions, ordinal {ordinal} is out of range")]
    OrdinalOutOfRange {
        automaton: String,
        state: String,
        ordinal: usize,
        transitions: usize,
    },
    #[error("ordinal {ordinal} of `{automaton}.{state}` is assigned more than once")]
    DuplicateOrdinal {
        automaton: String,
        state: String,
        ordinal: usize,
    },
    #[error("ordinal {ordinal} of `{automaton}.{state}` has no priority class")]
    UnassignedTransition {
        automaton: String,
        state: String,
        ordinal: usize,
    },
    #[error("ordinal {ordinal} of `{automaton}.{state}` is ranked but has no `rank`")]
    MissingRank {
        automaton: String,
        state: String,
        ordinal: usize,
    },
}

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("generated name `{name}` is used by both {first} and {second}")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },
    #[error("failed to write generated code: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: `{field}` {reason}")]
    Invalid { field: String, reason: String },
}

/// Every way a compilation can fail. Independent errors of one stage are
/// reported together.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{} unmatched communication(s)", .0.len())]
    Topology(Vec<TopologyError>),
    #[error("{} arbitration error(s)", .0.len())]
    Policy(Vec<PolicyError>),
    #[error("{} code generation error(s)", .0.len())]
    Emit(Vec<EmitError>),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Renders errors through a `DiagnosticHandler`, attaching source locations
/// where the error carries one
pub struct DiagnosticEmitter;

impl DiagnosticEmitter {
    pub fn emit_compile_error(handler: &mut DiagnosticHandler, fileid: usize, error: &CompileError) {
        match error {
            CompileError::Parse(e) => Self::emit_parse_error(handler, fileid, e),
            CompileError::Topology(errors) => {
                for e in errors {
                    Self::emit_topology_error(handler, fileid, e);
                }
            }
            CompileError::Policy(errors) => {
                for e in errors {
                    Self::emit_policy_error(handler, fileid, e);
                }
            }
            CompileError::Emit(errors) => {
                for e in errors {
                    handler.emit_general_message(&e.to_string(), Level::Error);
                }
            }
            CompileError::Config(e) => handler.emit_general_message(&e.to_string(), Level::Error),
        }
    }

    pub fn emit_parse_error(handler: &mut DiagnosticHandler, fileid: usize, error: &ParseError) {
        let (start, end) = error.span();
        handler.emit_diagnostic_span(&error.kind.to_string(), fileid, start, end, Level::Error);
    }

    pub fn emit_topology_error(
        handler: &mut DiagnosticHandler,
        fileid: usize,
        error: &TopologyError,
    ) {
        let (start, end) = error.span();
        handler.emit_diagnostic_span(&error.to_string(), fileid, start, end, Level::Error);
    }

    pub fn emit_policy_error(handler: &mut DiagnosticHandler, fileid: usize, error: &PolicyError) {
        match error {
            PolicyError::MissingArbitration { span, .. } => {
                handler.emit_diagnostic_span(&error.to_string(), fileid, span.0, span.1, Level::Error)
            }
            _ => handler.emit_general_message(&error.to_string(), Level::Error),
        }
    }
}
