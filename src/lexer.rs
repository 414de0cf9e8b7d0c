// Copyright 2024 Cornell University
// released under MIT License

//! Splits notation text into declarations and `;`-terminated clauses.
//!
//! The notation has no nesting across clauses, so boundaries are found by
//! seeking fixed delimiters: a declaration starts at each `Cta ` marker and
//! runs until the next one, and inside a declaration every clause ends at `;`.

use crate::errors::{ParseError, ParseErrorKind};

pub const DECLARATION_MARKER: &str = "Cta ";

/// A trimmed slice of the input together with its byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clause<'a> {
    pub text: &'a str,
    pub offset: usize,
}

impl<'a> Clause<'a> {
    /// Builds a clause from `input[start..end]`, dropping surrounding whitespace
    fn trimmed(input: &'a str, start: usize, end: usize) -> Self {
        let raw = &input[start..end];
        let leading = raw.len() - raw.trim_start().len();
        Self {
            text: raw.trim(),
            offset: start + leading,
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }
}

/// One `Cta` declaration: the header clause (`Cta A = Init a0`) followed by
/// its transition clauses, none of which include the terminating `;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration<'a> {
    pub whole: Clause<'a>,
    pub header: Clause<'a>,
    pub transitions: Vec<Clause<'a>>,
}

/// Byte offsets of every declaration marker. A marker only counts at the start
/// of the input or after whitespace or `;`, so that a state such as `xCta`
/// cannot open a declaration.
pub fn find_markers(input: &str) -> Vec<usize> {
    input
        .match_indices(DECLARATION_MARKER)
        .map(|(idx, _)| idx)
        .filter(|&idx| {
            input[..idx]
                .chars()
                .next_back()
                .is_none_or(|c| c.is_whitespace() || c == ';')
        })
        .collect()
}

/// Scans the whole input into declarations
pub fn scan(input: &str) -> Result<Vec<Declaration<'_>>, ParseError> {
    let markers = find_markers(input);
    let prefix_end = markers.first().copied().unwrap_or(input.len());
    let prefix = Clause::trimmed(input, 0, prefix_end);
    if !prefix.text.is_empty() {
        return Err(ParseError::new(
            ParseErrorKind::StrayText,
            prefix.text,
            prefix.offset,
        ));
    }

    let mut declarations = Vec::with_capacity(markers.len());
    for (ii, &start) in markers.iter().enumerate() {
        let end = markers.get(ii + 1).copied().unwrap_or(input.len());
        declarations.push(scan_declaration(input, start, end)?);
    }
    Ok(declarations)
}

fn scan_declaration(input: &str, start: usize, end: usize) -> Result<Declaration<'_>, ParseError> {
    let whole = Clause::trimmed(input, start, end);
    let mut clauses = vec![];
    let mut clause_start = start;
    for (idx, _) in input[start..end].match_indices(';') {
        clauses.push(Clause::trimmed(input, clause_start, start + idx));
        clause_start = start + idx + 1;
    }

    // whatever follows the final `;` must be blank
    let rest = Clause::trimmed(input, clause_start, end);
    if !rest.text.is_empty() {
        let offending = if clauses.is_empty() { whole } else { rest };
        return Err(ParseError::new(
            ParseErrorKind::MissingTerminator,
            offending.text,
            offending.offset,
        ));
    }

    let mut clauses = clauses.into_iter();
    let header = clauses.next().ok_or_else(|| {
        ParseError::new(ParseErrorKind::MissingTerminator, whole.text, whole.offset)
    })?;
    Ok(Declaration {
        whole,
        header,
        transitions: clauses.collect(),
    })
}
