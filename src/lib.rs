// Copyright 2024 Cornell University
// released under MIT License

pub mod backends;
pub mod config;
pub mod diagnostic;
pub mod errors;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod policy;
pub mod serialize;
#[cfg(test)]
mod sim;
pub mod topology;

use log::info;

use crate::backends::golang::emit_to_string;
use crate::config::Config;
use crate::diagnostic::{DiagnosticHandler, Level};
use crate::errors::{CompileError, CompileResult, DiagnosticEmitter};
use crate::ir::Program;
use crate::parser::parse_program;
use crate::policy::ArbitrationPolicy;
use crate::topology::resolve;

/// Parses, resolves channels and applies the arbitration configuration
pub fn analyze(input: &str, config: &Config) -> CompileResult<Program> {
    let automata = parse_program(input)?;
    let topology = resolve(&automata).map_err(CompileError::Topology)?;
    let policy =
        ArbitrationPolicy::resolve(&automata, &config.arbitration).map_err(CompileError::Policy)?;
    info!(
        "analyzed {} automata with {} channel(s)",
        automata.len(),
        topology.len()
    );
    Ok(Program {
        automata,
        topology,
        policy,
    })
}

/// Compiles notation text into Go source
pub fn compile(input: &str, config: &Config) -> CompileResult<String> {
    let program = analyze(input, config)?;
    emit_to_string(&program, &config.emit).map_err(CompileError::Emit)
}

/// Like `analyze`, but renders errors and warnings against file `fileid`
/// of `handler`
pub fn analyze_with_diagnostics(
    input: &str,
    config: &Config,
    handler: &mut DiagnosticHandler,
    fileid: usize,
) -> CompileResult<Program> {
    match analyze(input, config) {
        Ok(program) => {
            for warning in program.topology.warnings() {
                let (start, end) = warning.span();
                handler.emit_diagnostic_span(&warning.to_string(), fileid, start, end, Level::Warning);
            }
            Ok(program)
        }
        Err(e) => {
            DiagnosticEmitter::emit_compile_error(handler, fileid, &e);
            Err(e)
        }
    }
}

/// Like `compile`, but renders errors and warnings against file `fileid`
/// of `handler`
pub fn compile_with_diagnostics(
    input: &str,
    config: &Config,
    handler: &mut DiagnosticHandler,
    fileid: usize,
) -> CompileResult<String> {
    let program = analyze_with_diagnostics(input, config, handler, fileid)?;
    emit_to_string(&program, &config.emit).map_err(|errors| {
        let e = CompileError::Emit(errors);
        DiagnosticEmitter::emit_compile_error(handler, fileid, &e);
        e
    })
}
