// Copyright 2024 Cornell University
// released under MIT License

use std::io::Write;

use anyhow::Context;
use clap::{ColorChoice, Parser};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use ctac::backends::golang::emit_to_string;
use ctac::config::Config;
use ctac::diagnostic::DiagnosticHandler;
use ctac::errors::{CompileError, DiagnosticEmitter};
use log::info;

/// Compiles communicating timed automata into a concurrent Go program
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Notation files, concatenated in the order given
    #[arg(required = true, value_name = "INPUTS")]
    inputs: Vec<String>,

    /// YAML file with emission parameters and arbitration priorities
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// Where to write the Go program (`-` for stdout)
    #[arg(short, long, value_name = "OUTPUT", default_value = "golang_automata.go")]
    output: String,

    /// Overrides `emit.channel_depth`
    #[arg(long)]
    channel_depth: Option<usize>,

    /// Overrides `emit.seed`
    #[arg(long)]
    seed: Option<i64>,

    /// Overrides `emit.package`
    #[arg(long)]
    package: Option<String>,

    /// Do not print state changes from the generated program
    #[arg(long)]
    no_trace: bool,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    /// To suppress colors in error messages, pass in `--color never`
    #[arg(long, value_name = "COLOR_CHOICE", default_value = "auto")]
    color: ColorChoice,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(depth) = self.channel_depth {
            config.emit.channel_depth = depth;
        }
        if let Some(seed) = self.seed {
            config.emit.seed = Some(seed);
        }
        if let Some(package) = &self.package {
            config.emit.package = package.clone();
        }
        if self.no_trace {
            config.emit.trace = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // For concision, we disable timestamps in the log
    let mut logger = env_logger::Builder::new();
    logger
        .format_timestamp(None)
        .filter_level(cli.verbosity.log_level_filter());
    if cli.color == ColorChoice::Never {
        logger.write_style(env_logger::WriteStyle::Never);
    }
    logger.init();

    let config = cli.config()?;

    let mut input = String::new();
    for filename in cli.inputs.iter() {
        let text = std::fs::read_to_string(filename)
            .with_context(|| format!("failed to read {}", filename))?;
        input.push_str(&text);
        input.push('\n');
    }
    info!("read {} byte(s) from {} file(s)", input.len(), cli.inputs.len());

    let mut handler = DiagnosticHandler::new(cli.color);
    let fileid = handler.add_file(cli.inputs.join("+"), input.clone());

    let program = ctac::analyze_with_diagnostics(&input, &config, &mut handler, fileid)
        .map_err(|e| anyhow::anyhow!("compilation failed: {}", e))?;

    let go = match emit_to_string(&program, &config.emit) {
        Ok(go) => go,
        Err(errors) => {
            let e = CompileError::Emit(errors);
            DiagnosticEmitter::emit_compile_error(&mut handler, fileid, &e);
            anyhow::bail!("compilation failed: {}", e);
        }
    };

    if cli.output == "-" {
        std::io::stdout().write_all(go.as_bytes())?;
    } else {
        std::fs::write(&cli.output, go).with_context(|| format!("failed to write {}", cli.output))?;
        info!("wrote {}", cli.output);
    }
    Ok(())
}
