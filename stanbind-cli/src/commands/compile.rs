//! Compile command - build a model or reuse its cached module

use super::{load_data, runtime, CommandResult};
use crate::output;
use clap::Args;
use stanbind::{Error, Model};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Args)]
pub struct CompileArgs {
    /// Model name (ASCII letters, digits, '_' and '-')
    pub name: String,

    /// Stan program file
    pub file: PathBuf,

    /// JSON data file used to resolve the parameter count
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Discard any cached module and rebuild
    #[arg(short, long)]
    pub force: bool,
}

pub fn execute(args: CompileArgs) -> CommandResult {
    let source = std::fs::read_to_string(&args.file)
        .map_err(|e| format!("failed to read {}: {}", args.file.display(), e))?;
    let data = load_data(args.data.as_deref())?;
    let runtime = Arc::new(runtime()?);
    let mut model = Model::new(runtime, &args.name, source, data)?;

    if args.force {
        model.delete()?;
    }

    let started = Instant::now();
    output::compiling(&format!("{} ({})", args.name, args.file.display()));
    let compiled = model.compile().inspect_err(|e| {
        if let Some(text) = build_output(e) {
            eprintln!("{}", text);
        }
    })?;

    for line in compiled.translator_warnings.lines().filter(|l| !l.trim().is_empty()) {
        output::warning(line);
    }
    if !compiled.diagnostics.trim().is_empty() {
        eprintln!("{}", compiled.diagnostics.trim_end());
    }

    if compiled.cached {
        output::cached(&format!("{} is up to date", model.identity()));
    } else {
        output::finished(&format!("{} in {:.2}s", model.identity(), started.elapsed().as_secs_f64()));
    }

    match model.resolved_n_pars() {
        Some(n) => println!("parameters: {}", n),
        None => output::warning("parameter count unavailable for the given data"),
    }
    Ok(())
}

/// Compiler output kept off the terminal during a failed build
fn build_output(err: &Error) -> Option<&str> {
    match err {
        Error::Build(e) if !e.output.trim().is_empty() => Some(e.output.trim_end()),
        _ => None,
    }
}
