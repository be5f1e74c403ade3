use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use cinder::{DefinitionStore, Expander, RunReport, RuntimeConfig, Scheduler, Syntax};

pub(crate) fn load_program(path: &Path) -> Result<Vec<Syntax>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read program {}", path.display()))?;
    Syntax::parse_program(&text).with_context(|| format!("invalid program {}", path.display()))
}

/// Scheduler with the built-in macros committed and the program queued.
pub(crate) fn prepare(config: &RuntimeConfig, file: &Path) -> Result<(Expander, Scheduler)> {
    let program = load_program(file)?;
    let expander = Expander::new(config.root_namespace());
    let mut scheduler = Scheduler::from_config(config);
    expander.load(&mut scheduler, program)?;
    Ok((expander, scheduler))
}

/// Print every stall and fail if there were any.
pub(crate) fn require_settled(report: &RunReport) -> Result<()> {
    if report.stalls.is_empty() {
        return Ok(());
    }
    for stall in &report.stalls {
        eprintln!("{stall}");
    }
    bail!("{} form(s) could not be resolved", report.stalls.len());
}

pub(crate) fn print_definitions(expander: &Expander, store: &DefinitionStore) {
    for (name, value) in expander.definitions(store) {
        println!("{name} = {value}");
    }
}
