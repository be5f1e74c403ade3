use std::path::Path;

use anyhow::Result;

use cinder::RuntimeConfig;

use super::util::{prepare, print_definitions, require_settled};

pub(crate) fn cmd_check(config: &RuntimeConfig, file: &Path) -> Result<()> {
    let (expander, mut scheduler) = prepare(config, file)?;
    let report = scheduler.run_pure()?;
    require_settled(&report)?;
    print_definitions(&expander, scheduler.store());
    println!(
        "checked {}: {} thread(s) finished in {} pass(es), {} observable effect(s) not run",
        file.display(),
        report.finished,
        report.passes,
        report.skipped_observable
    );
    Ok(())
}
