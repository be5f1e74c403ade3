use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;

use cinder::{EffectHost, Error, Mode, Name, RuntimeConfig, Value};

use super::util::{prepare, require_settled};

/// Host that understands `print{text}` and writes to stdout.
struct StdoutHost {
    out: io::Stdout,
}

impl EffectHost for StdoutHost {
    fn perform(&mut self, _mode: &Mode, request: &Value) -> cinder::Result<Value> {
        let text = request
            .as_tuple()
            .filter(|_| request.is_constructed_by("print"))
            .and_then(|tuple| tuple.get(&Name::text("text")))
            .and_then(Value::as_string)
            .ok_or_else(|| Error::Effect(format!("unsupported request {request}")))?;
        writeln!(self.out.lock(), "{text}")
            .map_err(|err| Error::Effect(format!("failed to write output: {err}")))?;
        Ok(Value::nil())
    }
}

pub(crate) fn cmd_run(config: &RuntimeConfig, file: &Path) -> Result<()> {
    let (_, mut scheduler) = prepare(config, file)?;
    let mut host = StdoutHost { out: io::stdout() };
    let report = scheduler.run(&mut host)?;
    require_settled(&report)?;
    Ok(())
}
