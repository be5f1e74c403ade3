mod check;
mod run;
mod util;

pub(crate) use check::cmd_check;
pub(crate) use run::cmd_run;
