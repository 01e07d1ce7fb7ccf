//! Relax command handler

use crate::commands::RelaxArgs;
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::ProgressReporter;
use covpipe::{relax_script_restriction, Relaxation};

/// Execute the relax command
pub fn execute_relax(config: &CliConfig, args: &RelaxArgs) -> CliResult<Relaxation> {
    let outcome = relax_script_restriction(&args.report)?;
    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    match outcome {
        Relaxation::Applied { replacements } => reporter.success(&format!(
            "Relaxed {replacements} sandboxed frame(s) in {}",
            args.report.display()
        )),
        Relaxation::MarkerMissing => reporter.warning(&format!(
            "No sandboxed source frame in {}; left unchanged",
            args.report.display()
        )),
    }
    Ok(outcome)
}
