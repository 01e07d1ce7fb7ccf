//! covpipe CLI library
//!
//! Command-line front end for the covpipe coverage pipeline: argument
//! parsing, run-file layering, progress output and the command handlers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod handlers;
pub mod logging;
mod output;

pub use commands::{
    Cli, ColorArg, Commands, ConfigDocArgs, LogFormatArg, OutputFormatArg, PipelineArgs,
    PlatformArg, RelaxArgs, RunArgs, SettingsAction, SettingsArgs, ToolKindArg,
};
pub use config::{CliConfig, ColorChoice, LogFormat, Verbosity};
pub use error::{CliError, CliResult};
pub use logging::init_logging;
pub use output::{summary_line, OutputFormat, ProgressReporter};
