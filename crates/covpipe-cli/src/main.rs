//! covpipe: coverage pipeline for test assemblies
//!
//! ## Usage
//!
//! ```bash
//! covpipe run -g "**/bin/**/*Tests.dll" -p x64 -r HTML  # Cover, merge, report
//! covpipe run --format json --timeout-secs 600         # Glob and platform from covpipe.yaml
//! covpipe config-doc bin/Debug/App.Tests.dll -p x86    # Print one analysis document
//! covpipe settings set-excludes "*.Generated;*.Fakes" # Mandatory exclusions
//! covpipe relax coverage/index.html                   # Unsandbox an HTML report
//! ```

use clap::Parser;
use covpipe_cli::{
    handlers, init_logging, Cli, CliConfig, CliResult, ColorChoice, Commands, LogFormat,
    Verbosity,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let config = build_config(&cli);
    init_logging(config.verbosity, config.log_format);

    match cli.command {
        Commands::Run(args) => handlers::execute_run(&config, &args),
        Commands::ConfigDoc(args) => handlers::execute_config_doc(&config, &args),
        Commands::Settings(args) => handlers::execute_settings(&config, &args),
        Commands::Relax(args) => handlers::execute_relax(&config, &args).map(|_| ()),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        match cli.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    };

    let color: ColorChoice = cli.color.into();
    let log_format: LogFormat = cli.log_format.into();

    CliConfig::new()
        .with_verbosity(verbosity)
        .with_color(color)
        .with_log_format(log_format)
        .with_settings_path(cli.settings.clone())
}
