//! Command handlers - extracted from main.rs for testability
//!
//! Shared here: loading global settings, layering the run file under the
//! command-line flags, and resolving tool executables.

pub mod config_doc;
pub mod relax;
pub mod run;
pub mod settings;

pub use config_doc::{execute_config_doc, render_config_doc};
pub use relax::execute_relax;
pub use run::{execute_run, write_summary_file, SUMMARY_FILE_NAME};
pub use settings::{apply_settings_action, execute_settings};

use crate::commands::PipelineArgs;
use crate::config::CliConfig;
use crate::error::CliResult;
use covpipe::{
    GlobalSettings, PipelineConfig, PipelineConfigBuilder, SettingsStore, ToolLocator, ToolPaths,
    RUN_FILE_NAME,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings store for this invocation and its current contents
pub fn load_settings(config: &CliConfig) -> CliResult<(SettingsStore, GlobalSettings)> {
    let store = match &config.settings_path {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::locate()?,
    };
    let settings = store.load()?;
    debug!(path = %store.path().display(), "settings loaded");
    Ok((store, settings))
}

/// Run file to layer under the flags: `--run-file`, else `covpipe.yaml` in
/// the workspace when present
#[must_use]
pub fn run_file_for(args: &PipelineArgs) -> Option<PathBuf> {
    if let Some(explicit) = &args.run_file {
        return Some(explicit.clone());
    }
    let workspace = args.workspace.as_deref().unwrap_or_else(|| Path::new("."));
    let candidate = workspace.join(RUN_FILE_NAME);
    candidate.is_file().then_some(candidate)
}

/// Run file layer with the flags merged on top, not yet validated
pub fn resolve_pipeline_layers(args: &PipelineArgs) -> CliResult<PipelineConfigBuilder> {
    let file_layer = match run_file_for(args) {
        Some(path) => {
            debug!(path = %path.display(), "loading run file");
            PipelineConfigBuilder::load(&path)?
        }
        None => PipelineConfigBuilder::default(),
    };
    Ok(file_layer.merge(args.to_builder()))
}

/// Validated run configuration: run file first, flags on top
pub fn resolve_pipeline_config(args: &PipelineArgs) -> CliResult<PipelineConfig> {
    Ok(resolve_pipeline_layers(args)?.build()?)
}

/// Coverage tool and test runner for this run
pub fn resolve_tools(settings: &GlobalSettings, args: &PipelineArgs) -> CliResult<ToolPaths> {
    let locator = ToolLocator::new(&settings.coverage_tools, &settings.test_runners);
    Ok(locator.resolve_all(
        args.coverage_tool.as_deref(),
        args.test_runner.as_deref(),
        args.installation.as_deref(),
    )?)
}
