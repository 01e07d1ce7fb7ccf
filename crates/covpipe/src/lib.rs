//! covpipe: coverage pipeline engine
//!
//! Runs a dotCover-style coverage tool over every test binary found in a
//! workspace, merges the per-binary snapshots and renders the requested
//! reports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       covpipe pipeline                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  filter ──► analyse ──► pipeline ──► launcher ──► coverage tool   │
//! │                            │                                      │
//! │                            └──► postprocess (HTML report)         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`filter`] turns `;`-separated masks into a [`FilterSet`]
//! - [`analyse`] builds the per-target `AnalyseParams` document
//! - [`pipeline`] is the state machine driving Cover, Merge and Report
//! - [`launcher`] runs the tool and streams its output
//! - [`postprocess`] relaxes the HTML report's iframe sandbox
//!
//! # Example
//!
//! ```no_run
//! use covpipe::{
//!     MandatoryExclusionSet, Pipeline, PipelineConfig, ProcessLauncher, ReportFormat,
//!     StdoutSink, TestPlatform, ToolPaths,
//! };
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::builder("**/bin/**/*Tests.dll", TestPlatform::X64)
//!     .workspace(".")
//!     .report(ReportFormat::Html, "index.html")
//!     .build()?;
//! let launcher = ProcessLauncher::new(config.workspace(), Arc::new(StdoutSink));
//! let tools = ToolPaths {
//!     coverage_tool: "dotcover.exe".into(),
//!     test_runner: "vstest.console.exe".into(),
//! };
//! let result = Pipeline::new(config, tools, MandatoryExclusionSet::default(), launcher)?.run();
//! assert!(result.is_success());
//! # Ok::<(), covpipe::CovpipeError>(())
//! ```

#![warn(missing_docs)]

pub mod analyse;
pub mod config;
pub mod discovery;
pub mod env_expand;
pub mod filter;
pub mod launcher;
pub mod pipeline;
pub mod postprocess;
mod result;
pub mod settings;
pub mod tools;
pub mod xml;

pub use analyse::{assemble_config, runner_arguments, to_agent_path, ConfigDocument};
pub use config::{
    PipelineConfig, PipelineConfigBuilder, ReportFormat, ReportTarget, TestPlatform,
    RUN_FILE_NAME,
};
pub use discovery::discover_targets;
pub use env_expand::expand_env_vars;
pub use filter::{build_filter_set, FilterEntry, FilterSet};
pub use launcher::{
    CancellationToken, ConsoleSink, MemorySink, ProcessLauncher, StdoutSink, ToolLauncher,
};
pub use pipeline::{
    NoopObserver, Pipeline, PipelineFailure, PipelineObserver, PipelineResult, PipelineState,
    RunArtifacts, RunSummary, Stage,
};
pub use postprocess::{relax_script_restriction, Relaxation};
pub use result::{CovpipeError, CovpipeResult};
pub use settings::{GlobalSettings, MandatoryExclusionSet, SettingsStore};
pub use tools::{ToolInstallation, ToolKind, ToolLocator, ToolPaths};
