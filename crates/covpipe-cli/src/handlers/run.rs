//! Run command handler

use super::{load_settings, resolve_pipeline_config, resolve_tools};
use crate::commands::RunArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, ProgressReporter};
use covpipe::{CancellationToken, Pipeline, PipelineResult, ProcessLauncher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Machine-readable result written next to the reports
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Execute the run command
pub fn execute_run(config: &CliConfig, args: &RunArgs) -> CliResult<()> {
    let pipeline_config = resolve_pipeline_config(&args.pipeline)?;
    let (_, settings) = load_settings(config)?;
    let tools = resolve_tools(&settings, &args.pipeline)?;
    debug!(?tools, "tools resolved");

    let format: OutputFormat = args.format.into();
    let mut reporter =
        ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    if format == OutputFormat::Json {
        reporter = reporter.with_tool_output_on_stderr();
    }
    let reporter = Arc::new(reporter);

    let output_dir = pipeline_config.output_dir();
    let launcher = ProcessLauncher::new(pipeline_config.workspace(), reporter.clone())
        .with_timeout(pipeline_config.timeout());

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let pipeline = Pipeline::new(
        pipeline_config,
        tools,
        settings.mandatory_exclusions(),
        launcher,
    )?
    .with_cancellation(cancel)
    .with_observer(reporter.clone());

    reporter.header("Coverage run");
    let result = pipeline.run();
    reporter.finish();

    if !args.no_summary_file {
        if output_dir.is_dir() {
            let path = write_summary_file(&output_dir, &result)?;
            debug!(path = %path.display(), "summary written");
        } else {
            debug!(dir = %output_dir.display(), "output directory absent, summary not written");
        }
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            if let Some(summary) = result.summary() {
                reporter.summary(summary);
            }
        }
    }

    match result {
        PipelineResult::Completed(_) => Ok(()),
        PipelineResult::Failed(failure) => Err(CliError::run_failed(failure.to_string())),
    }
}

/// Write `result` as pretty JSON into `output_dir`
pub fn write_summary_file(output_dir: &Path, result: &PipelineResult) -> CliResult<PathBuf> {
    let path = output_dir.join(SUMMARY_FILE_NAME);
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Cancel `token` on the first Ctrl-C.
///
/// The signal is awaited on a detached thread with its own single-threaded
/// runtime; the engine itself stays synchronous.
fn cancel_on_ctrl_c(token: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("covpipe-ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(error = %e, "cannot start signal runtime, Ctrl-C will not cancel");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling coverage run");
                    token.cancel();
                }
            });
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot spawn signal thread, Ctrl-C will not cancel");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use covpipe::{MandatoryExclusionSet, PipelineConfig, TestPlatform, ToolLauncher, ToolPaths};
    use tempfile::TempDir;

    struct ExitWith(i32);

    impl ToolLauncher for ExitWith {
        fn execute(
            &self,
            _executable: &str,
            _args: &[String],
            _cancel: &CancellationToken,
        ) -> covpipe::CovpipeResult<i32> {
            Ok(self.0)
        }
    }

    fn tools() -> ToolPaths {
        ToolPaths {
            coverage_tool: "dotcover.exe".into(),
            test_runner: "vstest.console.exe".into(),
        }
    }

    fn pipeline_for(workspace: &Path, code: i32) -> Pipeline<ExitWith> {
        let config = PipelineConfig::builder("**/*Tests.dll", TestPlatform::X64)
            .workspace(workspace)
            .build()
            .unwrap();
        Pipeline::new(config, tools(), MandatoryExclusionSet::default(), ExitWith(code)).unwrap()
    }

    mod summary_file_tests {
        use super::*;

        #[test]
        fn test_completed_summary_is_written() {
            let dir = TempDir::new().unwrap();
            let result = pipeline_for(dir.path(), 0).run();
            assert!(result.is_success());

            let output = dir.path().join("coverage");
            let path = write_summary_file(&output, &result).unwrap();
            assert_eq!(path, output.join(SUMMARY_FILE_NAME));

            let json: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
            assert_eq!(json["result"], "completed");
            assert_eq!(json["targets"].as_array().unwrap().len(), 0);
        }

        #[test]
        fn test_failed_summary_names_stage() {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join("bin")).unwrap();
            std::fs::write(dir.path().join("bin/A.Tests.dll"), b"").unwrap();
            let result = pipeline_for(dir.path(), 3).run();
            assert!(!result.is_success());

            let output = dir.path().join("coverage");
            let path = write_summary_file(&output, &result).unwrap();
            let json: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
            assert_eq!(json["result"], "failed");
            assert_eq!(json["stage"], "cover");
        }

        #[test]
        fn test_missing_output_dir_is_an_error() {
            let dir = TempDir::new().unwrap();
            let result = pipeline_for(dir.path(), 0).run();
            assert!(write_summary_file(&dir.path().join("nope/deeper"), &result).is_err());
        }
    }
}
