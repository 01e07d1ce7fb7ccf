//! Config-doc command handler

use super::{load_settings, resolve_pipeline_layers, resolve_tools};
use crate::commands::ConfigDocArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use covpipe::config::absolutize;
use covpipe::{Pipeline, ProcessLauncher, RunArtifacts, StdoutSink};
use std::sync::Arc;
use uuid::Uuid;

/// Execute the config-doc command
pub fn execute_config_doc(config: &CliConfig, args: &ConfigDocArgs) -> CliResult<()> {
    print!("{}", render_config_doc(config, args)?);
    Ok(())
}

/// Analysis document the run command would write for `args.target`.
///
/// Nothing is executed and no file is written. The document names a fresh
/// run directory under the temp directory, as a real run would. The target
/// is named explicitly, so the test assembly glob falls back to the target
/// itself; the platform is still required.
pub fn render_config_doc(config: &CliConfig, args: &ConfigDocArgs) -> CliResult<String> {
    let mut layers = resolve_pipeline_layers(&args.pipeline)?;
    layers
        .test_assembly_glob
        .get_or_insert_with(|| args.target.to_string_lossy().into_owned());
    let pipeline_config = layers.build()?;
    let (_, settings) = load_settings(config)?;
    let tools = resolve_tools(&settings, &args.pipeline)?;

    let target = absolutize(&pipeline_config.workspace().join(&args.target))?;
    let artifacts = RunArtifacts::plan(&pipeline_config, Uuid::new_v4(), &[target]);

    let launcher = ProcessLauncher::new(pipeline_config.workspace(), Arc::new(StdoutSink));
    let pipeline = Pipeline::new(
        pipeline_config,
        tools,
        settings.mandatory_exclusions(),
        launcher,
    )?;

    let artifact = artifacts
        .targets
        .first()
        .ok_or_else(|| CliError::invalid_argument("no target given"))?;
    Ok(pipeline
        .document_for(&artifacts, artifact, pipeline.filter_set())
        .to_xml())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::{PipelineArgs, PlatformArg};
    use covpipe::ConfigDocument;
    use tempfile::TempDir;

    fn args(workspace: &std::path::Path, target: &str) -> ConfigDocArgs {
        ConfigDocArgs {
            target: target.into(),
            pipeline: PipelineArgs {
                workspace: Some(workspace.to_path_buf()),
                coverage_tool: Some("dotcover.exe".into()),
                test_runner: Some("vstest.console.exe".into()),
                platform: Some(PlatformArg::X86),
                ..PipelineArgs::default()
            },
        }
    }

    fn cli_config(dir: &TempDir) -> CliConfig {
        CliConfig::new().with_settings_path(Some(dir.path().join("settings.yaml")))
    }

    #[test]
    fn test_document_names_runner_and_target() {
        let dir = TempDir::new().unwrap();
        let xml = render_config_doc(&cli_config(&dir), &args(dir.path(), "bin/A.Tests.dll")).unwrap();

        let doc = ConfigDocument::from_xml(&xml).unwrap();
        assert_eq!(doc.target_executable, "vstest.console.exe");
        assert!(doc.target_arguments.contains("A.Tests.dll"));
        assert!(doc.target_arguments.starts_with("/platform:x86 /logger:trx"));
        assert!(doc.output.ends_with("A.Tests.dll.merge.cov"));
        assert!(doc.output.starts_with(&doc.temp_dir));
        assert_ne!(doc.temp_dir, covpipe::to_agent_path(&dir.path().join("temp")));
    }

    #[test]
    fn test_mandatory_excludes_from_settings_are_applied() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("settings.yaml"),
            "mandatory_excluded_assemblies: \"*.Generated\"\n",
        )
        .unwrap();
        let xml = render_config_doc(&cli_config(&dir), &args(dir.path(), "A.Tests.dll")).unwrap();
        assert!(xml.contains("<ModuleMask>*.Generated</ModuleMask>"));
    }

    #[test]
    fn test_platform_is_required() {
        let dir = TempDir::new().unwrap();
        let mut args = args(dir.path(), "A.Tests.dll");
        args.pipeline.platform = None;
        let err = render_config_doc(&cli_config(&dir), &args).unwrap_err();
        assert!(err.to_string().contains("platform is required"));
    }

    #[test]
    fn test_nothing_is_written() {
        let dir = TempDir::new().unwrap();
        render_config_doc(&cli_config(&dir), &args(dir.path(), "A.Tests.dll")).unwrap();
        assert!(!dir.path().join("coverage").exists());
        assert!(!dir.path().join("temp").exists());
    }
}
