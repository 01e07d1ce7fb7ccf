//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use covpipe::{PipelineConfigBuilder, ReportTarget, TestPlatform, ToolKind};
use std::path::PathBuf;

/// covpipe: run dotCover over every test assembly and render coverage reports
#[derive(Parser, Debug)]
#[command(name = "covpipe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormatArg,

    /// Global settings file
    #[arg(long, env = "COVPIPE_SETTINGS", global = true)]
    pub settings: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cover every discovered test assembly, merge and render reports
    Run(RunArgs),

    /// Print the analysis document generated for one test assembly
    ConfigDoc(ConfigDocArgs),

    /// Show or change global settings
    Settings(SettingsArgs),

    /// Relax the script sandbox of an existing HTML report
    Relax(RelaxArgs),
}

/// Options shared by commands that build a pipeline configuration
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// Workspace root searched for test assemblies
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// YAML run file (defaults to covpipe.yaml in the workspace)
    #[arg(long)]
    pub run_file: Option<PathBuf>,

    /// Glob selecting test assemblies, relative to the workspace (required
    /// here or in the run file)
    #[arg(short, long)]
    pub glob: Option<String>,

    /// Test runner platform (required here or in the run file)
    #[arg(short, long)]
    pub platform: Option<PlatformArg>,

    /// Test case filter expression passed to the runner
    #[arg(long)]
    pub test_case_filter: Option<String>,

    /// Extra arguments appended to the runner command line
    #[arg(long, allow_hyphen_values = true)]
    pub runner_args: Option<String>,

    /// Assembly masks to include (`;`-separated)
    #[arg(long)]
    pub include: Option<String>,

    /// Class masks to include (`;`-separated)
    #[arg(long)]
    pub class_include: Option<String>,

    /// Function masks to include (`;`-separated)
    #[arg(long)]
    pub function_include: Option<String>,

    /// Assembly masks to exclude (`;`-separated)
    #[arg(long)]
    pub exclude: Option<String>,

    /// Process masks to instrument (`;`-separated)
    #[arg(long)]
    pub process_include: Option<String>,

    /// Process masks to skip (`;`-separated)
    #[arg(long)]
    pub process_exclude: Option<String>,

    /// Report to render: FORMAT or FORMAT=PATH (repeatable)
    #[arg(short, long = "report", value_name = "FORMAT[=PATH]")]
    pub reports: Vec<ReportTarget>,

    /// Output directory, relative to the workspace
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Temp directory, relative to the workspace
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Merged snapshot file name inside the output directory
    #[arg(long)]
    pub snapshot_name: Option<String>,

    /// Remove previous temp and output directories first
    #[arg(long)]
    pub clean: bool,

    /// Cover test assemblies concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Kill a tool invocation after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Coverage tool executable
    #[arg(long)]
    pub coverage_tool: Option<String>,

    /// Test runner executable
    #[arg(long)]
    pub test_runner: Option<String>,

    /// Named tool installation from the settings
    #[arg(long)]
    pub installation: Option<String>,
}

impl PipelineArgs {
    /// Flags as a configuration layer; unset flags stay unset
    #[must_use]
    pub fn to_builder(&self) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            workspace: self.workspace.clone(),
            test_assembly_glob: self.glob.clone(),
            platform: self.platform.map(Into::into),
            test_case_filter: self.test_case_filter.clone(),
            runner_args: self.runner_args.clone(),
            coverage_include: self.include.clone(),
            coverage_class_include: self.class_include.clone(),
            coverage_function_include: self.function_include.clone(),
            coverage_exclude: self.exclude.clone(),
            process_include: self.process_include.clone(),
            process_exclude: self.process_exclude.clone(),
            reports: (!self.reports.is_empty()).then(|| self.reports.clone()),
            output_dir: self.output_dir.clone(),
            temp_dir: self.temp_dir.clone(),
            snapshot_name: self.snapshot_name.clone(),
            clean: self.clean.then_some(true),
            parallel_cover: self.parallel.then_some(true),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline options
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Result output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormatArg,

    /// Do not write summary.json into the output directory
    #[arg(long)]
    pub no_summary_file: bool,
}

/// Arguments for the config-doc command
#[derive(Args, Debug)]
pub struct ConfigDocArgs {
    /// Test assembly, relative to the workspace
    pub target: PathBuf,

    /// Pipeline options
    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Arguments for the settings command
#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Settings action
    #[command(subcommand)]
    pub action: SettingsAction,
}

/// Settings actions
#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Print the current settings
    Show,

    /// Replace the mandatory excluded assembly masks
    SetExcludes {
        /// `;`-separated masks; empty clears the list
        masks: String,
    },

    /// Add or replace a tool installation
    SetTool {
        /// Which tool
        kind: ToolKindArg,

        /// Executable path, may reference ${VAR}
        home: String,

        /// Installation name
        #[arg(long, default_value = covpipe::tools::DEFAULT_INSTALLATION_NAME)]
        name: String,
    },
}

/// Arguments for the relax command
#[derive(Args, Debug)]
pub struct RelaxArgs {
    /// HTML report to rewrite in place
    pub report: PathBuf,
}

/// Platform argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformArg {
    /// 32-bit
    X86,
    /// 64-bit
    X64,
}

impl From<PlatformArg> for TestPlatform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::X86 => Self::X86,
            PlatformArg::X64 => Self::X64,
        }
    }
}

/// Tool kind argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKindArg {
    /// The coverage tool
    CoverageTool,
    /// The test runner
    TestRunner,
}

impl From<ToolKindArg> for ToolKind {
    fn from(arg: ToolKindArg) -> Self {
        match arg {
            ToolKindArg::CoverageTool => Self::CoverageTool,
            ToolKindArg::TestRunner => Self::TestRunner,
        }
    }
}

/// Result output format argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormatArg {
    /// Human-readable text
    #[default]
    Text,
    /// JSON on stdout
    Json,
}

impl From<OutputFormatArg> for crate::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Text => Self::Text,
            OutputFormatArg::Json => Self::Json,
        }
    }
}

/// Log format argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormatArg {
    /// Human-readable
    #[default]
    Text,
    /// JSON lines
    Json,
}

impl From<LogFormatArg> for crate::config::LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// Color argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use covpipe::ReportFormat;

    mod cli_tests {
        use super::*;

        #[test]
        fn test_parse_run_command() {
            let cli = Cli::parse_from(["covpipe", "run"]);
            assert!(matches!(cli.command, Commands::Run(_)));
        }

        #[test]
        fn test_global_flags() {
            let cli = Cli::parse_from(["covpipe", "run", "-vv", "--color", "never"]);
            assert_eq!(cli.verbose, 2);
            assert_eq!(cli.color, ColorArg::Never);
        }

        #[test]
        fn test_parse_run_with_reports() {
            let cli = Cli::parse_from([
                "covpipe",
                "run",
                "--report",
                "HTML=reports/index.html",
                "-r",
                "DetailedXML",
            ]);
            let Commands::Run(args) = cli.command else {
                panic!("expected Run command");
            };
            assert_eq!(args.pipeline.reports.len(), 2);
            assert_eq!(args.pipeline.reports[0].format, ReportFormat::Html);
            assert_eq!(
                args.pipeline.reports[1].output,
                PathBuf::from("DetailedCoverage.xml")
            );
        }

        #[test]
        fn test_runner_args_accept_hyphens() {
            let cli = Cli::parse_from(["covpipe", "run", "--runner-args", "/Parallel --blame"]);
            let Commands::Run(args) = cli.command else {
                panic!("expected Run command");
            };
            assert_eq!(args.pipeline.runner_args.as_deref(), Some("/Parallel --blame"));
        }

        #[test]
        fn test_invalid_report_format_rejected() {
            let result = Cli::try_parse_from(["covpipe", "run", "--report", "bad format"]);
            assert!(result.is_err());
        }

        #[test]
        fn test_parse_settings_set_tool() {
            let cli = Cli::parse_from([
                "covpipe",
                "settings",
                "set-tool",
                "coverage-tool",
                "C:/jb/dotcover.exe",
            ]);
            let Commands::Settings(SettingsArgs {
                action: SettingsAction::SetTool { kind, home, name },
            }) = cli.command
            else {
                panic!("expected settings set-tool");
            };
            assert_eq!(kind, ToolKindArg::CoverageTool);
            assert_eq!(home, "C:/jb/dotcover.exe");
            assert_eq!(name, "Default");
        }

        #[test]
        fn test_parse_config_doc() {
            let cli = Cli::parse_from(["covpipe", "config-doc", "bin/A.dll", "--platform", "x64"]);
            let Commands::ConfigDoc(args) = cli.command else {
                panic!("expected config-doc");
            };
            assert_eq!(args.target, PathBuf::from("bin/A.dll"));
            assert_eq!(args.pipeline.platform, Some(PlatformArg::X64));
        }
    }

    mod builder_layer_tests {
        use super::*;

        #[test]
        fn test_unset_flags_stay_unset() {
            let builder = PipelineArgs::default().to_builder();
            assert_eq!(builder, PipelineConfigBuilder::default());
        }

        #[test]
        fn test_flags_override_file_layer() {
            let file = PipelineConfigBuilder::from_yaml("coverage_include: FromFile\nclean: true\n")
                .unwrap();
            let flags = PipelineArgs {
                include: Some("FromFlags".into()),
                platform: Some(PlatformArg::X64),
                ..PipelineArgs::default()
            };
            let merged = file.merge(flags.to_builder());
            assert_eq!(merged.coverage_include.as_deref(), Some("FromFlags"));
            assert_eq!(merged.platform, Some(TestPlatform::X64));
            assert_eq!(merged.clean, Some(true));
        }
    }
}
