//! Pipeline configuration
//!
//! [`PipelineConfig`] is built once per run through [`PipelineConfigBuilder`],
//! which is also the shape of the YAML run file. Builders can be layered
//! (file first, command line on top) with [`PipelineConfigBuilder::merge`];
//! defaults are applied exactly once, in [`PipelineConfigBuilder::build`].

use crate::result::{CovpipeError, CovpipeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default output directory, relative to the workspace
pub const DEFAULT_OUTPUT_DIR: &str = "coverage";

/// Default working temp directory, relative to the workspace
pub const DEFAULT_TEMP_DIR: &str = "temp";

/// Default combined snapshot file name, relative to the output directory
pub const DEFAULT_SNAPSHOT_NAME: &str = "snapshot.cov";

/// Default run file name looked up in the workspace
pub const RUN_FILE_NAME: &str = "covpipe.yaml";

/// Platform the test runner executes under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestPlatform {
    /// 32-bit
    #[serde(rename = "x86", alias = "X86")]
    X86,
    /// 64-bit
    #[serde(rename = "X64", alias = "x64")]
    X64,
}

impl TestPlatform {
    /// Value passed to `/platform:`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X64 => "X64",
        }
    }
}

impl fmt::Display for TestPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestPlatform {
    type Err = CovpipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86" => Ok(Self::X86),
            "x64" => Ok(Self::X64),
            "" => Err(CovpipeError::config("platform selector must not be empty")),
            other => Err(CovpipeError::config(format!(
                "unknown platform '{other}', expected x86 or x64"
            ))),
        }
    }
}

/// Report rendering requested from the coverage tool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReportFormat {
    /// Browsable HTML report
    Html,
    /// Vendor-neutral detailed XML
    DetailedXml,
    /// NDepend interop XML
    NDependXml,
    /// Any other `/ReportType=` token understood by the tool
    Other(String),
}

impl ReportFormat {
    /// Token passed as `/ReportType=`
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::Html => "HTML",
            Self::DetailedXml => "DetailedXML",
            Self::NDependXml => "NDependXML",
            Self::Other(token) => token,
        }
    }

    /// File name used when the format is requested without a path
    #[must_use]
    pub fn default_file_name(&self) -> String {
        match self {
            Self::Html => "index.html".to_string(),
            Self::DetailedXml => "DetailedCoverage.xml".to_string(),
            Self::NDependXml => "NDependCoverage.xml".to_string(),
            Self::Other(token) => format!("{token}Coverage.{}", token.to_ascii_lowercase()),
        }
    }

    /// Whether the report needs the iframe post-processing pass
    #[must_use]
    pub const fn is_html(&self) -> bool {
        matches!(self, Self::Html)
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for ReportFormat {
    type Err = CovpipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        match token.to_ascii_lowercase().as_str() {
            "" => Err(CovpipeError::config("report format must not be empty")),
            "html" => Ok(Self::Html),
            "detailedxml" => Ok(Self::DetailedXml),
            "ndependxml" => Ok(Self::NDependXml),
            _ if token.chars().all(|c| c.is_ascii_alphanumeric()) => {
                Ok(Self::Other(token.to_string()))
            }
            _ => Err(CovpipeError::config(format!(
                "report format '{token}' must be alphanumeric"
            ))),
        }
    }
}

impl TryFrom<String> for ReportFormat {
    type Error = CovpipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReportFormat> for String {
    fn from(value: ReportFormat) -> Self {
        value.token().to_string()
    }
}

/// A report format paired with its output path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTarget {
    /// Rendering to request
    pub format: ReportFormat,
    /// Output path, relative paths resolve against the output directory
    pub output: PathBuf,
}

impl ReportTarget {
    /// Pair a format with an output path
    #[must_use]
    pub fn new(format: ReportFormat, output: impl Into<PathBuf>) -> Self {
        Self {
            format,
            output: output.into(),
        }
    }

    /// Use the format's default file name
    #[must_use]
    pub fn with_default_path(format: ReportFormat) -> Self {
        let output = PathBuf::from(format.default_file_name());
        Self { format, output }
    }
}

impl FromStr for ReportTarget {
    type Err = CovpipeError;

    /// Parse `FORMAT` or `FORMAT=PATH`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((format, path)) if !path.trim().is_empty() => {
                Ok(Self::new(format.parse()?, path.trim()))
            }
            Some((format, _)) => Ok(Self::with_default_path(format.parse()?)),
            None => Ok(Self::with_default_path(s.parse()?)),
        }
    }
}

/// Immutable configuration of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    workspace: PathBuf,
    test_assembly_glob: String,
    platform: TestPlatform,
    test_case_filter: Option<String>,
    runner_args: Option<String>,
    coverage_include: Option<String>,
    coverage_class_include: Option<String>,
    coverage_function_include: Option<String>,
    coverage_exclude: Option<String>,
    process_include: Option<String>,
    process_exclude: Option<String>,
    reports: Vec<ReportTarget>,
    output_dir: PathBuf,
    temp_dir: PathBuf,
    snapshot_name: String,
    clean: bool,
    parallel_cover: bool,
    #[serde(with = "optional_secs")]
    timeout: Option<Duration>,
}

impl PipelineConfig {
    /// Start a builder with the two required settings
    #[must_use]
    pub fn builder(
        test_assembly_glob: impl Into<String>,
        platform: TestPlatform,
    ) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            test_assembly_glob: Some(test_assembly_glob.into()),
            platform: Some(platform),
            ..PipelineConfigBuilder::default()
        }
    }

    /// Workspace root that discovery and relative paths resolve against
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Glob selecting the target binaries
    #[must_use]
    pub fn test_assembly_glob(&self) -> &str {
        &self.test_assembly_glob
    }

    /// Test runner platform
    #[must_use]
    pub const fn platform(&self) -> TestPlatform {
        self.platform
    }

    /// Test case filter expression
    #[must_use]
    pub fn test_case_filter(&self) -> Option<&str> {
        self.test_case_filter.as_deref()
    }

    /// Extra arguments appended to the test runner command line
    #[must_use]
    pub fn runner_args(&self) -> Option<&str> {
        self.runner_args.as_deref()
    }

    /// Assembly include masks
    #[must_use]
    pub fn coverage_include(&self) -> Option<&str> {
        self.coverage_include.as_deref()
    }

    /// Class include masks
    #[must_use]
    pub fn coverage_class_include(&self) -> Option<&str> {
        self.coverage_class_include.as_deref()
    }

    /// Function include masks
    #[must_use]
    pub fn coverage_function_include(&self) -> Option<&str> {
        self.coverage_function_include.as_deref()
    }

    /// Assembly exclude masks of this run
    #[must_use]
    pub fn coverage_exclude(&self) -> Option<&str> {
        self.coverage_exclude.as_deref()
    }

    /// Process include masks
    #[must_use]
    pub fn process_include(&self) -> Option<&str> {
        self.process_include.as_deref()
    }

    /// Process exclude masks
    #[must_use]
    pub fn process_exclude(&self) -> Option<&str> {
        self.process_exclude.as_deref()
    }

    /// Requested reports in the order they are rendered
    #[must_use]
    pub fn reports(&self) -> &[ReportTarget] {
        &self.reports
    }

    /// Absolute output directory
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.workspace.join(&self.output_dir)
    }

    /// Absolute temp directory
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.workspace.join(&self.temp_dir)
    }

    /// Absolute path of the merged snapshot
    #[must_use]
    pub fn combined_snapshot(&self) -> PathBuf {
        self.output_dir().join(&self.snapshot_name)
    }

    /// Whether pre-existing temp/output directories are wiped first
    #[must_use]
    pub const fn clean(&self) -> bool {
        self.clean
    }

    /// Whether Cover invocations run concurrently
    #[must_use]
    pub const fn parallel_cover(&self) -> bool {
        self.parallel_cover
    }

    /// Per-invocation timeout
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Layerable, partially specified pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct PipelineConfigBuilder {
    /// Workspace root
    pub workspace: Option<PathBuf>,
    /// Test assembly glob
    pub test_assembly_glob: Option<String>,
    /// Runner platform
    pub platform: Option<TestPlatform>,
    /// Test case filter
    pub test_case_filter: Option<String>,
    /// Extra runner arguments
    pub runner_args: Option<String>,
    /// Assembly include masks
    pub coverage_include: Option<String>,
    /// Class include masks
    pub coverage_class_include: Option<String>,
    /// Function include masks
    pub coverage_function_include: Option<String>,
    /// Assembly exclude masks
    pub coverage_exclude: Option<String>,
    /// Process include masks
    pub process_include: Option<String>,
    /// Process exclude masks
    pub process_exclude: Option<String>,
    /// Reports to render
    pub reports: Option<Vec<ReportTarget>>,
    /// Output directory
    pub output_dir: Option<PathBuf>,
    /// Temp directory
    pub temp_dir: Option<PathBuf>,
    /// Combined snapshot file name
    pub snapshot_name: Option<String>,
    /// Wipe directories before the run
    pub clean: Option<bool>,
    /// Run Cover invocations concurrently
    pub parallel_cover: Option<bool>,
    /// Per-invocation timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl PipelineConfigBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML run file
    pub fn from_yaml(yaml: &str) -> CovpipeResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Load a YAML run file from disk
    pub fn load(path: &Path) -> CovpipeResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml).map_err(|e| CovpipeError::Settings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Overlay `other` on top of `self`; fields set in `other` win
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            workspace: other.workspace.or(self.workspace),
            test_assembly_glob: other.test_assembly_glob.or(self.test_assembly_glob),
            platform: other.platform.or(self.platform),
            test_case_filter: other.test_case_filter.or(self.test_case_filter),
            runner_args: other.runner_args.or(self.runner_args),
            coverage_include: other.coverage_include.or(self.coverage_include),
            coverage_class_include: other
                .coverage_class_include
                .or(self.coverage_class_include),
            coverage_function_include: other
                .coverage_function_include
                .or(self.coverage_function_include),
            coverage_exclude: other.coverage_exclude.or(self.coverage_exclude),
            process_include: other.process_include.or(self.process_include),
            process_exclude: other.process_exclude.or(self.process_exclude),
            reports: other.reports.or(self.reports),
            output_dir: other.output_dir.or(self.output_dir),
            temp_dir: other.temp_dir.or(self.temp_dir),
            snapshot_name: other.snapshot_name.or(self.snapshot_name),
            clean: other.clean.or(self.clean),
            parallel_cover: other.parallel_cover.or(self.parallel_cover),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
        }
    }

    /// Set the workspace root
    #[must_use]
    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Set the test assembly glob
    #[must_use]
    pub fn test_assembly_glob(mut self, glob: impl Into<String>) -> Self {
        self.test_assembly_glob = Some(glob.into());
        self
    }

    /// Set the test runner platform
    #[must_use]
    pub const fn platform(mut self, platform: TestPlatform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set the test case filter
    #[must_use]
    pub fn test_case_filter(mut self, filter: impl Into<String>) -> Self {
        self.test_case_filter = Some(filter.into());
        self
    }

    /// Set extra runner arguments
    #[must_use]
    pub fn runner_args(mut self, args: impl Into<String>) -> Self {
        self.runner_args = Some(args.into());
        self
    }

    /// Set assembly include masks
    #[must_use]
    pub fn coverage_include(mut self, masks: impl Into<String>) -> Self {
        self.coverage_include = Some(masks.into());
        self
    }

    /// Set class include masks
    #[must_use]
    pub fn coverage_class_include(mut self, masks: impl Into<String>) -> Self {
        self.coverage_class_include = Some(masks.into());
        self
    }

    /// Set function include masks
    #[must_use]
    pub fn coverage_function_include(mut self, masks: impl Into<String>) -> Self {
        self.coverage_function_include = Some(masks.into());
        self
    }

    /// Set assembly exclude masks
    #[must_use]
    pub fn coverage_exclude(mut self, masks: impl Into<String>) -> Self {
        self.coverage_exclude = Some(masks.into());
        self
    }

    /// Set process include masks
    #[must_use]
    pub fn process_include(mut self, masks: impl Into<String>) -> Self {
        self.process_include = Some(masks.into());
        self
    }

    /// Set process exclude masks
    #[must_use]
    pub fn process_exclude(mut self, masks: impl Into<String>) -> Self {
        self.process_exclude = Some(masks.into());
        self
    }

    /// Add a report
    #[must_use]
    pub fn report(mut self, format: ReportFormat, output: impl Into<PathBuf>) -> Self {
        self.reports
            .get_or_insert_with(Vec::new)
            .push(ReportTarget::new(format, output));
        self
    }

    /// Set the output directory
    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set the temp directory
    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Set the combined snapshot name
    #[must_use]
    pub fn snapshot_name(mut self, name: impl Into<String>) -> Self {
        self.snapshot_name = Some(name.into());
        self
    }

    /// Wipe directories before the run
    #[must_use]
    pub const fn clean(mut self, clean: bool) -> Self {
        self.clean = Some(clean);
        self
    }

    /// Run Cover invocations concurrently
    #[must_use]
    pub const fn parallel_cover(mut self, parallel: bool) -> Self {
        self.parallel_cover = Some(parallel);
        self
    }

    /// Per-invocation timeout in seconds
    #[must_use]
    pub const fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Validate and apply defaults
    ///
    /// The test assembly glob and the platform have no defaults; leaving
    /// either unset is a configuration error.
    pub fn build(self) -> CovpipeResult<PipelineConfig> {
        let Some(test_assembly_glob) = self.test_assembly_glob else {
            return Err(CovpipeError::config("test assembly glob is required"));
        };
        let Some(platform) = self.platform else {
            return Err(CovpipeError::config(
                "test platform is required (x86 or X64)",
            ));
        };
        if test_assembly_glob.trim().is_empty() {
            return Err(CovpipeError::config(
                "test assembly glob must not be empty",
            ));
        }
        glob::Pattern::new(&test_assembly_glob).map_err(|e| {
            CovpipeError::config(format!("invalid test assembly glob '{test_assembly_glob}': {e}"))
        })?;

        let workspace = absolutize(&self.workspace.unwrap_or_else(|| PathBuf::from(".")))?;
        let output_dir = self
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let temp_dir = self
            .temp_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMP_DIR));
        let clean = self.clean.unwrap_or(false);

        if clean && (workspace.join(&output_dir) == workspace || workspace.join(&temp_dir) == workspace)
        {
            return Err(CovpipeError::config(
                "refusing to clean: output and temp directories must differ from the workspace root",
            ));
        }

        let snapshot_name = self
            .snapshot_name
            .unwrap_or_else(|| DEFAULT_SNAPSHOT_NAME.to_string());
        if snapshot_name.trim().is_empty() {
            return Err(CovpipeError::config("snapshot name must not be empty"));
        }

        let timeout = match self.timeout_secs {
            Some(0) => {
                return Err(CovpipeError::config("timeout must be at least one second"));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(PipelineConfig {
            workspace,
            test_assembly_glob,
            platform,
            test_case_filter: self.test_case_filter,
            runner_args: self.runner_args,
            coverage_include: self.coverage_include,
            coverage_class_include: self.coverage_class_include,
            coverage_function_include: self.coverage_function_include,
            coverage_exclude: self.coverage_exclude,
            process_include: self.process_include,
            process_exclude: self.process_exclude,
            reports: self.reports.unwrap_or_default(),
            output_dir,
            temp_dir,
            snapshot_name,
            clean,
            parallel_cover: self.parallel_cover.unwrap_or(false),
            timeout,
        })
    }
}

/// Resolve a path against the current directory without touching symlinks
pub fn absolutize(path: &Path) -> CovpipeResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let joined = std::env::current_dir()?.join(path);
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

mod optional_secs {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }
}
