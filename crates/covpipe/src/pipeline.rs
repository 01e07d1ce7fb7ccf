//! Snapshot pipeline controller
//!
//! Drives one coverage run as an explicit state machine:
//!
//! ```text
//! Idle → Discovering → PerTargetCover(1..N) → Merging → Reporting(1..M)
//!      → PostProcessing → Done
//! ```
//!
//! Any state can move to `Failed`, which is terminal. Each transition after
//! discovery corresponds to one completed tool invocation, so the order of
//! invocations and the points where a run aborts are visible in
//! [`RunSummary::states`] and to a [`PipelineObserver`].

use crate::analyse::{assemble_config, runner_arguments, to_agent_path, ConfigDocument};
use crate::config::{PipelineConfig, ReportFormat};
use crate::discovery::discover_targets;
use crate::filter::{build_filter_set, FilterSet};
use crate::launcher::{CancellationToken, ToolLauncher};
use crate::postprocess::{relax_script_restriction, Relaxation};
use crate::result::{CovpipeError, CovpipeResult};
use crate::settings::MandatoryExclusionSet;
use crate::tools::ToolPaths;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Suffix of the per-target analysis document, written to the output dir
pub const CONFIG_FILE_SUFFIX: &str = ".DotCoverConfig.xml";

/// Suffix of the per-target snapshot, written to the run's temp dir
pub const SNAPSHOT_SUFFIX: &str = ".merge.cov";

/// Coarse pipeline stage, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Directory preparation
    Prepare,
    /// Target discovery
    Discovering,
    /// Per-target Cover invocations
    Cover,
    /// Snapshot merge
    Merge,
    /// Report rendering
    Report,
    /// HTML report rewriting
    PostProcess,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepare => "prepare",
            Self::Discovering => "discovery",
            Self::Cover => "cover",
            Self::Merge => "merge",
            Self::Report => "report",
            Self::PostProcess => "post-process",
        };
        f.write_str(name)
    }
}

/// State of the pipeline state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing started yet
    Idle,
    /// Listing targets
    Discovering,
    /// Covering target `index` (1-based)
    PerTargetCover {
        /// Position in discovery order
        index: usize,
        /// Target file name
        target: String,
    },
    /// Merging snapshots
    Merging,
    /// Rendering one report
    Reporting {
        /// Report format token
        format: String,
    },
    /// Rewriting HTML reports
    PostProcessing,
    /// Finished successfully
    Done,
    /// Aborted
    Failed {
        /// Stage that failed
        stage: Stage,
    },
}

/// Receives progress notifications while a pipeline runs
pub trait PipelineObserver: Send + Sync {
    /// A state transition happened
    fn on_state(&self, _state: &PipelineState) {}

    /// Discovery finished
    fn on_targets_discovered(&self, _targets: &[PathBuf]) {}

    /// One target was covered successfully
    fn on_target_covered(&self, _target: &Path) {}

    /// Non-fatal problem worth surfacing
    fn on_warning(&self, _message: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Paths allocated for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetArtifacts {
    /// Discovered target binary
    pub target: PathBuf,
    /// Unique name used for this target's files
    pub name: String,
    /// Analysis document path
    pub config_path: PathBuf,
    /// Snapshot the Cover invocation writes
    pub snapshot_path: PathBuf,
}

/// Every path a run allocates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunArtifacts {
    /// Run these paths belong to
    pub run_id: Uuid,
    /// Temp directory private to this run, `<temp>/<run id>`
    pub temp_dir: PathBuf,
    /// Output directory
    pub output_dir: PathBuf,
    /// Per-target paths in discovery order
    pub targets: Vec<TargetArtifacts>,
    /// Merged snapshot
    pub combined_snapshot: PathBuf,
    /// Report formats with their absolute output paths
    pub reports: Vec<(ReportFormat, PathBuf)>,
}

impl RunArtifacts {
    /// Allocate paths for `targets` in run `run_id`.
    ///
    /// Targets sharing a file name get `-2`, `-3`, ... appended so their
    /// documents and snapshots do not overwrite each other. Snapshots go to a
    /// directory no earlier run has used, so a Cover invocation that writes
    /// nothing cannot leave a previous run's snapshot to be merged.
    #[must_use]
    pub fn plan(config: &PipelineConfig, run_id: Uuid, targets: &[PathBuf]) -> Self {
        let temp_dir = config.temp_dir().join(run_id.to_string());
        let output_dir = config.output_dir();

        let mut seen: HashMap<String, usize> = HashMap::new();
        let targets = targets
            .iter()
            .map(|target| {
                let base = target
                    .file_name()
                    .map_or_else(|| "target".to_string(), |n| n.to_string_lossy().into_owned());
                let count = seen.entry(base.clone()).or_insert(0);
                *count += 1;
                let name = if *count == 1 {
                    base
                } else {
                    format!("{base}-{count}")
                };
                TargetArtifacts {
                    target: target.clone(),
                    config_path: output_dir.join(format!("{name}{CONFIG_FILE_SUFFIX}")),
                    snapshot_path: temp_dir.join(format!("{name}{SNAPSHOT_SUFFIX}")),
                    name,
                }
            })
            .collect();

        let reports = config
            .reports()
            .iter()
            .map(|r| (r.format.clone(), output_dir.join(&r.output)))
            .collect();

        Self {
            run_id,
            combined_snapshot: config.combined_snapshot(),
            temp_dir,
            output_dir,
            targets,
            reports,
        }
    }
}

/// One rendered report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportOutcome {
    /// Format token
    pub format: String,
    /// Written file
    pub path: PathBuf,
    /// Post-processing result for HTML reports
    pub relaxation: Option<Relaxation>,
}

/// Successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Total run time in milliseconds
    pub duration_ms: u64,
    /// Discovered targets in discovery order
    pub targets: Vec<PathBuf>,
    /// Snapshots that were merged
    pub snapshots: Vec<PathBuf>,
    /// Merged snapshot, absent when nothing was merged
    pub combined_snapshot: Option<PathBuf>,
    /// Rendered reports
    pub reports: Vec<ReportOutcome>,
    /// State transitions in order
    pub states: Vec<PipelineState>,
    /// Non-fatal problems encountered
    pub warnings: Vec<String>,
}

/// Aborted run
#[derive(Debug, Serialize)]
pub struct PipelineFailure {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Stage that failed
    pub stage: Stage,
    /// Target being covered, for Cover failures
    pub target: Option<String>,
    /// Underlying error
    #[serde(serialize_with = "display")]
    pub cause: CovpipeError,
    /// Snapshots produced before the failure; they are left on disk
    pub snapshots: Vec<PathBuf>,
    /// State transitions in order, ending in `Failed`
    pub states: Vec<PipelineState>,
}

impl PipelineFailure {
    /// Exit code of the failed tool invocation, if that is what failed
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.cause.exit_code()
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed", self.stage)?;
        if let Some(target) = &self.target {
            write!(f, " for {target}")?;
        }
        write!(f, ": {}", self.cause)
    }
}

/// Terminal value of a run
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PipelineResult {
    /// Run finished, possibly with zero targets
    Completed(RunSummary),
    /// Run aborted
    Failed(PipelineFailure),
}

impl PipelineResult {
    /// Whether the run completed
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The summary of a completed run
    #[must_use]
    pub const fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            Self::Failed(_) => None,
        }
    }

    /// The failure of an aborted run
    #[must_use]
    pub const fn failure(&self) -> Option<&PipelineFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

fn display<S: Serializer>(value: &CovpipeError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

struct StageError {
    stage: Stage,
    target: Option<String>,
    cause: CovpipeError,
}

impl StageError {
    fn at(stage: Stage) -> impl FnOnce(CovpipeError) -> Self {
        move |cause| Self {
            stage,
            target: None,
            cause,
        }
    }
}

/// Mutable bookkeeping of one run
#[derive(Default)]
struct RunLog {
    states: Mutex<Vec<PipelineState>>,
    warnings: Mutex<Vec<String>>,
    snapshots: Mutex<Vec<PathBuf>>,
}

impl RunLog {
    fn take<T: Default>(slot: &Mutex<T>) -> T {
        slot.lock().map(|mut v| std::mem::take(&mut *v)).unwrap_or_default()
    }
}

/// Runs the coverage tool over every discovered target
pub struct Pipeline<L: ToolLauncher> {
    config: PipelineConfig,
    tools: ToolPaths,
    mandatory: MandatoryExclusionSet,
    launcher: L,
    cancel: CancellationToken,
    observer: Arc<dyn PipelineObserver>,
}

impl<L: ToolLauncher> fmt::Debug for Pipeline<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("tools", &self.tools)
            .field("mandatory", &self.mandatory)
            .finish_non_exhaustive()
    }
}

impl<L: ToolLauncher> Pipeline<L> {
    /// Create a pipeline; fails when a tool path is empty
    pub fn new(
        config: PipelineConfig,
        tools: ToolPaths,
        mandatory: MandatoryExclusionSet,
        launcher: L,
    ) -> CovpipeResult<Self> {
        if tools.coverage_tool.trim().is_empty() {
            return Err(CovpipeError::config("coverage tool path is empty"));
        }
        if tools.test_runner.trim().is_empty() {
            return Err(CovpipeError::config("test runner path is empty"));
        }
        Ok(Self {
            config,
            tools,
            mandatory,
            launcher,
            cancel: CancellationToken::new(),
            observer: Arc::new(NoopObserver),
        })
    }

    /// Use an externally controlled cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receive progress notifications
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run configuration
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Filters applied to every target of this run
    #[must_use]
    pub fn filter_set(&self) -> FilterSet {
        build_filter_set(
            self.config.coverage_include(),
            self.config.coverage_class_include(),
            self.config.coverage_function_include(),
            self.config.coverage_exclude(),
            self.mandatory.as_deref(),
            self.config.process_include(),
            self.config.process_exclude(),
        )
    }

    /// Analysis document for one target of `run`
    #[must_use]
    pub fn document_for(
        &self,
        run: &RunArtifacts,
        target: &TargetArtifacts,
        filters: FilterSet,
    ) -> ConfigDocument {
        let arguments = runner_arguments(
            self.config.platform(),
            &[to_agent_path(&target.target)],
            self.config.test_case_filter(),
            self.config.runner_args(),
        );
        assemble_config(
            &self.tools.test_runner,
            &arguments,
            &to_agent_path(&self.config.output_dir()),
            &to_agent_path(&run.temp_dir),
            &to_agent_path(&target.snapshot_path),
            filters,
        )
    }

    /// Run the whole pipeline
    pub fn run(&self) -> PipelineResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let log = RunLog::default();

        info!(%run_id, workspace = %self.config.workspace().display(), "starting coverage run");
        self.enter(&log, PipelineState::Idle);

        match self.execute(run_id, &log) {
            Ok((targets, combined_snapshot, reports)) => {
                self.enter(&log, PipelineState::Done);
                let summary = RunSummary {
                    run_id,
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    targets,
                    snapshots: RunLog::take(&log.snapshots),
                    combined_snapshot,
                    reports,
                    states: RunLog::take(&log.states),
                    warnings: RunLog::take(&log.warnings),
                };
                info!(%run_id, targets = summary.targets.len(), "coverage run completed");
                PipelineResult::Completed(summary)
            }
            Err(error) => {
                self.enter(&log, PipelineState::Failed { stage: error.stage });
                warn!(
                    %run_id,
                    stage = %error.stage,
                    target = error.target.as_deref().unwrap_or("-"),
                    error = %error.cause,
                    "coverage run failed"
                );
                PipelineResult::Failed(PipelineFailure {
                    run_id,
                    stage: error.stage,
                    target: error.target,
                    cause: error.cause,
                    snapshots: RunLog::take(&log.snapshots),
                    states: RunLog::take(&log.states),
                })
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn execute(
        &self,
        run_id: Uuid,
        log: &RunLog,
    ) -> Result<(Vec<PathBuf>, Option<PathBuf>, Vec<ReportOutcome>), StageError> {
        self.prepare_directories().map_err(StageError::at(Stage::Prepare))?;

        self.enter(log, PipelineState::Discovering);
        let targets = discover_targets(self.config.workspace(), self.config.test_assembly_glob())
            .map_err(StageError::at(Stage::Discovering))?;
        self.observer.on_targets_discovered(&targets);
        if targets.is_empty() {
            info!(
                pattern = self.config.test_assembly_glob(),
                "no targets matched, nothing to cover"
            );
            return Ok((targets, None, Vec::new()));
        }

        let artifacts = RunArtifacts::plan(&self.config, run_id, &targets);
        std::fs::create_dir_all(&artifacts.temp_dir)
            .map_err(|e| StageError::at(Stage::Prepare)(e.into()))?;
        debug!(dir = %artifacts.temp_dir.display(), "created run temp directory");
        let filters = self.filter_set();

        if self.config.parallel_cover() {
            self.cover_parallel(log, &artifacts, &filters)?;
        } else {
            for (index, target) in artifacts.targets.iter().enumerate() {
                self.cover_one(log, &artifacts, index + 1, target, &filters, &self.cancel)
                    .map_err(|cause| StageError {
                        stage: Stage::Cover,
                        target: Some(target.name.clone()),
                        cause,
                    })?;
            }
        }

        let snapshots = log.snapshots.lock().map(|s| s.clone()).unwrap_or_default();
        if snapshots.is_empty() {
            self.warn(log, "no snapshots were produced; skipping merge and reports");
            return Ok((targets, None, Vec::new()));
        }

        self.enter(log, PipelineState::Merging);
        self.merge(&snapshots, &artifacts.combined_snapshot)
            .map_err(StageError::at(Stage::Merge))?;

        let mut reports = Vec::new();
        for (format, path) in &artifacts.reports {
            self.enter(
                log,
                PipelineState::Reporting {
                    format: format.token().to_string(),
                },
            );
            self.report(format, &artifacts.combined_snapshot, path)
                .map_err(StageError::at(Stage::Report))?;
            reports.push(ReportOutcome {
                format: format.token().to_string(),
                path: path.clone(),
                relaxation: None,
            });
        }

        if reports.iter().any(|r| r.format == ReportFormat::Html.token()) {
            self.enter(log, PipelineState::PostProcessing);
            for report in reports
                .iter_mut()
                .filter(|r| r.format == ReportFormat::Html.token())
            {
                let outcome = relax_script_restriction(&report.path)
                    .map_err(StageError::at(Stage::PostProcess))?;
                if outcome == Relaxation::MarkerMissing {
                    self.warn(
                        log,
                        &format!(
                            "{} has no sandboxed iframe marker; left unchanged",
                            report.path.display()
                        ),
                    );
                }
                report.relaxation = Some(outcome);
            }
        }

        Ok((targets, Some(artifacts.combined_snapshot), reports))
    }

    fn prepare_directories(&self) -> CovpipeResult<()> {
        for dir in [self.config.temp_dir(), self.config.output_dir()] {
            if self.config.clean() && dir.exists() {
                debug!(dir = %dir.display(), "cleaning directory");
                std::fs::remove_dir_all(&dir)?;
            }
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    fn cover_one(
        &self,
        log: &RunLog,
        run: &RunArtifacts,
        index: usize,
        target: &TargetArtifacts,
        filters: &FilterSet,
        cancel: &CancellationToken,
    ) -> CovpipeResult<()> {
        self.enter(
            log,
            PipelineState::PerTargetCover {
                index,
                target: target.name.clone(),
            },
        );

        let document = self.document_for(run, target, filters.clone());
        document.write_to(&target.config_path)?;
        debug!(config = %target.config_path.display(), "wrote analysis document");

        let args = vec!["Cover".to_string(), to_agent_path(&target.config_path)];
        self.launcher.run(&self.tools.coverage_tool, &args, cancel)?;

        if target.snapshot_path.is_file() {
            if let Ok(mut snapshots) = log.snapshots.lock() {
                snapshots.push(target.snapshot_path.clone());
            }
        } else {
            self.warn(
                log,
                &format!(
                    "{} produced no snapshot at {}",
                    target.name,
                    target.snapshot_path.display()
                ),
            );
        }
        self.observer.on_target_covered(&target.target);
        Ok(())
    }

    fn cover_parallel(
        &self,
        log: &RunLog,
        artifacts: &RunArtifacts,
        filters: &FilterSet,
    ) -> Result<(), StageError> {
        let group = self.cancel.child();

        let results: Vec<CovpipeResult<()>> = thread::scope(|scope| {
            let handles: Vec<_> = artifacts
                .targets
                .iter()
                .enumerate()
                .map(|(index, target)| {
                    let group = &group;
                    scope.spawn(move || {
                        let result =
                            self.cover_one(log, artifacts, index + 1, target, filters, group);
                        if result.as_ref().is_err_and(|e| !e.is_cancelled()) {
                            group.cancel();
                        }
                        result
                    })
                })
                .collect();

            handles
                .into_iter()
                .zip(&artifacts.targets)
                .map(|(handle, target)| {
                    handle.join().unwrap_or_else(|_| {
                        group.cancel();
                        Err(CovpipeError::WorkerPanicked {
                            target: target.name.clone(),
                        })
                    })
                })
                .collect()
        });

        // Snapshots were recorded in completion order
        if let Ok(mut snapshots) = log.snapshots.lock() {
            let order: HashMap<&Path, usize> = artifacts
                .targets
                .iter()
                .enumerate()
                .map(|(i, t)| (t.snapshot_path.as_path(), i))
                .collect();
            snapshots.sort_by_key(|s| order.get(s.as_path()).copied().unwrap_or(usize::MAX));
        }

        let failures: Vec<(&TargetArtifacts, CovpipeError)> = artifacts
            .targets
            .iter()
            .zip(results)
            .filter_map(|(target, result)| result.err().map(|e| (target, e)))
            .collect();

        let first = failures
            .iter()
            .position(|(_, e)| !e.is_cancelled())
            .unwrap_or(0);
        match failures.into_iter().nth(first) {
            Some((target, cause)) => Err(StageError {
                stage: Stage::Cover,
                target: Some(target.name.clone()),
                cause,
            }),
            None => Ok(()),
        }
    }

    fn merge(&self, snapshots: &[PathBuf], combined: &Path) -> CovpipeResult<()> {
        let sources = snapshots
            .iter()
            .map(|s| to_agent_path(s))
            .collect::<Vec<_>>()
            .join(";");
        let args = vec![
            "Merge".to_string(),
            format!("/Source={sources}"),
            format!("/Output={}", to_agent_path(combined)),
        ];
        info!(count = snapshots.len(), output = %combined.display(), "merging snapshots");
        self.launcher
            .run(&self.tools.coverage_tool, &args, &self.cancel)
            .map(|_| ())
    }

    fn report(&self, format: &ReportFormat, source: &Path, output: &Path) -> CovpipeResult<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let args = vec![
            "Report".to_string(),
            format!("/ReportType={}", format.token()),
            format!("/Source={}", to_agent_path(source)),
            format!("/Output={}", to_agent_path(output)),
        ];
        info!(format = format.token(), output = %output.display(), "rendering report");
        self.launcher
            .run(&self.tools.coverage_tool, &args, &self.cancel)
            .map(|_| ())
    }

    fn enter(&self, log: &RunLog, state: PipelineState) {
        debug!(?state, "pipeline transition");
        self.observer.on_state(&state);
        if let Ok(mut states) = log.states.lock() {
            states.push(state);
        }
    }

    fn warn(&self, log: &RunLog, message: &str) {
        warn!("{message}");
        self.observer.on_warning(message);
        if let Ok(mut warnings) = log.warnings.lock() {
            warnings.push(message.to_string());
        }
    }
}
