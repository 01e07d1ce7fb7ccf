//! Output formatting and progress reporting

use console::{style, Style, Term};
use covpipe::{ConsoleSink, PipelineObserver, PipelineState, RunSummary};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Output format for run results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Progress reporter for a coverage run.
///
/// Doubles as the pipeline observer and as the console sink receiving tool
/// output, so tool lines are printed without tearing the progress bar.
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    tool_term: Term,
    progress_bar: Mutex<Option<ProgressBar>>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            tool_term: Term::stdout(),
            progress_bar: Mutex::new(None),
            use_color,
            quiet,
        }
    }

    /// Send tool output to stderr, keeping stdout for machine-readable output
    #[must_use]
    pub fn with_tool_output_on_stderr(mut self) -> Self {
        self.tool_term = Term::stderr();
        self
    }

    /// Start a progress bar over `total` targets
    pub fn start_progress(&self, total: u64, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        if let Ok(mut slot) = self.progress_bar.lock() {
            *slot = Some(pb);
        }
    }

    fn bar(&self) -> Option<ProgressBar> {
        self.progress_bar.lock().ok().and_then(|slot| slot.clone())
    }

    /// Increment progress
    pub fn increment(&self, delta: u64) {
        if let Some(pb) = self.bar() {
            pb.inc(delta);
        }
    }

    /// Update progress message
    pub fn set_message(&self, message: &str) {
        if let Some(pb) = self.bar() {
            pb.set_message(message.to_string());
        }
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Some(pb) = self.bar() {
            pb.finish_and_clear();
        }
    }

    fn write(&self, term: &Term, line: &str) {
        match self.bar() {
            Some(pb) => pb.suspend(|| {
                let _ = term.write_line(line);
            }),
            None => {
                let _ = term.write_line(line);
            }
        }
    }

    fn prefixed(&self, symbol: console::StyledObject<&str>, plain: &str, message: &str) -> String {
        let prefix = if self.use_color {
            symbol.to_string()
        } else {
            plain.to_string()
        };
        format!("{prefix} {message}")
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let line = self.prefixed(style("✓").green().bold(), "OK", message);
        self.write(&self.term, &line);
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Always print failures, even in quiet mode
        let line = self.prefixed(style("✗").red().bold(), "FAIL", message);
        self.write(&self.term, &line);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        let line = self.prefixed(style("⚠").yellow().bold(), "WARN", message);
        self.write(&self.term, &line);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let line = self.prefixed(style("ℹ").blue().bold(), "INFO", message);
        self.write(&self.term, &line);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        self.write(&self.term, "");
        self.write(&self.term, &styled);
    }

    /// Print the closing lines of a completed run
    pub fn summary(&self, summary: &RunSummary) {
        if self.quiet {
            return;
        }
        let line = summary_line(
            summary.targets.len(),
            summary.reports.len(),
            Duration::from_millis(summary.duration_ms),
        );
        let styled = if self.use_color {
            Style::new().green().bold().apply_to(line).to_string()
        } else {
            line
        };
        self.write(&self.term, "");
        self.write(&self.term, &styled);
        if let Some(snapshot) = &summary.combined_snapshot {
            self.info(&format!("Snapshot: {}", snapshot.display()));
        }
        for report in &summary.reports {
            self.info(&format!("{} report: {}", report.format, report.path.display()));
        }
        if !summary.warnings.is_empty() {
            self.warning(&format!("{} warning(s) during the run", summary.warnings.len()));
        }
    }
}

/// One-line description of a completed run
#[must_use]
pub fn summary_line(targets: usize, reports: usize, duration: Duration) -> String {
    let noun = if targets == 1 { "assembly" } else { "assemblies" };
    format!(
        "COMPLETED {targets} test {noun} covered, {reports} report(s) in {:.2}s",
        duration.as_secs_f64()
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

impl ConsoleSink for ProgressReporter {
    fn line(&self, line: &str) {
        if self.quiet {
            return;
        }
        self.write(&self.tool_term, line);
    }
}

impl PipelineObserver for ProgressReporter {
    fn on_state(&self, state: &PipelineState) {
        match state {
            PipelineState::PerTargetCover { index, target } => {
                self.set_message(target);
                self.header(&format!("Cover [{index}] {target}"));
            }
            PipelineState::Merging => self.header("Merge snapshots"),
            PipelineState::Reporting { format } => self.header(&format!("Report {format}")),
            PipelineState::PostProcessing => self.info("Relaxing HTML report script sandbox"),
            _ => {}
        }
    }

    fn on_targets_discovered(&self, targets: &[PathBuf]) {
        if targets.is_empty() {
            self.info("No test assemblies matched; nothing to cover");
            return;
        }
        self.info(&format!("Found {} test assembly file(s)", targets.len()));
        self.start_progress(targets.len() as u64, "covering");
    }

    fn on_target_covered(&self, target: &Path) {
        self.increment(1);
        self.success(&format!("Covered {}", file_name(target)));
    }

    fn on_warning(&self, message: &str) {
        self.warning(message);
    }
}
