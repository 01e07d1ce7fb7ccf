//! Target discovery
//!
//! Lists the test binaries under the workspace root that match the run's
//! glob. Results come back in the order the directory walk yields them; they
//! are not re-sorted.

use crate::result::{CovpipeError, CovpipeResult};
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files under `workspace` matching `pattern`.
///
/// The pattern is relative to the workspace; an absolute pattern is used
/// as is. Directories matching the pattern are skipped. Any unreadable path
/// encountered during the walk fails the whole discovery.
pub fn discover_targets(workspace: &Path, pattern: &str) -> CovpipeResult<Vec<PathBuf>> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(CovpipeError::config("test assembly glob must not be empty"));
    }

    let full_pattern = if Path::new(trimmed).is_absolute() {
        trimmed.to_string()
    } else {
        let root = Pattern::escape(&workspace.display().to_string());
        format!("{}/{}", root.trim_end_matches(['/', '\\']), trimmed)
    };

    let options = MatchOptions {
        case_sensitive: !cfg!(windows),
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let entries = glob::glob_with(&full_pattern, options)
        .map_err(|e| CovpipeError::discovery(trimmed, e.to_string()))?;

    let mut targets = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| CovpipeError::discovery(trimmed, e.to_string()))?;
        if path.is_file() {
            targets.push(path);
        }
    }

    debug!(pattern = trimmed, count = targets.len(), "discovered targets");
    Ok(targets)
}
