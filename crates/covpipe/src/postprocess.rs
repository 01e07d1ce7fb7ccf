//! HTML report post-processing
//!
//! The HTML report embeds its source viewer in a sandboxed iframe that blocks
//! scripts, which leaves the viewer blank when the report is served from a
//! build server. The fix is a literal text replacement of the iframe tag.

use crate::result::{CovpipeError, CovpipeResult};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Iframe tag as generated by the coverage tool
pub const RESTRICTIVE_MARKER: &str = r#"<iframe id="sourceCode">"#;

/// Replacement tag allowing the viewer's scripts to run
pub const PERMISSIVE_MARKER: &str =
    r#"<iframe sandbox="allow-scripts allow-same-origin allow-top-navigation" id="sourceCode">"#;

/// Outcome of relaxing one report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Relaxation {
    /// Markers were replaced
    Applied {
        /// Number of markers replaced
        replacements: usize,
    },
    /// The report held no restrictive marker; nothing was written
    MarkerMissing,
}

/// Replace every restrictive marker in `html`
#[must_use]
pub fn relax_markup(html: &str) -> (String, usize) {
    let count = html.matches(RESTRICTIVE_MARKER).count();
    if count == 0 {
        return (html.to_string(), 0);
    }
    (html.replace(RESTRICTIVE_MARKER, PERMISSIVE_MARKER), count)
}

/// Rewrite the report at `path` in place.
///
/// An unreadable or unwritable file is an error. A report without the marker
/// is left untouched and reported as [`Relaxation::MarkerMissing`].
pub fn relax_script_restriction(path: &Path) -> CovpipeResult<Relaxation> {
    let html = std::fs::read_to_string(path).map_err(|source| CovpipeError::PostProcess {
        path: path.to_path_buf(),
        source,
    })?;

    let (relaxed, replacements) = relax_markup(&html);
    if replacements == 0 {
        warn!(
            report = %path.display(),
            "sandboxed iframe marker not found, report left unchanged"
        );
        return Ok(Relaxation::MarkerMissing);
    }

    std::fs::write(path, relaxed).map_err(|source| CovpipeError::PostProcess {
        path: path.to_path_buf(),
        source,
    })?;
    info!(report = %path.display(), replacements, "relaxed report script sandbox");
    Ok(Relaxation::Applied { replacements })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const REPORT: &str = r#"<html><body>
<div id="tree"></div>
<iframe id="sourceCode"></iframe>
</body></html>
"#;

    #[test]
    fn test_relax_markup_replaces_marker() {
        let (out, n) = relax_markup(REPORT);
        assert_eq!(n, 1);
        assert!(out.contains(PERMISSIVE_MARKER));
        assert!(!out.contains(RESTRICTIVE_MARKER));
    }

    #[test]
    fn test_relax_markup_all_occurrences() {
        let html = format!("{RESTRICTIVE_MARKER}a{RESTRICTIVE_MARKER}");
        let (out, n) = relax_markup(&html);
        assert_eq!(n, 2);
        assert_eq!(out, format!("{PERMISSIVE_MARKER}a{PERMISSIVE_MARKER}"));
    }

    #[test]
    fn test_relax_file_in_place() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.html");
        std::fs::write(&path, REPORT).unwrap();

        let outcome = relax_script_restriction(&path).unwrap();
        assert_eq!(outcome, Relaxation::Applied { replacements: 1 });
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, REPORT.replace(RESTRICTIVE_MARKER, PERMISSIVE_MARKER));
    }

    #[test]
    fn test_second_pass_is_noop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.html");
        std::fs::write(&path, REPORT).unwrap();

        relax_script_restriction(&path).unwrap();
        let once = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            relax_script_restriction(&path).unwrap(),
            Relaxation::MarkerMissing
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), once);
    }

    #[test]
    fn test_missing_marker_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.html");
        std::fs::write(&path, "<html></html>").unwrap();
        assert_eq!(
            relax_script_restriction(&path).unwrap(),
            Relaxation::MarkerMissing
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let err = relax_script_restriction(&temp.path().join("absent.html")).unwrap_err();
        assert!(matches!(err, CovpipeError::PostProcess { .. }));
    }

    proptest! {
        #[test]
        fn prop_relax_is_idempotent(
            parts in proptest::collection::vec("[a-z<>\" =]{0,12}", 0..5),
        ) {
            let html = parts.join(RESTRICTIVE_MARKER);
            let (once, _) = relax_markup(&html);
            let (twice, n) = relax_markup(&once);
            prop_assert_eq!(n, 0);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn prop_other_content_is_preserved(
            parts in proptest::collection::vec("[a-z ]{0,12}", 1..5),
        ) {
            let html = parts.join(RESTRICTIVE_MARKER);
            let (out, n) = relax_markup(&html);
            prop_assert_eq!(n, parts.len() - 1);
            prop_assert_eq!(out, parts.join(PERMISSIVE_MARKER));
        }
    }
}
