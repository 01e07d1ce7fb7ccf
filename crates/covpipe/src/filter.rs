//! Coverage filter construction
//!
//! Turns the `;`-separated include/exclude strings of a run into the ordered
//! filter sequences written into the analysis document. Include entries keep
//! assembly → class → function order because the coverage tool evaluates
//! them first-match-wins.

use serde::{Deserialize, Serialize};

/// Mask matching everything in one dimension
pub const WILDCARD: &str = "*";

/// Separator between patterns in a filter string
pub const PATTERN_SEPARATOR: char = ';';

/// One module/class/function mask triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterEntry {
    /// Assembly (module) mask
    pub module_mask: String,
    /// Class mask
    pub class_mask: String,
    /// Function mask
    pub function_mask: String,
}

impl FilterEntry {
    /// Entry restricting only the module
    #[must_use]
    pub fn module(mask: impl Into<String>) -> Self {
        Self {
            module_mask: mask.into(),
            class_mask: WILDCARD.to_string(),
            function_mask: WILDCARD.to_string(),
        }
    }

    /// Entry restricting only the class
    #[must_use]
    pub fn class(mask: impl Into<String>) -> Self {
        Self {
            module_mask: WILDCARD.to_string(),
            class_mask: mask.into(),
            function_mask: WILDCARD.to_string(),
        }
    }

    /// Entry restricting only the function
    #[must_use]
    pub fn function(mask: impl Into<String>) -> Self {
        Self {
            module_mask: WILDCARD.to_string(),
            class_mask: WILDCARD.to_string(),
            function_mask: mask.into(),
        }
    }
}

/// Filters for a single coverage run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    include: Vec<FilterEntry>,
    exclude: Vec<String>,
    process_include: Vec<String>,
    process_exclude: Vec<String>,
}

impl FilterSet {
    /// Assemble a filter set from already-split sequences
    #[must_use]
    pub fn from_parts(
        include: Vec<FilterEntry>,
        exclude: Vec<String>,
        process_include: Vec<String>,
        process_exclude: Vec<String>,
    ) -> Self {
        Self {
            include,
            exclude,
            process_include,
            process_exclude,
        }
    }

    /// Include entries in evaluation order
    #[must_use]
    pub fn include(&self) -> &[FilterEntry] {
        &self.include
    }

    /// Excluded module masks, run-specific first
    #[must_use]
    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Process masks to instrument
    #[must_use]
    pub fn process_include(&self) -> &[String] {
        &self.process_include
    }

    /// Process masks to skip
    #[must_use]
    pub fn process_exclude(&self) -> &[String] {
        &self.process_exclude
    }

    /// True when no section carries any entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
            && self.exclude.is_empty()
            && self.process_include.is_empty()
            && self.process_exclude.is_empty()
    }
}

/// Split a filter string into its non-empty patterns
pub fn split_patterns(input: Option<&str>) -> impl Iterator<Item = &str> {
    input
        .unwrap_or_default()
        .split(PATTERN_SEPARATOR)
        .filter(|token| !token.is_empty())
}

/// Join the run's own exclude string with the mandatory one, run's first
#[must_use]
pub fn combine_excludes(run_exclude: Option<&str>, mandatory_exclude: Option<&str>) -> String {
    [run_exclude, mandatory_exclude]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(";")
}

/// Build the filter set for one coverage run.
///
/// Every argument is an optional `;`-separated pattern list. Empty tokens
/// are dropped; everything else is kept verbatim.
#[must_use]
pub fn build_filter_set(
    assembly_include: Option<&str>,
    class_include: Option<&str>,
    function_include: Option<&str>,
    assembly_exclude: Option<&str>,
    mandatory_exclude: Option<&str>,
    process_include: Option<&str>,
    process_exclude: Option<&str>,
) -> FilterSet {
    let include = split_patterns(assembly_include)
        .map(FilterEntry::module)
        .chain(split_patterns(class_include).map(FilterEntry::class))
        .chain(split_patterns(function_include).map(FilterEntry::function))
        .collect();

    let excludes = combine_excludes(assembly_exclude, mandatory_exclude);
    let exclude = split_patterns(Some(excludes.as_str()))
        .map(str::to_string)
        .collect();

    FilterSet {
        include,
        exclude,
        process_include: split_patterns(process_include)
            .map(str::to_string)
            .collect(),
        process_exclude: split_patterns(process_exclude)
            .map(str::to_string)
            .collect(),
    }
}
