//! Analysis parameter documents
//!
//! One [`ConfigDocument`] is produced per covered target. Its element tree is
//! the contract with the coverage tool, so element names and order are fixed:
//!
//! ```text
//! AnalyseParams
//! ├── TargetExecutable
//! ├── TargetArguments
//! ├── TargetWorkingDir
//! ├── TempDir
//! ├── Output
//! └── Filters
//!     ├── IncludeFilters  (FilterEntry: ModuleMask, ClassMask, FunctionMask)
//!     ├── ExcludeFilters  (FilterEntry: ModuleMask)
//!     └── ProcessFilters
//!         ├── IncludeFilters (ProcessMask)
//!         └── ExcludeFilters (ProcessMask)
//! ```

use crate::config::TestPlatform;
use crate::filter::{FilterEntry, FilterSet};
use crate::result::{CovpipeError, CovpipeResult};
use crate::xml::{self, Element};
use serde::Serialize;
use std::path::Path;

const ROOT: &str = "AnalyseParams";
const TARGET_EXECUTABLE: &str = "TargetExecutable";
const TARGET_ARGUMENTS: &str = "TargetArguments";
const TARGET_WORKING_DIR: &str = "TargetWorkingDir";
const TEMP_DIR: &str = "TempDir";
const OUTPUT: &str = "Output";
const FILTERS: &str = "Filters";
const INCLUDE_FILTERS: &str = "IncludeFilters";
const EXCLUDE_FILTERS: &str = "ExcludeFilters";
const PROCESS_FILTERS: &str = "ProcessFilters";
const FILTER_ENTRY: &str = "FilterEntry";
const MODULE_MASK: &str = "ModuleMask";
const CLASS_MASK: &str = "ClassMask";
const FUNCTION_MASK: &str = "FunctionMask";
const PROCESS_MASK: &str = "ProcessMask";

/// Logger flag passed to the test runner
pub const RUNNER_LOGGER: &str = "/logger:trx";

/// Parameters of one coverage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigDocument {
    /// Test runner executable the coverage tool wraps
    pub target_executable: String,
    /// Single space-joined argument string for the test runner
    pub target_arguments: String,
    /// Working directory of the test runner
    pub working_dir: String,
    /// Coverage tool scratch directory
    pub temp_dir: String,
    /// Snapshot path the tool writes
    pub output: String,
    /// Instrumentation filters
    pub filters: FilterSet,
}

/// Compose the document for one coverage run
#[must_use]
pub fn assemble_config(
    target_executable: &str,
    target_arguments: &str,
    working_dir: &str,
    temp_dir: &str,
    snapshot_output: &str,
    filter_set: FilterSet,
) -> ConfigDocument {
    ConfigDocument {
        target_executable: target_executable.to_string(),
        target_arguments: target_arguments.to_string(),
        working_dir: working_dir.to_string(),
        temp_dir: temp_dir.to_string(),
        output: snapshot_output.to_string(),
        filters: filter_set,
    }
}

impl ConfigDocument {
    /// Build the element tree
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut root = Element::new(ROOT);
        root.push(Element::with_text(TARGET_EXECUTABLE, &self.target_executable));
        root.push(Element::with_text(TARGET_ARGUMENTS, &self.target_arguments));
        root.push(Element::with_text(TARGET_WORKING_DIR, &self.working_dir));
        root.push(Element::with_text(TEMP_DIR, &self.temp_dir));
        root.push(Element::with_text(OUTPUT, &self.output));

        let filters = root.add_element(FILTERS);

        let include = filters.add_element(INCLUDE_FILTERS);
        for entry in self.filters.include() {
            let node = include.add_element(FILTER_ENTRY);
            node.push(Element::with_text(MODULE_MASK, &entry.module_mask));
            node.push(Element::with_text(CLASS_MASK, &entry.class_mask));
            node.push(Element::with_text(FUNCTION_MASK, &entry.function_mask));
        }

        let exclude = filters.add_element(EXCLUDE_FILTERS);
        for mask in self.filters.exclude() {
            exclude
                .add_element(FILTER_ENTRY)
                .push(Element::with_text(MODULE_MASK, mask));
        }

        let process = filters.add_element(PROCESS_FILTERS);
        let process_include = process.add_element(INCLUDE_FILTERS);
        for mask in self.filters.process_include() {
            process_include.push(Element::with_text(PROCESS_MASK, mask));
        }
        let process_exclude = process.add_element(EXCLUDE_FILTERS);
        for mask in self.filters.process_exclude() {
            process_exclude.push(Element::with_text(PROCESS_MASK, mask));
        }

        root
    }

    /// Serialize to the on-disk XML form
    #[must_use]
    pub fn to_xml(&self) -> String {
        self.to_element().to_document_string()
    }

    /// Write the document to `path`, creating parent directories
    pub fn write_to(&self, path: &Path) -> CovpipeResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_xml())?;
        Ok(())
    }

    /// Parse a previously written document
    pub fn from_xml(input: &str) -> CovpipeResult<Self> {
        Self::from_element(&xml::parse(input)?)
    }

    /// Read the fields back from an element tree
    pub fn from_element(root: &Element) -> CovpipeResult<Self> {
        if root.name() != ROOT {
            return Err(CovpipeError::document(format!(
                "expected root <{ROOT}>, found <{}>",
                root.name()
            )));
        }

        let filters = required(root, FILTERS)?;
        let include = required(filters, INCLUDE_FILTERS)?
            .children_named(FILTER_ENTRY)
            .map(|entry| {
                Ok(FilterEntry {
                    module_mask: text_of(entry, MODULE_MASK)?,
                    class_mask: text_of(entry, CLASS_MASK)?,
                    function_mask: text_of(entry, FUNCTION_MASK)?,
                })
            })
            .collect::<CovpipeResult<Vec<_>>>()?;
        let exclude = required(filters, EXCLUDE_FILTERS)?
            .children_named(FILTER_ENTRY)
            .map(|entry| text_of(entry, MODULE_MASK))
            .collect::<CovpipeResult<Vec<_>>>()?;

        let process = required(filters, PROCESS_FILTERS)?;
        let masks = |section: &str| -> CovpipeResult<Vec<String>> {
            Ok(required(process, section)?
                .children_named(PROCESS_MASK)
                .map(|mask| mask.text().unwrap_or_default().to_string())
                .collect())
        };

        Ok(Self {
            target_executable: text_of(root, TARGET_EXECUTABLE)?,
            target_arguments: text_of(root, TARGET_ARGUMENTS)?,
            working_dir: text_of(root, TARGET_WORKING_DIR)?,
            temp_dir: text_of(root, TEMP_DIR)?,
            output: text_of(root, OUTPUT)?,
            filters: FilterSet::from_parts(
                include,
                exclude,
                masks(INCLUDE_FILTERS)?,
                masks(EXCLUDE_FILTERS)?,
            ),
        })
    }
}

fn required<'a>(parent: &'a Element, name: &str) -> CovpipeResult<&'a Element> {
    parent.child(name).ok_or_else(|| {
        CovpipeError::document(format!("<{}> is missing <{name}>", parent.name()))
    })
}

fn text_of(parent: &Element, name: &str) -> CovpipeResult<String> {
    Ok(required(parent, name)?
        .text()
        .unwrap_or_default()
        .to_string())
}

/// Argument string handed to the test runner.
///
/// Arguments containing whitespace are wrapped in double quotes so the tool
/// can split the single string back into the same arguments. Extra arguments
/// are already in that single-string form and are appended verbatim, only
/// trimmed at the ends, so their quoting and inner spacing survive.
#[must_use]
pub fn runner_arguments(
    platform: TestPlatform,
    targets: &[String],
    test_case_filter: Option<&str>,
    extra_args: Option<&str>,
) -> String {
    let mut args = vec![format!("/platform:{platform}"), RUNNER_LOGGER.to_string()];
    args.extend(targets.iter().map(|t| quote_argument(t)));

    if let Some(filter) = test_case_filter.filter(|f| !f.trim().is_empty()) {
        args.push(quote_argument(&format!("/testCaseFilter:{filter}")));
    }
    if let Some(extra) = extra_args.map(str::trim).filter(|e| !e.is_empty()) {
        args.push(extra.to_string());
    }

    args.join(" ")
}

/// Quote an argument that contains whitespace
#[must_use]
pub fn quote_argument(arg: &str) -> String {
    if arg.is_empty() {
        "\"\"".to_string()
    } else if arg.chars().any(char::is_whitespace) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Render a path the way the coverage tool expects it on the agent.
///
/// Windows paths are written with forward slashes; other platforms keep the
/// native form.
#[must_use]
pub fn to_agent_path(path: &Path) -> String {
    let rendered = path.display().to_string();
    if cfg!(windows) {
        rendered.replace('\\', "/")
    } else {
        rendered
    }
}
