//! Tool installations and location
//!
//! The pipeline drives two executables: the coverage tool itself and the test
//! runner it wraps. Both are opaque paths to the engine. [`ToolLocator`]
//! resolves each one, first match wins:
//!
//! 1. an explicit override (command line flag)
//! 2. the tool's environment variable
//! 3. the named installation from the global settings
//! 4. the built-in default binary name, left to `PATH` lookup

use crate::env_expand::expand_with;
use crate::result::{CovpipeError, CovpipeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the installation used when none is requested
pub const DEFAULT_INSTALLATION_NAME: &str = "Default";

/// The two executables a run needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Coverage tool issuing Cover/Merge/Report
    CoverageTool,
    /// Test runner launched under coverage
    TestRunner,
}

impl ToolKind {
    /// Binary name used when nothing else is configured
    #[must_use]
    pub const fn default_home(self) -> &'static str {
        match self {
            Self::CoverageTool => "dotcover.exe",
            Self::TestRunner => "vstest.console.exe",
        }
    }

    /// Environment variable overriding the installation
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::CoverageTool => "COVPIPE_COVERAGE_TOOL",
            Self::TestRunner => "COVPIPE_TEST_RUNNER",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoverageTool => f.write_str("coverage tool"),
            Self::TestRunner => f.write_str("test runner"),
        }
    }
}

/// A named installation of one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInstallation {
    /// Installation name
    pub name: String,
    /// Executable path, may reference `${VAR}`
    pub home: String,
}

impl ToolInstallation {
    /// Create an installation
    #[must_use]
    pub fn new(name: impl Into<String>, home: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
        }
    }

    /// The `Default` installation of a tool
    #[must_use]
    pub fn default_for(kind: ToolKind) -> Self {
        Self::new(DEFAULT_INSTALLATION_NAME, kind.default_home())
    }
}

/// Resolved executables for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolPaths {
    /// Coverage tool executable
    pub coverage_tool: String,
    /// Test runner executable
    pub test_runner: String,
}

/// Resolves tool paths from overrides, environment and settings
pub struct ToolLocator<'a> {
    coverage_tools: &'a [ToolInstallation],
    test_runners: &'a [ToolInstallation],
    env: Box<dyn Fn(&str) -> Option<String> + 'a>,
}

impl fmt::Debug for ToolLocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolLocator")
            .field("coverage_tools", &self.coverage_tools)
            .field("test_runners", &self.test_runners)
            .finish_non_exhaustive()
    }
}

impl<'a> ToolLocator<'a> {
    /// Locator over configured installations, reading the process environment
    #[must_use]
    pub fn new(coverage_tools: &'a [ToolInstallation], test_runners: &'a [ToolInstallation]) -> Self {
        Self {
            coverage_tools,
            test_runners,
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup
    #[must_use]
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + 'a) -> Self {
        self.env = Box::new(env);
        self
    }

    /// Resolve one tool
    pub fn resolve(
        &self,
        kind: ToolKind,
        override_path: Option<&str>,
        installation: Option<&str>,
    ) -> CovpipeResult<String> {
        if let Some(path) = override_path.filter(|p| !p.trim().is_empty()) {
            return self.expand(path);
        }
        if let Some(path) = (self.env)(kind.env_var()).filter(|p| !p.trim().is_empty()) {
            return Ok(path);
        }

        let name = installation.unwrap_or(DEFAULT_INSTALLATION_NAME);
        let installations = match kind {
            ToolKind::CoverageTool => self.coverage_tools,
            ToolKind::TestRunner => self.test_runners,
        };
        match installations.iter().find(|i| i.name == name) {
            Some(found) => self.expand(&found.home),
            None if installation.is_some() && name != DEFAULT_INSTALLATION_NAME => {
                Err(CovpipeError::config(format!(
                    "no {kind} installation named '{name}'"
                )))
            }
            None => Ok(kind.default_home().to_string()),
        }
    }

    /// Resolve both tools
    pub fn resolve_all(
        &self,
        coverage_override: Option<&str>,
        runner_override: Option<&str>,
        installation: Option<&str>,
    ) -> CovpipeResult<ToolPaths> {
        Ok(ToolPaths {
            coverage_tool: self.resolve(ToolKind::CoverageTool, coverage_override, installation)?,
            test_runner: self.resolve(ToolKind::TestRunner, runner_override, installation)?,
        })
    }

    fn expand(&self, home: &str) -> CovpipeResult<String> {
        Ok(expand_with(home, |name| (self.env)(name))?.into_owned())
    }
}
