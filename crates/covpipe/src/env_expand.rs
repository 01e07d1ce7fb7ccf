//! Environment variable expansion for settings values.
//!
//! Tool homes and directory settings may reference the environment:
//!
//! - `${VAR}` expands to the value of `VAR` and fails when it is unset
//! - `${VAR:-default}` falls back to `default` when `VAR` is unset or empty
//!
//! A `$` not followed by `{` is kept as is.

use crate::result::{CovpipeError, CovpipeResult};
use std::borrow::Cow;

/// Expand references using the process environment
pub fn expand_env_vars(text: &str) -> CovpipeResult<Cow<'_, str>> {
    expand_with(text, |name| std::env::var(name).ok())
}

/// Expand references using a custom lookup
pub fn expand_with<F>(text: &str, lookup: F) -> CovpipeResult<Cow<'_, str>>
where
    F: Fn(&str) -> Option<String>,
{
    if !text.contains("${") {
        return Ok(Cow::Borrowed(text));
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let end = body.find('}').ok_or_else(|| {
            CovpipeError::config(format!(
                "unclosed environment reference '${{{}'",
                body.chars().take(20).collect::<String>()
            ))
        })?;
        out.push_str(&expand_one(&body[..end], &lookup)?);
        rest = &body[end + 1..];
    }
    out.push_str(rest);

    Ok(Cow::Owned(out))
}

fn expand_one<F>(content: &str, lookup: &F) -> CovpipeResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some((name, default)) = content.split_once(":-") {
        validate_name(name)?;
        return Ok(lookup(name)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string()));
    }

    validate_name(content)?;
    lookup(content).ok_or_else(|| CovpipeError::EnvVar {
        name: content.to_string(),
    })
}

fn validate_name(name: &str) -> CovpipeResult<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => Err(CovpipeError::config("empty environment variable name in ${}")),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => {
            Err(CovpipeError::config(format!(
                "invalid environment variable name '{name}'"
            )))
        }
        Some(_) if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') => {
            Err(CovpipeError::config(format!(
                "invalid environment variable name '{name}'"
            )))
        }
        Some(_) => Ok(()),
    }
}
