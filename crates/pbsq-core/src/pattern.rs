use crate::constants::keys;
use crate::errors::ConfigError;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

/// A `submit_cmd_output` pattern such as `Job <{job_id}> submitted`,
/// compiled to an anchored regex with one named group per placeholder.
#[derive(Debug, Clone)]
pub struct OutputPattern {
    source: String,
    regex: Regex,
    names: Vec<String>,
}

impl OutputPattern {
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        if !pattern.contains("{job_id}") {
            return Err(ConfigError::MissingJobIdPattern(pattern.to_string()));
        }

        let invalid = |reason: String| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let mut expr = String::from("^");
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        let mut rest = pattern.trim();

        while let Some(start) = rest.find('{') {
            expr.push_str(&regex::escape(&rest[..start]));
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or_else(|| invalid("unclosed '{'".into()))?;
            let name = &after[..end];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid(format!("invalid capture name '{}'", name)));
            }
            if !seen.insert(name.to_string()) {
                return Err(invalid(format!("capture '{}' appears more than once", name)));
            }
            expr.push_str(&format!("(?P<{}>.+?)", name));
            names.push(name.to_string());
            rest = &after[end + 1..];
        }
        expr.push_str(&regex::escape(rest));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            names,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the captures of the single matching line, or `None` when zero
    /// or several lines match or the job id capture is empty.
    pub fn extract(&self, output: &str) -> Option<BTreeMap<String, String>> {
        let mut matches = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| self.regex.captures(line));

        let caps = matches.next()?;
        if matches.next().is_some() {
            tracing::debug!(
                "Output matched pattern '{}' on more than one line",
                self.source
            );
            return None;
        }

        let fields: BTreeMap<String, String> = self
            .names
            .iter()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.clone(), m.as_str().trim().to_string()))
            })
            .collect();

        match fields.get(keys::JOB_ID) {
            Some(id) if !id.is_empty() => Some(fields),
            _ => None,
        }
    }
}
