//! Step Types - the 5 step kinds
//!
//! - `StepSpec`: loosely typed step as submitted by a client (raw)
//! - `Step`: validated step carrying a `StepAction` sum type
//! - `StepAction`: exploit / auxiliary / post / command / delay
//!
//! A `Step` can only be built through [`Step::from_spec`], so a stored step
//! always has exactly the field its type needs.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OpflowError, Result};
use crate::util::MAX_DELAY_SECS;

use super::workflow::Target;

/// Module option map (string → scalar)
pub type StepOptions = BTreeMap<String, Value>;

/// Module paths: `/`-separated segments, e.g. `windows/gather/hashdump`
static MODULE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+(/[A-Za-z0-9_.\-]+)*$").expect("valid regex"));

/// Step type as it appears on the wire (`type: post`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Exploit,
    Auxiliary,
    Post,
    Command,
    Delay,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploit => "exploit",
            Self::Auxiliary => "auxiliary",
            Self::Post => "post",
            Self::Command => "command",
            Self::Delay => "delay",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Module family understood by the target provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Exploit,
    Auxiliary,
    Post,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploit => "exploit",
            Self::Auxiliary => "auxiliary",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The validated action of a step
///
/// Serialized flat alongside the step fields, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    Exploit { module: String },
    Auxiliary { module: String },
    Post { module: String },
    Command { command: String },
    Delay { delay_seconds: u64 },
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Exploit { .. } => StepKind::Exploit,
            Self::Auxiliary { .. } => StepKind::Auxiliary,
            Self::Post { .. } => StepKind::Post,
            Self::Command { .. } => StepKind::Command,
            Self::Delay { .. } => StepKind::Delay,
        }
    }

    /// Module family and path for module-backed actions
    pub fn module(&self) -> Option<(ModuleKind, &str)> {
        match self {
            Self::Exploit { module } => Some((ModuleKind::Exploit, module)),
            Self::Auxiliary { module } => Some((ModuleKind::Auxiliary, module)),
            Self::Post { module } => Some((ModuleKind::Post, module)),
            Self::Command { .. } | Self::Delay { .. } => None,
        }
    }
}

/// A validated workflow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: StepOptions,
    #[serde(default)]
    pub continue_on_fail: bool,
}

/// Step as submitted by a client, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: StepOptions,
    #[serde(default)]
    pub continue_on_fail: bool,
}

impl StepSpec {
    fn bare(kind: StepKind, name: &str) -> Self {
        Self {
            id: None,
            kind,
            name: Some(name.to_string()),
            description: None,
            module: None,
            command: None,
            delay_seconds: None,
            options: StepOptions::new(),
            continue_on_fail: false,
        }
    }

    /// Module-backed step (exploit/auxiliary/post)
    pub fn module(kind: ModuleKind, name: &str, module: &str) -> Self {
        let step_kind = match kind {
            ModuleKind::Exploit => StepKind::Exploit,
            ModuleKind::Auxiliary => StepKind::Auxiliary,
            ModuleKind::Post => StepKind::Post,
        };
        Self {
            module: Some(module.to_string()),
            ..Self::bare(step_kind, name)
        }
    }

    pub fn command(name: &str, command: &str) -> Self {
        Self {
            command: Some(command.to_string()),
            ..Self::bare(StepKind::Command, name)
        }
    }

    pub fn delay(name: &str, seconds: u64) -> Self {
        Self {
            delay_seconds: Some(seconds),
            ..Self::bare(StepKind::Delay, name)
        }
    }

    pub fn continue_on_fail(mut self) -> Self {
        self.continue_on_fail = true;
        self
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }
}

impl Step {
    /// Validate a raw step (index is 0-based, used for messages and default names)
    pub fn from_spec(index: usize, spec: StepSpec) -> Result<Self> {
        let name = spec
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Step {}", index + 1));

        let invalid = |reason: String| OpflowError::InvalidStep {
            index,
            name: name.clone(),
            reason,
        };

        let action = match spec.kind {
            StepKind::Exploit | StepKind::Auxiliary | StepKind::Post => {
                reject_field(spec.command.is_some(), spec.kind, "command").map_err(&invalid)?;
                reject_field(spec.delay_seconds.is_some(), spec.kind, "delay_seconds")
                    .map_err(&invalid)?;
                let raw = spec
                    .module
                    .as_deref()
                    .ok_or_else(|| invalid(format!("{} step requires 'module'", spec.kind)))?;
                let module = normalize_module(spec.kind, raw).map_err(&invalid)?;
                match spec.kind {
                    StepKind::Exploit => StepAction::Exploit { module },
                    StepKind::Auxiliary => StepAction::Auxiliary { module },
                    _ => StepAction::Post { module },
                }
            }
            StepKind::Command => {
                reject_field(spec.module.is_some(), spec.kind, "module").map_err(&invalid)?;
                reject_field(spec.delay_seconds.is_some(), spec.kind, "delay_seconds")
                    .map_err(&invalid)?;
                let command = spec
                    .command
                    .as_deref()
                    .map(str::trim)
                    .ok_or_else(|| invalid("command step requires 'command'".to_string()))?;
                if command.is_empty() {
                    return Err(invalid("command must not be blank".to_string()));
                }
                StepAction::Command {
                    command: command.to_string(),
                }
            }
            StepKind::Delay => {
                reject_field(spec.module.is_some(), spec.kind, "module").map_err(&invalid)?;
                reject_field(spec.command.is_some(), spec.kind, "command").map_err(&invalid)?;
                let delay_seconds = spec
                    .delay_seconds
                    .ok_or_else(|| invalid("delay step requires 'delay_seconds'".to_string()))?;
                if delay_seconds > MAX_DELAY_SECS {
                    return Err(invalid(format!(
                        "delay_seconds {} exceeds maximum of {}",
                        delay_seconds, MAX_DELAY_SECS
                    )));
                }
                StepAction::Delay { delay_seconds }
            }
        };

        validate_options(&spec.options).map_err(&invalid)?;

        let id = spec
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            id,
            name,
            description: spec.description,
            action,
            options: spec.options,
            continue_on_fail: spec.continue_on_fail,
        })
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    /// Options sent to the provider for a module step
    ///
    /// Later sources win: configured per-type defaults, target-derived
    /// defaults (`RHOSTS` / `SESSION`), then the step's own options.
    pub fn merged_options(&self, type_defaults: &StepOptions, target: &Target) -> StepOptions {
        let mut merged = type_defaults.clone();
        match self.action.module() {
            Some((ModuleKind::Exploit | ModuleKind::Auxiliary, _)) => {
                if let Some(host) = &target.host {
                    merged.insert("RHOSTS".to_string(), Value::String(host.clone()));
                }
            }
            Some((ModuleKind::Post, _)) => {
                if let Some(session) = target.session {
                    merged.insert("SESSION".to_string(), Value::String(session.to_string()));
                }
            }
            None => {}
        }
        merged.extend(self.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// Validate a list of raw steps, assigning fresh ids where missing
pub fn validate_steps(specs: Vec<StepSpec>) -> Result<Vec<Step>> {
    let steps = specs
        .into_iter()
        .enumerate()
        .map(|(index, spec)| Step::from_spec(index, spec))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = std::collections::HashSet::new();
    for step in &steps {
        if !seen.insert(step.id.as_str()) {
            return Err(OpflowError::Validation {
                reason: format!("duplicate step id '{}'", step.id),
            });
        }
    }
    Ok(steps)
}

fn reject_field(present: bool, kind: StepKind, field: &str) -> std::result::Result<(), String> {
    if present {
        Err(format!("'{}' is not allowed on a {} step", field, kind))
    } else {
        Ok(())
    }
}

/// Trim, drop a redundant `<type>/` prefix, check the path shape
fn normalize_module(kind: StepKind, raw: &str) -> std::result::Result<String, String> {
    let trimmed = raw.trim().trim_matches('/');
    let prefix = format!("{}/", kind.as_str());
    let module = trimmed.strip_prefix(&prefix).unwrap_or(trimmed);
    if module.is_empty() {
        return Err("module must not be blank".to_string());
    }
    if !MODULE_PATH.is_match(module) || module.split('/').any(|s| s == "." || s == "..") {
        return Err(format!("invalid module path '{}'", module));
    }
    Ok(module.to_string())
}

fn validate_options(options: &StepOptions) -> std::result::Result<(), String> {
    for (key, value) in options {
        if key.trim().is_empty() {
            return Err("option names must not be blank".to_string());
        }
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {}
            other => {
                return Err(format!(
                    "option '{}' must be a string, number or boolean (got {})",
                    key,
                    value_type(other)
                ))
            }
        }
    }
    Ok(())
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
