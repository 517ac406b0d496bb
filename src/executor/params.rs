// Bastion — Tool Parameter Validation and Path Sandboxing
//
// Every tool declares the parameter names it recognizes; anything else is
// rejected before execution starts (fail closed), with the full list of
// violations rather than the first one. Path-valued parameters must
// resolve under a configured sandbox root; the check is purely lexical so
// a hostile path is rejected before any filesystem access.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use super::ExecutorError;

/// What one tool accepts. The allow-lists are genuinely per-tool; adding
/// a tool means adding a row here.
pub struct ToolSpec {
    pub name: &'static str,
    pub allowed_params: &'static [&'static str],
    pub required_params: &'static [&'static str],
    /// Subset of allowed_params whose values are sandboxed paths.
    pub path_params: &'static [&'static str],
}

pub const TOOL_SPECS: &[ToolSpec] = &[
    ToolSpec {
        name: "scan_secrets",
        allowed_params: &["path", "max_depth", "max_file_kb"],
        required_params: &["path"],
        path_params: &["path"],
    },
    ToolSpec {
        name: "scan_vulnerabilities",
        allowed_params: &["path", "max_depth", "max_file_kb"],
        required_params: &["path"],
        path_params: &["path"],
    },
    ToolSpec {
        name: "external_scan",
        allowed_params: &["path", "args"],
        required_params: &["path"],
        path_params: &["path"],
    },
];

pub fn tool_spec(name: &str) -> Option<&'static ToolSpec> {
    TOOL_SPECS.iter().find(|spec| spec.name == name)
}

/// One rejected parameter and why.
#[derive(Debug)]
pub struct ParamViolation {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for ParamViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Check a parameter object against a tool's allow-list. Returns every
/// violation found, not just the first.
pub fn validate_params(spec: &ToolSpec, params: &Value) -> Result<(), Vec<ParamViolation>> {
    let mut violations = Vec::new();

    let object = match params {
        Value::Null => {
            for required in spec.required_params {
                violations.push(ParamViolation {
                    name: (*required).to_string(),
                    reason: "required parameter is missing".to_string(),
                });
            }
            return if violations.is_empty() {
                Ok(())
            } else {
                Err(violations)
            };
        }
        Value::Object(object) => object,
        _ => {
            return Err(vec![ParamViolation {
                name: "parameters".to_string(),
                reason: "must be a JSON object".to_string(),
            }]);
        }
    };

    for key in object.keys() {
        if !spec.allowed_params.contains(&key.as_str()) {
            violations.push(ParamViolation {
                name: key.clone(),
                reason: "not a recognized parameter for this tool".to_string(),
            });
        }
    }

    for required in spec.required_params {
        if !object.contains_key(*required) {
            violations.push(ParamViolation {
                name: (*required).to_string(),
                reason: "required parameter is missing".to_string(),
            });
        }
    }

    for path_param in spec.path_params {
        if let Some(value) = object.get(*path_param) {
            if !value.is_string() {
                violations.push(ParamViolation {
                    name: (*path_param).to_string(),
                    reason: "path parameter must be a string".to_string(),
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Validate a path parameter against the sandbox roots. Purely lexical:
/// rejects relative paths and any `..` component, then requires the
/// normalized path to sit under one of the allowed roots. Never touches
/// the filesystem.
pub fn validate_path(raw: &str, allowed: &[PathBuf]) -> Result<PathBuf, ExecutorError> {
    let candidate = Path::new(raw);

    if !candidate.is_absolute() {
        return Err(ExecutorError::PathNotAllowed(raw.to_string()));
    }

    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                return Err(ExecutorError::PathNotAllowed(raw.to_string()));
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    if allowed.iter().any(|root| normalized.starts_with(root)) {
        Ok(normalized)
    } else {
        Err(ExecutorError::PathNotAllowed(raw.to_string()))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
