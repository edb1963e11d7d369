//! Read-only loader for the externally managed department list.

use std::path::Path;

use tracing::{info, warn};

use crate::error::ConfigError;
use crate::pipeline::types::Department;

/// Default department file, relative to the working directory.
pub const DEFAULT_DEPARTMENTS_FILE: &str = "reparti_config.json";

/// Load the department list. A missing file means no departments; a file
/// that exists but does not parse is a configuration error.
pub fn load_departments(path: impl AsRef<Path>) -> Result<Vec<Department>, ConfigError> {
    let path = path.as_ref();
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Department file not found, classifying without departments");
            return Ok(Vec::new());
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    let departments: Vec<Department> = serde_json::from_str(&raw)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
    let departments: Vec<Department> = departments
        .into_iter()
        .filter(|d| !d.name.trim().is_empty())
        .collect();

    info!(path = %path.display(), count = departments.len(), "Loaded departments");
    Ok(departments)
}
