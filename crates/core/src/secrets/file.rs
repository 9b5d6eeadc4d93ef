//! TOML file parameter backend.

use std::collections::HashMap;
use std::path::Path;

use super::{normalize_name, ParameterStore, SecretsError};

/// Parameters loaded once from a TOML file.
///
/// Both `"db/path" = "..."` and nested tables (`[db] path = "..."`) are accepted.
#[derive(Debug)]
pub struct FileParameterStore {
    values: HashMap<String, String>,
}

impl FileParameterStore {
    pub fn load(path: &Path) -> Result<Self, SecretsError> {
        let content = std::fs::read_to_string(path).map_err(|e| SecretsError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|message| SecretsError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;
        let mut values = HashMap::new();
        flatten("", &table, &mut values);
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let name = if prefix.is_empty() {
            normalize_name(key).to_string()
        } else {
            format!("{}/{}", prefix, key)
        };

        match value {
            toml::Value::Table(nested) => flatten(&name, nested, out),
            toml::Value::String(s) => {
                out.insert(name, s.clone());
            }
            other => {
                out.insert(name, other.to_string());
            }
        }
    }
}

impl ParameterStore for FileParameterStore {
    fn get(&self, name: &str) -> Result<Option<String>, SecretsError> {
        Ok(self.values.get(normalize_name(name)).cloned())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
