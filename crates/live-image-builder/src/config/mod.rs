use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

pub mod profiles;
pub mod value;

pub use profiles::ProfileStore;
pub use value::{ConfigValue, Map};

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: ConfigValue,
}

impl ConfigDoc {
    pub fn new(path: impl Into<PathBuf>, value: ConfigValue) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.value.get(key)
    }

    /// A string field; empty strings count as unset.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(ConfigValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn value_path(&self, path: &str) -> Option<&ConfigValue> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            cur = cur.as_map()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn table_path(&self, path: &str) -> Option<&Map> {
        self.value_path(path)?.as_map()
    }

    /// Deserialize the value at `path` into `T`; `None` when the path is absent.
    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path).and_then(ConfigValue::to_toml) else {
            return Ok(None);
        };
        let parsed = v.try_into().map_err(|e| {
            Error::parse(format!("failed to deserialize config at '{}': {e}", path))
        })?;
        Ok(Some(parsed))
    }

    /// A list of strings; a bare string is read as a one-element list.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        string_list_value(key, self.get(key))
    }
}

pub fn string_list_value(key: &str, value: Option<&ConfigValue>) -> Result<Vec<String>> {
    match value {
        None | Some(ConfigValue::Null) => Ok(Vec::new()),
        Some(ConfigValue::String(s)) => Ok(vec![s.clone()]),
        Some(ConfigValue::List(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(ToOwned::to_owned).ok_or_else(|| {
                    Error::validation(format!(
                        "'{}' entries must be strings, got {}",
                        key,
                        v.type_str()
                    ))
                })
            })
            .collect(),
        Some(other) => Err(Error::validation(format!(
            "'{}' must be a string or a list of strings, got {}",
            key,
            other.type_str()
        ))),
    }
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            return Err(Error::not_found(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        Err(e) => {
            return Err(Error::msg(format!(
                "failed to read config {}: {e}",
                path.display()
            )));
        }
    };
    let tbl: toml::Table = toml::from_str(&data)
        .map_err(|e| Error::parse(format!("TOML parse error in {}: {e}", path.display())))?;
    Ok(ConfigDoc::new(path, ConfigValue::from(tbl)))
}
