use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{self, ConfigDoc};
use crate::error::{Error, ErrorKind, Result};

/// Environment variable that relocates the flavor directory.
pub const FLAVORS_DIR_ENV: &str = "BUILD_FLAVORS_DIR";

const PROFILE_EXT: &str = "toml";

/// Read-only view of the on-disk profile documents.
///
/// Layout under `data_dir`:
/// `defaults.toml`, `build-types/<name>.toml`, `architectures/<name>.toml`,
/// `build-flavors/<name>.toml` and the `versions` branch map.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    pub data_dir: PathBuf,
    pub flavors_dir: PathBuf,
}

impl ProfileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let flavors_dir = data_dir.join("build-flavors");
        Self {
            data_dir,
            flavors_dir,
        }
    }

    /// Like [`ProfileStore::new`], honouring `BUILD_FLAVORS_DIR`.
    pub fn from_env(data_dir: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(data_dir);
        if let Some(dir) = std::env::var(FLAVORS_DIR_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            store.flavors_dir = PathBuf::from(dir);
        }
        store
    }

    pub fn defaults_path(&self) -> PathBuf {
        self.data_dir.join("defaults.toml")
    }

    pub fn version_map_path(&self) -> PathBuf {
        self.data_dir.join("versions")
    }

    pub fn load_defaults(&self) -> Result<ConfigDoc> {
        config::load(&self.defaults_path())
    }

    pub fn load_build_type(&self, name: &str) -> Result<ConfigDoc> {
        self.load_named("build type", &self.data_dir.join("build-types"), name)
    }

    pub fn load_architecture(&self, name: &str) -> Result<ConfigDoc> {
        self.load_named("architecture", &self.data_dir.join("architectures"), name)
    }

    pub fn load_flavor(&self, name: &str) -> Result<ConfigDoc> {
        match self.load_named("flavor", &self.flavors_dir, name) {
            Err(e) if e.kind() == ErrorKind::ConfigNotFound => {
                let known = self.flavor_names().unwrap_or_default();
                Err(Error::not_found(format!(
                    "{e} (available flavors: {})",
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                )))
            }
            other => other,
        }
    }

    /// Flavor names (file stems of `*.toml` in the flavor directory), sorted.
    pub fn flavor_names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.flavors_dir).map_err(|e| {
            Error::not_found(format!(
                "failed to list flavors in {}: {e}",
                self.flavors_dir.display()
            ))
        })?;
        let mut out = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some(PROFILE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push(stem.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    fn load_named(&self, what: &str, dir: &Path, name: &str) -> Result<ConfigDoc> {
        let name = name.trim();
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(Error::validation(format!("invalid {what} name '{name}'")));
        }
        let path = dir.join(format!("{name}.{PROFILE_EXT}"));
        config::load(&path).map_err(|e| match e.kind() {
            ErrorKind::ConfigNotFound => {
                Error::not_found(format!("{what} '{name}' not found ({})", path.display()))
            }
            _ => e,
        })
    }
}
