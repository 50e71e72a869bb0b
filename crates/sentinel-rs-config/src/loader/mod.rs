//! Layered config discovery and loading.
//!
//! Layers are read low to high precedence (system, user, project, cwd,
//! runtime), schema-checked individually, deep-merged, then decoded and
//! validated as one effective `SentinelConfig`.

mod io;
mod merge;
mod schema;


use crate::{ConfigError, SentinelConfig};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Config filename looked up in every local layer.
const CONFIG_FILE: &str = "sentinel.json5";
/// Per-user and per-project config directory.
const CONFIG_DIR: &str = ".sentinel";
/// Markers identifying a project root.
const PROJECT_ROOT_MARKERS: &[&str] = &[".git", CONFIG_DIR];

#[cfg(unix)]
const SYSTEM_CONFIG_PATH: &str = "/etc/sentinel/sentinel.json5";
#[cfg(windows)]
const SYSTEM_CONFIG_PATH: &str = "C:\\ProgramData\\sentinel\\sentinel.json5";

/// Effective config plus the layers it was assembled from.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub config: SentinelConfig,
    pub layers: Vec<ConfigLayer>,
}

/// Where a config layer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    System,
    User,
    /// `<project root>/.sentinel/sentinel.json5`.
    Project,
    /// `<cwd>/sentinel.json5`.
    Cwd,
    /// Explicit override paths, applied last.
    Runtime,
}

impl ConfigLayerSource {
    pub fn label(&self) -> &'static str {
        match self {
            ConfigLayerSource::System => "system",
            ConfigLayerSource::User => "user",
            ConfigLayerSource::Project => "project",
            ConfigLayerSource::Cwd => "cwd",
            ConfigLayerSource::Runtime => "runtime",
        }
    }
}

/// A config layer that contributed to the effective config.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub source: ConfigLayerSource,
    pub path: PathBuf,
}

/// Layer locations used by [`SentinelConfig::load_layered_with_options`].
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    pub cwd: PathBuf,
    pub system_config_path: Option<PathBuf>,
    pub user_config_path: Option<PathBuf>,
    pub runtime_paths: Vec<PathBuf>,
    pub project_root_markers: Vec<String>,
}

impl LayeredConfigOptions {
    /// Default layer locations for the given working directory.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: io::default_system_config_path(),
            user_config_path: io::default_user_config_path(),
            runtime_paths: Vec::new(),
            project_root_markers: PROJECT_ROOT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }

    /// Skip the system and user layers.
    pub fn local_only(mut self) -> Self {
        self.system_config_path = None;
        self.user_config_path = None;
        self
    }

    /// Add an override path applied after all discovered layers.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl SentinelConfig {
    /// Load a single config file without layering.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    /// Load a config from JSON5 text.
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from string (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load the layered config stack with default locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load the layered config stack. Missing discovered layers are skipped;
    /// missing runtime paths are an error.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = normalize_path(&options.cwd)?;
        let mut candidates: Vec<(ConfigLayerSource, PathBuf)> = Vec::new();
        if let Some(path) = options.system_config_path {
            candidates.push((ConfigLayerSource::System, path));
        }
        if let Some(path) = options.user_config_path {
            candidates.push((ConfigLayerSource::User, path));
        }
        match find_project_root(&cwd, &options.project_root_markers) {
            Some(root) => {
                debug!("project root: {}", root.display());
                candidates.push((ConfigLayerSource::Project, root.join(CONFIG_DIR).join(CONFIG_FILE)));
            }
            None => debug!("no project root above {}", cwd.display()),
        }
        candidates.push((ConfigLayerSource::Cwd, cwd.join(CONFIG_FILE)));

        let mut seen = HashSet::new();
        let mut loaded = Vec::new();
        for (source, path) in candidates {
            if !path.exists() {
                debug!("skipping missing {} layer ({})", source.label(), path.display());
                continue;
            }
            if !seen.insert(unique_path(&path)) {
                debug!("skipping duplicate {} layer ({})", source.label(), path.display());
                continue;
            }
            loaded.push(io::read_layer(source, &path)?);
        }
        for path in &options.runtime_paths {
            loaded.push(io::read_layer(ConfigLayerSource::Runtime, path)?);
        }

        let mut merged = Value::Object(serde_json::Map::new());
        let mut layers = Vec::with_capacity(loaded.len());
        for layer in loaded {
            merge::merge_values(&mut merged, &layer.value);
            layers.push(layer.meta);
        }
        let config = config_from_value(merged, "effective")?;
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }
}

struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn config_from_value(value: Value, label: &str) -> Result<SentinelConfig, ConfigError> {
    schema::validate_schema(&value, label)?;
    let config: SentinelConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}

fn normalize_path(path: &Path) -> Result<PathBuf, ConfigError> {
    match path.canonicalize() {
        Ok(path) => Ok(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(err) => Err(ConfigError::ReadFailed(err)),
    }
}

fn unique_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn find_project_root(cwd: &Path, markers: &[String]) -> Option<PathBuf> {
    cwd.ancestors()
        .find(|dir| markers.iter().any(|marker| dir.join(marker).exists()))
        .map(Path::to_path_buf)
}
