//! Sub-agent configuration registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::SubAgentConfig;
use crate::error::{Classify, ErrorKind};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid agent config {path:?}: {message}")]
    Invalid { path: PathBuf, message: String },
}

impl Classify for RegistryError {
    fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Io { .. } => ErrorKind::Io,
            RegistryError::Invalid { .. } => ErrorKind::InvalidInput,
        }
    }

    fn remediation(&self) -> Option<&'static str> {
        match self {
            RegistryError::Io { .. } => Some("check the agent config directory is readable"),
            RegistryError::Invalid { .. } => {
                Some("fix the named config file; each needs a name and a positive context_limit_bytes")
            }
        }
    }
}

/// Read-only index of agent configurations, loaded once at startup.
#[derive(Debug)]
pub struct SubAgentRegistry {
    configs: HashMap<String, SubAgentConfig>,
}

impl SubAgentRegistry {
    /// Build a registry from in-memory configs. A duplicated name keeps the
    /// last config and logs the collision.
    pub fn from_configs(configs: Vec<SubAgentConfig>) -> Self {
        let mut map = HashMap::new();
        for config in configs {
            if map.contains_key(&config.name) {
                tracing::warn!("Duplicate agent config for {}, keeping the last", config.name);
            }
            map.insert(config.name.clone(), config);
        }
        Self { configs: map }
    }

    /// Load every `*.json` file beneath `dir` as one agent configuration.
    /// A missing directory yields an empty registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self, RegistryError> {
        if !dir.exists() {
            tracing::warn!("Agent config directory {:?} does not exist", dir);
            return Ok(Self {
                configs: HashMap::new(),
            });
        }

        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| RegistryError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        entries.sort();

        let mut configs = Vec::new();
        for path in entries {
            let raw = std::fs::read_to_string(&path).map_err(|e| RegistryError::Io {
                path: path.clone(),
                source: e,
            })?;
            let config: SubAgentConfig =
                serde_json::from_str(&raw).map_err(|e| RegistryError::Invalid {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            if config.name.trim().is_empty() {
                return Err(RegistryError::Invalid {
                    path,
                    message: "agent name must not be blank".to_string(),
                });
            }
            if config.context_limit_bytes == 0 {
                return Err(RegistryError::Invalid {
                    path,
                    message: "context_limit_bytes must be positive".to_string(),
                });
            }
            configs.push(config);
        }

        tracing::info!("Loaded {} agent configs from {:?}", configs.len(), dir);
        Ok(Self::from_configs(configs))
    }

    pub fn get(&self, name: &str) -> Option<&SubAgentConfig> {
        self.configs.get(name)
    }

    /// All configs, sorted by name for deterministic scoring order.
    pub fn list(&self) -> Vec<&SubAgentConfig> {
        let mut list: Vec<&SubAgentConfig> = self.configs.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
