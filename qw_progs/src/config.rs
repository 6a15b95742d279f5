use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ProgsError;
use crate::lua_host::SpawnFilter;

/// Server settings. Every field has a default so a config file only needs
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub max_edicts: usize,
    pub deathmatch: bool,
    pub skill: i32,
    pub game_dir: PathBuf,
    /// Progs source, relative to `game_dir`.
    pub progs: PathBuf,
    /// Seconds simulated per frame.
    pub frame_time: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_clients: 32,
            max_edicts: 768,
            deathmatch: false,
            skill: 0,
            game_dir: PathBuf::from("."),
            progs: PathBuf::from("qwprogs.lua"),
            frame_time: 0.1,
        }
    }
}

impl ServerConfig {
    /// Reads a JSON config, or returns the defaults when no path is given.
    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(ServerConfig::default());
        };
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ServerConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProgsError> {
        if self.max_edicts <= self.max_clients + 1 {
            return Err(ProgsError::Config(format!(
                "max_edicts ({}) must exceed max_clients + 1 ({})",
                self.max_edicts,
                self.max_clients + 1
            )));
        }
        if self.frame_time.is_nan() || self.frame_time <= 0.0 {
            return Err(ProgsError::Config(format!(
                "frame_time must be positive, got {}",
                self.frame_time
            )));
        }
        Ok(())
    }

    pub fn progs_path(&self) -> PathBuf {
        self.game_dir.join(&self.progs)
    }

    pub fn spawn_filter(&self) -> SpawnFilter {
        SpawnFilter {
            deathmatch: self.deathmatch,
            skill: self.skill,
        }
    }
}
