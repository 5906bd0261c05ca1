//! Saved session: which file was playing and where its controls were

use crate::client::{AudioBackend, AudioClient};
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub source: PathBuf,
    /// Input control values in declaration order
    #[serde(default, deserialize_with = "controls_or_zero")]
    pub controls: Vec<f32>,
}

/// JSON has no NaN or infinity; such values are written as `null`
fn controls_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
    let values = Vec::<Option<f32>>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

impl Session {
    /// Snapshot the active module's controls
    ///
    /// Non-finite values become 0, which restoring clamps into range.
    /// Positions are kept.
    pub fn capture<B: AudioBackend>(source: &Path, client: &AudioClient<B>) -> Self {
        let controls = client
            .control_values()
            .into_iter()
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .collect();
        Self {
            source: source.to_path_buf(),
            controls,
        }
    }

    /// Read a session file; `None` if there is none yet
    pub fn load(path: &Path) -> ConfigResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let session = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(session))
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_error)?;
        info!("Saved session to {}", path.display());
        Ok(())
    }
}
