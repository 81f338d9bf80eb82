//! Service configuration, persisted as TOML.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! runnable local-mode service; the `protolensd` CLI overrides individual
//! fields on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::RetentionMode;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Storage root for session trees.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Locator resolution strategy.
    #[serde(default)]
    pub export: ExportConfig,
    /// Retention override. `None` means the export strategy's natural
    /// pairing (local → persistent, remote → ephemeral).
    #[serde(default)]
    pub retention: Option<RetentionMode>,
    /// Number of activation artifacts per upload.
    #[serde(default = "default_prototype_count")]
    pub prototype_count: usize,
    /// Concurrent classifier admissions. Backends are not assumed
    /// reentrant, so the default is 1.
    #[serde(default = "default_inference_permits")]
    pub inference_permits: usize,
    /// Minimum shorter-edge length the domain gate accepts, in pixels.
    #[serde(default = "default_gate_min_edge")]
    pub gate_min_edge: u32,
}

/// Export strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExportConfig {
    /// Static-mount path construction; the server also mounts the storage
    /// root under `public_prefix`.
    Local {
        #[serde(default = "default_public_prefix")]
        public_prefix: String,
    },
    /// Upload artifacts to a blob store via HTTP PUT.
    Remote {
        /// Upload endpoint, e.g. `https://store.example.com/bucket`.
        endpoint: String,
        /// Public base the durable URLs are formed under.
        public_base: String,
        /// Optional bearer token.
        #[serde(default)]
        access_token: Option<String>,
    },
}

fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8300
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("requests")
}
fn default_prototype_count() -> usize {
    10
}
fn default_inference_permits() -> usize {
    1
}
fn default_gate_min_edge() -> u32 {
    64
}
fn default_public_prefix() -> String {
    "/static".into()
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig::Local {
            public_prefix: default_public_prefix(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            storage_root: default_storage_root(),
            export: ExportConfig::default(),
            retention: None,
            prototype_count: default_prototype_count(),
            inference_permits: default_inference_permits(),
            gate_min_edge: default_gate_min_edge(),
        }
    }
}

impl ServiceConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.prototype_count == 0 {
            return Err(ConfigError::Invalid {
                message: "prototype_count must be > 0".into(),
            });
        }
        if self.inference_permits == 0 {
            return Err(ConfigError::Invalid {
                message: "inference_permits must be > 0".into(),
            });
        }
        // The server mounts the storage root at this prefix; axum rejects
        // unrooted paths and nesting at the root.
        if let ExportConfig::Local { public_prefix } = &self.export {
            if !public_prefix.starts_with('/') || public_prefix.len() == 1 {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "export.public_prefix must start with '/' and not be the root, got \"{public_prefix}\""
                    ),
                });
            }
        }
        Ok(())
    }

    /// The retention mode this configuration implies for a given export
    /// strategy default.
    pub fn retention_or(&self, strategy_default: RetentionMode) -> RetentionMode {
        self.retention.unwrap_or(strategy_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 8300);
        assert_eq!(config.prototype_count, 10);
        assert_eq!(config.inference_permits, 1);
        assert!(matches!(config.export, ExportConfig::Local { .. }));
        assert!(config.retention.is_none());
    }

    #[test]
    fn config_roundtrip_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("protolens.toml");

        let config = ServiceConfig {
            port: 9000,
            export: ExportConfig::Remote {
                endpoint: "https://store.example.com/bucket".into(),
                public_base: "https://cdn.example.com".into(),
                access_token: Some("secret".into()),
            },
            retention: Some(RetentionMode::Persistent),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = ServiceConfig::load(&path).unwrap();
        assert_eq!(loaded.port, 9000);
        assert_eq!(loaded.retention, Some(RetentionMode::Persistent));
        match loaded.export {
            ExportConfig::Remote { endpoint, .. } => {
                assert_eq!(endpoint, "https://store.example.com/bucket");
            }
            _ => panic!("expected remote export config"),
        }
    }

    #[test]
    fn zero_prototype_count_is_invalid() {
        let config = ServiceConfig {
            prototype_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn unrooted_public_prefix_is_invalid() {
        for bad in ["static", "/"] {
            let config = ServiceConfig {
                export: ExportConfig::Local {
                    public_prefix: bad.into(),
                },
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "expected rejection of public_prefix {bad:?}"
            );
        }

        ServiceConfig::default().validate().unwrap();
    }

    #[test]
    fn retention_override_beats_strategy_default() {
        let config = ServiceConfig {
            retention: Some(RetentionMode::Ephemeral),
            ..Default::default()
        };
        assert_eq!(
            config.retention_or(RetentionMode::Persistent),
            RetentionMode::Ephemeral
        );

        let config = ServiceConfig::default();
        assert_eq!(
            config.retention_or(RetentionMode::Persistent),
            RetentionMode::Persistent
        );
    }
}
