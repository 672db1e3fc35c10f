use serde::Deserialize;
use std::path::{Path, PathBuf};

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Config file structure
///
/// ```yaml
/// api_keys:
///   - key: "your-secret-key-here"
///     user_id: "john"
///     roles: ["Administrator"]
/// max_items_per_request: 300
/// tombstone_retention_days: 90
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfigFile {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
    #[serde(default)]
    pub max_items_per_request: Option<usize>,
    #[serde(default)]
    pub tombstone_retention_days: Option<i64>,
}

impl ServerConfigFile {
    /// Reads the config file, falling back to an empty config when it is
    /// missing or malformed.
    pub fn load(config_path: &Path) -> Self {
        match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<ServerConfigFile>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                Self::default()
            }
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Directory holding the server database
    pub data_dir: PathBuf,
    /// Path to config file
    pub config_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("REPLISYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("REPLISYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("replisync-server")
            });

        let config_path = std::env::var("REPLISYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("replisync-server")
                    .join("config.yaml")
            });

        Self {
            port,
            data_dir,
            config_path,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("replisync-server.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
api_keys:
  - key: "k1"
    user_id: "john"
    roles: ["Administrator"]
  - key: "k2"
    user_id: "jane"
max_items_per_request: 100
tombstone_retention_days: 30
"#,
        )
        .unwrap();

        let config = ServerConfigFile::load(&path);
        assert_eq!(config.api_keys.len(), 2);
        assert_eq!(config.api_keys[0].roles, vec!["Administrator".to_string()]);
        assert!(config.api_keys[1].roles.is_empty());
        assert_eq!(config.max_items_per_request, Some(100));
        assert_eq!(config.tombstone_retention_days, Some(30));
    }

    #[test]
    fn test_missing_or_invalid_file_is_empty() {
        let temp_dir = tempdir().unwrap();
        let missing = ServerConfigFile::load(&temp_dir.path().join("missing.yaml"));
        assert!(missing.api_keys.is_empty());

        let path = temp_dir.path().join("bad.yaml");
        std::fs::write(&path, "api_keys: [").unwrap();
        let invalid = ServerConfigFile::load(&path);
        assert!(invalid.api_keys.is_empty());
        assert!(invalid.max_items_per_request.is_none());
    }
}
