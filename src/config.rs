//! The TOML configuration file: search filters at the top level, service settings below
//! `[settings]`.
use crate::auth::Credentials;
use crate::error::{AuthError, ConfigError};
use crate::pipeline::DEFAULT_CONCURRENCY;
use crate::query::Filters;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const TEMPLATE: &str = r#"# Search filters. Keys follow the catalogue's query parameter names.
collection = "Sentinel2"
productType = "S2MSI2A"
cloudCover = [0.0, 5.0]
startDate = "2024-05-01T00:00:00Z"
completionDate = "2024-05-31T23:59:59Z"

# At most one spatial filter: lon/lat (with optional radius in metres), geometry (WKT) or box.
lon = 21.01
lat = 52.22
# geometry = "POLYGON((20.9 52.1,21.2 52.1,21.2 52.3,20.9 52.3,20.9 52.1))"
# box = [20.9, 52.1, 21.2, 52.3]

maxRecords = 20
sortParam = "startDate"
sortOrder = "descending"

# Falls back to the DS_USER and DS_PASS environment variables when unset.
# username = ""
# password = ""

[settings]
transfer_concurrency = 16
log_level = "info"
"#;

#[derive(Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub filters: Filters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub settings: Settings,
}

impl Config {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        write_file(path.as_ref(), &content)
    }

    pub fn template() -> &'static str {
        TEMPLATE
    }

    /// Writes the commented starting configuration.
    pub fn write_template<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        write_file(path.as_ref(), TEMPLATE)
    }

    pub fn credentials(&self) -> Result<Credentials, AuthError> {
        Credentials::from_env(self.username.as_deref(), self.password.as_deref())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("filters", &self.filters)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("settings", &self.settings)
            .finish()
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), ConfigError> {
    fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub catalog_url: String,
    pub token_url: String,
    pub odata_url: String,
    pub client_id: String,
    pub s3_endpoint: String,
    pub s3_profile: String,
    pub rclone_remote: String,
    pub rclone_binary: String,
    pub transfer_concurrency: usize,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_url: "https://catalogue.dataspace.copernicus.eu/resto/api".to_string(),
            token_url: "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token".to_string(),
            odata_url: "https://zipper.dataspace.copernicus.eu/odata/v1".to_string(),
            client_id: "cdse-public".to_string(),
            s3_endpoint: "https://eodata.dataspace.copernicus.eu".to_string(),
            s3_profile: "copernicus".to_string(),
            rclone_remote: "eodata:".to_string(),
            rclone_binary: "rclone".to_string(),
            transfer_concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: 500,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn catalog_url(&self) -> Result<Url, ConfigError> {
        parse_url("catalog_url", &self.catalog_url)
    }

    pub fn token_url(&self) -> Result<Url, ConfigError> {
        parse_url("token_url", &self.token_url)
    }

    pub fn odata_url(&self) -> Result<Url, ConfigError> {
        parse_url("odata_url", &self.odata_url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
        )
    }

    pub fn concurrency(&self) -> Result<usize, ConfigError> {
        if self.transfer_concurrency == 0 {
            return Err(ConfigError::Setting {
                key: "transfer_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(self.transfer_concurrency)
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Setting {
        key,
        reason: format!("{value}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;

    const TEST_OUTPUT_PATH: &str = "/tmp/dataspace_config.toml";

    const CONFIG: &str = r#"
collection = "Sentinel2"
productType = "S2MSI2A"
cloudCover = [0.0, 10.0]
startDate = "2023-06-01T00:00:00Z"
box = [20.9, 52.1, 21.2, 52.3]
maxRecords = 50
username = "someone@example.com"
somethingElse = "ignored"

[settings]
transfer_concurrency = 4
catalog_url = "http://localhost:8080/resto/api"
"#;

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        assert_eq!(config.filters.collection.as_deref(), Some("Sentinel2"));
        assert_eq!(config.filters.cloud_cover, Some([0.0, 10.0]));
        assert_eq!(config.filters.bbox, Some([20.9, 52.1, 21.2, 52.3]));
        assert_eq!(config.filters.max_records, Some(50));
        assert_eq!(config.username.as_deref(), Some("someone@example.com"));
        assert_eq!(config.password, None);
        assert_eq!(config.settings.transfer_concurrency, 4);
        assert_eq!(
            config.settings.catalog_url().unwrap().as_str(),
            "http://localhost:8080/resto/api"
        );
        // Unset settings keep their defaults.
        assert_eq!(config.settings.client_id, "cdse-public");
        assert_eq!(config.settings.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_settings_table_is_optional() {
        let config: Config = toml::from_str("collection = \"Sentinel1\"").unwrap();
        assert_eq!(config.settings, Settings::default());
    }

    #[test]
    fn test_template_builds_a_query() {
        let config: Config = toml::from_str(Config::template()).unwrap();
        let built = QueryBuilder::build(&config.filters).unwrap();
        assert!(built.warnings.is_empty());
        assert_eq!(config.settings.concurrency().unwrap(), 16);
    }

    #[test]
    fn test_write_and_read() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        config.write(TEST_OUTPUT_PATH).unwrap();
        let read = Config::read(TEST_OUTPUT_PATH).unwrap();
        assert_eq!(read, config);
    }

    #[test]
    fn test_read_missing_file() {
        assert!(matches!(
            Config::read("/tmp/does/not/exist.toml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "collection = ").unwrap();
        assert!(matches!(Config::read(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_settings() {
        let settings = Settings {
            token_url: "not a url".to_string(),
            transfer_concurrency: 0,
            ..Settings::default()
        };
        assert!(matches!(
            settings.token_url(),
            Err(ConfigError::Setting { key: "token_url", .. })
        ));
        assert!(matches!(
            settings.concurrency(),
            Err(ConfigError::Setting {
                key: "transfer_concurrency",
                ..
            })
        ));
    }

    #[test]
    fn test_debug_output_redacts_password() {
        let config = Config {
            username: Some("someone@example.com".to_string()),
            password: Some("hunter2-secret".to_string()),
            ..Config::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2-secret"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("someone@example.com"));
    }

    #[test]
    fn test_retry_policy() {
        let settings = Settings {
            max_attempts: 0,
            initial_backoff_ms: 100,
            ..Settings::default()
        };
        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
    }
}
