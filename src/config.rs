//! Configuration management
//!
//! Connections are declared in YAML and/or environment variables with the
//! `SALESFORCE_` prefix and `__` as the nesting separator, e.g.
//! `SALESFORCE_CONNECTIONS__SANDBOX__CLIENT_ID`.

use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default Salesforce token endpoint
const DEFAULT_TOKEN_URI: &str = "https://test.salesforce.com/services/oauth2/token";

/// Default Apex REST endpoint
const DEFAULT_APEX_URI: &str = "https://test.salesforce.com/services/apexrest";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Name of the running environment (e.g. `production`, `staging`).
    /// Consulted by [`crate::ApexGateway::when_environment`].
    pub environment: String,
    /// Enable verbose transport diagnostics for certificate connections
    pub debug: bool,
    /// The connection used when no explicit or environment selection applies
    #[serde(rename = "default")]
    pub default_connection: String,
    /// Named connection configurations
    pub connections: HashMap<String, ConnectionConfig>,
    /// Directory holding client certificate files referenced by connections
    pub certificates_dir: PathBuf,
    /// HTTP transport settings
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            environment: "production".to_string(),
            debug: false,
            default_connection: "default".to_string(),
            connections: HashMap::new(),
            certificates_dir: PathBuf::from("certificates"),
            http: HttpConfig::default(),
        }
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout, applied to token issuance and Apex calls alike
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// A named set of credentials and endpoints for reaching Salesforce
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Application identity header value (requires `app_key` as well)
    pub app_uuid: Option<String>,
    /// Application key header value (requires `app_uuid` as well)
    pub app_key: Option<String>,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Resource-owner username
    pub username: String,
    /// Resource-owner password
    pub password: String,
    /// Salesforce security token, appended to the password at request time
    pub security_token: String,
    /// OAuth token endpoint
    pub token_uri: String,
    /// Apex REST endpoint
    pub apex_uri: String,
    /// Client certificate filename under `certificates_dir` (requires `certificate_key`)
    pub certificate: Option<String>,
    /// Client certificate key filename under `certificates_dir` (requires `certificate`)
    pub certificate_key: Option<String>,
    /// Fallback value for the `x-user-email` header
    pub default_user_email: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            app_uuid: None,
            app_key: None,
            client_id: String::new(),
            client_secret: String::new(),
            username: String::new(),
            password: String::new(),
            security_token: String::new(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            apex_uri: DEFAULT_APEX_URI.to_string(),
            certificate: None,
            certificate_key: None,
            default_user_email: None,
        }
    }
}

/// True when an optional field carries a non-empty value.
/// Empty strings from unset environment variables count as absent.
fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl ConnectionConfig {
    /// Whether this connection carries the application auth header pair
    #[must_use]
    pub fn has_app_auth(&self) -> bool {
        filled(&self.app_uuid) && filled(&self.app_key)
    }

    /// Whether this connection is certificate-routed
    #[must_use]
    pub fn has_certificate(&self) -> bool {
        filled(&self.certificate) && filled(&self.certificate_key)
    }

    /// Validate this connection's invariants.
    ///
    /// All seven OAuth fields must be non-empty, both URIs must parse as
    /// absolute URLs, and the certificate and app-auth pairs are
    /// all-or-nothing.
    pub fn validate(&self, name: &str) -> Result<()> {
        let required = [
            ("apex_uri", &self.apex_uri),
            ("token_uri", &self.token_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("username", &self.username),
            ("password", &self.password),
            ("security_token", &self.security_token),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(key, _)| *key)
            .collect();

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Missing required Salesforce configuration keys for connection [{name}]: {}",
                missing.join(", ")
            )));
        }

        for (key, value) in [("token_uri", &self.token_uri), ("apex_uri", &self.apex_uri)] {
            Url::parse(value).map_err(|_| {
                Error::Config(format!(
                    "Invalid URL format for connection [{name}] {key}: {value}"
                ))
            })?;
        }

        if filled(&self.certificate) != filled(&self.certificate_key) {
            return Err(Error::Config(format!(
                "Both certificate and certificate_key must be provided for connection [{name}] \
                 if using certificate authentication"
            )));
        }

        if filled(&self.app_uuid) != filled(&self.app_key) {
            return Err(Error::Config(format!(
                "Both app_uuid and app_key must be provided for connection [{name}] \
                 if using application authentication"
            )));
        }

        Ok(())
    }

    /// Copy of this connection with secret values masked, for display
    #[must_use]
    pub fn redacted(&self) -> Self {
        fn mask(value: &str) -> String {
            if value.is_empty() {
                String::new()
            } else {
                "********".to_string()
            }
        }

        Self {
            client_secret: mask(&self.client_secret),
            password: mask(&self.password),
            security_token: mask(&self.security_token),
            app_key: self.app_key.as_deref().map(mask),
            ..self.clone()
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // First pass only discovers env_files; they may define SALESFORCE_*
        // variables, so the final extraction re-reads the environment.
        let bootstrap: Self = Self::figment(path)?
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        bootstrap.load_env_files();

        Self::figment(path)?
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        Ok(figment.merge(Env::prefixed("SALESFORCE_").split("__")))
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Look up a connection by name
    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections
            .get(name)
            .ok_or_else(|| Error::ConnectionNotFound(name.to_string()))
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let parsed = if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else {
            // Bare number, assume seconds
            s.parse::<u64>().map(Duration::from_secs)
        };

        parsed.map_err(serde::de::Error::custom)
    }
}
