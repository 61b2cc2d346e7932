use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::descriptor::CredentialRef;
use crate::fetcher::{FetcherOptions, RetryPolicy};
use crate::providers::{CredentialEntry, StaticCredentials, DEFAULT_CREDENTIAL};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Absent means cached secrets never expire
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per provider call; absent means no timeout
    pub timeout_seconds: Option<u64>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_millis() -> u64 {
    200
}

fn default_mount() -> String {
    "secret".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: None,
            max_attempts: default_max_attempts(),
            backoff_millis: default_backoff_millis(),
        }
    }
}

/// One secret source, selected by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EndpointConfig {
    Vault {
        address: String,
        #[serde(default = "default_mount")]
        mount: String,
    },
    Aws {
        region: Option<String>,
    },
    Static {
        #[serde(default)]
        values: HashMap<String, String>,
    },
}

impl EndpointConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            EndpointConfig::Vault { .. } => "vault",
            EndpointConfig::Aws { .. } => "aws",
            EndpointConfig::Static { .. } => "static",
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Vault token
    pub token: Option<String>,
    /// AWS profile name
    pub profile: Option<String>,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("profile", &self.profile)
            .finish()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// `VAULT_ADDR` defines a single endpoint named `vault`; `VAULT_TOKEN`
    /// is registered as the credential `default`.
    pub fn from_env() -> Result<Self> {
        let address =
            std::env::var("VAULT_ADDR").context("VAULT_ADDR environment variable not set")?;
        let mount = std::env::var("VAULT_MOUNT").unwrap_or_else(|_| default_mount());

        let mut endpoints = BTreeMap::new();
        endpoints.insert("vault".to_string(), EndpointConfig::Vault { address, mount });

        let mut credentials = BTreeMap::new();
        if let Ok(token) = std::env::var("VAULT_TOKEN") {
            credentials.insert(
                DEFAULT_CREDENTIAL.to_string(),
                CredentialConfig {
                    token: Some(token),
                    profile: None,
                },
            );
        }

        let cache = CacheConfig {
            ttl_seconds: env_parse("SECRET_CACHE_TTL")?,
        };
        let fetch = FetchConfig {
            timeout_seconds: env_parse("SECRET_FETCH_TIMEOUT")?,
            max_attempts: env_parse("SECRET_FETCH_ATTEMPTS")?.unwrap_or_else(default_max_attempts),
            backoff_millis: default_backoff_millis(),
        };

        let config = Self {
            cache,
            fetch,
            endpoints,
            credentials,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.fetch.max_attempts == 0 {
            anyhow::bail!("fetch.max_attempts must be at least 1");
        }

        for (key, endpoint) in &self.endpoints {
            if key.is_empty() || key.contains(':') {
                anyhow::bail!("Invalid endpoint key '{}': must be non-empty and contain no ':'", key);
            }
            if let EndpointConfig::Vault { address, .. } = endpoint {
                if address.trim().is_empty() {
                    anyhow::bail!("Vault endpoint '{}' has no address", key);
                }
            }
        }

        Ok(())
    }

    pub fn fetcher_options(&self) -> FetcherOptions {
        FetcherOptions {
            ttl: self.cache.ttl_seconds.map(Duration::from_secs),
            fetch_timeout: self.fetch.timeout_seconds.map(Duration::from_secs),
            retry: RetryPolicy {
                max_attempts: self.fetch.max_attempts.max(1),
                backoff: Duration::from_millis(self.fetch.backoff_millis),
            },
        }
    }

    /// Credential handles available to providers
    pub fn credential_store(&self) -> StaticCredentials {
        let mut store = StaticCredentials::new();
        for (name, credential) in &self.credentials {
            store.insert(
                CredentialRef::new(name),
                CredentialEntry {
                    token: credential.token.clone(),
                    profile: credential.profile.clone(),
                },
            );
        }
        store
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(
            "prod-vault".to_string(),
            EndpointConfig::Vault {
                address: "http://127.0.0.1:8200".to_string(),
                mount: default_mount(),
            },
        );
        endpoints.insert(
            "aws-east".to_string(),
            EndpointConfig::Aws {
                region: Some("us-east-1".to_string()),
            },
        );

        let mut credentials = BTreeMap::new();
        credentials.insert(
            "app".to_string(),
            CredentialConfig {
                token: Some("your-vault-token-here".to_string()),
                profile: Some("default".to_string()),
            },
        );

        let sample = Self {
            cache: CacheConfig {
                ttl_seconds: Some(300),
            },
            fetch: FetchConfig {
                timeout_seconds: Some(10),
                ..FetchConfig::default()
            },
            endpoints,
            credentials,
        };

        let toml_string =
            toml::to_string_pretty(&sample).context("Failed to serialize sample config")?;
        fs::write(path.as_ref(), toml_string)
            .with_context(|| format!("Failed to write sample config to {:?}", path.as_ref()))?;

        Ok(())
    }
}

/// Parse an optional environment variable; a set but malformed value is an error
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CredentialResolver;
    use std::io::Write;

    const CONFIG: &str = r#"
[cache]
ttl_seconds = 60

[fetch]
timeout_seconds = 5
max_attempts = 2

[endpoints.prod]
kind = "vault"
address = "https://vault.internal:8200"

[endpoints.aws-east]
kind = "aws"
region = "us-east-1"

[endpoints.local]
kind = "static"
values = { db = "local-password" }

[credentials.app]
token = "s.abc"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_file() {
        let file = write_config(CONFIG);
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.endpoints.len(), 3);
        assert_eq!(
            config.endpoints["prod"],
            EndpointConfig::Vault {
                address: "https://vault.internal:8200".to_string(),
                mount: "secret".to_string(),
            }
        );
        assert_eq!(config.endpoints["aws-east"].kind(), "aws");
        assert_eq!(config.fetch.backoff_millis, 200);

        let options = config.fetcher_options();
        assert_eq!(options.ttl, Some(Duration::from_secs(60)));
        assert_eq!(options.fetch_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.retry.max_attempts, 2);
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let file = write_config(
            r#"
[endpoints.local]
kind = "static"
"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        let options = config.fetcher_options();
        assert!(options.ttl.is_none());
        assert!(options.fetch_timeout.is_none());
        assert_eq!(options.retry.max_attempts, 3);
    }

    #[test]
    fn test_rejects_unknown_endpoint_kind() {
        let file = write_config(
            r#"
[endpoints.prod]
kind = "consul"
"#,
        );
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.fetch.max_attempts = 0;
        assert!(config.validate().is_err());

        config.fetch.max_attempts = 1;
        config.endpoints.insert(
            "prod".to_string(),
            EndpointConfig::Vault {
                address: " ".to_string(),
                mount: "secret".to_string(),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credential_store() {
        let file = write_config(CONFIG);
        let config = Config::from_file(file.path()).unwrap();
        let store = config.credential_store();
        assert_eq!(
            store.token("prod", Some(&CredentialRef::new("app"))),
            Some("s.abc".to_string())
        );
        assert!(!format!("{:?}", config).contains("s.abc"));
    }

    #[test]
    fn test_env_parse_rejects_malformed_values() {
        std::env::set_var("SCF_TEST_TTL_OK", " 90 ");
        std::env::set_var("SCF_TEST_TTL_BAD", "5m");

        assert_eq!(env_parse::<u64>("SCF_TEST_TTL_OK").unwrap(), Some(90));
        assert_eq!(env_parse::<u64>("SCF_TEST_TTL_UNSET").unwrap(), None);

        let err = env_parse::<u64>("SCF_TEST_TTL_BAD").unwrap_err();
        assert!(err.to_string().contains("SCF_TEST_TTL_BAD"));

        std::env::remove_var("SCF_TEST_TTL_OK");
        std::env::remove_var("SCF_TEST_TTL_BAD");
    }

    #[test]
    fn test_sample_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scf.toml");
        Config::create_sample(&path).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.cache.ttl_seconds, Some(300));
        assert!(config.credentials.contains_key("app"));
    }
}
