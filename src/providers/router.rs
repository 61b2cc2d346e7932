use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::aws_secrets::AwsSecretsProvider;
use super::credentials::CredentialResolver;
use super::memory::StaticProvider;
use super::secret_provider::SecretProvider;
use super::vault::VaultProvider;
use crate::config::{Config, EndpointConfig};
use crate::descriptor::{CredentialRef, SecretValue};
use crate::error::FetchError;

/// Dispatches each fetch to the provider registered for its endpoint key
#[derive(Default)]
pub struct ProviderRouter {
    providers: BTreeMap<String, Arc<dyn SecretProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one provider per configured endpoint
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials: Arc<dyn CredentialResolver> = Arc::new(config.credential_store());
        let mut router = Self::new();

        for (key, endpoint) in &config.endpoints {
            let provider: Arc<dyn SecretProvider> = match endpoint {
                EndpointConfig::Vault { address, mount } => Arc::new(
                    VaultProvider::new(address.clone(), mount.clone(), Arc::clone(&credentials))
                        .with_context(|| format!("Failed to create Vault provider for '{}'", key))?,
                ),
                EndpointConfig::Aws { region } => Arc::new(AwsSecretsProvider::new(
                    region.clone(),
                    Arc::clone(&credentials),
                )),
                EndpointConfig::Static { values } => Arc::new(StaticProvider::new(values.clone())),
            };
            router.register(key.clone(), provider);
        }

        Ok(router)
    }

    pub fn register(&mut self, endpoint_key: impl Into<String>, provider: Arc<dyn SecretProvider>) {
        self.providers.insert(endpoint_key.into(), provider);
    }

    /// Registered endpoints with their provider type names
    pub fn endpoints(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.providers
            .iter()
            .map(|(key, provider)| (key.as_str(), provider.provider_type()))
    }
}

#[async_trait::async_trait]
impl SecretProvider for ProviderRouter {
    async fn fetch(
        &self,
        endpoint_key: &str,
        secret_name: &str,
        credential: Option<&CredentialRef>,
    ) -> Result<SecretValue, FetchError> {
        let provider = self.providers.get(endpoint_key).ok_or_else(|| {
            debug!("No provider registered for endpoint '{}'", endpoint_key);
            FetchError::not_found(endpoint_key, secret_name)
        })?;
        provider.fetch(endpoint_key, secret_name, credential).await
    }

    fn provider_type(&self) -> &'static str {
        "router"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SecretDescriptor;
    use crate::fetcher::MultiSecretFetcher;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_dispatch_by_endpoint() {
        let mut router = ProviderRouter::new();
        router.register(
            "a",
            Arc::new(StaticProvider::new(HashMap::from([(
                "db".to_string(),
                "from-a".to_string(),
            )]))),
        );
        router.register(
            "b",
            Arc::new(StaticProvider::new(HashMap::from([(
                "db".to_string(),
                "from-b".to_string(),
            )]))),
        );

        let a = router.fetch("a", "db", None).await.unwrap();
        let b = router.fetch("b", "db", None).await.unwrap();
        assert_eq!(a.as_str(), Some("from-a"));
        assert_eq!(b.as_str(), Some("from-b"));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_not_found() {
        let router = ProviderRouter::new();
        let err = router.fetch("nowhere", "db", None).await.unwrap_err();
        assert_eq!(err, FetchError::not_found("nowhere", "db"));
    }

    #[test]
    fn test_from_config() {
        let config: Config = toml::from_str(
            r#"
[endpoints.prod]
kind = "vault"
address = "http://127.0.0.1:8200"

[endpoints.local]
kind = "static"
values = { db = "x" }
"#,
        )
        .unwrap();

        let router = ProviderRouter::from_config(&config).unwrap();
        let endpoints: Vec<_> = router.endpoints().collect();
        assert_eq!(
            endpoints,
            vec![("local", "static"), ("prod", "HashiCorp Vault")]
        );
    }

    #[tokio::test]
    async fn test_default_credential_used_without_handle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/secret/data/myapp/db")
            .match_header("X-Vault-Token", "root-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": {"data": {"password": "hunter2"}}}"#)
            .create_async()
            .await;

        let config: Config = toml::from_str(&format!(
            r#"
[endpoints.vault]
kind = "vault"
address = "{}"

[credentials.default]
token = "root-token"
"#,
            server.url()
        ))
        .unwrap();

        let router = ProviderRouter::from_config(&config).unwrap();
        let fetcher = MultiSecretFetcher::new(Arc::new(router), config.fetcher_options());
        let descriptor: SecretDescriptor = "vault:myapp/db#password".parse().unwrap();

        let value = fetcher.fetch_one(&descriptor).await.unwrap();
        assert_eq!(value.as_str(), Some("hunter2"));
        mock.assert_async().await;
    }
}
