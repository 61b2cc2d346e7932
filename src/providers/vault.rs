use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::credentials::{CredentialResolver, DEFAULT_CREDENTIAL};
use super::secret_provider::{json_to_value, split_field, SecretProvider};
use crate::descriptor::{CredentialRef, SecretValue};
use crate::error::FetchError;

/// HashiCorp Vault KV v2 provider for one Vault address and mount
pub struct VaultProvider {
    client: Client,
    address: String,
    mount: String,
    credentials: Arc<dyn CredentialResolver>,
}

/// The `data` object of a KV v2 read; version metadata is ignored
#[derive(Debug, Deserialize)]
struct VaultSecretData {
    data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VaultResponse<T> {
    data: T,
}

impl VaultProvider {
    /// Create a new Vault provider
    pub fn new(
        address: String,
        mount: String,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            mount,
            credentials,
        })
    }

    pub(crate) fn read_url(&self, path: &str) -> String {
        format!("{}/v1/{}/data/{}", self.address, self.mount, path)
    }

    /// Read a secret from Vault KV v2
    async fn read_secret(
        &self,
        endpoint_key: &str,
        path: &str,
        token: &str,
    ) -> Result<VaultSecretData, FetchError> {
        let url = self.read_url(path);
        debug!("Reading secret from: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|e| {
                FetchError::transient(endpoint_key, format!("request to Vault failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(endpoint_key, path, status, &body));
        }

        let vault_response: VaultResponse<VaultSecretData> =
            response.json().await.map_err(|e| {
                FetchError::transient(
                    endpoint_key,
                    format!("failed to parse Vault response: {}", e),
                )
            })?;

        Ok(vault_response.data)
    }
}

/// Map a non-success Vault status onto the fetch error kinds
fn status_error(endpoint_key: &str, path: &str, status: StatusCode, body: &str) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::auth(
            endpoint_key,
            format!("Vault request failed with status {}: {}", status, body),
        ),
        StatusCode::NOT_FOUND => FetchError::not_found(endpoint_key, path),
        _ => FetchError::transient(
            endpoint_key,
            format!("Vault request failed with status {}: {}", status, body),
        ),
    }
}

#[async_trait::async_trait]
impl SecretProvider for VaultProvider {
    async fn fetch(
        &self,
        endpoint_key: &str,
        secret_name: &str,
        credential: Option<&CredentialRef>,
    ) -> Result<SecretValue, FetchError> {
        let token = self
            .credentials
            .token(endpoint_key, credential)
            .ok_or_else(|| {
                let name = credential.map(CredentialRef::name).unwrap_or(DEFAULT_CREDENTIAL);
                FetchError::auth(
                    endpoint_key,
                    format!("no Vault token configured for credential '{}'", name),
                )
            })?;

        let (path, field) = split_field(secret_name);
        let secret = self.read_secret(endpoint_key, path, &token).await?;

        match field {
            Some(field) => secret
                .data
                .get(field)
                .map(json_to_value)
                .ok_or_else(|| FetchError::not_found(endpoint_key, secret_name)),
            None => serde_json::to_string(&secret.data)
                .map(SecretValue::from)
                .map_err(|e| {
                    FetchError::transient(
                        endpoint_key,
                        format!("failed to encode secret data: {}", e),
                    )
                }),
        }
    }

    fn provider_type(&self) -> &'static str {
        "HashiCorp Vault"
    }
}
