use std::collections::HashMap;

use super::secret_provider::SecretProvider;
use crate::descriptor::{CredentialRef, SecretValue};
use crate::error::FetchError;

/// Fixed set of secrets held in memory, for local development
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    values: HashMap<String, SecretValue>,
}

impl StaticProvider {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(name, value)| (name, SecretValue::from(value)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait::async_trait]
impl SecretProvider for StaticProvider {
    async fn fetch(
        &self,
        endpoint_key: &str,
        secret_name: &str,
        _credential: Option<&CredentialRef>,
    ) -> Result<SecretValue, FetchError> {
        self.values
            .get(secret_name)
            .cloned()
            .ok_or_else(|| FetchError::not_found(endpoint_key, secret_name))
    }

    fn provider_type(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let mut values = HashMap::new();
        values.insert("db".to_string(), "s3cret".to_string());
        let provider = StaticProvider::new(values);

        let value = provider.fetch("local", "db", None).await.unwrap();
        assert_eq!(value.as_str(), Some("s3cret"));

        let err = provider.fetch("local", "api", None).await.unwrap_err();
        assert_eq!(err, FetchError::not_found("local", "api"));
    }
}
