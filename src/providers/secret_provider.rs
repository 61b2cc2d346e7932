use crate::descriptor::{CredentialRef, SecretValue};
use crate::error::FetchError;

/// Trait for secret sources (Vault, AWS Secrets Manager, etc.)
///
/// One call fetches one secret name. Transport-level retries and
/// serialization are the provider's business.
#[async_trait::async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch a single secret from an endpoint
    async fn fetch(
        &self,
        endpoint_key: &str,
        secret_name: &str,
        credential: Option<&CredentialRef>,
    ) -> Result<SecretValue, FetchError>;

    /// Get the provider type name for display purposes
    fn provider_type(&self) -> &'static str;
}

/// Splits `path#field` into the secret path and an optional field selector
pub fn split_field(secret_name: &str) -> (&str, Option<&str>) {
    match secret_name.rsplit_once('#') {
        Some((path, field)) if !field.is_empty() => (path, Some(field)),
        _ => (secret_name, None),
    }
}

/// Render a JSON value as secret bytes: strings verbatim, everything else as JSON text
pub fn json_to_value(value: &serde_json::Value) -> SecretValue {
    match value {
        serde_json::Value::String(s) => SecretValue::from(s.as_str()),
        other => SecretValue::from(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_field() {
        assert_eq!(split_field("myapp/db#password"), ("myapp/db", Some("password")));
        assert_eq!(split_field("myapp/db"), ("myapp/db", None));
        assert_eq!(split_field("myapp/db#"), ("myapp/db#", None));
    }

    #[test]
    fn test_json_to_value() {
        assert_eq!(json_to_value(&json!("s3cret")).as_str(), Some("s3cret"));
        assert_eq!(json_to_value(&json!(5432)).as_str(), Some("5432"));
        assert_eq!(
            json_to_value(&json!({"a": 1})).as_str(),
            Some(r#"{"a":1}"#)
        );
    }
}
