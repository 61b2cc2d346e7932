use aws_config::Region;
use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::credentials::CredentialResolver;
use super::secret_provider::{json_to_value, split_field, SecretProvider};
use crate::descriptor::{CredentialRef, SecretValue};
use crate::error::{ErrorKind, FetchError};

/// AWS Secrets Manager provider for one region.
///
/// Credential handles resolve to named AWS profiles; a descriptor without a
/// handle uses the default credential chain. One SDK client is built per
/// profile and reused.
pub struct AwsSecretsProvider {
    region: String,
    credentials: Arc<dyn CredentialResolver>,
    clients: Mutex<HashMap<Option<String>, SecretsManagerClient>>,
}

impl AwsSecretsProvider {
    pub fn new(region: Option<String>, credentials: Arc<dyn CredentialResolver>) -> Self {
        let region = region.unwrap_or_else(|| {
            std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
        });

        Self {
            region,
            credentials,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn client_for(&self, profile: Option<String>) -> SecretsManagerClient {
        if let Some(client) = self.cached_client(&profile) {
            return client;
        }

        info!(
            "Creating AWS Secrets Manager client for region {} (profile: {})",
            self.region,
            profile.as_deref().unwrap_or("default")
        );
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(self.region.clone()));
        if let Some(ref name) = profile {
            loader = loader.profile_name(name);
        }
        let config = loader.load().await;
        let client = SecretsManagerClient::new(&config);

        // A concurrent builder may have won; either client is equivalent
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        clients.entry(profile).or_insert(client).clone()
    }

    fn cached_client(&self, profile: &Option<String>) -> Option<SecretsManagerClient> {
        let clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        clients.get(profile).cloned()
    }
}

/// Classify an AWS error code
fn classify_error_code(code: Option<&str>) -> ErrorKind {
    match code {
        Some("ResourceNotFoundException") => ErrorKind::NotFound,
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidSignatureException"
            | "ExpiredTokenException"
            | "DecryptionFailure",
        ) => ErrorKind::Auth,
        _ => ErrorKind::Transient,
    }
}

fn map_sdk_error(
    endpoint_key: &str,
    secret_id: &str,
    err: SdkError<GetSecretValueError>,
) -> FetchError {
    let kind = match err {
        SdkError::ServiceError(ref context) => classify_error_code(context.err().code()),
        _ => ErrorKind::Transient,
    };
    let message = format!("{}", DisplayErrorContext(&err));

    match kind {
        ErrorKind::NotFound => FetchError::not_found(endpoint_key, secret_id),
        ErrorKind::Auth => FetchError::auth(endpoint_key, message),
        ErrorKind::Transient => FetchError::transient(endpoint_key, message),
    }
}

#[async_trait::async_trait]
impl SecretProvider for AwsSecretsProvider {
    async fn fetch(
        &self,
        endpoint_key: &str,
        secret_name: &str,
        credential: Option<&CredentialRef>,
    ) -> Result<SecretValue, FetchError> {
        // Without a handle, a `default` profile is optional; the SDK chain applies otherwise
        let profile = self.credentials.profile(endpoint_key, credential);
        if let (Some(credential), None) = (credential, &profile) {
            return Err(FetchError::auth(
                endpoint_key,
                format!("no AWS profile configured for credential '{}'", credential),
            ));
        }

        let (secret_id, field) = split_field(secret_name);
        debug!("Reading secret from AWS Secrets Manager: {}", secret_id);

        let client = self.client_for(profile).await;
        let response = client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(endpoint_key, secret_id, e))?;

        if let Some(secret_string) = response.secret_string() {
            return match field {
                Some(field) => select_json_field(secret_string, field)
                    .ok_or_else(|| FetchError::not_found(endpoint_key, secret_name)),
                None => Ok(SecretValue::from(secret_string)),
            };
        }

        match (response.secret_binary(), field) {
            (Some(blob), None) => Ok(SecretValue::from(blob.as_ref().to_vec())),
            _ => Err(FetchError::not_found(endpoint_key, secret_name)),
        }
    }

    fn provider_type(&self) -> &'static str {
        "AWS Secrets Manager"
    }
}

/// Pull one field out of a JSON-encoded secret string
fn select_json_field(secret_string: &str, field: &str) -> Option<SecretValue> {
    let parsed: serde_json::Value = serde_json::from_str(secret_string).ok()?;
    parsed.get(field).map(json_to_value)
}
