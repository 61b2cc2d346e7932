use std::collections::HashMap;

use crate::descriptor::CredentialRef;

/// Handle used for descriptors that name no credential
pub const DEFAULT_CREDENTIAL: &str = "default";

/// Resolves opaque credential handles to transport-level auth.
///
/// The fetch layer passes handles through untouched; only providers call this.
/// `None` means the descriptor named no credential.
pub trait CredentialResolver: Send + Sync {
    /// Bearer token for the endpoint (e.g. a Vault token)
    fn token(&self, endpoint_key: &str, credential: Option<&CredentialRef>) -> Option<String>;

    /// Named profile in the ambient credential chain (e.g. an AWS profile)
    fn profile(&self, endpoint_key: &str, credential: Option<&CredentialRef>) -> Option<String>;
}

/// Credential material registered under one handle
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialEntry {
    pub token: Option<String>,
    pub profile: Option<String>,
}

impl std::fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("profile", &self.profile)
            .finish()
    }
}

/// Credentials loaded from configuration, keyed by handle name
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<CredentialRef, CredentialEntry>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, credential: CredentialRef, entry: CredentialEntry) {
        self.entries.insert(credential, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A missing handle falls back to the `default` entry, if configured
    fn entry(&self, credential: Option<&CredentialRef>) -> Option<&CredentialEntry> {
        match credential {
            Some(credential) => self.entries.get(credential),
            None => self.entries.get(&CredentialRef::new(DEFAULT_CREDENTIAL)),
        }
    }
}

impl CredentialResolver for StaticCredentials {
    fn token(&self, _endpoint_key: &str, credential: Option<&CredentialRef>) -> Option<String> {
        self.entry(credential)?.token.clone()
    }

    fn profile(&self, _endpoint_key: &str, credential: Option<&CredentialRef>) -> Option<String> {
        self.entry(credential)?.profile.clone()
    }
}
