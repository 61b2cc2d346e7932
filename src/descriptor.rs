//! Secret request descriptors and the keys derived from them

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Opaque handle naming the credential used to reach an endpoint.
///
/// The fetch layer only compares and forwards handles; providers resolve
/// them to tokens or profiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialRef(Arc<str>);

impl CredentialRef {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One secret request: which endpoint, which secret, with which credential
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretDescriptor {
    endpoint_key: String,
    secret_name: String,
    credential: Option<CredentialRef>,
}

impl SecretDescriptor {
    pub fn new(
        endpoint_key: impl Into<String>,
        secret_name: impl Into<String>,
        credential: Option<CredentialRef>,
    ) -> Self {
        Self {
            endpoint_key: endpoint_key.into(),
            secret_name: secret_name.into(),
            credential,
        }
    }

    pub fn endpoint_key(&self) -> &str {
        &self.endpoint_key
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    pub fn credential(&self) -> Option<&CredentialRef> {
        self.credential.as_ref()
    }

    /// Key under which provider round-trips are coalesced
    pub fn fetch_key(&self) -> FetchKey {
        FetchKey {
            endpoint_key: self.endpoint_key.clone(),
            credential: self.credential.clone(),
        }
    }

    /// Key under which the resolved value is cached
    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            endpoint_key: self.endpoint_key.clone(),
            secret_name: self.secret_name.clone(),
            credential: self.credential.clone(),
        }
    }
}

impl fmt::Display for SecretDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint_key, self.secret_name)?;
        if let Some(ref credential) = self.credential {
            write!(f, "@{}", credential)?;
        }
        Ok(())
    }
}

/// Parses `endpoint:secret/name[@credential]`
impl FromStr for SecretDescriptor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (endpoint, rest) = s.split_once(':').ok_or_else(|| {
            format!(
                "Invalid secret descriptor: {}. Expected endpoint:name[@credential]",
                s
            )
        })?;

        let (name, credential) = match rest.rsplit_once('@') {
            Some((name, credential)) if !credential.is_empty() => {
                (name, Some(CredentialRef::new(credential)))
            }
            Some(_) => return Err(format!("Empty credential in descriptor: {}", s)),
            None => (rest, None),
        };

        if endpoint.is_empty() {
            return Err(format!("Empty endpoint in descriptor: {}", s));
        }
        if name.is_empty() {
            return Err(format!("Empty secret name in descriptor: {}", s));
        }

        Ok(Self::new(endpoint, name, credential))
    }
}

/// Unit of single-flight coalescing: one authenticated endpoint connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchKey {
    pub endpoint_key: String,
    pub credential: Option<CredentialRef>,
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.credential {
            Some(ref credential) => write!(f, "{}@{}", self.endpoint_key, credential),
            None => f.write_str(&self.endpoint_key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub endpoint_key: String,
    pub secret_name: String,
    pub credential: Option<CredentialRef>,
}

impl CacheKey {
    pub fn new(fetch_key: &FetchKey, secret_name: impl Into<String>) -> Self {
        Self {
            endpoint_key: fetch_key.endpoint_key.clone(),
            secret_name: secret_name.into(),
            credential: fetch_key.credential.clone(),
        }
    }
}

/// A resolved secret.
///
/// Cloning shares the underlying buffer, so every descriptor resolved from
/// the same fetch points at the same bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Arc<[u8]>);

impl SecretValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The value as UTF-8, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether both values share the same allocation
    pub fn same_instance(&self, other: &SecretValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue(<redacted {} bytes>)", self.0.len())
    }
}

impl From<Vec<u8>> for SecretValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::from(value.into_bytes())
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self(Arc::from(value.as_bytes()))
    }
}
