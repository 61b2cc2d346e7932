//! Batch secret fetching with caching and request coalescing
//!
//! A batch is partitioned by fetch key (endpoint + credential). Each key is
//! resolved concurrently: cached names are answered immediately, the rest go
//! through the coalescer so that at most one provider round-trip per key is
//! in flight across the whole process. Outcomes are fanned back out to every
//! descriptor in input order.

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::SecretCache;
use crate::coalescer::FetchCoalescer;
use crate::descriptor::{CacheKey, CredentialRef, FetchKey, SecretDescriptor, SecretValue};
use crate::error::{ErrorKind, FetchError};
use crate::providers::Provider;

pub type FetchOutcome = Result<SecretValue, FetchError>;

/// Outcome of one coalesced provider run, by secret name
type KeyOutcome = Arc<HashMap<String, FetchOutcome>>;

/// Bounded retry of transient failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Delay after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetcherOptions {
    /// TTL applied to newly cached values; `None` caches until invalidated
    pub ttl: Option<Duration>,
    /// Limit on a single provider call
    pub fetch_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

/// One outcome per input descriptor, in input order
#[derive(Debug, Clone)]
pub struct BatchResult {
    entries: Vec<(SecretDescriptor, FetchOutcome)>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FetchOutcome> {
        self.entries.get(index).map(|(_, outcome)| outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SecretDescriptor, &FetchOutcome)> {
        self.entries.iter().map(|(d, o)| (d, o))
    }

    pub fn is_all_ok(&self) -> bool {
        self.entries.iter().all(|(_, outcome)| outcome.is_ok())
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|(_, o)| o.is_err()).count()
    }
}

impl IntoIterator for BatchResult {
    type Item = (SecretDescriptor, FetchOutcome);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

struct Inner {
    provider: Provider,
    cache: SecretCache,
    coalescer: FetchCoalescer<FetchKey, KeyOutcome>,
    options: FetcherOptions,
}

/// Fetches batches of secrets, fetching each distinct source once.
///
/// Cloning is cheap and clones share the cache and in-flight registry, so a
/// single instance can serve a whole process.
#[derive(Clone)]
pub struct MultiSecretFetcher {
    inner: Arc<Inner>,
}

impl MultiSecretFetcher {
    pub fn new(provider: Provider, options: FetcherOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                cache: SecretCache::new(),
                coalescer: FetchCoalescer::new(),
                options,
            }),
        }
    }

    pub fn cache(&self) -> &SecretCache {
        &self.inner.cache
    }

    pub fn options(&self) -> &FetcherOptions {
        &self.inner.options
    }

    /// Resolve every descriptor, returning one outcome per input in input order.
    ///
    /// Failures are attached to the descriptors that asked for the failing
    /// secret; other fetch keys in the batch are unaffected. Dropping the
    /// returned future detaches this batch from any shared in-flight fetch
    /// without cancelling it for other batches.
    pub async fn fetch_all(&self, descriptors: &[SecretDescriptor]) -> BatchResult {
        let mut groups: HashMap<FetchKey, BTreeSet<String>> = HashMap::new();
        for descriptor in descriptors {
            groups
                .entry(descriptor.fetch_key())
                .or_default()
                .insert(descriptor.secret_name().to_string());
        }

        debug!(
            "Fetching {} descriptor(s) across {} fetch key(s)",
            descriptors.len(),
            groups.len()
        );

        let resolved: HashMap<FetchKey, HashMap<String, FetchOutcome>> =
            join_all(groups.into_iter().map(|(key, names)| async move {
                let outcomes = self.resolve_key(&key, names).await;
                (key, outcomes)
            }))
            .await
            .into_iter()
            .collect();

        let entries = descriptors
            .iter()
            .map(|descriptor| {
                let outcome = resolved
                    .get(&descriptor.fetch_key())
                    .and_then(|outcomes| outcomes.get(descriptor.secret_name()))
                    .cloned()
                    .unwrap_or_else(|| {
                        Err(FetchError::transient(
                            descriptor.endpoint_key(),
                            "fetch produced no result",
                        ))
                    });
                (descriptor.clone(), outcome)
            })
            .collect();

        BatchResult { entries }
    }

    /// Resolve a single descriptor
    pub async fn fetch_one(&self, descriptor: &SecretDescriptor) -> FetchOutcome {
        let mut result = self.fetch_all(std::slice::from_ref(descriptor)).await;
        result.entries.pop().map(|(_, outcome)| outcome).unwrap_or_else(|| {
            Err(FetchError::transient(
                descriptor.endpoint_key(),
                "fetch produced no result",
            ))
        })
    }

    /// Force the next access to go back to the provider
    pub fn invalidate(
        &self,
        endpoint_key: &str,
        secret_name: &str,
        credential: Option<&CredentialRef>,
    ) {
        let descriptor = SecretDescriptor::new(endpoint_key, secret_name, credential.cloned());
        debug!("Invalidating cached secret {}", descriptor);
        self.inner.cache.invalidate(&descriptor.cache_key());
    }

    /// Resolve every requested name under one fetch key
    async fn resolve_key(
        &self,
        key: &FetchKey,
        names: BTreeSet<String>,
    ) -> HashMap<String, FetchOutcome> {
        let retry = &self.inner.options.retry;
        let mut resolved = HashMap::with_capacity(names.len());
        let mut pending = names;
        let mut attempt = 1;

        loop {
            pending.retain(|name| {
                match self.inner.cache.get_fresh(&CacheKey::new(key, name.as_str())) {
                    Some(value) => {
                        debug!("Cache hit for {}:{}", key, name);
                        resolved.insert(name.clone(), Ok(value));
                        false
                    }
                    None => true,
                }
            });
            if pending.is_empty() {
                break;
            }

            let request: Vec<String> = pending.iter().cloned().collect();
            let inner = Arc::clone(&self.inner);
            let producer_key = key.clone();
            let outcome = self
                .inner
                .coalescer
                .run_once(key.clone(), move || inner.fetch_names(producer_key, request))
                .await;

            // A run started by another batch may not cover all of our names;
            // those stay pending and go around again.
            let mut should_retry = false;
            pending.retain(|name| match outcome.get(name) {
                Some(Err(err)) if err.is_retryable() && attempt < retry.max_attempts => {
                    should_retry = true;
                    true
                }
                Some(result) => {
                    resolved.insert(name.clone(), result.clone());
                    false
                }
                None => true,
            });
            if pending.is_empty() {
                break;
            }

            if should_retry {
                let delay = retry.delay(attempt);
                warn!(
                    "Transient failure fetching from {} (attempt {}/{}), retrying in {:?}",
                    key, attempt, retry.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }

        resolved
    }
}

impl Inner {
    /// The coalesced producer: one provider call per name, one name at a time
    async fn fetch_names(self: Arc<Self>, key: FetchKey, names: Vec<String>) -> KeyOutcome {
        info!(
            "Fetching {} secret(s) from {} ({})",
            names.len(),
            key,
            self.provider.provider_type()
        );

        let mut outcomes = HashMap::with_capacity(names.len());
        let mut rejected: Option<FetchError> = None;

        for name in names {
            // A rejected credential will be rejected for every name
            if let Some(ref err) = rejected {
                outcomes.insert(name, Err(err.clone()));
                continue;
            }

            // A run that finished just before this one started may have
            // cached the name after the caller last looked.
            let cache_key = CacheKey::new(&key, name.as_str());
            if let Some(value) = self.cache.get_fresh(&cache_key) {
                outcomes.insert(name, Ok(value));
                continue;
            }

            let outcome = self.call_provider(&key, &name).await;
            match outcome {
                Ok(ref value) => {
                    self.cache.put(cache_key, value.clone(), self.options.ttl);
                }
                Err(ref err) => {
                    debug!("Fetching {}:{} failed: {}", key, name, err);
                    if err.kind() == ErrorKind::Auth {
                        rejected = Some(err.clone());
                    }
                }
            }
            outcomes.insert(name, outcome);
        }

        Arc::new(outcomes)
    }

    async fn call_provider(&self, key: &FetchKey, name: &str) -> FetchOutcome {
        let call = self
            .provider
            .fetch(&key.endpoint_key, name, key.credential.as_ref());

        match self.options.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(FetchError::transient(
                    &key.endpoint_key,
                    format!("fetch of '{}' timed out after {:?}", name, limit),
                ))
            }),
            None => call.await,
        }
    }
}
