//! Secret Coalescer Library
//!
//! Fetches batches of secrets from Vault, AWS Secrets Manager and other
//! providers, caching results and ensuring each distinct source is fetched
//! at most once at a time no matter how many callers ask for it.

pub mod cache;
pub mod coalescer;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fetcher;
pub mod providers;

pub use cache::{CacheEntry, SecretCache};
pub use coalescer::FetchCoalescer;
pub use config::Config;
pub use descriptor::{CacheKey, CredentialRef, FetchKey, SecretDescriptor, SecretValue};
pub use error::{ErrorKind, FetchError};
pub use fetcher::{BatchResult, FetchOutcome, FetcherOptions, MultiSecretFetcher, RetryPolicy};
pub use providers::{Provider, SecretProvider};
