//! Secret provider implementations
//!
//! This module provides the provider abstraction the fetcher calls into and
//! implementations for the supported secret sources.

mod aws_secrets;
mod credentials;
mod memory;
mod router;
mod secret_provider;
mod vault;

pub use aws_secrets::AwsSecretsProvider;
pub use credentials::{CredentialEntry, CredentialResolver, StaticCredentials, DEFAULT_CREDENTIAL};
pub use memory::StaticProvider;
pub use router::ProviderRouter;
pub use secret_provider::SecretProvider;
pub use vault::VaultProvider;

/// Type alias for a shared provider trait object
pub type Provider = std::sync::Arc<dyn SecretProvider>;
