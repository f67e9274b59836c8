//! Credential management module.
//!
//! Sessions never talk to the fetcher or the store directly; they ask the
//! [`CredentialCache`] for a set and signal it when the remote side rejects one.
//!
//! # Architecture
//!
//! - [`CredentialSet`]: immutable cookie set with source tracking
//! - [`CredentialValidator`]: "at least K of the required keys" rule
//! - [`CredentialFetcher`]: slow, fallible acquisition of a fresh set
//! - [`CredentialStore`]: durable last-known-good persistence
//! - [`CredentialCache`]: TTL cache with single-flight refresh over all of the above

mod cache;
mod error;
mod fetcher;
mod store;
mod tracker;
mod types;
mod validator;

pub use cache::{CredentialCache, CredentialCacheConfig, DomainStatus};
pub use error::CredentialError;
pub use fetcher::{CommandFetcher, CredentialFetcher, FetchMode, UnavailableFetcher};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use tracker::{FailureInfo, RefreshFailureTracker};
pub use types::{CredentialEvent, CredentialSet, CredentialSource};
pub use validator::CredentialValidator;
