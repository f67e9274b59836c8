//! Remote search calls.

mod client;
mod error;
mod types;

use async_trait::async_trait;

pub use client::{DEFAULT_GATEWAY_URL, MtopSearchClient, check_envelope};
pub use error::RemoteApiError;
pub use types::{FoundItem, SearchCall, extract_items, search_payload};

/// Performs a signed search call.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn search(&self, call: &SearchCall) -> Result<Vec<FoundItem>, RemoteApiError>;
}
