//! Adapter discovery seam.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::bluetooth::adapter::AdapterHandle;
use crate::core::bluetooth::error::Result;

/// Lists the controllers attached to this host.
///
/// Handles come back Closed and keyed by a stable instance id; the sorted
/// key order is what callers use to assign roles.
#[async_trait]
pub trait AdapterEnumerator: Send + Sync {
    async fn list_adapters(&self) -> Result<BTreeMap<String, AdapterHandle>>;
}
