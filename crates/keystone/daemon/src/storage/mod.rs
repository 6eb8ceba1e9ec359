//! Storage layer for keystone-daemon
//!
//! Abstracts the control-plane store that holds declared entities, key
//! bundles, published status and the event log.

mod memory;
mod traits;

pub use memory::InMemoryStorage;
pub use traits::{
    BundleStorage, Declared, EntityStorage, EventStorage, StatusStorage, Storage, StorageResult,
};

use keystone_types::EntityId;

/// Name of the bundle that holds the keys of `id`
pub fn bundle_name(id: &EntityId) -> String {
    format!("{}/{}/{}", id.level, id.scope(), id.name())
}
