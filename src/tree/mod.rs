//! Remote workspace tree: node model and discovery.
//!
//! - [`Node`] - one folder or file entry as delivered by the listing endpoint
//! - [`DiscoveryProcessor`] - admits unseen children of a listing payload
//!   into the shared work queue, exactly once per node identifier

mod discovery;
mod node;

pub use discovery::{DiscoveryProcessor, ListingPayload};
pub use node::{Ancestor, DentryType, LinkSourceInfo, Node};
