//! Turns "list children" payloads into queued work.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::node::Node;
use crate::queue::{ClaimSet, WorkQueue};

/// Name shown for a listing whose container has no name.
const ROOT_LABEL: &str = "<root>";

/// The `data` object of a "list children" response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingPayload {
    /// Name of the listed container.
    #[serde(default)]
    pub name: Option<String>,
    /// Raw child descriptors; each is parsed on its own.
    #[serde(default)]
    pub children: Option<Vec<Value>>,
}

/// Admits unseen nodes into the shared work queue.
///
/// Holds the process-wide set of seen node identifiers. A node is queued by
/// at most one discovery event no matter how often its parent is listed.
#[derive(Debug, Clone)]
pub struct DiscoveryProcessor {
    seen: Arc<ClaimSet>,
    queue: Arc<WorkQueue<Node>>,
}

impl DiscoveryProcessor {
    /// Creates a processor over the shared seen-set and work queue.
    #[must_use]
    pub fn new(seen: Arc<ClaimSet>, queue: Arc<WorkQueue<Node>>) -> Self {
        Self { seen, queue }
    }

    /// The set of node identifiers queued so far.
    #[must_use]
    pub fn seen(&self) -> &Arc<ClaimSet> {
        &self.seen
    }

    /// The queue discovered nodes are pushed to.
    #[must_use]
    pub fn queue(&self) -> &Arc<WorkQueue<Node>> {
        &self.queue
    }

    /// Ingests a raw `data` value and returns how many nodes were queued.
    ///
    /// `null`, non-object values and payloads without `children` are no-ops.
    pub fn ingest(&self, data: &Value) -> usize {
        if data.is_null() {
            return 0;
        }
        match serde_json::from_value::<ListingPayload>(data.clone()) {
            Ok(payload) => self.ingest_payload(&payload),
            Err(e) => {
                debug!(error = %e, "ignoring listing data that is not a container");
                0
            }
        }
    }

    /// Ingests a parsed payload and returns how many nodes were queued.
    pub fn ingest_payload(&self, payload: &ListingPayload) -> usize {
        let Some(children) = payload.children.as_ref() else {
            return 0;
        };
        let parent = payload.name.as_deref().unwrap_or(ROOT_LABEL);

        let mut added = Vec::new();
        for child in children {
            let node: Node = match serde_json::from_value(child.clone()) {
                Ok(node) => node,
                Err(e) => {
                    warn!(parent, error = %e, "skipping malformed child descriptor");
                    continue;
                }
            };
            if self.seen.claim(&node.dentry_uuid) {
                added.push(node.name.clone());
                self.queue.push(node);
            }
        }

        if !added.is_empty() {
            info!(
                parent,
                added = added.len(),
                queue_len = self.queue.len(),
                names = %added.join(", "),
                "queued child nodes"
            );
        }
        added.len()
    }
}
