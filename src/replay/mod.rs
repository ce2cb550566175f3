//! Out-of-band re-fetch of "list children" requests.
//!
//! The in-page listener sometimes sees a listing request without a usable
//! body. Such requests are queued as [`ReplayRequest`]s; a [`ReplayWorker`]
//! re-issues them with the captured credentials and feeds the recovered
//! payload to discovery. This path is best-effort: a request that keeps
//! failing is logged and dropped.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LISTING_ENDPOINT;
use crate::download::{DownloadError, HttpClient, RequestContext, RetryDecision, RetryPolicy};
use crate::queue::WorkQueue;
use crate::tree::DiscoveryProcessor;

/// A captured request queued for re-issue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayRequest {
    /// Request URL.
    pub url: String,
    /// Captured headers and cookies.
    pub request: RequestContext,
}

impl ReplayRequest {
    /// Returns `true` if the URL targets the listing endpoint.
    #[must_use]
    pub fn is_listing(&self) -> bool {
        self.url.contains(LISTING_ENDPOINT)
    }
}

/// How a replay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Not a listing request; discarded.
    Ignored,
    /// Payload recovered; this many new nodes were queued.
    Ingested(usize),
    /// Every attempt failed; dropped.
    Abandoned,
}

/// Worker that drains the replay queue.
#[derive(Debug, Clone)]
pub struct ReplayWorker {
    client: HttpClient,
    policy: RetryPolicy,
    discovery: DiscoveryProcessor,
}

impl ReplayWorker {
    /// Creates a worker feeding `discovery`.
    #[must_use]
    pub fn new(client: HttpClient, policy: RetryPolicy, discovery: DiscoveryProcessor) -> Self {
        Self {
            client,
            policy,
            discovery,
        }
    }

    /// Processes requests forever; the owner aborts the task to stop it.
    pub async fn run(self, requests: Arc<WorkQueue<ReplayRequest>>) {
        loop {
            let request = requests.pop().await;
            debug!(pending = requests.len(), "replay request dequeued");
            self.process(&request).await;
        }
    }

    /// Replays one request, retrying per the policy.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn process(&self, request: &ReplayRequest) -> ReplayOutcome {
        if !request.is_listing() {
            debug!("skipping non-listing request");
            return ReplayOutcome::Ignored;
        }

        let mut attempt = 1;
        loop {
            match self.fetch_data(request).await {
                Ok(data) => {
                    let added = self.discovery.ingest(&data);
                    info!(attempt, added, "listing replay recovered payload");
                    return ReplayOutcome::Ingested(added);
                }
                Err(e) => warn!(attempt, error = %e, "listing replay attempt failed"),
            }

            match self.policy.should_retry(attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    error!(%reason, "listing replay abandoned");
                    return ReplayOutcome::Abandoned;
                }
            }
        }
    }

    async fn fetch_data(&self, request: &ReplayRequest) -> Result<Value, DownloadError> {
        let mut body = self.client.get_json(&request.url, &request.request).await?;
        match body.get_mut("data").map(Value::take) {
            Some(data) if !data.is_null() => Ok(data),
            _ => Err(DownloadError::payload(&request.url, "missing `data` field")),
        }
    }
}
