//! Out-of-browser download of resources the browser failed to save.
//!
//! When a UI-triggered download ends without a local file but with a real
//! (non-blob) URL, the session hands a [`DownloadTask`] to this worker. It
//! replays the GET with the session's captured credentials under a fixed
//! retry budget. If every attempt fails, the node goes back to the shared
//! work queue so a browser session exports it again.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use super::client::HttpClient;
use super::filename::filename_from_url;
use super::headers::RequestContext;
use super::retry::{RetryDecision, RetryPolicy};
use crate::ledger::{FailedEntry, OutcomeLedger};
use crate::queue::{ClaimSet, WorkQueue};
use crate::tree::Node;

/// Ledger reason for an exhausted fallback download.
pub const FALLBACK_FAILURE_REASON: &str = "download failed";

/// Everything needed to fetch one resource outside the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    /// The node being exported.
    pub node: Node,
    /// Resolved source URL reported by the browser.
    pub url: String,
    /// Credentials captured by the session that produced the task.
    pub request: RequestContext,
    /// Destination directory.
    pub dest_dir: PathBuf,
    /// Sanitized base name; used when the URL has no usable file name.
    pub base_name: String,
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    /// The body was written to this path.
    Saved(PathBuf),
    /// Every attempt failed; the node was re-queued.
    Requeued,
}

/// Worker that drains the download task queue.
#[derive(Debug, Clone)]
pub struct FallbackDownloader {
    client: HttpClient,
    policy: RetryPolicy,
    ledger: Arc<OutcomeLedger>,
    file_claims: Arc<ClaimSet>,
    work_queue: Arc<WorkQueue<Node>>,
}

impl FallbackDownloader {
    /// Creates a worker sharing the run's ledger, file claims and work queue.
    #[must_use]
    pub fn new(
        client: HttpClient,
        policy: RetryPolicy,
        ledger: Arc<OutcomeLedger>,
        file_claims: Arc<ClaimSet>,
        work_queue: Arc<WorkQueue<Node>>,
    ) -> Self {
        Self {
            client,
            policy,
            ledger,
            file_claims,
            work_queue,
        }
    }

    /// Processes tasks forever; the owner aborts the task to stop it.
    pub async fn run(self, tasks: Arc<WorkQueue<DownloadTask>>) {
        loop {
            let task = tasks.pop().await;
            self.process(task).await;
        }
    }

    /// Downloads one task, retrying per the policy.
    #[instrument(skip(self, task), fields(url = %task.url, node = %task.node.dentry_uuid))]
    pub async fn process(&self, task: DownloadTask) -> FallbackOutcome {
        let file_name = filename_from_url(&task.url).unwrap_or_else(|| task.base_name.clone());
        let target = task.dest_dir.join(file_name);

        if let Err(e) = tokio::fs::create_dir_all(&task.dest_dir).await {
            error!(dir = %task.dest_dir.display(), error = %e, "cannot create destination");
            return self.give_up(task);
        }

        let mut attempt = 1;
        loop {
            match self
                .client
                .download_to_path(&task.url, &task.request, &target)
                .await
            {
                Ok(bytes) => {
                    info!(path = %target.display(), bytes, attempt, "fallback download saved");
                    return FallbackOutcome::Saved(target);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "fallback download attempt failed");
                }
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
                    error!(%reason, "giving up on fallback download; re-queueing node");
                    return self.give_up(task);
                }
            }
        }
    }

    fn give_up(&self, task: DownloadTask) -> FallbackOutcome {
        self.ledger.record_failed(FailedEntry {
            name: task.base_name,
            reason: FALLBACK_FAILURE_REASON.to_string(),
            url_or_type: task.url,
        });
        self.file_claims.release(&task.node.dentry_uuid);
        self.work_queue.push(task.node);
        FallbackOutcome::Requeued
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn node() -> Node {
        serde_json::from_value(json!({"name": "A.docx", "dentryUuid": "u1", "dentryType": "file"}))
            .unwrap()
    }

    fn worker(
        ledger: &Arc<OutcomeLedger>,
        claims: &Arc<ClaimSet>,
        queue: &Arc<WorkQueue<Node>>,
    ) -> FallbackDownloader {
        FallbackDownloader::new(
            HttpClient::new(),
            RetryPolicy::new(3, Duration::ZERO),
            Arc::clone(ledger),
            Arc::clone(claims),
            Arc::clone(queue),
        )
    }

    #[tokio::test]
    async fn test_saves_under_url_file_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/A.docx"))
            .respond_with(ResponseTemplate::new(200).set_body_string("bytes"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(OutcomeLedger::in_memory());
        let claims = Arc::new(ClaimSet::new());
        let queue = Arc::new(WorkQueue::new());
        let task = DownloadTask {
            node: node(),
            url: format!("{}/files/A.docx?token=1", server.uri()),
            request: RequestContext::default(),
            dest_dir: dir.path().join("Root").join("A"),
            base_name: "A".to_string(),
        };

        let outcome = worker(&ledger, &claims, &queue).process(task).await;

        let expected = dir.path().join("Root").join("A").join("A.docx");
        assert_eq!(outcome, FallbackOutcome::Saved(expected.clone()));
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "bytes");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_records_failure_and_requeues() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(OutcomeLedger::in_memory());
        let claims = Arc::new(ClaimSet::new());
        claims.claim("u1");
        let queue = Arc::new(WorkQueue::new());
        let url = format!("{}/x", server.uri());
        let task = DownloadTask {
            node: node(),
            url: url.clone(),
            request: RequestContext::default(),
            dest_dir: dir.path().to_path_buf(),
            base_name: "A".to_string(),
        };

        let outcome = worker(&ledger, &claims, &queue).process(task).await;

        assert_eq!(outcome, FallbackOutcome::Requeued);
        assert_eq!(
            ledger.failed(),
            vec![FailedEntry {
                name: "A".to_string(),
                reason: FALLBACK_FAILURE_REASON.to_string(),
                url_or_type: url,
            }]
        );
        assert!(!claims.contains("u1"));
        assert_eq!(queue.try_pop().map(|n| n.dentry_uuid), Some("u1".to_string()));
    }
}
