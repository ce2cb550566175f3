//! Scroll-to-locate for the virtualized document tree.
//!
//! The tree only renders rows near the viewport, so a row that is not in the
//! DOM is found by stepping the container's scroll offset and probing after
//! each step.

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::SessionDriver;
use super::selectors::{TREE_METRICS_SCRIPT, tree_container};
use crate::browser::{BrowserError, ElementRef, Locator};

/// Scroll geometry of the tree container.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeMetrics {
    /// Current vertical offset.
    pub scroll_top: f64,
    /// Visible height.
    pub client_height: f64,
    /// Total content height.
    pub scroll_height: f64,
}

impl TreeMetrics {
    #[allow(clippy::cast_possible_truncation)]
    fn top(&self) -> i64 {
        self.scroll_top.round() as i64
    }

    #[allow(clippy::cast_possible_truncation)]
    fn height(&self) -> i64 {
        self.scroll_height.round() as i64
    }
}

impl SessionDriver {
    /// Brings the element matching `target` into the DOM.
    ///
    /// A full pass is restarted up to the locate budget; `None` means the
    /// element never rendered.
    #[instrument(skip(self), fields(session = self.index, target = %target))]
    pub(super) async fn scroll_to_locate(&mut self, target: &Locator) -> Option<ElementRef> {
        for pass in 0..=self.ctx.budgets.locate_retries {
            match self.scan_tree(target).await {
                Ok(Some(element)) => return Some(element),
                Ok(None) => debug!(pass, "element not rendered during pass"),
                Err(e) => warn!(pass, error = %e, "scroll pass failed"),
            }
        }
        None
    }

    async fn scan_tree(&mut self, target: &Locator) -> Result<Option<ElementRef>, BrowserError> {
        let probe = self.ctx.timings.probe_timeout;
        if let Some(element) = self.browser.find_first(target, probe).await? {
            return Ok(Some(element));
        }

        let container = tree_container();
        let tree = self
            .browser
            .find_first(&container, probe)
            .await?
            .ok_or_else(|| BrowserError::element_not_found(&container))?;

        let mut offset = self.tree_metrics().await?.top();
        if offset == 0 {
            self.browser.scroll_element_to(&tree, 0).await?;
            tokio::time::sleep(self.ctx.timings.ui_pause).await;
            if let Some(element) = self.browser.find_first(target, probe).await? {
                return Ok(Some(element));
            }
        }

        let step = self.ctx.budgets.scroll_step.max(1);
        let scroll_probe = self.ctx.timings.scroll_probe_timeout;
        let mut previous_top = None;
        let mut restarted = false;
        loop {
            let metrics = self.tree_metrics().await?;
            let height = metrics.height();
            if offset >= height {
                return Ok(None);
            }

            // A stalled offset past the midpoint means rows above were
            // recycled; rescan once from the top.
            if previous_top == Some(metrics.top()) && offset > height / 2 && !restarted {
                debug!(offset, height, "scroll stalled; restarting from top");
                restarted = true;
                offset = 0;
                previous_top = None;
                self.browser.scroll_element_to(&tree, 0).await?;
                tokio::time::sleep(self.ctx.timings.ui_pause).await;
                continue;
            }
            previous_top = Some(metrics.top());

            offset += step;
            self.browser.scroll_element_to(&tree, offset).await?;
            if let Some(element) = self.browser.find_first(target, scroll_probe).await? {
                return Ok(Some(element));
            }
        }
    }

    async fn tree_metrics(&mut self) -> Result<TreeMetrics, BrowserError> {
        let value = self.browser.run_script(TREE_METRICS_SCRIPT).await?;
        if value.is_null() {
            return Err(BrowserError::element_not_found(tree_container()));
        }
        serde_json::from_value(value).map_err(BrowserError::script)
    }
}
