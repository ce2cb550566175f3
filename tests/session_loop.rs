//! Integration tests for the session main loop.

mod support;

use std::sync::Arc;
use std::time::Duration;

use harvester_core::{
    CrawlContext, CrawlTimings, Gate, Node, OutcomeLedger, RetryBudgets, SessionDriver,
    WorkspaceConfig,
};
use serde_json::json;
use support::mock_browser::{ScriptedBrowser, completed, download_button, row};
use tempfile::TempDir;

fn context(root: &TempDir, budgets: RetryBudgets) -> CrawlContext {
    CrawlContext::new(
        WorkspaceConfig::new("https://alidocs.dingtalk.com", "corp", "lib"),
        root.path().join("lib"),
        Arc::new(OutcomeLedger::in_memory()),
    )
    .with_timings(CrawlTimings::instant())
    .with_budgets(budgets)
}

fn node(value: serde_json::Value) -> Node {
    serde_json::from_value(value).expect("valid node")
}

fn logged_in() -> Gate {
    let login = Gate::new();
    login.open();
    login
}

#[tokio::test]
async fn test_session_ends_after_idle_rounds() {
    let root = TempDir::new().expect("failed to create temp dir");
    let budgets = RetryBudgets {
        idle_rounds: 3,
        ..RetryBudgets::instant()
    };
    let ctx = context(&root, budgets);
    let (browser, state) = ScriptedBrowser::new();

    let summary = SessionDriver::new(0, Box::new(browser), ctx.clone(), logged_in(), Gate::new())
        .run()
        .await;

    assert_eq!(summary.nodes_processed, 0);
    assert_eq!(summary.nodes_abandoned, 0);
    let state = state.lock().unwrap();
    assert_eq!(state.drains, 3);
    assert_eq!(
        state.calls,
        vec![
            format!("open {}", ctx.workspace.entry_url()),
            format!("open {}", ctx.workspace.library_url()),
            "close".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_processing_work_resets_the_idle_count() {
    let root = TempDir::new().expect("failed to create temp dir");
    let budgets = RetryBudgets {
        idle_rounds: 2,
        ..RetryBudgets::instant()
    };
    let ctx = context(&root, budgets);
    let (browser, state) = ScriptedBrowser::new();
    state.lock().unwrap().show(&row("f1"));
    ctx.work_queue().push(node(json!({
        "name": "Docs", "dentryUuid": "f1", "dentryType": "folder"
    })));

    let summary = SessionDriver::new(0, Box::new(browser), ctx.clone(), logged_in(), Gate::new())
        .run()
        .await;

    assert_eq!(summary.nodes_processed, 1);
    // One iteration for the node, then the full idle budget.
    assert_eq!(state.lock().unwrap().drains, 3);
}

#[tokio::test]
async fn test_node_is_abandoned_after_its_attempts_and_crawl_continues() {
    let root = TempDir::new().expect("failed to create temp dir");
    let budgets = RetryBudgets::instant();
    let ctx = context(&root, budgets);
    let (browser, state) = ScriptedBrowser::new();
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u2"));
        state.show(&download_button());
        state.download_plan.push_back(completed("/tmp/b.pdf"));
    }
    // The folder row never renders, so every attempt fails.
    ctx.work_queue().push(node(json!({
        "name": "Ghost", "dentryUuid": "f1", "dentryType": "folder"
    })));
    ctx.work_queue().push(node(json!({
        "name": "b.pdf", "dentryUuid": "u2", "dentryType": "file"
    })));

    let summary = SessionDriver::new(0, Box::new(browser), ctx.clone(), logged_in(), Gate::new())
        .run()
        .await;

    assert_eq!(summary.nodes_processed, 2);
    assert_eq!(summary.nodes_abandoned, 1);
    let state = state.lock().unwrap();
    let folder_page = format!("open {}", ctx.workspace.node_url("f1"));
    assert_eq!(
        state.calls.iter().filter(|c| **c == folder_page).count(),
        budgets.node_attempts as usize
    );
    assert_eq!(state.count("configure"), 1);
    assert!(ctx.file_claims.contains("u2"));
    assert!(!ctx.file_claims.contains("f1"));
    assert_eq!(ctx.ledger.counts(), (0, 0, 0));
    assert!(ctx.work_queue().is_empty());
}

#[tokio::test]
async fn test_file_node_ends_with_its_export() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root, RetryBudgets::instant());
    let (browser, state) = ScriptedBrowser::new();
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u2"));
        state.show(&download_button());
        state.download_plan.push_back(completed("/tmp/b.pdf"));
    }
    let mut driver = SessionDriver::new(0, Box::new(browser), ctx.clone(), Gate::new(), Gate::new());

    driver
        .process_node(&node(json!({"name": "b.pdf", "dentryUuid": "u2", "dentryType": "file"})))
        .await
        .unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.lookups_of(&row("u2")), 1);
    assert_eq!(state.count("scroll_into_view"), 1);
    assert!(state.position("scroll_into_view", 0) < state.position("configure", 0));
    assert!(ctx.file_claims.contains("u2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_gate_ends_an_idle_session() {
    let root = TempDir::new().expect("failed to create temp dir");
    let budgets = RetryBudgets {
        idle_rounds: u32::MAX,
        ..RetryBudgets::instant()
    };
    let ctx = context(&root, budgets).with_timings(CrawlTimings {
        idle_pause: Duration::from_millis(5),
        ..CrawlTimings::instant()
    });
    let (browser, state) = ScriptedBrowser::new();
    let stop = Gate::new();

    let session = tokio::spawn(
        SessionDriver::new(0, Box::new(browser), ctx.clone(), logged_in(), stop.clone()).run(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.open();
    let summary = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not stop")
        .unwrap();

    assert_eq!(summary.nodes_processed, 0);
    let state = state.lock().unwrap();
    assert!(state.drains >= 1);
    assert!(state.calls.contains(&format!("open {}", ctx.workspace.library_url())));
    assert_eq!(state.calls.last().map(String::as_str), Some("close"));
}
