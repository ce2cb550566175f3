//! Integration tests for exporting file nodes through a session.
//!
//! Sessions drive a scripted in-memory browser with zero pauses and
//! production retry budgets.

mod support;

use std::sync::Arc;

use harvester_core::download::RequestContext;
use harvester_core::session::{ExportOutcome, RETRY_BUDGET_EXHAUSTED, UNKNOWN_FORMAT};
use harvester_core::{
    CrawlContext, CrawlTimings, Gate, Node, OutcomeLedger, RetryBudgets, SessionDriver,
    WorkspaceConfig,
};
use serde_json::json;
use support::mock_browser::{
    ScriptedBrowser, SharedState, completed, download_button, interrupted, listing,
    permission_banner, row,
};
use tempfile::TempDir;

fn context(root: &TempDir) -> CrawlContext {
    CrawlContext::new(
        WorkspaceConfig::new("https://alidocs.dingtalk.com", "corp", "lib"),
        root.path().join("lib"),
        Arc::new(OutcomeLedger::in_memory()),
    )
    .with_timings(CrawlTimings::instant())
    .with_budgets(RetryBudgets::instant())
}

fn driver(ctx: &CrawlContext) -> (SessionDriver, SharedState) {
    let (browser, state) = ScriptedBrowser::new();
    let driver = SessionDriver::new(0, Box::new(browser), ctx.clone(), Gate::new(), Gate::new());
    (driver, state)
}

fn file(name: &str, uuid: &str) -> Node {
    serde_json::from_value(json!({
        "name": name,
        "dentryUuid": uuid,
        "dentryType": "file",
        "ancestorList": [{"name": "Team"}]
    }))
    .expect("valid node")
}

#[tokio::test]
async fn test_existing_export_is_skipped_without_touching_the_browser() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let dest = root.path().join("lib").join("Team").join("report");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("report.docx"), b"old").unwrap();

    let (mut driver, state) = driver(&ctx);
    let node = file("report.docx", "u1");

    let first = driver.export_file(&node).await.unwrap();
    let second = driver.export_file(&node).await.unwrap();

    assert_eq!(first, ExportOutcome::AlreadyExported);
    assert_eq!(second, ExportOutcome::AlreadyClaimed);
    assert!(state.lock().unwrap().calls.is_empty());
    assert_eq!(ctx.ledger.counts(), (0, 0, 0));
}

#[tokio::test]
async fn test_retry_budget_reloads_once_then_gives_up() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    state.lock().unwrap().show(&row("u1"));

    let outcome = driver.export_file(&file("report.docx", "u1")).await.unwrap();

    assert_eq!(outcome, ExportOutcome::GaveUp);
    let state = state.lock().unwrap();
    assert_eq!(state.count("configure"), 6);
    assert_eq!(state.count("reload"), 1);
    let reload = state.position("reload", 0).unwrap();
    assert!(state.position("configure", 2).unwrap() < reload);
    assert!(reload < state.position("configure", 3).unwrap());

    let failed = ctx.ledger.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "report");
    assert_eq!(failed[0].reason, RETRY_BUDGET_EXHAUSTED);
    assert_eq!(failed[0].url_or_type, "docx");
    assert!(ctx.ledger.no_permission().is_empty());
    assert!(ctx.file_claims.contains("u1"));
}

#[tokio::test]
async fn test_completed_download_needs_no_fallback() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u1"));
        state.show(&download_button());
        state
            .download_plan
            .push_back(completed("/tmp/lib/Team/report/report.docx"));
    }

    let outcome = driver.export_file(&file("report.docx", "u1")).await.unwrap();

    assert_eq!(
        outcome,
        ExportOutcome::Completed(Some("/tmp/lib/Team/report/report.docx".into()))
    );
    assert!(ctx.download_queue.is_empty());
    let state = state.lock().unwrap();
    assert_eq!(state.count("configure"), 1);
    let target = &state.targets[0];
    assert_eq!(target.dir, root.path().join("lib").join("Team").join("report"));
    assert_eq!(target.file_name, "report");
    assert!(target.dir.is_dir());
}

#[tokio::test]
async fn test_failed_download_with_real_url_goes_to_fallback() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    let credentials = RequestContext::new(
        json!({"x-csrf-token": "tok"}),
        json!([{"name": "sid", "value": "s1"}]),
    );
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u1"));
        state.show(&download_button());
        state.captured.push(listing("Team", json!([]), credentials.clone()));
        state
            .download_plan
            .push_back(interrupted("https://files.example.com/report.docx?sig=1"));
    }
    driver.harvest_listings().await;

    let outcome = driver.export_file(&file("report.docx", "u1")).await.unwrap();

    assert_eq!(outcome, ExportOutcome::HandedToFallback);
    assert_eq!(ctx.download_queue.len(), 1);
    let task = ctx.download_queue.try_pop().unwrap();
    assert_eq!(task.url, "https://files.example.com/report.docx?sig=1");
    assert_eq!(task.request, credentials);
    assert_eq!(task.base_name, "report");
    assert_eq!(task.node.dentry_uuid, "u1");
}

#[tokio::test]
async fn test_blob_download_without_file_is_retried() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u1"));
        state.show(&download_button());
        state
            .download_plan
            .push_back(interrupted("blob:https://alidocs.dingtalk.com/x"));
        state
            .download_plan
            .push_back(completed("/tmp/lib/Team/report/report.docx"));
    }

    let outcome = driver.export_file(&file("report.docx", "u1")).await.unwrap();

    assert!(matches!(outcome, ExportOutcome::Completed(Some(_))));
    assert!(ctx.download_queue.is_empty());
    assert_eq!(state.lock().unwrap().count("configure"), 2);
}

#[tokio::test]
async fn test_no_permission_is_recorded_once_and_never_retried() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u1"));
        state.show_text(&permission_banner(), "暂无权限访问，请联系管理员");
    }
    let node = file("Plan.adoc", "u1");

    let first = driver.export_file(&node).await.unwrap();
    let second = driver.export_file(&node).await.unwrap();

    assert_eq!(first, ExportOutcome::NoPermission);
    assert_eq!(second, ExportOutcome::AlreadyClaimed);
    assert_eq!(state.lock().unwrap().count("configure"), 0);
    let entries = ctx.ledger.no_permission();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "Team");
    assert_eq!(entries[0].name, "Plan");
    assert_eq!(entries[0].file_type, "adoc");
}

#[tokio::test]
async fn test_banner_without_permission_text_does_not_block_export() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u1"));
        state.show_text(&permission_banner(), "申请编辑权限");
        state.show(&download_button());
        state.download_plan.push_back(completed("/tmp/x.pdf"));
    }

    let outcome = driver.export_file(&file("x.pdf", "u1")).await.unwrap();

    assert!(matches!(outcome, ExportOutcome::Completed(_)));
    assert!(ctx.ledger.no_permission().is_empty());
}

#[tokio::test]
async fn test_unknown_format_without_controls_is_skipped() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    state.lock().unwrap().show(&row("u1"));

    let outcome = driver.export_file(&file("clip.mp4", "u1")).await.unwrap();

    assert_eq!(outcome, ExportOutcome::Skipped);
    assert_eq!(state.lock().unwrap().count("configure"), 1);
    let skipped = ctx.ledger.skipped();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].name, "clip");
    assert_eq!(skipped[0].file_type, "mp4");
    assert_eq!(skipped[0].reason, UNKNOWN_FORMAT);
    assert!(ctx.ledger.failed().is_empty());
}

#[tokio::test]
async fn test_file_claimed_elsewhere_is_left_alone() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    assert!(ctx.file_claims.claim("u1"));
    let (mut driver, state) = driver(&ctx);

    let outcome = driver.export_file(&file("report.docx", "u1")).await.unwrap();

    assert_eq!(outcome, ExportOutcome::AlreadyClaimed);
    assert!(state.lock().unwrap().calls.is_empty());
}

#[tokio::test]
async fn test_folder_row_is_clicked_to_expand() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    state.lock().unwrap().show(&row("f1"));
    let folder: Node = serde_json::from_value(json!({
        "name": "Docs",
        "dentryUuid": "f1",
        "dentryType": "folder"
    }))
    .unwrap();

    driver.process_node(&folder).await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(
        state.calls[0],
        "open https://alidocs.dingtalk.com/i/nodes/f1"
    );
    assert_eq!(state.count("click"), 1);
    assert!(ctx.file_claims.is_empty());
}

#[tokio::test]
async fn test_unrendered_folder_row_is_an_error() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    let folder: Node = serde_json::from_value(json!({
        "name": "Docs",
        "dentryUuid": "f1",
        "dentryType": "folder"
    }))
    .unwrap();

    let result = driver.process_node(&folder).await;

    assert!(result.is_err());
    assert_eq!(state.lock().unwrap().count("click"), 0);
}

#[tokio::test]
async fn test_bodiless_listing_is_queued_for_replay() {
    let root = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&root);
    let (mut driver, state) = driver(&ctx);
    {
        let mut state = state.lock().unwrap();
        let mut bodiless = listing("Team", json!([]), RequestContext::default());
        bodiless.body = None;
        state.captured.push(bodiless);
        state.captured.push(listing(
            "Team",
            json!([
                {"name": "a.pdf", "dentryUuid": "a", "dentryType": "file"},
                {"name": "Sub", "dentryUuid": "b", "dentryType": "folder"}
            ]),
            RequestContext::default(),
        ));
    }

    driver.harvest_listings().await;

    assert_eq!(ctx.replay_queue.len(), 1);
    assert_eq!(ctx.work_queue().len(), 2);
    assert!(ctx.seen_nodes().contains("a"));
    assert!(driver.last_request().is_empty());
}
