//! Integration tests for the HTTP side of a run: fallback downloads and
//! listing replays fed by a session, against a mock server.

mod support;

use std::sync::Arc;
use std::time::Duration;

use harvester_core::download::{FALLBACK_FAILURE_REASON, RequestContext};
use harvester_core::ledger::FAILED_LOG;
use harvester_core::session::ExportOutcome;
use harvester_core::{
    CrawlContext, CrawlTimings, FallbackDownloader, Gate, HttpClient, Node, OutcomeLedger,
    ReplayWorker, RetryBudgets, SessionDriver, WorkspaceConfig,
};
use serde_json::json;
use support::mock_browser::{ScriptedBrowser, completed, download_button, interrupted, listing, row};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context(output: &TempDir) -> CrawlContext {
    let ledger = OutcomeLedger::open(output.path()).expect("ledger opens");
    CrawlContext::new(
        WorkspaceConfig::new("https://alidocs.dingtalk.com", "corp", "lib"),
        output.path().join("lib"),
        Arc::new(ledger),
    )
    .with_timings(CrawlTimings::instant())
    .with_budgets(RetryBudgets::instant())
}

fn file(name: &str, uuid: &str) -> Node {
    serde_json::from_value(json!({"name": name, "dentryUuid": uuid, "dentryType": "file"}))
        .expect("valid node")
}

fn spawn_fallback(ctx: &CrawlContext) -> tokio::task::JoinHandle<()> {
    let worker = FallbackDownloader::new(
        HttpClient::new(),
        ctx.budgets.fallback,
        Arc::clone(&ctx.ledger),
        Arc::clone(&ctx.file_claims),
        Arc::clone(ctx.work_queue()),
    );
    tokio::spawn(worker.run(Arc::clone(&ctx.download_queue)))
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_session_handoff_is_saved_by_fallback_with_session_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/report.docx"))
        .and(header("x-csrf-token", "tok"))
        .and(header("cookie", "sid=s1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("report body"))
        .expect(1)
        .mount(&server)
        .await;

    let output = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&output);
    let (browser, state) = ScriptedBrowser::new();
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u1"));
        state.show(&download_button());
        state.captured.push(listing(
            "lib",
            json!([]),
            RequestContext::new(
                json!({"x-csrf-token": "tok"}),
                json!([{"name": "sid", "value": "s1"}]),
            ),
        ));
        state
            .download_plan
            .push_back(interrupted(&format!("{}/files/report.docx", server.uri())));
    }
    let mut driver = SessionDriver::new(0, Box::new(browser), ctx.clone(), Gate::new(), Gate::new());
    driver.harvest_listings().await;

    let outcome = driver.export_file(&file("report.docx", "u1")).await.unwrap();
    assert_eq!(outcome, ExportOutcome::HandedToFallback);

    let pool = spawn_fallback(&ctx);
    let saved = output.path().join("lib").join("report").join("report.docx");
    eventually(|| std::fs::read_to_string(&saved).is_ok_and(|body| body == "report body")).await;
    pool.abort();

    assert!(ctx.work_queue().is_empty());
    assert!(ctx.file_claims.contains("u1"));
}

#[tokio::test]
async fn test_exhausted_fallback_requeues_node_for_another_export() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(10)
        .mount(&server)
        .await;

    let output = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&output);
    let url = format!("{}/files/report.docx", server.uri());
    let (browser, state) = ScriptedBrowser::new();
    {
        let mut state = state.lock().unwrap();
        state.show(&row("u1"));
        state.show(&download_button());
        state.download_plan.push_back(interrupted(&url));
        state.download_plan.push_back(completed("/tmp/report.docx"));
    }
    let mut driver = SessionDriver::new(0, Box::new(browser), ctx.clone(), Gate::new(), Gate::new());
    let node = file("report.docx", "u1");
    driver.export_file(&node).await.unwrap();

    let pool = spawn_fallback(&ctx);
    eventually(|| !ctx.work_queue().is_empty()).await;
    pool.abort();

    let failed = ctx.ledger.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, FALLBACK_FAILURE_REASON);
    assert_eq!(failed[0].url_or_type, url);
    let log = std::fs::read_to_string(output.path().join(FAILED_LOG)).unwrap();
    assert_eq!(log.matches(FALLBACK_FAILURE_REASON).count(), 1);

    // The claim was released, so the re-queued node is exported again.
    let requeued = ctx.work_queue().try_pop().unwrap();
    assert_eq!(requeued.dentry_uuid, "u1");
    let outcome = driver.export_file(&requeued).await.unwrap();
    assert!(matches!(outcome, ExportOutcome::Completed(Some(_))));
}

#[tokio::test]
async fn test_bodiless_listing_is_recovered_by_replay() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/box/api/v2/dentry/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "name": "Docs",
                "children": [
                    {"name": "a.pdf", "dentryUuid": "a", "dentryType": "file"},
                    {"name": "Sub", "dentryUuid": "b", "dentryType": "folder"}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let output = TempDir::new().expect("failed to create temp dir");
    let ctx = context(&output);
    let (browser, state) = ScriptedBrowser::new();
    {
        let mut bodiless = listing("Docs", json!([]), RequestContext::default());
        bodiless.url = format!("{}/box/api/v2/dentry/list?dentryUuid=d", server.uri());
        bodiless.body = None;
        state.lock().unwrap().captured.push(bodiless);
    }
    let mut driver = SessionDriver::new(0, Box::new(browser), ctx.clone(), Gate::new(), Gate::new());
    driver.harvest_listings().await;
    assert_eq!(ctx.replay_queue.len(), 1);

    let worker = ReplayWorker::new(HttpClient::new(), ctx.budgets.replay, ctx.discovery.clone());
    let pool = tokio::spawn(worker.run(Arc::clone(&ctx.replay_queue)));
    eventually(|| ctx.work_queue().len() == 2).await;
    pool.abort();

    assert!(ctx.seen_nodes().contains("a"));
    assert!(ctx.seen_nodes().contains("b"));
    assert!(ctx.replay_queue.is_empty());
}
