//! Crash recovery: progress blobs, interrupted claims and aborted tasks

use crate::support::{
    claim, memory_store, run_task, seed, task, test_config, url_row, urls, Page, ScriptedBrowser,
    JOB,
};
use meander::config::FrontierPolicy;
use meander::crawler::{CrawlMachine, TaskOutcome, Worker};
use meander::modules::CollectorState;
use meander::state::{ProgressState, TaskState, UrlState, RESULT_BROWSER_ERROR};
use meander::storage::{NewUrl, SharedStorage, UrlRecord};
use meander::Pipeline;
use std::sync::Arc;

const ROOT: &str = "http://example.com/";

fn linking_site() -> ScriptedBrowser {
    ScriptedBrowser::new()
        .html(ROOT, r#"<a href="/a">A</a> <a href="/b">B</a>"#)
        .html("http://example.com/a", "<p>a</p>")
        .html("http://example.com/b", "<p>b</p>")
}

/// Claims the task and its landing URL the way a run that then crashed would
fn crash_after_claim(storage: &SharedStorage) -> (i64, UrlRecord) {
    let task = claim(storage);
    let url = storage
        .with(|s| s.claim_free_url(task.id, FrontierPolicy::BreadthFirst, 0))
        .unwrap()
        .unwrap();
    (task.id, url)
}

fn save(storage: &SharedStorage, task_id: i64, progress: &ProgressState) {
    let blob = progress.encode().unwrap();
    storage.with(|s| s.save_progress(task_id, &blob)).unwrap();
}

#[tokio::test]
async fn test_unconfirmed_url_is_failed_not_retried() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let (task_id, url) = crash_after_claim(&storage);
    let mut progress = ProgressState::fresh(None);
    progress.initial = false;
    progress.current_url_id = Some(url.id);
    save(&storage, task_id, &progress);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(outcome, TaskOutcome::Finished { processed: 0 });
    assert!(browser.navigations().is_empty());

    let row = url_row(&storage, task_id, ROOT);
    assert_eq!(row.state, UrlState::Complete);
    assert_eq!(row.code, Some(RESULT_BROWSER_ERROR));
    assert_eq!(task(&storage, task_id).state, TaskState::Complete);
}

#[tokio::test]
async fn test_unconfirmed_url_fails_its_waiting_repetitions() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.repetitions = 3;
    seed(&storage, &config, &[ROOT]);

    let (task_id, url) = crash_after_claim(&storage);
    let mut progress = ProgressState::fresh(None);
    progress.initial = false;
    progress.current_url_id = Some(url.id);
    save(&storage, task_id, &progress);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    let rows = urls(&storage, task_id);
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .all(|row| row.state == UrlState::Complete && row.code == Some(RESULT_BROWSER_ERROR)));
    assert!(browser.navigations().is_empty());
}

#[tokio::test]
async fn test_claim_without_checkpoint_is_released() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);
    let (task_id, _) = crash_after_claim(&storage);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(outcome, TaskOutcome::Finished { processed: 3 });
    assert_eq!(url_row(&storage, task_id, ROOT).code, Some(200));
    assert_eq!(browser.navigations()[0], ROOT);
}

#[tokio::test]
async fn test_initial_checkpoint_releases_claimed_url() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);
    let (task_id, _) = crash_after_claim(&storage);
    save(&storage, task_id, &ProgressState::fresh(None));

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(url_row(&storage, task_id, ROOT).code, Some(200));
}

#[tokio::test]
async fn test_seen_set_is_restored_from_blob() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);
    let task_id = claim(&storage).id;

    let mut progress = ProgressState::fresh(None);
    progress.seen_set.insert("http://example.com/a".to_string());
    progress.seen_set.insert("http://example.com/a/".to_string());
    save(&storage, task_id, &progress);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    let crawled: Vec<String> = urls(&storage, task_id)
        .into_iter()
        .map(|row| row.url)
        .collect();
    assert_eq!(crawled, vec![ROOT, "http://example.com/b"]);
}

#[tokio::test]
async fn test_module_state_survives_resume() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.max_urls = 1;
    seed(&storage, &config, &[ROOT]);
    let task_id = claim(&storage).id;

    let mut progress = ProgressState::fresh(None);
    progress
        .modules
        .set("link-collector", &CollectorState { inserted: 1 })
        .unwrap();
    save(&storage, task_id, &progress);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    // The collector already used its budget before the restart
    assert_eq!(urls(&storage, task_id).len(), 1);
}

#[tokio::test]
async fn test_url_limit_counts_links_inserted_after_checkpoint() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.max_depth = 2;
    config.crawler.max_urls = 2;
    seed(&storage, &config, &[ROOT]);
    let task_id = claim(&storage).id;
    let root = url_row(&storage, task_id, ROOT);

    // The landing page was crawled and /a discovered, then the worker died
    // before the next claim could checkpoint the collector's count
    storage
        .with(|s| {
            s.complete_url(root.id, 200, None)?;
            s.insert_url(
                &NewUrl {
                    task_id,
                    site_id: root.site_id,
                    url: "http://example.com/a".to_string(),
                    scheme: "http".to_string(),
                    from_url_id: Some(root.id),
                    depth: 1,
                },
                1,
            )
        })
        .unwrap();
    save(&storage, task_id, &ProgressState::fresh(None));

    let mut browser = ScriptedBrowser::new().html(
        "http://example.com/a",
        r#"<a href="/c">C</a> <a href="/d">D</a>"#,
    );
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    let discovered: Vec<String> = urls(&storage, task_id)
        .into_iter()
        .filter(|row| row.from_url_id.is_some())
        .map(|row| row.url)
        .collect();
    assert_eq!(
        discovered,
        vec!["http://example.com/a", "http://example.com/c"]
    );
}

#[tokio::test]
async fn test_undecodable_blob_fails_claimed_urls_and_restarts() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);
    let (task_id, _) = crash_after_claim(&storage);
    storage
        .with(|s| s.save_progress(task_id, r#"{"version":"0","junk":true}"#))
        .unwrap();

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(outcome, TaskOutcome::Finished { processed: 0 });
    assert_eq!(
        url_row(&storage, task_id, ROOT).code,
        Some(RESULT_BROWSER_ERROR)
    );
}

#[tokio::test]
async fn test_config_drift_does_not_block_resume() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);
    let task_id = claim(&storage).id;
    save(&storage, task_id, &ProgressState::fresh(Some("old-hash".to_string())));

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let task = storage.with(|s| s.get_task(task_id)).unwrap();
    let outcome = CrawlMachine::new(
        &config,
        Some("new-hash".to_string()),
        storage.clone(),
        &mut browser,
        &mut pipeline,
        task,
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(outcome, TaskOutcome::Finished { processed: 3 });
}

#[tokio::test]
async fn test_checkpoint_names_url_in_flight() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site().page("http://example.com/b", Page::Hang);
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let task = claim(&storage);
    let task_id = task.id;

    let mut run_config = config.clone();
    run_config.browser.navigation_timeout_ms = 60_000;
    let machine = CrawlMachine::new(
        &run_config,
        None,
        storage.clone(),
        &mut browser,
        &mut pipeline,
        task,
    )
    .unwrap();

    // Stop the run while /b is being navigated, as a crash would
    let stopped = tokio::time::timeout(std::time::Duration::from_millis(300), machine.run()).await;
    assert!(stopped.is_err());

    let blob = storage
        .with(|s| s.get_task(task_id))
        .unwrap()
        .progress
        .unwrap();
    let progress = ProgressState::decode(&blob).unwrap();
    let in_flight = url_row(&storage, task_id, "http://example.com/b");
    assert!(!progress.initial);
    assert_eq!(progress.current_url_id, Some(in_flight.id));
    assert!(progress.seen_set.contains("http://example.com/b"));
    assert_eq!(in_flight.state, UrlState::Progress);
}

#[tokio::test]
async fn test_worker_resumes_task_it_aborted() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.restart_interval = 1;
    seed(&storage, &config, &[ROOT]);

    // First run: the browser cannot be restarted after the landing page
    let mut first = Worker::new(
        JOB,
        1,
        Arc::new(config.clone()),
        storage.clone(),
        Box::new(linking_site().context_limit(1)),
        Pipeline::from_config(&config, Vec::new()),
    );
    let summary = first.run().await.unwrap();
    assert_eq!(summary.aborted, 1);
    assert_eq!(summary.finished, 0);

    let stolen = storage.with(|s| s.claim_task(JOB, 2)).unwrap();
    assert!(stolen.is_none(), "aborted task must stay with its crawler");

    // Second run of the same crawler picks the task up again
    let mut second = Worker::new(
        JOB,
        1,
        Arc::new(config.clone()),
        storage.clone(),
        Box::new(linking_site()),
        Pipeline::from_config(&config, Vec::new()),
    );
    let summary = second.run().await.unwrap();
    assert_eq!(summary.reopened, 1);
    assert_eq!(summary.finished, 1);

    let rows = urls(&storage, 1);
    assert!(rows.iter().all(|row| row.state == UrlState::Complete));
    assert_eq!(
        url_row(&storage, 1, "http://example.com/a").code,
        Some(RESULT_BROWSER_ERROR)
    );
    assert_eq!(url_row(&storage, 1, "http://example.com/b").code, Some(200));
    assert_eq!(task(&storage, 1).state, TaskState::Complete);
}
