use std::time::Duration;

use crate::support::{
    helpers::{config_for, expected_ids, init_tracing, sorted_ids},
    mock_mailbox::{MockMailbox, MockMailboxServer},
};
use anyhow::{Context, Result};
use mailmeta::{Record, Runner};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_lists_fetches_and_persists() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::with_generated(12);
    let server = MockMailboxServer::start(mailbox.clone()).await?;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("records.jsonl");

    let config = config_for(&server)
        .max_results(10)
        .page_size(4)
        .output_path(&output)
        .build()?;
    let runner = Runner::new(config)?;

    let report = timeout(Duration::from_secs(10), runner.run()).await??;
    assert_eq!(sorted_ids(&report.records), expected_ids("m", 10));
    assert_eq!(report.summary.published, 10);
    assert!(!report.summary.cancelled);

    let queries = mailbox.list_queries();
    assert_eq!(queries.len(), 3, "10 results at 4 per page");
    assert!(queries.iter().all(|q| q == "-is:chat"));

    let snapshot = runner.telemetry().snapshot();
    assert_eq!(snapshot.listed_pages, 3);
    assert_eq!(snapshot.listed_refs, 10);
    assert_eq!(snapshot.fetched_records, 10);

    let contents = tokio::fs::read_to_string(&output).await?;
    let first_line = contents.lines().next().context("sink should hold lines")?;
    let keys: serde_json::Value = serde_json::from_str(first_line)?;
    for key in ["threadId", "timestampSeconds", "fromAddress", "toAddresses", "bodyText"] {
        assert!(keys.get(key).is_some(), "missing {key} in {first_line}");
    }
    assert!(keys.get("thread_id").is_none());

    let persisted: Vec<Record> = contents
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()
        .context("sink lines should deserialize into records")?;
    assert_eq!(sorted_ids(&persisted), expected_ids("m", 10));
    let first = persisted
        .iter()
        .find(|r| r.id == "m0")
        .context("m0 persisted")?;
    assert_eq!(first.from_address, "sender0@example.com");
    assert_eq!(first.subject, "message 0");

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_appends_query_terms() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::with_generated(2);
    let server = MockMailboxServer::start(mailbox.clone()).await?;
    let config = config_for(&server).query("label:work").build()?;
    let runner = Runner::new(config)?;

    let report = runner.run().await?;
    assert_eq!(report.records.len(), 2);
    assert_eq!(mailbox.list_queries(), vec!["-is:chat label:work"]);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_query_survives_url_encoding() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::with_generated(1);
    let server = MockMailboxServer::start(mailbox.clone()).await?;
    let config = config_for(&server)
        .query("subject:(café + thé) 100%")
        .build()?;
    let runner = Runner::new(config)?;

    let report = runner.run().await?;
    assert_eq!(report.records.len(), 1);
    assert_eq!(
        mailbox.list_queries(),
        vec!["-is:chat subject:(café + thé) 100%"]
    );
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_cancellation_returns_partial_report() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::with_generated(6);
    mailbox.fail_next("m2", usize::MAX);
    let server = MockMailboxServer::start(mailbox.clone()).await?;
    let config = config_for(&server).worker_count(2).build()?;
    let runner = Runner::new(config)?;

    let token = runner.cancellation_token();
    let watcher = {
        let mailbox = mailbox.clone();
        tokio::spawn(async move {
            while mailbox.get_calls("m2") < 4 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            token.cancel();
        })
    };

    let report = timeout(Duration::from_secs(10), runner.run()).await??;
    watcher.await?;

    assert!(report.summary.cancelled);
    assert!(!report.records.iter().any(|r| r.id == "m2"));
    assert_eq!(report.records.len(), 5);
    assert_eq!(report.summary.abandoned(), 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_surfaces_listing_failures() -> Result<()> {
    init_tracing();
    let server = MockMailboxServer::start(MockMailbox::with_generated(3)).await?;
    let config = config_for(&server).access_token("expired").build()?;
    let runner = Runner::new(config)?;

    let err = runner
        .run()
        .await
        .expect_err("listing with a rejected token must fail the run");
    let message = format!("{err:#}");
    assert!(message.contains("failed to list messages"), "{message}");
    assert!(message.contains("401"), "{message}");
    assert_eq!(runner.telemetry().snapshot().dispatched, 0);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_runner_skips_listing() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::with_generated(3);
    let server = MockMailboxServer::start(mailbox.clone()).await?;
    let runner = Runner::new(config_for(&server).build()?)?;

    runner.cancellation_token().cancel();
    let report = runner.run().await?;
    assert!(report.summary.cancelled);
    assert!(report.records.is_empty());
    assert!(mailbox.list_queries().is_empty());
    server.shutdown().await;
    Ok(())
}
