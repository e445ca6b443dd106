use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{config_for, expected_ids, init_tracing, sorted_ids},
    mock_mailbox::{MockMailbox, MockMailboxServer, MockMessage},
};
use anyhow::Result;
use mailmeta::{
    list_message_refs, MailboxClient, MailboxError, MessageFetcher, MessageRef, MessageSource,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn mailbox_error(err: &anyhow::Error) -> Option<&MailboxError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MailboxError>())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetched_records_are_normalized() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::new(vec![
        MockMessage::new("m1")
            .header("From", "\"Jane Doe\" <jane@EXAMPLE.com>")
            .header("To", "a@x.com, undisclosed-recipients:;, b@y.com")
            .header("CC", "<Carol@Example.org>")
            .header("Mailing-list", "list devs@example.com; contact devs-owner@example.com")
            .header("Subject", "Quarterly numbers")
            .body("hello from the plain part"),
        MockMessage::new("m2").header("from", "bob@example.net"),
    ]);
    let server = MockMailboxServer::start(mailbox.clone()).await?;
    let config = config_for(&server).build()?;
    let client = Arc::new(MailboxClient::from_config(&config)?);

    let refs = list_message_refs(client.as_ref(), &config.list_request()).await?;
    assert_eq!(
        refs,
        vec![
            MessageRef::new("m1", "thread-m1"),
            MessageRef::new("m2", "thread-m2")
        ]
    );

    let fetcher = MessageFetcher::from_config(client.clone(), &config, Default::default());
    let report = fetcher.fetch_all(&refs).await?;
    assert_eq!(sorted_ids(&report.records), vec!["m1", "m2"]);

    let m1 = report
        .records
        .iter()
        .find(|r| r.id == "m1")
        .expect("m1 record");
    assert_eq!(m1.thread_id, "thread-m1");
    assert_eq!(m1.timestamp_seconds, 1_700_000_000);
    assert_eq!(m1.from_address, "jane@example.com");
    assert_eq!(m1.to_addresses, vec!["a@x.com", "b@y.com"]);
    assert_eq!(m1.cc_addresses, vec!["carol@example.org"]);
    assert!(m1.bcc_addresses.is_empty());
    assert_eq!(m1.mailing_list, "devs@example.com");
    assert_eq!(m1.subject, "Quarterly numbers");
    assert_eq!(m1.snippet, "snippet of m1");
    assert_eq!(m1.body_text, "hello from the plain part");

    let m2 = report
        .records
        .iter()
        .find(|r| r.id == "m2")
        .expect("m2 record");
    assert_eq!(m2.from_address, "bob@example.net");
    assert_eq!(m2.body_text, "");

    assert_eq!(client.metrics().total_requests, 3);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_http_failures_are_retried_once_each() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::with_generated(8);
    mailbox.fail_next("m3", 2);
    mailbox.fail_next("m6", 1);
    mailbox.set_latency(Duration::from_millis(5));
    let server = MockMailboxServer::start(mailbox.clone()).await?;
    let config = config_for(&server).build()?;
    let client = Arc::new(MailboxClient::from_config(&config)?);

    let refs = list_message_refs(client.as_ref(), &config.list_request()).await?;
    let fetcher = MessageFetcher::from_config(client.clone(), &config, Default::default());
    let report = timeout(Duration::from_secs(10), fetcher.fetch_all(&refs)).await??;

    assert_eq!(sorted_ids(&report.records), expected_ids("m", 8));
    assert_eq!(mailbox.get_calls("m3"), 3);
    assert_eq!(mailbox.get_calls("m6"), 2);
    assert_eq!(mailbox.get_calls("m0"), 1);
    assert_eq!(report.summary.failures, 3);
    assert_eq!(report.summary.handoffs, 3);
    assert_eq!(report.summary.published, 8);
    let metrics = client.metrics();
    assert_eq!(metrics.total_errors, 3);
    assert_eq!(metrics.total_status_errors, 3);
    assert_eq!(metrics.total_transport_errors, 0);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_id_cycles_until_cancelled_without_blocking_others() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::with_generated(4);
    let server = MockMailboxServer::start(mailbox.clone()).await?;
    let config = config_for(&server).worker_count(2).build()?;
    let client = Arc::new(MailboxClient::from_config(&config)?);

    let mut refs = vec![MessageRef::new("ghost", "t")];
    refs.extend((0..4).map(|i| MessageRef::new(format!("m{i}"), "t")));

    let token = CancellationToken::new();
    let fetcher = MessageFetcher::from_config(client.clone(), &config, Default::default())
        .with_cancellation_token(token.clone());

    let canceller = {
        let mailbox = mailbox.clone();
        tokio::spawn(async move {
            while mailbox.get_calls("ghost") < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            token.cancel();
        })
    };

    let report = timeout(Duration::from_secs(10), fetcher.fetch_all(&refs)).await??;
    canceller.await?;

    assert!(report.summary.cancelled);
    assert_eq!(sorted_ids(&report.records), expected_ids("m", 4));
    assert_eq!(report.summary.abandoned(), 1);
    assert!(report.summary.failures >= 4);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_token_surfaces_status_error() -> Result<()> {
    init_tracing();
    let server = MockMailboxServer::start(MockMailbox::with_generated(1)).await?;
    let config = config_for(&server).access_token("wrong-token").build()?;
    let client = MailboxClient::from_config(&config)?;

    let err = list_message_refs(&client, &config.list_request())
        .await
        .expect_err("listing with a bad token must fail");
    match mailbox_error(&err) {
        Some(MailboxError::Status { status, .. }) => assert_eq!(status.as_u16(), 401),
        other => panic!("expected status error, got {other:?} from {err:#}"),
    }
    assert_eq!(client.metrics().total_status_errors, 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_responses_time_out() -> Result<()> {
    init_tracing();
    let mailbox = MockMailbox::with_generated(1);
    mailbox.set_latency(Duration::from_millis(500));
    let server = MockMailboxServer::start(mailbox).await?;
    let config = config_for(&server)
        .request_timeout(Duration::from_millis(50))
        .build()?;
    let client = MailboxClient::from_config(&config)?;

    let err = client
        .fetch_message("m0")
        .await
        .expect_err("fetch should time out");
    assert!(matches!(
        mailbox_error(&err),
        Some(MailboxError::Timeout { .. })
    ));
    let metrics = client.metrics();
    assert_eq!(metrics.total_timeouts, 1);
    assert_eq!(metrics.total_status_errors, 0);
    server.shutdown().await;
    Ok(())
}
