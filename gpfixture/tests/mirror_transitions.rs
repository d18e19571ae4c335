#![cfg(feature = "test-utils")]

use std::time::Duration;

use gpfixture::error::ErrorKind;
use gpfixture::sync::SyncEndpoint;
use gpfixture::test_utils::database::text_rows;
use gpfixture::test_utils::{test_config, test_harness};
use gpfixture_telemetry::tracing::init_test_tracing;
use tokio::time::Instant;

const CHANGE_TRACKING: &str = "where mode = 'c'";
const NOT_IN_SYNC_OR_DOWN: &str = "mode <> 's' or status <> 'u'";
const RESYNC: &str = "where mode = 'r'";
const NOT_IN_SYNC: &str = "where mode <> 's'";

#[tokio::test(start_paused = true)]
async fn mirror_failure_and_recovery_cycle() {
    init_test_tracing();

    let (harness, client, _) = test_harness(test_config());
    let endpoint = harness.sync_endpoint();

    // A mirror goes down on the third probe.
    client
        .on_sequence(
            CHANGE_TRACKING,
            vec![
                text_rows(&[&["0"]]),
                text_rows(&[&["0"]]),
                text_rows(&[&["1"]]),
            ],
        )
        .await;
    // Recovery: two segments out of sync, one of them still in change tracking.
    client
        .on_sequence(RESYNC, vec![text_rows(&[&["1"]]), text_rows(&[&["2"]])])
        .await;
    // Registered first: the insync query also contains the plain out of sync filter.
    client
        .on_sequence(
            NOT_IN_SYNC_OR_DOWN,
            vec![text_rows(&[&["2"]]), text_rows(&[&["0"]])],
        )
        .await;
    client.on(NOT_IN_SYNC, text_rows(&[&["2"]])).await;

    let start = Instant::now();
    let in_change_tracking = harness
        .wait_till_change_tracking_transition(&endpoint)
        .await
        .unwrap();
    assert_eq!(in_change_tracking, 1);
    assert_eq!(start.elapsed(), Duration::from_secs(60));

    harness.wait_till_resync_transition(&endpoint).await.unwrap();
    harness.wait_till_insync_transition(&endpoint).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(120));

    let calls = client.calls().await;
    assert!(calls.iter().all(|call| !call.execute));
    assert!(calls.iter().all(|call| call.target.dbname == "template1"
        && call.target.host.as_deref() == Some("localhost")
        && call.target.port == Some(15432)));
}

#[tokio::test(start_paused = true)]
async fn transition_is_observed_from_another_endpoint() {
    init_test_tracing();

    let (harness, client, _) = test_harness(test_config());
    client.on(NOT_IN_SYNC_OR_DOWN, text_rows(&[&["0"]])).await;

    let standby = SyncEndpoint::new("smdw", 5432, "gpadmin");
    harness.wait_till_insync_transition(&standby).await.unwrap();

    let calls = client.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target.host.as_deref(), Some("smdw"));
    assert_eq!(calls[0].target.user.as_deref(), Some("gpadmin"));
}

#[tokio::test(start_paused = true)]
async fn cluster_that_never_syncs_times_out_after_forty_minutes() {
    init_test_tracing();

    let (harness, client, _) = test_harness(test_config());
    client.on(NOT_IN_SYNC_OR_DOWN, text_rows(&[&["1"]])).await;

    let start = Instant::now();
    let err = harness
        .wait_till_insync_transition(&harness.sync_endpoint())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.detail(), Some("cluster not in sync transition"));
    assert_eq!(client.count_calls(NOT_IN_SYNC_OR_DOWN).await, 81);
    assert_eq!(start.elapsed(), Duration::from_secs(80 * 30));
}

#[tokio::test(start_paused = true)]
async fn probe_failure_stops_waiting() {
    init_test_tracing();

    let (harness, client, _) = test_harness(test_config());
    client
        .fail(
            CHANGE_TRACKING,
            gpfixture::fixture_error!(ErrorKind::ConnectionFailed, "Greenplum client error"),
        )
        .await;

    let err = harness
        .wait_till_change_tracking_transition(&harness.sync_endpoint())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    assert_eq!(client.count_calls(CHANGE_TRACKING).await, 1);
}
