//! Bounded polling for mirror state transitions.
//!
//! A transition is observed through `count(*)` queries over
//! `gp_segment_configuration` on `template1`. The first probe runs
//! immediately, then the probe repeats every [`PollPolicy::interval`] for at
//! most [`PollPolicy::max_attempts`] more times.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use gpfixture_config::shared::{PgConnectionConfig, PollConfig};
use tracing::{debug, info};

use crate::bail;
use crate::command::CommandRunner;
use crate::database::{DbTarget, SqlClient};
use crate::error::{ErrorKind, FixtureError, FixtureResult};
use crate::fixture_error;
use crate::harness::Harness;
use crate::sql;

/// Fixed-interval polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Re-polls allowed after the initial probe.
    pub max_attempts: u32,
}

impl From<PollConfig> for PollPolicy {
    fn from(config: PollConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
        }
    }
}

/// Value satisfying a poll and the number of re-polls it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Probes until `done` holds for an observation.
///
/// Returns [`ErrorKind::Timeout`] once `policy.max_attempts` re-polls have all
/// failed `done`. An error from `probe` is returned as is, including one from
/// the initial probe.
pub async fn poll_until<T, P, Fut, D>(
    policy: PollPolicy,
    mut probe: P,
    done: D,
) -> FixtureResult<PollOutcome<T>>
where
    T: fmt::Debug,
    P: FnMut() -> Fut,
    Fut: Future<Output = FixtureResult<T>>,
    D: Fn(&T) -> bool,
{
    let value = probe().await?;
    debug!(attempt = 0, ?value, "polled");
    if done(&value) {
        return Ok(PollOutcome { value, attempts: 0 });
    }

    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;

        let value = probe().await?;
        debug!(attempt, ?value, "polled");
        if done(&value) {
            return Ok(PollOutcome {
                value,
                attempts: attempt,
            });
        }
    }

    Err(fixture_error!(
        ErrorKind::Timeout,
        "Timed out",
        format!(
            "condition not met after {} attempts every {:?}",
            policy.max_attempts, policy.interval
        )
    ))
}

/// Mirror state a cluster is waited into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterTransition {
    /// At least one segment logs changes for a failed mirror.
    ChangeTracking,
    /// Every segment is synchronized and up.
    InSync,
    /// Every segment that is not synchronized is resynchronizing.
    Resync,
}

impl ClusterTransition {
    /// Count queries issued on every probe, in order.
    pub fn probe_queries(&self) -> Vec<&'static str> {
        match self {
            Self::ChangeTracking => vec![sql::change_tracking_count()],
            Self::InSync => vec![sql::not_insync_or_down_count()],
            Self::Resync => vec![sql::resync_count(), sql::not_insync_count()],
        }
    }

    /// Whether the counts returned by [`Self::probe_queries`] show the
    /// transition completed.
    pub fn is_reached(&self, counts: &[i64]) -> bool {
        match (self, counts) {
            (Self::ChangeTracking, [change_tracking]) => *change_tracking > 0,
            (Self::InSync, [not_in_sync]) => *not_in_sync == 0,
            (Self::Resync, [resync, not_in_sync]) => resync == not_in_sync,
            _ => false,
        }
    }

    pub fn timeout_message(&self) -> &'static str {
        match self {
            Self::ChangeTracking => "cluster not in change tracking",
            Self::InSync | Self::Resync => "cluster not in sync transition",
        }
    }
}

impl fmt::Display for ClusterTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChangeTracking => f.write_str("change tracking"),
            Self::InSync => f.write_str("insync"),
            Self::Resync => f.write_str("resync"),
        }
    }
}

/// Server a transition is observed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl SyncEndpoint {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }

    fn target(&self) -> DbTarget {
        DbTarget::template()
            .on_host(self.host.clone(), self.port)
            .as_user(self.user.clone())
    }
}

impl From<&PgConnectionConfig> for SyncEndpoint {
    fn from(config: &PgConnectionConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.username.clone())
    }
}

impl<C, R> Harness<C, R>
where
    C: SqlClient,
    R: CommandRunner,
{
    /// The configured master, where transitions are observed by default.
    pub fn sync_endpoint(&self) -> SyncEndpoint {
        SyncEndpoint::from(&self.config().connection)
    }

    async fn probe_transition(
        &self,
        transition: ClusterTransition,
        target: &DbTarget,
    ) -> FixtureResult<Vec<i64>> {
        let queries = transition.probe_queries();
        let mut counts = Vec::with_capacity(queries.len());
        for query in queries {
            let rows = self.client().query(target, query).await?;
            let Some(row) = rows.first() else {
                bail!(ErrorKind::EmptyResult, "error running query", query);
            };
            counts.push(row.get_i64(0)?);
        }

        Ok(counts)
    }

    /// Polls `endpoint` until `transition` is reached and returns the last
    /// observed counts.
    pub async fn wait_for_transition(
        &self,
        transition: ClusterTransition,
        endpoint: &SyncEndpoint,
    ) -> FixtureResult<Vec<i64>> {
        let policy = PollPolicy::from(self.config().transition_poll);
        let target = endpoint.target();

        info!(
            %transition,
            host = endpoint.host,
            port = endpoint.port,
            "waiting for cluster transition"
        );

        let outcome = poll_until(
            policy,
            || self.probe_transition(transition, &target),
            |counts: &Vec<i64>| transition.is_reached(counts),
        )
        .await
        .map_err(|err| timeout_as(err, transition))?;

        info!(%transition, attempts = outcome.attempts, counts = ?outcome.value, "cluster transition reached");

        Ok(outcome.value)
    }

    /// Waits until at least one segment is in change tracking and returns how
    /// many are.
    pub async fn wait_till_change_tracking_transition(
        &self,
        endpoint: &SyncEndpoint,
    ) -> FixtureResult<i64> {
        let counts = self
            .wait_for_transition(ClusterTransition::ChangeTracking, endpoint)
            .await?;

        Ok(counts.first().copied().unwrap_or_default())
    }

    /// Waits until every segment is synchronized and up.
    pub async fn wait_till_insync_transition(&self, endpoint: &SyncEndpoint) -> FixtureResult<()> {
        self.wait_for_transition(ClusterTransition::InSync, endpoint)
            .await?;

        Ok(())
    }

    /// Waits until every segment out of sync is resynchronizing.
    pub async fn wait_till_resync_transition(&self, endpoint: &SyncEndpoint) -> FixtureResult<()> {
        self.wait_for_transition(ClusterTransition::Resync, endpoint)
            .await?;

        Ok(())
    }
}

fn timeout_as(err: FixtureError, transition: ClusterTransition) -> FixtureError {
    if err.kind() == ErrorKind::Timeout {
        fixture_error!(ErrorKind::Timeout, "Timed out", transition.timeout_message())
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use gpfixture_config::shared::PollConfig;

    use super::*;
    use crate::test_utils::database::text_rows;
    use crate::test_utils::{test_config, test_harness};

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(30),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn satisfied_first_probe_does_not_sleep() {
        let start = tokio::time::Instant::now();

        let outcome = poll_until(policy(80), || async { Ok::<_, FixtureError>(0) }, |v| *v == 0)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_on_the_attempt_that_satisfies() {
        let probes = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let outcome = poll_until(
            policy(80),
            || {
                let probes = probes.clone();
                async move { Ok::<_, FixtureError>(probes.fetch_add(1, Ordering::SeqCst)) }
            },
            |v| *v == 3,
        )
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome { value: 3, attempts: 3 });
        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_attempts_re_polls() {
        let probes = Arc::new(AtomicU32::new(0));

        let err = poll_until(
            policy(80),
            || {
                let probes = probes.clone();
                async move {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FixtureError>(0)
                }
            },
            |v| *v > 0,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(probes.load(Ordering::SeqCst), 81);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_propagate_immediately() {
        let probes = Arc::new(AtomicU32::new(0));

        let err = poll_until(
            policy(80),
            || {
                let probes = probes.clone();
                async move {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Err::<i64, _>(fixture_error!(ErrorKind::ConnectionFailed, "refused"))
                }
            },
            |_| true,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transitions_decide_on_counts() {
        assert!(ClusterTransition::ChangeTracking.is_reached(&[2]));
        assert!(!ClusterTransition::ChangeTracking.is_reached(&[0]));
        assert!(ClusterTransition::InSync.is_reached(&[0]));
        assert!(!ClusterTransition::InSync.is_reached(&[1]));
        assert!(ClusterTransition::Resync.is_reached(&[2, 2]));
        assert!(!ClusterTransition::Resync.is_reached(&[1, 2]));
        assert!(!ClusterTransition::Resync.is_reached(&[1]));
    }

    #[test]
    fn policy_comes_from_config() {
        let policy = PollPolicy::from(PollConfig::transition());
        assert_eq!(policy.interval, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 80);
    }

    #[tokio::test(start_paused = true)]
    async fn change_tracking_returns_count_from_endpoint() {
        let (harness, client, _) = test_harness(test_config());
        client
            .on_sequence(
                "mode = 'c'",
                vec![text_rows(&[&["0"]]), text_rows(&[&["0"]]), text_rows(&[&["2"]])],
            )
            .await;
        let endpoint = SyncEndpoint::new("mdw", 5432, "gpadmin");

        let count = harness
            .wait_till_change_tracking_transition(&endpoint)
            .await
            .unwrap();

        assert_eq!(count, 2);
        let calls = client.calls().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].target.dbname, "template1");
        assert_eq!(calls[0].target.host.as_deref(), Some("mdw"));
        assert_eq!(calls[0].target.user.as_deref(), Some("gpadmin"));
    }

    #[tokio::test(start_paused = true)]
    async fn insync_timeout_names_the_transition() {
        let (harness, client, _) = test_harness(test_config());
        client.on("mode <> 's' or status <> 'u'", text_rows(&[&["1"]])).await;

        let err = harness
            .wait_till_insync_transition(&harness.sync_endpoint())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.detail(), Some("cluster not in sync transition"));
        assert_eq!(client.count_calls("gp_segment_configuration").await, 81);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_compares_both_counts_per_poll() {
        let (harness, client, _) = test_harness(test_config());
        client
            .on_sequence("mode = 'r'", vec![text_rows(&[&["1"]]), text_rows(&[&["2"]])])
            .await;
        client.on("mode <> 's'", text_rows(&[&["2"]])).await;

        harness
            .wait_till_resync_transition(&harness.sync_endpoint())
            .await
            .unwrap();

        assert_eq!(client.count_calls("mode = 'r'").await, 2);
        assert_eq!(client.count_calls("where mode <> 's'").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn change_tracking_timeout_message() {
        let (harness, client, _) = test_harness(test_config());
        client.on("mode = 'c'", text_rows(&[&["0"]])).await;

        let err = harness
            .wait_till_change_tracking_transition(&harness.sync_endpoint())
            .await
            .unwrap_err();

        assert_eq!(err.detail(), Some("cluster not in change tracking"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_probe_result_is_an_error() {
        let (harness, _, _) = test_harness(test_config());

        let err = harness
            .wait_till_insync_transition(&harness.sync_endpoint())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EmptyResult);
    }
}
