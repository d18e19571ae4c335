//! Cluster lifecycle and segment layout.

use std::path::Path;

use tracing::{debug, info};

use crate::bail;
use crate::command::CommandRunner;
use crate::context::CommandOutcome;
use crate::database::{DbTarget, SqlClient, TextRow, get_rows};
use crate::error::{ErrorKind, FixtureResult};
use crate::harness::Harness;
use crate::sql;

/// Directory holding the postmaster's unix socket and its lock file.
const SOCKET_DIR: &str = "/tmp";

/// Content id of the master and the standby master.
pub const MASTER_CONTENT_ID: i32 = -1;

/// Replication mode of a segment, `gp_segment_configuration.mode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentMode {
    Synchronized,
    Resynchronizing,
    ChangeTracking,
    NotSynchronized,
    Other(String),
}

impl SegmentMode {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "s" => Self::Synchronized,
            "r" => Self::Resynchronizing,
            "c" => Self::ChangeTracking,
            "n" => Self::NotSynchronized,
            other => Self::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    Primary,
    Mirror,
}

impl SegmentRole {
    fn from_code(code: &str) -> FixtureResult<Self> {
        match code.trim() {
            "p" => Ok(Self::Primary),
            "m" => Ok(Self::Mirror),
            other => bail!(ErrorKind::ConversionError, "Unknown segment role", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Up,
    Down,
}

impl SegmentStatus {
    fn from_code(code: &str) -> FixtureResult<Self> {
        match code.trim() {
            "u" => Ok(Self::Up),
            "d" => Ok(Self::Down),
            other => bail!(ErrorKind::ConversionError, "Unknown segment status", other),
        }
    }
}

/// One row of `gp_segment_configuration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub dbid: i32,
    pub content: i32,
    pub role: SegmentRole,
    pub preferred_role: SegmentRole,
    pub mode: SegmentMode,
    pub status: SegmentStatus,
    pub port: u16,
    pub hostname: String,
    pub address: String,
}

impl Segment {
    /// Parses a row selected by [`sql::segment_configuration`].
    pub fn from_row(row: &TextRow) -> FixtureResult<Self> {
        Ok(Self {
            dbid: row.get_str(0)?.trim().parse()?,
            content: row.get_str(1)?.trim().parse()?,
            role: SegmentRole::from_code(row.get_str(2)?)?,
            preferred_role: SegmentRole::from_code(row.get_str(3)?)?,
            mode: SegmentMode::from_code(row.get_str(4)?),
            status: SegmentStatus::from_code(row.get_str(5)?)?,
            port: row.get_str(6)?.trim().parse()?,
            hostname: row.get_str(7)?.trim().to_owned(),
            address: row.get_str(8)?.trim().to_owned(),
        })
    }

    pub fn is_master(&self) -> bool {
        self.content == MASTER_CONTENT_ID && self.role == SegmentRole::Primary
    }

    pub fn is_standby(&self) -> bool {
        self.content == MASTER_CONTENT_ID && self.role == SegmentRole::Mirror
    }

    pub fn is_primary(&self) -> bool {
        self.content >= 0 && self.role == SegmentRole::Primary
    }

    pub fn is_mirror(&self) -> bool {
        self.content >= 0 && self.role == SegmentRole::Mirror
    }
}

/// Every segment of the cluster, master and standby included.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterLayout {
    segments: Vec<Segment>,
}

impl ClusterLayout {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn primaries(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|segment| segment.is_primary())
    }

    pub fn mirrors(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|segment| segment.is_mirror())
    }

    pub fn master(&self) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.is_master())
    }

    pub fn standby(&self) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.is_standby())
    }

    pub fn is_synchronized(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| segment.mode == SegmentMode::Synchronized)
    }

    pub fn is_running(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| segment.status == SegmentStatus::Up)
    }

    /// First segment in change tracking.
    pub fn change_tracking_segment(&self) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|segment| segment.mode == SegmentMode::ChangeTracking)
    }

    /// Counts the selected kinds of segments.
    pub fn count(&self, primary: bool, mirror: bool, master: bool, standby: bool) -> usize {
        let mut count = 0;
        if primary {
            count += self.primaries().count();
        }
        if mirror {
            count += self.mirrors().count();
        }
        if master && self.master().is_some() {
            count += 1;
        }
        if standby && self.standby().is_some() {
            count += 1;
        }

        count
    }
}

impl<C, R> Harness<C, R>
where
    C: SqlClient,
    R: CommandRunner,
{
    /// Whether the master is up: its pid file and socket files exist and the
    /// recorded postmaster process is alive.
    pub async fn check_database_is_running(&self) -> FixtureResult<bool> {
        self.check_database_is_running_in(Path::new(SOCKET_DIR))
            .await
    }

    pub(crate) async fn check_database_is_running_in(&self, socket_dir: &Path) -> FixtureResult<bool> {
        let port = self.config().connection.port;
        let pid_file = self.config().master_data_directory.join("postmaster.pid");
        let lock_file = socket_dir.join(format!(".s.PGSQL.{port}.lock"));
        let socket = socket_dir.join(format!(".s.PGSQL.{port}"));

        for path in [&pid_file, &lock_file, &socket] {
            if !tokio::fs::try_exists(path).await? {
                debug!(path = %path.display(), "database is not running");
                return Ok(false);
            }
        }

        let contents = tokio::fs::read_to_string(&pid_file).await?;
        let Some(pid) = contents
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<u32>().ok())
        else {
            return Ok(false);
        };

        let spec = self.local("check postmaster", format!("kill -0 {pid}"));
        let outcome = self.run_spec(&spec).await?;

        Ok(outcome.failure.is_none())
    }

    pub async fn start_database(&self) -> FixtureResult<CommandOutcome> {
        info!("starting database");

        let mut outcome = self.run_gpcommand("gpstart -a").await?;
        if let Some(failure) = outcome.failure.take() {
            return Err(failure);
        }

        Ok(outcome)
    }

    pub async fn stop_database(&self) -> FixtureResult<CommandOutcome> {
        info!("stopping database");

        let mut outcome = self.run_gpcommand("gpstop -M fast -a").await?;
        if let Some(failure) = outcome.failure.take() {
            return Err(failure);
        }

        Ok(outcome)
    }

    /// Starts the database unless it is already running.
    pub async fn start_database_if_not_started(&self) -> FixtureResult<Option<CommandOutcome>> {
        if self.check_database_is_running().await? {
            return Ok(None);
        }

        self.start_database().await.map(Some)
    }

    /// Stops the database if it is running.
    pub async fn stop_database_if_started(&self) -> FixtureResult<Option<CommandOutcome>> {
        if !self.check_database_is_running().await? {
            return Ok(None);
        }

        self.stop_database().await.map(Some)
    }

    /// Reads `gp_segment_configuration` from the master.
    pub async fn segments(&self) -> FixtureResult<ClusterLayout> {
        let rows = self
            .client()
            .query(&DbTarget::template(), sql::segment_configuration())
            .await?;

        let segments = rows
            .iter()
            .map(Segment::from_row)
            .collect::<FixtureResult<Vec<_>>>()?;

        Ok(ClusterLayout::new(segments))
    }

    pub async fn are_segments_synchronized(&self) -> FixtureResult<bool> {
        Ok(self.segments().await?.is_synchronized())
    }

    pub async fn are_segments_running(&self) -> FixtureResult<bool> {
        Ok(self.segments().await?.is_running())
    }

    /// Port and hostname of the first segment in change tracking.
    pub async fn get_change_tracking_segment_info(&self) -> FixtureResult<Option<(u16, String)>> {
        let layout = self.segments().await?;

        Ok(layout
            .change_tracking_segment()
            .map(|segment| (segment.port, segment.hostname.clone())))
    }

    pub async fn get_num_segments(
        &self,
        primary: bool,
        mirror: bool,
        master: bool,
        standby: bool,
    ) -> FixtureResult<usize> {
        Ok(self.segments().await?.count(primary, mirror, master, standby))
    }

    /// Runs `sql` on every primary segment in utility mode.
    pub async fn run_on_all_segs(&self, dbname: &str, sql: &str) -> FixtureResult<()> {
        let layout = self.segments().await?;

        for segment in layout.primaries() {
            debug!(
                dbname,
                host = segment.hostname,
                port = segment.port,
                "running on segment"
            );
            let target = DbTarget::database(dbname)
                .on_host(segment.hostname.clone(), segment.port)
                .utility();
            self.client().execute(&target, sql).await?;
        }

        Ok(())
    }

    /// Hostnames of the rows returned by `sql`, trimmed.
    pub(crate) async fn hostnames(&self, dbname: &str, sql: &str) -> FixtureResult<Vec<String>> {
        let rows = get_rows(self.client(), dbname, sql).await?;

        rows.iter()
            .map(|row| Ok(row.get_str(0)?.trim().to_owned()))
            .collect()
    }
}
