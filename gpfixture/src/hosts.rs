//! Operations on the cluster hosts: dump directory cleanup, file
//! distribution, network interfaces, processes and filespace configs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use regex::{NoExpand, Regex};
use tracing::{debug, info};

use crate::bail;
use crate::command::{CommandRunner, CommandSpec};
use crate::database::SqlClient;
use crate::error::{ErrorKind, FixtureResult};
use crate::harness::Harness;
use crate::sql;

/// Name of the host list handed to `gpscp`.
const COPY_HOST_FILE: &str = "copy_host_file.gpfixture";

/// Signal sent by [`Harness::kill_process`] when none is given.
pub const SIGTERM: i32 = 15;

fn remote(name: impl Into<String>, cmd: impl Into<String>, host: &str) -> CommandSpec {
    CommandSpec::local(name, cmd).on_host(host)
}

/// Management interface of `host`, which stays up while data NICs go down.
fn management_address(host: &str) -> String {
    format!("{host}-cm")
}

/// Segment role whose filespace entries go into a filespace config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilespaceRole {
    Master,
    Standby,
    Primary,
    Mirror,
}

impl FilespaceRole {
    pub const ALL: [FilespaceRole; 4] = [
        FilespaceRole::Master,
        FilespaceRole::Standby,
        FilespaceRole::Primary,
        FilespaceRole::Mirror,
    ];

    fn preferred_role(&self) -> char {
        match self {
            FilespaceRole::Master | FilespaceRole::Primary => 'p',
            FilespaceRole::Standby | FilespaceRole::Mirror => 'm',
        }
    }

    fn is_master(&self) -> bool {
        matches!(self, FilespaceRole::Master | FilespaceRole::Standby)
    }

    /// Directory under the working directory holding this role's locations.
    pub fn dir_name(&self) -> &'static str {
        match self {
            FilespaceRole::Master => "fs_master",
            FilespaceRole::Standby => "fs_standby",
            FilespaceRole::Primary => "fs_primary",
            FilespaceRole::Mirror => "fs_mirror",
        }
    }
}

/// Rewrites every `a.b.c.d:port` on lines mentioning `gpfdist` to
/// `hostport`. A missing file is left alone.
pub async fn modify_sql_file(file: &Path, hostport: &str) -> FixtureResult<()> {
    if !tokio::fs::metadata(file)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
    {
        return Ok(());
    }

    let address = Regex::new(r"(\d+)\.(\d+)\.(\d+)\.(\d+):(\d+)")?;
    let contents = tokio::fs::read_to_string(file).await?;

    let mut modified = String::with_capacity(contents.len());
    for line in contents.lines() {
        if line.contains("gpfdist") {
            modified.push_str(&address.replace_all(line, NoExpand(hostport)));
        } else {
            modified.push_str(line);
        }
        modified.push('\n');
    }

    tokio::fs::write(file, modified).await?;

    Ok(())
}

impl<C, R> Harness<C, R>
where
    C: SqlClient,
    R: CommandRunner,
{
    /// Removes `db_dumps` and `gpcrondump.pid` under `location` on `host`.
    pub async fn cleanup_dir(&self, host: &str, location: &str) -> FixtureResult<()> {
        let cmd = format!("gpssh -h {host} -e 'rm -rf {location}/db_dumps {location}/gpcrondump.pid'");
        self.run_spec_checked(&self.local("cleanup dump dir", cmd))
            .await?;

        Ok(())
    }

    /// Cleans `location` on every host, or each host's own backup
    /// directories when no location is given.
    pub async fn cleanup_backup_files(&self, dbname: &str, location: Option<&str>) -> FixtureResult<()> {
        for host in self.get_hosts(dbname).await? {
            match location {
                Some(location) => self.cleanup_dir(&host, location).await?,
                None => {
                    for dir in self.get_backup_dir_for_host(&host, dbname).await? {
                        self.cleanup_dir(&host, &dir).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Removes the `gp_*.rpt` reports from the master data directory.
    pub async fn cleanup_report_files(&self, master_data_dir: &Path) -> FixtureResult<()> {
        let dir = master_data_dir.to_string_lossy();
        if dir.trim().is_empty() {
            bail!(
                ErrorKind::InvalidInput,
                "master_data_dir not specified in cleanup_report_files"
            );
        }
        if dir.trim() == "/" {
            bail!(
                ErrorKind::InvalidInput,
                "Can't call cleanup_report_files on root directory"
            );
        }

        let cmd = format!("rm -f {dir}/gp_*.rpt");
        self.run_spec_checked(&self.local("cleanup report files", cmd))
            .await?;

        Ok(())
    }

    /// Fails when a `db_dumps` directory is left in any backup directory.
    pub async fn check_dump_dir_exists(&self, dbname: &str) -> FixtureResult<()> {
        for host in self.get_hosts(dbname).await? {
            for dir in self.get_backup_dir_for_host(&host, dbname).await? {
                let cmd = format!(
                    "gpssh -h {host} 'if [ -d {dir}/db_dumps/ ]; then echo EXISTS; else echo NOT FOUND; fi'"
                );
                let output = self
                    .run_spec_checked(&self.local("check dump dir", cmd))
                    .await?;

                if output.stdout.lines().any(reports_dump_dir) {
                    bail!(
                        ErrorKind::AssertionFailed,
                        "db_dumps directory is present in master/segments.",
                        format!("{host}:{dir}/db_dumps")
                    );
                }
            }
        }

        Ok(())
    }

    /// Copies `filename` to the same path on every primary host.
    pub async fn copy_file_to_all_db_hosts(&self, filename: &str) -> FixtureResult<()> {
        let layout = self.segments().await?;
        let hosts: BTreeSet<&str> = layout
            .primaries()
            .map(|segment| segment.address.as_str())
            .collect();

        let host_file = std::env::temp_dir().join(COPY_HOST_FILE);
        let contents: String = hosts.iter().map(|host| format!("{host}\n")).collect();
        tokio::fs::write(&host_file, contents).await?;

        let cmd = format!(
            "gpscp -f {} {filename} =:{filename}",
            host_file.to_string_lossy()
        );
        let result = self.run_spec_checked(&self.local("copy file", cmd)).await;
        tokio::fs::remove_file(&host_file).await?;

        if let Err(err) = result {
            bail!(ErrorKind::CommandFailed, "FAIL: gpscp", err);
        }

        info!(filename, hosts = hosts.len(), "copied file to all hosts");

        Ok(())
    }

    pub async fn remove_dir(&self, host: &str, directory: &str) -> FixtureResult<()> {
        let cmd = format!("gpssh -h {host} -e 'rm -rf {directory}'");
        self.run_cmd(&cmd).await?;

        Ok(())
    }

    pub async fn create_dir(&self, host: &str, directory: &str) -> FixtureResult<()> {
        let cmd = format!("gpssh -h {host} -e 'mkdir -p {directory}'");
        self.run_cmd(&cmd).await?;

        Ok(())
    }

    /// Whether `nic` on `host` is reported `UP` by `ifconfig`.
    pub async fn get_nic_up(&self, host: &str, nic: &str) -> FixtureResult<bool> {
        let spec = remote(
            "ifconfig nic",
            format!("sudo /sbin/ifconfig {nic}"),
            &management_address(host),
        );
        let output = self.run_spec_checked(&spec).await?;

        Ok(output.stdout.contains("UP"))
    }

    pub async fn bring_nic_down(&self, host: &str, nic: &str) -> FixtureResult<()> {
        let spec = remote(
            "bring down nic",
            format!("sudo /sbin/ifdown {nic}"),
            &management_address(host),
        );
        self.run_spec_checked(&spec).await?;

        if self.get_nic_up(host, nic).await? {
            bail!(
                ErrorKind::CommandFailed,
                "Unable to bring down nic",
                format!("nic {nic} on host {host}")
            );
        }

        Ok(())
    }

    pub async fn bring_nic_up(&self, host: &str, nic: &str) -> FixtureResult<()> {
        let spec = remote(
            "bring up nic",
            format!("sudo /sbin/ifup {nic}"),
            &management_address(host),
        );
        self.run_spec_checked(&spec).await?;

        if !self.get_nic_up(host, nic).await? {
            bail!(
                ErrorKind::CommandFailed,
                "Unable to bring up nic",
                format!("nic {nic} on host {host}")
            );
        }

        Ok(())
    }

    /// Pid of the postmaster serving `seg_data_dir` on `seg_host`.
    pub async fn get_pid_for_segment(&self, seg_data_dir: &str, seg_host: &str) -> FixtureResult<Option<u32>> {
        let spec = remote(
            "get list of postmaster processes",
            format!("ps -eaf | grep {seg_data_dir}"),
            seg_host,
        );
        let output = self.run_spec_checked(&spec).await?;

        let pid = output
            .stdout
            .trim()
            .lines()
            .filter(|line| !line.contains("grep"))
            .filter_map(|line| line.split_whitespace().nth(1))
            .last();

        match pid {
            Some(pid) => Ok(Some(pid.parse()?)),
            None => Ok(None),
        }
    }

    /// Sends `signal` ([`SIGTERM`] by default) to `pid`, on `host` if given.
    pub async fn kill_process(&self, pid: u32, host: Option<&str>, signal: Option<i32>) -> FixtureResult<()> {
        let signal = signal.unwrap_or(SIGTERM);
        let cmd = format!("kill -{signal} {pid}");

        let spec = match host {
            Some(host) => remote("kill process on a given host", cmd, host),
            None => self.local("kill process", cmd),
        };
        debug!(pid, signal, host, "killing process");
        self.run_spec_checked(&spec).await?;

        Ok(())
    }

    /// Writes a `gpfilespace` config for `fs_name` placing every location
    /// under a per-role directory of `working_dir`, then recreates those
    /// directories on their hosts.
    pub async fn create_gpfilespace_config(
        &self,
        host: &str,
        port: u16,
        user: &str,
        fs_name: &str,
        config_file: &Path,
        working_dir: &Path,
    ) -> FixtureResult<()> {
        let mut config = format!("filespace:{fs_name}\n");
        let mut dirs: Vec<(String, PathBuf)> = Vec::new();

        for role in FilespaceRole::ALL {
            let query = sql::filespace_entries(role.preferred_role(), role.is_master());
            let cmd = format!("psql -t -h {host} -p {port} -U {user} -d template1 -c \"{query};\"");

            let output = self.run_cmd(&cmd).await?;
            if !output.succeeded() {
                bail!(
                    ErrorKind::CommandFailed,
                    "Exception from executing psql query",
                    cmd
                );
            }

            let fs_dir = working_dir.join(role.dir_name());
            for line in output.stdout.lines().filter(|line| !line.trim().is_empty()) {
                let columns: Vec<&str> = line.split('|').map(str::trim).collect();
                let [hostname, dbid, location] = columns[..] else {
                    bail!(
                        ErrorKind::InvalidInput,
                        "Unexpected filespace entry",
                        line
                    );
                };

                let basename = Path::new(location).file_name().unwrap_or_default();
                config.push_str(&format!(
                    "{hostname}:{dbid}:{}\n",
                    fs_dir.join(basename).to_string_lossy()
                ));
                dirs.push((hostname.to_owned(), fs_dir.clone()));
            }
        }

        tokio::fs::write(config_file, config).await?;

        for (host, dir) in &dirs {
            let dir = dir.to_string_lossy();
            self.remove_dir(host, &dir).await?;
            self.create_dir(host, &dir).await?;
        }

        Ok(())
    }
}

/// `gpssh` prefixes each output line with `[host]`; only a line that ends in
/// the bare token reports the directory.
fn reports_dump_dir(line: &str) -> bool {
    line.trim_end().ends_with("] EXISTS")
}
