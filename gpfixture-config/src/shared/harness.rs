use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{PgConnectionConfig, PollConfig, ValidationError};

/// Directory receiving table dumps when nothing else is configured.
const DEFAULT_DATA_DIR: &str = "./gppylib/test/data";

/// Location of an extension package to install with `gppkg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GppkgConfig {
    /// Directory holding the package (`GPPKG_PATH`).
    pub path: PathBuf,
    /// Package name without the `.gppkg` suffix (`GPPKG_NAME`).
    pub name: String,
}

/// Source cluster of a gptransfer run, compared against the local cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSourceConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
}

/// Complete configuration of the fixture harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Connection to the master.
    pub connection: PgConnectionConfig,
    /// Master data directory (`MASTER_DATA_DIRECTORY`).
    #[serde(default)]
    pub master_data_directory: PathBuf,
    /// Installation root of the cluster binaries (`GPHOME`).
    #[serde(default)]
    pub gphome: PathBuf,
    /// Directory receiving `<table>_backup` and `<table>_restore` dumps.
    ///
    /// `COPY ... TO` runs on the master, so this must be writable by the
    /// server process and readable by the harness.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Policy used while waiting for mirror state transitions.
    #[serde(default = "PollConfig::transition")]
    pub transition_poll: PollConfig,
    /// Policy used while retrying `createdb` and `dropdb`.
    #[serde(default = "PollConfig::database_retry")]
    pub database_retry: PollConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gppkg: Option<GppkgConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_source: Option<TransferSourceConfig>,
    /// Directory with the NYC sample SQL files loaded into `opengeo`.
    #[serde(default)]
    pub postgis_data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

impl Config for HarnessConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

impl HarnessConfig {
    /// Builds a config for a cluster described only by its connection.
    pub fn new(connection: PgConnectionConfig, master_data_directory: PathBuf) -> Self {
        Self {
            connection,
            master_data_directory,
            gphome: PathBuf::new(),
            data_dir: default_data_dir(),
            transition_poll: PollConfig::transition(),
            database_retry: PollConfig::database_retry(),
            gppkg: None,
            transfer_source: None,
            postgis_data_dir: PathBuf::new(),
        }
    }

    /// Overlays the variables a Greenplum shell session conventionally exports.
    ///
    /// `lookup` is usually `|name| std::env::var(name).ok()`. Unset variables leave
    /// the loaded values untouched. The gppkg and gptransfer sections are only
    /// created when all of their variables are present.
    pub fn apply_greenplum_env<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mdd) = lookup("MASTER_DATA_DIRECTORY") {
            self.master_data_directory = PathBuf::from(mdd);
        }
        if let Some(host) = lookup("PGHOST") {
            self.connection.host = host;
        }
        if let Some(port) = lookup("PGPORT") {
            self.connection.port = parse_port("PGPORT", &port)?;
        }
        if let Some(user) = lookup("USER") {
            self.connection.username = user;
        }
        if let Some(database) = lookup("PGDATABASE") {
            self.connection.name = database;
        }
        if let Some(gphome) = lookup("GPHOME") {
            self.gphome = PathBuf::from(gphome);
        }

        if let (Some(path), Some(name)) = (lookup("GPPKG_PATH"), lookup("GPPKG_NAME")) {
            self.gppkg = Some(GppkgConfig {
                path: PathBuf::from(path),
                name,
            });
        }

        if let (Some(host), Some(port), Some(user)) = (
            lookup("GPTRANSFER_SOURCE_HOST"),
            lookup("GPTRANSFER_SOURCE_PORT"),
            lookup("GPTRANSFER_SOURCE_USER"),
        ) {
            self.transfer_source = Some(TransferSourceConfig {
                host,
                port: parse_port("GPTRANSFER_SOURCE_PORT", &port)?,
                user,
            });
        }

        Ok(())
    }

    /// Validates the harness configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.tls.validate()?;

        if self.master_data_directory.as_os_str().is_empty() {
            return Err(ValidationError::MissingMasterDataDirectory);
        }
        if self.transition_poll.max_attempts == 0 {
            return Err(ValidationError::ZeroPollAttempts("transition_poll"));
        }
        if self.database_retry.max_attempts == 0 {
            return Err(ValidationError::ZeroPollAttempts("database_retry"));
        }

        Ok(())
    }

    /// Path of a cluster utility under `$GPHOME/bin`.
    pub fn gp_binary(&self, command: &str) -> PathBuf {
        self.gphome.join("bin").join(command)
    }
}

fn parse_port(name: &'static str, value: &str) -> Result<u16, ValidationError> {
    value
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidEnvValue {
            name,
            value: value.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::shared::TlsConfig;

    fn base_config() -> HarnessConfig {
        HarnessConfig::new(
            PgConnectionConfig {
                host: "localhost".to_owned(),
                port: 5432,
                name: "template1".to_owned(),
                username: "gpadmin".to_owned(),
                password: None,
                tls: TlsConfig::default(),
            },
            PathBuf::new(),
        )
    }

    #[test]
    fn greenplum_env_overrides_loaded_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MASTER_DATA_DIRECTORY", "/data/master/gpseg-1"),
            ("PGPORT", "15432"),
            ("USER", "tester"),
            ("GPHOME", "/usr/local/greenplum-db"),
            ("GPPKG_PATH", "/tmp/pkgs"),
            ("GPPKG_NAME", "postgis-2.0"),
        ]);

        let mut config = base_config();
        config
            .apply_greenplum_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.master_data_directory, PathBuf::from("/data/master/gpseg-1"));
        assert_eq!(config.connection.port, 15432);
        assert_eq!(config.connection.username, "tester");
        assert_eq!(
            config.gp_binary("gpstart"),
            PathBuf::from("/usr/local/greenplum-db/bin/gpstart")
        );
        assert_eq!(config.gppkg.as_ref().unwrap().name, "postgis-2.0");
        assert!(config.transfer_source.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_port_is_reported_with_variable_name() {
        let mut config = base_config();
        let err = config
            .apply_greenplum_env(|name| (name == "PGPORT").then(|| "five".to_owned()))
            .unwrap_err();

        assert_eq!(
            err,
            ValidationError::InvalidEnvValue {
                name: "PGPORT",
                value: "five".to_owned()
            }
        );
    }

    #[test]
    fn missing_master_data_directory_fails_validation() {
        let config = base_config();
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingMasterDataDirectory)
        );
    }

    #[test]
    fn zero_poll_attempts_fail_validation() {
        let mut config = base_config();
        config.master_data_directory = PathBuf::from("/data/master/gpseg-1");
        config.transition_poll.max_attempts = 0;

        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroPollAttempts("transition_poll"))
        );
    }

    #[test]
    fn defaults_apply_when_deserializing_minimal_config() {
        let config: HarnessConfig = serde_json::from_str(
            r#"{"connection": {"host": "mdw", "port": 5432, "username": "gpadmin"},
                "master_data_directory": "/data/master/gpseg-1"}"#,
        )
        .unwrap();

        assert_eq!(config.connection.name, "template1");
        assert_eq!(config.transition_poll, PollConfig::transition());
        assert_eq!(config.database_retry.max_attempts, 10);
        assert_eq!(config.data_dir, PathBuf::from("./gppylib/test/data"));
    }
}
