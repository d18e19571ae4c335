//! Extension packages installed with `gppkg`, and the PostGIS sample data.

use std::path::PathBuf;

use tracing::info;

use crate::bail;
use crate::command::CommandRunner;
use crate::context::CommandOutcome;
use crate::database::SqlClient;
use crate::error::{ErrorKind, FixtureResult};
use crate::harness::Harness;

/// Database the PostGIS sample data is loaded into.
pub const POSTGIS_DATABASE: &str = "opengeo";

/// Major PostGIS version, selecting the contrib scripts and sample files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostgisVersion {
    V1,
    V2,
}

impl PostgisVersion {
    /// Directory under `$GPHOME/share/postgresql` holding `postgis.sql`.
    fn contrib_dir(&self) -> &'static str {
        match self {
            PostgisVersion::V1 => "contrib",
            PostgisVersion::V2 => "contrib/postgis-2.0",
        }
    }

    /// NYC sample files, in load order.
    fn sample_files(&self) -> [&'static str; 5] {
        match self {
            PostgisVersion::V1 => [
                "nyc_census_blocks_1.sql",
                "nyc_neighborhoods_1.sql",
                "nyc_subway_stations_1.sql",
                "nyc_census_sociodata.sql",
                "nyc_streets_1.sql",
            ],
            PostgisVersion::V2 => [
                "nyc_census_blocks.sql",
                "nyc_neighborhoods.sql",
                "nyc_subway_stations.sql",
                "nyc_census_sociodata.sql",
                "nyc_streets.sql",
            ],
        }
    }
}

impl<C, R> Harness<C, R>
where
    C: SqlClient,
    R: CommandRunner,
{
    /// Installs the configured package. The exit status is reported through
    /// the outcome.
    pub async fn install_gppkg(&self) -> FixtureResult<CommandOutcome> {
        let Some(gppkg) = &self.config().gppkg else {
            bail!(
                ErrorKind::ConfigError,
                "GPPKG_PATH and GPPKG_NAME need to be set to install gppkg"
            );
        };

        let cmd = format!(
            "gppkg --install {}/{}.gppkg",
            gppkg.path.to_string_lossy(),
            gppkg.name
        );
        let outcome = self.run_command(&cmd).await?;
        info!(
            cmd,
            stdout = outcome.output.stdout,
            stderr = outcome.output.stderr,
            "installed gppkg"
        );

        Ok(outcome)
    }

    pub async fn enable_postgis_and_load_test_data(&self) -> FixtureResult<()> {
        self.enable_postgis(PostgisVersion::V2).await
    }

    pub async fn enable_postgis_and_load_test_data_for_postgis_1(&self) -> FixtureResult<()> {
        self.enable_postgis(PostgisVersion::V1).await
    }

    async fn enable_postgis(&self, version: PostgisVersion) -> FixtureResult<()> {
        if self.config().gphome.as_os_str().is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "GPHOME needs to be set in the environment"
            );
        }

        self.install_gppkg().await?;

        let contrib = self
            .config()
            .gphome
            .join("share/postgresql")
            .join(version.contrib_dir());
        let scripts = ["postgis.sql", "spatial_ref_sys.sql"]
            .into_iter()
            .map(|script| contrib.join(script));
        let samples = version
            .sample_files()
            .into_iter()
            .map(|sample| self.config().postgis_data_dir.join(sample));

        let files: Vec<PathBuf> = scripts.chain(samples).collect();
        for file in &files {
            let cmd = format!("psql -d {POSTGIS_DATABASE} -f {}", file.to_string_lossy());
            self.run_cmd(&cmd).await?;
        }

        info!(?version, files = files.len(), "loaded postgis test data");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use gpfixture_config::shared::GppkgConfig;

    use super::*;
    use crate::test_utils::{test_config, test_harness};

    fn postgis_config() -> gpfixture_config::shared::HarnessConfig {
        let mut config = test_config();
        config.gphome = PathBuf::from("/usr/local/gpdb");
        config.postgis_data_dir = PathBuf::from("/data/postgis");
        config.gppkg = Some(GppkgConfig {
            path: PathBuf::from("/packages"),
            name: "postgis-ossv2.0.3_pv2.0.1_gpdb4.3-rhel5-x86_64".to_owned(),
        });
        config
    }

    #[tokio::test]
    async fn missing_gppkg_is_a_config_error() {
        let (harness, _, runner) = test_harness(test_config());

        let err = harness.install_gppkg().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(runner.calls().await.is_empty());
    }

    #[tokio::test]
    async fn postgis_2_loads_contrib_then_samples() {
        let (harness, _, runner) = test_harness(postgis_config());

        harness.enable_postgis_and_load_test_data().await.unwrap();

        let lines = runner.command_lines().await;
        assert_eq!(lines.len(), 8);
        assert_eq!(
            lines[0],
            "gppkg --install /packages/postgis-ossv2.0.3_pv2.0.1_gpdb4.3-rhel5-x86_64.gppkg"
        );
        assert_eq!(
            lines[1],
            "psql -d opengeo -f /usr/local/gpdb/share/postgresql/contrib/postgis-2.0/postgis.sql"
        );
        assert_eq!(lines[7], "psql -d opengeo -f /data/postgis/nyc_streets.sql");
    }

    #[tokio::test]
    async fn postgis_1_uses_legacy_files() {
        let (harness, _, runner) = test_harness(postgis_config());

        harness
            .enable_postgis_and_load_test_data_for_postgis_1()
            .await
            .unwrap();

        let lines = runner.command_lines().await;
        assert_eq!(
            lines[2],
            "psql -d opengeo -f /usr/local/gpdb/share/postgresql/contrib/spatial_ref_sys.sql"
        );
        assert_eq!(lines[3], "psql -d opengeo -f /data/postgis/nyc_census_blocks_1.sql");
        assert_eq!(lines[6], "psql -d opengeo -f /data/postgis/nyc_census_sociodata.sql");
    }
}
