use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Database every Greenplum cluster carries, used for catalog-wide queries.
pub const TEMPLATE_DATABASE: &str = "template1";

/// Connection parameters for the Greenplum master.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the master.
    pub host: String,
    /// Port the master postmaster listens on (`PGPORT`).
    pub port: u16,
    /// Database used when an operation does not name one.
    #[serde(default = "default_database")]
    pub name: String,
    /// Role used to connect (`USER`).
    pub username: String,
    /// Password for the role, redacted in debug output.
    #[serde(default)]
    pub password: Option<SerializableSecretString>,
    /// TLS configuration for the connection.
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_database() -> String {
    TEMPLATE_DATABASE.to_owned()
}

/// TLS settings for connections to the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    pub trusted_root_certs: String,
    /// Whether TLS is required.
    pub enabled: bool,
}

impl TlsConfig {
    /// Checks that certificates are present whenever TLS is enabled.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts a connection config into driver-specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options for the server without a database, so the driver falls back to
    /// the database named after the role.
    fn without_db(&self) -> Output;

    /// Options for the database named in the config.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };
        let mut config = TokioPgConnectOptions::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut options: TokioPgConnectOptions = self.without_db();
        options.dbname(&self.name);
        options
    }
}
