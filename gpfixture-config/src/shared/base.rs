use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The harness cannot locate the master without its data directory.
    #[error("`master_data_directory` must be set (MASTER_DATA_DIRECTORY is not set)")]
    MissingMasterDataDirectory,
    /// A poll loop must probe at least once after its first check.
    #[error("`{0}.max_attempts` cannot be zero")]
    ZeroPollAttempts(&'static str),
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// An environment variable holds a value of the wrong shape.
    #[error("environment variable `{name}` has an invalid value `{value}`")]
    InvalidEnvValue { name: &'static str, value: String },
}
