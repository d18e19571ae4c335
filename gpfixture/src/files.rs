//! Checks on local files: owner permissions and the gpcrondump email file.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{ErrorKind, FixtureError, FixtureResult};
use crate::{bail, fixture_error};

const OWNER_READ: u32 = 0o400;
const OWNER_WRITE: u32 = 0o200;
const OWNER_EXECUTE: u32 = 0o100;

const EMAIL_FILE_EXTENSION: &str = "yaml";

/// Access checked by [`check_user_permissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

impl AccessMode {
    fn owner_bit(&self) -> u32 {
        match self {
            AccessMode::Read => OWNER_READ,
            AccessMode::Write => OWNER_WRITE,
            AccessMode::Execute => OWNER_EXECUTE,
        }
    }
}

impl FromStr for AccessMode {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessMode::Read),
            "write" => Ok(AccessMode::Write),
            "execute" => Ok(AccessMode::Execute),
            other => Err(fixture_error!(
                ErrorKind::InvalidInput,
                "Invalid mode specified, should be read, write or execute only",
                other
            )),
        }
    }
}

/// Whether the owner of `file` has `access_mode` (`read`, `write` or
/// `execute`) on it.
pub async fn check_user_permissions(file: &Path, access_mode: &str) -> FixtureResult<bool> {
    let mode: AccessMode = access_mode.parse()?;
    let metadata = tokio::fs::metadata(file).await?;

    Ok(metadata.permissions().mode() & mode.owner_bit() != 0)
}

/// One entry of the `EMAIL_DETAILS` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailDetail {
    pub dbname: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
}

/// Per-database email settings read from a gpcrondump email file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailDetails {
    pub entries: Vec<EmailDetail>,
}

#[derive(Debug, Deserialize)]
struct EmailFile {
    #[serde(rename = "EMAIL_DETAILS", alias = "email_details")]
    email_details: Option<Vec<HashMap<String, String>>>,
}

/// Parses and validates a gpcrondump email file.
///
/// The file must exist, end in `.yaml`, be non-empty and hold an
/// `EMAIL_DETAILS` list whose entries only use the `DBNAME`, `FROM` and
/// `SUBJECT` keys.
pub async fn validate_parse_email_file(path: &Path) -> FixtureResult<EmailDetails> {
    let display = path.display();

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => bail!(
            ErrorKind::InvalidInput,
            "Email file does not exist",
            format!("'{display}' file does not exist.")
        ),
    };

    if path.extension().and_then(|ext| ext.to_str()) != Some(EMAIL_FILE_EXTENSION) {
        bail!(
            ErrorKind::InvalidInput,
            "Email file is not a yaml file",
            format!(
                "'{display}' is not '.yaml' file. File containing email details should be '.yaml' file."
            )
        );
    }

    if metadata.len() == 0 {
        bail!(
            ErrorKind::InvalidInput,
            "Email file is empty",
            format!("'{display}' file is empty.")
        );
    }

    let not_formatted = || {
        fixture_error!(
            ErrorKind::InvalidInput,
            "Email file is not formatted properly",
            format!("'{display}' file is not formatted properly.")
        )
    };

    let file: EmailFile = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Yaml))
        .build()
        .and_then(|settings| settings.try_deserialize())
        .map_err(|_| not_formatted())?;
    let Some(entries) = file.email_details else {
        return Err(not_formatted());
    };

    let mut details = EmailDetails::default();
    for entry in entries {
        let mut detail = EmailDetail::default();
        for (key, value) in entry {
            // Keys may come back lowercased from the config loader.
            match key.to_ascii_uppercase().as_str() {
                "DBNAME" => detail.dbname = Some(value),
                "FROM" => detail.from = Some(value),
                "SUBJECT" => detail.subject = Some(value),
                _ => return Err(not_formatted()),
            }
        }
        details.entries.push(detail);
    }

    Ok(details)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn owner_bits_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("readonly");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();

        assert!(check_user_permissions(&file, "read").await.unwrap());
        assert!(!check_user_permissions(&file, "write").await.unwrap());
        assert!(!check_user_permissions(&file, "execute").await.unwrap());
        assert_eq!(
            check_user_permissions(&file, "delete")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn email_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mail_contacts.yaml");
        fs::write(
            &file,
            "EMAIL_DETAILS:\n  - DBNAME: testdb\n    FROM: RRP_MPE2_DCA_1\n    SUBJECT: backup completed\n  - DBNAME: bkdb\n",
        )
        .unwrap();

        let details = validate_parse_email_file(&file).await.unwrap();

        assert_eq!(details.entries.len(), 2);
        assert_eq!(details.entries[0].dbname.as_deref(), Some("testdb"));
        assert_eq!(details.entries[0].subject.as_deref(), Some("backup completed"));
        assert_eq!(details.entries[1].from, None);
    }

    #[tokio::test]
    async fn invalid_email_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let wrong_extension = dir.path().join("mail.txt");
        let empty = dir.path().join("empty.yaml");
        let unknown_key = dir.path().join("unknown.yaml");
        let no_details = dir.path().join("none.yaml");
        fs::write(&wrong_extension, "EMAIL_DETAILS: []\n").unwrap();
        fs::write(&empty, "").unwrap();
        fs::write(&unknown_key, "EMAIL_DETAILS:\n  - DBNAME: testdb\n    TO: someone\n").unwrap();
        fs::write(&no_details, "OTHER: 1\n").unwrap();

        for path in [
            dir.path().join("missing.yaml"),
            wrong_extension,
            empty,
            unknown_key,
            no_details,
        ] {
            let err = validate_parse_email_file(&path).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{}", path.display());
        }
    }
}
