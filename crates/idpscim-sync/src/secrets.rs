//! Resolve the run's credentials before any directory or target call is made.

use crate::config::{ConfigError, SecretSource, SyncConfig};

#[derive(Clone)]
pub struct ResolvedSecrets {
    pub directory_token: String,
    pub scim_token: String,
    pub state_token: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets").finish_non_exhaustive()
    }
}

/// Inline values win over files; file contents are trimmed.
pub async fn resolve_secret(
    name: &'static str,
    source: &SecretSource,
) -> Result<Option<String>, ConfigError> {
    if let Some(value) = source.value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(Some(value.to_string()));
    }
    let Some(path) = &source.file else {
        return Ok(None);
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::SecretFile {
            name,
            path: path.clone(),
            source,
        })?;
    Ok(Some(text.trim().to_string()).filter(|v| !v.is_empty()))
}

async fn resolve_required(name: &'static str, source: &SecretSource) -> Result<String, ConfigError> {
    resolve_secret(name, source)
        .await?
        .ok_or(ConfigError::Missing(name))
}

/// Fetch all secrets concurrently; the first failure aborts the others.
pub async fn resolve_secrets(config: &SyncConfig) -> Result<ResolvedSecrets, ConfigError> {
    let (directory_token, scim_token, state_token) = tokio::try_join!(
        resolve_required("directory_token", &config.directory_token),
        resolve_required("scim_token", &config.scim_token),
        resolve_secret("state_token", &config.state_token),
    )?;
    Ok(ResolvedSecrets {
        directory_token,
        scim_token,
        state_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_with(directory: SecretSource, scim: SecretSource) -> SyncConfig {
        SyncConfig {
            directory_token: directory,
            scim_token: scim,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn inline_and_file_secrets_resolve_together() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scim_file = dir.path().join("scim-token");
        std::fs::write(&scim_file, "scim-secret\n").expect("write");

        let config = config_with(
            SecretSource {
                value: Some("google-token".into()),
                file: None,
            },
            SecretSource {
                value: None,
                file: Some(scim_file),
            },
        );
        let secrets = resolve_secrets(&config).await.expect("resolved");
        assert_eq!(secrets.directory_token, "google-token");
        assert_eq!(secrets.scim_token, "scim-secret");
        assert_eq!(secrets.state_token, None);
    }

    #[tokio::test]
    async fn unreadable_secret_file_fails_the_whole_resolution() {
        let config = config_with(
            SecretSource {
                value: Some("google-token".into()),
                file: None,
            },
            SecretSource {
                value: None,
                file: Some(PathBuf::from("/definitely/not/here/scim-token")),
            },
        );
        let err = resolve_secrets(&config).await.expect_err("missing file");
        assert!(matches!(err, ConfigError::SecretFile { name: "scim_token", .. }));
    }

    #[tokio::test]
    async fn absent_required_secret_is_reported_by_name() {
        let config = config_with(SecretSource::default(), SecretSource::default());
        let err = resolve_secrets(&config).await.expect_err("nothing configured");
        assert!(matches!(err, ConfigError::Missing("directory_token")));
    }
}
