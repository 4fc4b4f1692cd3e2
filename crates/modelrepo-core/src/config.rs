//! # Repository Configuration
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! - `MODELREPO_FORMAT_VERSION`: format version tag of produced chunks
//! - `MODELREPO_ID_PREFIX`: prefix of reserved ids
//! - `MODELREPO_UNAVAILABLE_POLICY`: `fail`, `skip` or `keep`, applied to all
//!   three dangling-link policies
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::primitives::{
    DEFAULT_FORMAT_VERSION, DEFAULT_ID_PREFIX, DEFAULT_MAX_PAYLOAD_BYTES,
    SUPPORTED_FORMAT_VERSIONS, is_valid_id,
};
use crate::resolver::{ResolverPolicies, UnavailableNodePolicy};
use crate::RepoError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_FORMAT_VERSION: &str = "MODELREPO_FORMAT_VERSION";
pub const ENV_ID_PREFIX: &str = "MODELREPO_ID_PREFIX";
pub const ENV_UNAVAILABLE_POLICY: &str = "MODELREPO_UNAVAILABLE_POLICY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    pub serialization_format_version: String,
    pub id_prefix: String,
    pub policies: ResolverPolicies,
    pub max_payload_bytes: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            serialization_format_version: DEFAULT_FORMAT_VERSION.to_string(),
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            policies: ResolverPolicies::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl RepositoryConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, RepoError> {
        let config: Self =
            toml::from_str(text).map_err(|e| RepoError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RepoError::ConfigError(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply the `MODELREPO_*` environment variables.
    pub fn apply_env_overrides(self) -> Result<Self, RepoError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RepoError> {
        if let Some(version) = lookup(ENV_FORMAT_VERSION) {
            self.serialization_format_version = version;
        }
        if let Some(prefix) = lookup(ENV_ID_PREFIX) {
            self.id_prefix = prefix;
        }
        if let Some(policy) = lookup(ENV_UNAVAILABLE_POLICY) {
            self.policies = ResolverPolicies::all(policy.parse::<UnavailableNodePolicy>()?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), RepoError> {
        if !SUPPORTED_FORMAT_VERSIONS.contains(&self.serialization_format_version.as_str()) {
            return Err(RepoError::ConfigError(format!(
                "unsupported serialization format version {:?}",
                self.serialization_format_version
            )));
        }
        // The prefix must itself be a valid id so generated ids are too.
        if !is_valid_id(&self.id_prefix) {
            return Err(RepoError::ConfigError(format!(
                "invalid id prefix {:?}",
                self.id_prefix
            )));
        }
        if self.max_payload_bytes == 0 {
            return Err(RepoError::ConfigError(
                "max_payload_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_document_yields_defaults() {
        let config = RepositoryConfig::from_toml_str("").expect("parse");
        assert_eq!(config, RepositoryConfig::default());
    }

    #[test]
    fn toml_sets_every_field() {
        let config = RepositoryConfig::from_toml_str(
            r#"
            serialization_format_version = "2024.1"
            id_prefix = "node-"
            max_payload_bytes = 1024

            [policies]
            parent = "skip"
            reference_target = "keep_unresolved"
            "#,
        )
        .expect("parse");

        assert_eq!(config.serialization_format_version, "2024.1");
        assert_eq!(config.id_prefix, "node-");
        assert_eq!(config.max_payload_bytes, 1024);
        assert_eq!(
            config.policies,
            ResolverPolicies {
                parent: UnavailableNodePolicy::Skip,
                children: UnavailableNodePolicy::Fail,
                reference_target: UnavailableNodePolicy::KeepUnresolved,
            }
        );
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for doc in [
            r#"serialization_format_version = "0.1""#,
            r#"id_prefix = "a b""#,
            "max_payload_bytes = 0",
            "unknown_key = 1",
            "[policies]\nparent = \"sometimes\"",
        ] {
            assert!(
                matches!(
                    RepositoryConfig::from_toml_str(doc),
                    Err(RepoError::ConfigError(_))
                ),
                "accepted {doc}"
            );
        }
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            (ENV_ID_PREFIX, "x-"),
            (ENV_UNAVAILABLE_POLICY, "keep"),
        ]
        .into_iter()
        .collect();

        let config = RepositoryConfig::default()
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("overrides");

        assert_eq!(config.id_prefix, "x-");
        assert_eq!(
            config.policies,
            ResolverPolicies::all(UnavailableNodePolicy::KeepUnresolved)
        );
        assert_eq!(config.serialization_format_version, DEFAULT_FORMAT_VERSION);
    }

    #[test]
    fn bad_override_is_rejected() {
        let result = RepositoryConfig::default()
            .apply_overrides(|key| (key == ENV_UNAVAILABLE_POLICY).then(|| "never".to_string()));
        assert!(matches!(result, Err(RepoError::ConfigError(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("modelrepo.toml");
        std::fs::write(&path, "id_prefix = \"file-\"\n").expect("write");

        let config = RepositoryConfig::from_file(&path).expect("load");
        assert_eq!(config.id_prefix, "file-");

        let missing = RepositoryConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(RepoError::ConfigError(_))));
    }
}
