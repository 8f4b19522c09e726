use std::{collections::HashSet, fs, path::PathBuf, time::Duration};

use depot_utils::time::parse_duration;
use serde::Deserialize;
use tracing::info;

use crate::error::{ConfigError, Result};

const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_QUEUE_DEPTH: usize = 64;
const DEFAULT_COMMIT_RETRIES: u32 = 3;
const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// A named repository section (release channel).
#[derive(Clone, Debug, Deserialize)]
pub struct SectionConfig {
    /// Name of the section, e.g. `stable` or `testing`.
    pub name: String,
}

/// Storage locations for the content store and the package index.
#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    /// Directory holding content-addressed package blobs.
    pub content_path: PathBuf,

    /// Path of the SQLite package index database.
    pub index_path: PathBuf,
}

/// Worker pool and ingestion queue limits.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SchedulerConfig {
    /// Number of concurrently executing tasks.
    /// Default: 4
    pub worker_count: Option<usize>,

    /// Maximum number of queued tasks before submissions are rejected.
    /// Default: 64
    pub queue_depth: Option<usize>,

    /// How many times a task re-proposes after a commit conflict.
    /// Default: 3
    pub commit_retries: Option<u32>,

    /// Base backoff between commit retries, doubled per attempt.
    /// Default: 50ms
    pub retry_backoff: Option<String>,
}

impl SchedulerConfig {
    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH)
    }

    pub fn commit_retries(&self) -> u32 {
        self.commit_retries.unwrap_or(DEFAULT_COMMIT_RETRIES)
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_RETRY_BACKOFF)
    }
}

/// What happens when a removal would orphan live dependents.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Refuse the operation with a dependency conflict.
    #[default]
    Reject,
    /// Log a warning and proceed.
    Warn,
}

/// Transaction behavior.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TransactionConfig {
    /// Deadline for an open transaction; exceeding it forces abort.
    /// Default: 30s
    pub timeout: Option<String>,

    /// Policy for removals that leave dependents behind.
    /// Default: reject
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

impl TransactionConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_TRANSACTION_TIMEOUT)
    }
}

/// One policy table entry: a principal and its permission patterns.
///
/// Patterns are dot-separated `<section>.<operation>` tags where either
/// tag may be `*`, e.g. `stable.publish` or `testing.*`.
#[derive(Clone, Debug, Deserialize)]
pub struct PolicyRule {
    pub principal: String,
    pub permissions: Vec<String>,
}

/// Credential verification and the authorization policy table.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    /// Hex-encoded 32-byte key used to sign and verify tokens.
    pub signing_key: String,

    /// Validity window for newly issued tokens.
    /// Default: 1h
    pub token_ttl: Option<String>,

    /// The policy table. Principals absent from it are denied.
    #[serde(default)]
    pub policy: Vec<PolicyRule>,
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_TOKEN_TTL)
    }

    /// Decodes the signing key into raw bytes.
    pub fn signing_key_bytes(&self) -> Result<[u8; 32]> {
        if self.signing_key.len() != 64 {
            return Err(ConfigError::InvalidSigningKey);
        }
        let mut key = [0u8; 32];
        for (i, chunk) in self.signing_key.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| ConfigError::InvalidSigningKey)?;
            key[i] = u8::from_str_radix(hex, 16).map_err(|_| ConfigError::InvalidSigningKey)?;
        }
        Ok(key)
    }
}

/// The service configuration.
///
/// An immutable value deserialized once at startup and passed to
/// component constructors; depot keeps no global configuration state.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Declared repository sections.
    #[serde(rename = "section", default)]
    pub sections: Vec<SectionConfig>,

    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub transaction: TransactionConfig,

    pub auth: AuthConfig,
}

fn valid_section_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl Config {
    /// Parses and validates a configuration from TOML text.
    pub fn from_toml(input: &str) -> Result<Self> {
        let config: Config = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file from disk.
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), sections = config.sections.len(), "loaded configuration");
        Ok(config)
    }

    /// Returns the declared section names in configuration order.
    pub fn section_names(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.name.clone()).collect()
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.sections.is_empty() {
            return Err(ConfigError::NoSections);
        }

        let mut seen = HashSet::new();
        for section in &self.sections {
            if !valid_section_name(&section.name) {
                return Err(ConfigError::InvalidSectionName(section.name.clone()));
            }
            if !seen.insert(section.name.as_str()) {
                return Err(ConfigError::DuplicateSection(section.name.clone()));
            }
        }

        if self.scheduler.worker_count() == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "scheduler.worker_count",
            });
        }
        if self.scheduler.queue_depth() == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "scheduler.queue_depth",
            });
        }

        for (field, value) in [
            ("transaction.timeout", &self.transaction.timeout),
            ("scheduler.retry_backoff", &self.scheduler.retry_backoff),
            ("auth.token_ttl", &self.auth.token_ttl),
        ] {
            if let Some(value) = value {
                if parse_duration(value).is_none() {
                    return Err(ConfigError::InvalidDuration {
                        field,
                        value: value.clone(),
                    });
                }
            }
        }

        self.auth.signing_key_bytes()?;

        for rule in &self.auth.policy {
            if rule.permissions.is_empty() {
                return Err(ConfigError::EmptyPolicy {
                    principal: rule.principal.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
            [[section]]
            name = "stable"

            [[section]]
            name = "testing"

            [storage]
            content_path = "/var/lib/depot/objects"
            index_path = "/var/lib/depot/index.db"

            [auth]
            signing_key = "000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f"

            [[auth.policy]]
            principal = "ci-bot"
            permissions = ["stable.publish", "testing.*"]
        "#
        .to_string()
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::from_toml(&base_toml()).unwrap();
        assert_eq!(config.section_names(), vec!["stable", "testing"]);
        assert!(config.has_section("stable"));
        assert!(!config.has_section("unstable"));
        assert_eq!(config.scheduler.worker_count(), 4);
        assert_eq!(config.scheduler.queue_depth(), 64);
        assert_eq!(config.transaction.timeout(), Duration::from_secs(30));
        assert_eq!(config.transaction.removal_policy, RemovalPolicy::Reject);
    }

    #[test]
    fn test_parse_overrides() {
        let toml = base_toml()
            + r#"
            [scheduler]
            worker_count = 2
            queue_depth = 8
            retry_backoff = "10ms"

            [transaction]
            timeout = "5s"
            removal_policy = "warn"
        "#;
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.scheduler.worker_count(), 2);
        assert_eq!(config.scheduler.queue_depth(), 8);
        assert_eq!(config.scheduler.retry_backoff(), Duration::from_millis(10));
        assert_eq!(config.transaction.timeout(), Duration::from_secs(5));
        assert_eq!(config.transaction.removal_policy, RemovalPolicy::Warn);
    }

    #[test]
    fn test_duplicate_section_rejected() {
        let toml = base_toml()
            + r#"
            [[section]]
            name = "stable"
        "#;
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::DuplicateSection(name)) if name == "stable"
        ));
    }

    #[test]
    fn test_invalid_section_name_rejected() {
        let toml = base_toml().replace("\"testing\"", "\"bad section\"");
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::InvalidSectionName(_))
        ));
    }

    #[test]
    fn test_no_sections_rejected() {
        let toml = r#"
            [storage]
            content_path = "/tmp/objects"
            index_path = "/tmp/index.db"

            [auth]
            signing_key = "000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f"
        "#;
        assert!(matches!(
            Config::from_toml(toml),
            Err(ConfigError::NoSections)
        ));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let toml = base_toml()
            + r#"
            [transaction]
            timeout = "soon"
        "#;
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::InvalidDuration { field, .. }) if field == "transaction.timeout"
        ));
    }

    #[test]
    fn test_invalid_signing_key_rejected() {
        let toml = base_toml().replace(
            "000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f",
            "deadbeef",
        );
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::InvalidSigningKey)
        ));
    }

    #[test]
    fn test_signing_key_roundtrip() {
        let config = Config::from_toml(&base_toml()).unwrap();
        let key = config.auth.signing_key_bytes().unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[1], 0x01);
        assert_eq!(key[31], 0x0f);
    }

    #[test]
    fn test_zero_worker_count_rejected() {
        let toml = base_toml()
            + r#"
            [scheduler]
            worker_count = 0
        "#;
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::ZeroLimit { field }) if field == "scheduler.worker_count"
        ));
    }
}
