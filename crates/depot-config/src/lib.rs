//! Configuration for the depot repository service.
//!
//! The whole service is configured by one TOML file deserialized into
//! [`Config`]: declared sections, storage paths, scheduler limits,
//! transaction behavior and the authorization policy table. The value is
//! validated once and then passed, immutable, to component constructors.

pub mod config;
pub mod error;

pub use config::{
    AuthConfig, Config, PolicyRule, RemovalPolicy, SchedulerConfig, SectionConfig, StorageConfig,
    TransactionConfig,
};
pub use error::{ConfigError, Result};
