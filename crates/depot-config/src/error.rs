use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(depot_config::toml_deserialize),
        help("Check your config.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(depot_config::io))]
    IoError(#[from] std::io::Error),

    #[error("No repository sections configured")]
    #[diagnostic(
        code(depot_config::no_sections),
        help("Declare at least one [[section]] entry")
    )]
    NoSections,

    #[error("Duplicate section name: {0}")]
    #[diagnostic(
        code(depot_config::duplicate_section),
        help("Each section must have a unique name")
    )]
    DuplicateSection(String),

    #[error("Invalid section name: {0}")]
    #[diagnostic(
        code(depot_config::invalid_section_name),
        help("Section names may contain letters, digits, `-`, `_` and `.`")
    )]
    InvalidSectionName(String),

    #[error("Invalid duration `{value}` for `{field}`")]
    #[diagnostic(
        code(depot_config::invalid_duration),
        help("Use a value like `30s`, `5m` or `1h30m`")
    )]
    InvalidDuration { field: &'static str, value: String },

    #[error("`{field}` must be greater than zero")]
    #[diagnostic(code(depot_config::zero_limit))]
    ZeroLimit { field: &'static str },

    #[error("Invalid signing key: expected 64 hex characters")]
    #[diagnostic(
        code(depot_config::invalid_signing_key),
        help("Generate one with e.g. `openssl rand -hex 32`")
    )]
    InvalidSigningKey,

    #[error("Policy rule for `{principal}` has an empty permission list")]
    #[diagnostic(code(depot_config::empty_policy))]
    EmptyPolicy { principal: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
