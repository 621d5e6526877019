//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::appliance::VolumeKind;

/// Default minimum size of a new volume: 16 MiB.
pub const DEFAULT_MIN_VOLUME_SIZE: u64 = 16 * 1024 * 1024;

/// Appliance connection and driver settings derived from environment
/// variables, configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "JDSS",
    discovery(
        app_name = "joviandss-csi",
        env_var = "JDSS_CONFIG_PATH",
        config_file_name = "joviandss.toml",
        dotfile_name = ".joviandss.toml",
        project_file_name = "joviandss.toml"
    )
)]
pub struct ApplianceConfig {
    /// Comma separated management addresses of the appliance. The transport
    /// fails over to the next address when one stops answering.
    pub addrs: String,
    /// Management API port. Defaults to `82`.
    #[ortho_config(default = 82)]
    pub port: u16,
    /// URL scheme used for the management API. Defaults to `https`.
    #[ortho_config(default = "https".to_owned())]
    pub protocol: String,
    /// REST user name. Defaults to `admin`.
    #[ortho_config(default = "admin".to_owned())]
    pub user: String,
    /// REST password. This value is required.
    pub password: String,
    /// Storage pool holding the plugin's volumes. Defaults to `Pool-0`.
    #[ortho_config(default = "Pool-0".to_owned())]
    pub pool: String,
    /// Attempts per request across the configured addresses.
    #[ortho_config(default = 3)]
    pub tries: u32,
    /// Per-request timeout in seconds.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
    /// Whether the appliance certificate is verified. Appliances ship with
    /// self-signed certificates, so verification is off unless enabled.
    #[ortho_config(default = false)]
    pub tls_verify: bool,
    /// IQN prefix of the iSCSI targets exported for published volumes.
    #[ortho_config(default = "iqn.csi.2019-04".to_owned())]
    pub iqn_prefix: String,
    /// Smallest volume the plugin creates, in bytes.
    #[ortho_config(default = DEFAULT_MIN_VOLUME_SIZE)]
    pub min_volume_size: u64,
    /// Kind of volume provisioned: `block` zvols published over iSCSI or
    /// `file` NAS volumes shared over NFS.
    #[ortho_config(default = "block".to_owned())]
    pub volume_kind: String,
    /// Default log level when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
    /// Log output format: `text` or `json`.
    #[ortho_config(default = "text".to_owned())]
    pub log_format: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ApplianceConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to joviandss.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("joviandss-csi")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Management addresses with surrounding whitespace and empty entries
    /// removed.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.addrs
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Parsed [`VolumeKind`] of provisioned volumes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown kind.
    pub fn volume_kind(&self) -> Result<VolumeKind, ConfigError> {
        self.volume_kind
            .parse()
            .map_err(|err: crate::appliance::UnknownVolumeKind| {
                ConfigError::Invalid(format!("{err} (JDSS_VOLUME_KIND)"))
            })
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.addrs,
            &FieldMetadata::new("appliance address", "JDSS_ADDRS", "addrs"),
        )?;
        Self::require_field(
            &self.password,
            &FieldMetadata::new("REST password", "JDSS_PASSWORD", "password"),
        )?;
        Self::require_field(
            &self.pool,
            &FieldMetadata::new("storage pool", "JDSS_POOL", "pool"),
        )?;
        Self::require_field(
            &self.iqn_prefix,
            &FieldMetadata::new("iSCSI target prefix", "JDSS_IQN_PREFIX", "iqn_prefix"),
        )?;
        if self.addresses().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "appliance address list '{}' names no address",
                self.addrs
            )));
        }
        if !matches!(self.protocol.as_str(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "protocol must be http or https, got '{}'",
                self.protocol
            )));
        }
        if self.tries == 0 {
            return Err(ConfigError::Invalid(
                "tries must be at least 1 (JDSS_TRIES)".to_owned(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1 (JDSS_REQUEST_TIMEOUT_SECS)".to_owned(),
            ));
        }
        self.volume_kind()?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("configuration incomplete: {0}")]
    MissingField(String),
    /// Indicates a field holds a value the driver cannot use.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
