//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cloud_init::{CloudInitError, resolve_cloud_init_user_data};
use crate::lease::LeaseTimings;
use crate::provider::InstanceSpec;

/// Default API root for the Hyperstack public cloud.
pub const DEFAULT_BASE_URL: &str = "https://infrahub-api.nexgencloud.com/v1/";

/// Longest accepted readiness wait or hold, in seconds (30 days).
pub const MAX_WAIT_SECS: u64 = 30 * 24 * 60 * 60;

/// Provider and lease settings derived from environment variables,
/// configuration files, and defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HYPERSTACK",
    discovery(
        app_name = "vmlease",
        env_var = "VMLEASE_CONFIG_PATH",
        config_file_name = "vmlease.toml",
        dotfile_name = ".vmlease.toml",
        project_file_name = "vmlease.toml"
    )
)]
pub struct LeaseConfig {
    /// API root, for example `https://infrahub-api.nexgencloud.com/v1/`.
    #[ortho_config(default = DEFAULT_BASE_URL.to_owned())]
    pub base_url: String,
    /// Static API key sent in the `api_key` header. This value is required.
    pub api_key: String,
    /// Environment the instances are created in.
    pub environment_name: String,
    /// Key pair injected into every instance.
    pub key_name: String,
    /// Image to boot.
    pub image_name: String,
    /// Flavor (size) to request. GPU runs only differ by this value.
    pub flavor_name: String,
    /// Number of instances to create in one batch.
    #[ortho_config(default = 1)]
    pub count: u32,
    /// Display name shared by every instance in the batch.
    #[ortho_config(default = "vmlease".to_owned())]
    pub instance_name: String,
    /// Whether to attach a public address to each instance.
    #[ortho_config(default = true)]
    pub assign_floating_ip: bool,
    /// TCP port opened to the world once instances exist; `0` disables.
    #[ortho_config(default = 22)]
    pub ingress_port: u16,
    /// Seconds between readiness polls.
    #[ortho_config(default = 30)]
    pub poll_interval_secs: u64,
    /// Seconds to wait for every instance to become active.
    #[ortho_config(default = 600)]
    pub poll_timeout_secs: u64,
    /// Seconds to keep the instances before teardown.
    #[ortho_config(default = 3200)]
    pub hold_secs: u64,
    /// Per-request HTTP timeout in seconds.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
    /// Inline cloud-init user-data (cloud-config YAML or script).
    pub cloud_init_user_data: Option<String>,
    /// Path to a file containing cloud-init user-data.
    pub cloud_init_user_data_file: Option<String>,
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

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to vmlease.toml",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "{} {reason}: check {} or {} in vmlease.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 7] = [
    FieldMetadata::new("API root", "HYPERSTACK_BASE_URL", "base_url"),
    FieldMetadata::new("API key", "HYPERSTACK_API_KEY", "api_key"),
    FieldMetadata::new(
        "environment name",
        "HYPERSTACK_ENVIRONMENT_NAME",
        "environment_name",
    ),
    FieldMetadata::new("key pair name", "HYPERSTACK_KEY_NAME", "key_name"),
    FieldMetadata::new("image name", "HYPERSTACK_IMAGE_NAME", "image_name"),
    FieldMetadata::new("flavor name", "HYPERSTACK_FLAVOR_NAME", "flavor_name"),
    FieldMetadata::new(
        "instance name",
        "HYPERSTACK_INSTANCE_NAME",
        "instance_name",
    ),
];

const COUNT_FIELD: FieldMetadata =
    FieldMetadata::new("instance count", "HYPERSTACK_COUNT", "count");
const POLL_INTERVAL_FIELD: FieldMetadata = FieldMetadata::new(
    "poll interval",
    "HYPERSTACK_POLL_INTERVAL_SECS",
    "poll_interval_secs",
);
const POLL_TIMEOUT_FIELD: FieldMetadata = FieldMetadata::new(
    "poll timeout",
    "HYPERSTACK_POLL_TIMEOUT_SECS",
    "poll_timeout_secs",
);
const HOLD_FIELD: FieldMetadata = FieldMetadata::new("hold", "HYPERSTACK_HOLD_SECS", "hold_secs");
const REQUEST_TIMEOUT_FIELD: FieldMetadata = FieldMetadata::new(
    "request timeout",
    "HYPERSTACK_REQUEST_TIMEOUT_SECS",
    "request_timeout_secs",
);

impl LeaseConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("vmlease")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values via environment variables or configuration
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// [`ConfigError::Invalid`] when a numeric setting is out of range, and
    /// the cloud-init variants when user-data cannot be resolved.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            &self.base_url,
            &self.api_key,
            &self.environment_name,
            &self.key_name,
            &self.image_name,
            &self.flavor_name,
            &self.instance_name,
        ];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            if value.trim().is_empty() {
                return Err(metadata.missing());
            }
        }
        if self.count == 0 {
            return Err(COUNT_FIELD.invalid("must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(POLL_INTERVAL_FIELD.invalid("must be at least 1 second"));
        }
        if self.poll_timeout_secs > MAX_WAIT_SECS {
            return Err(POLL_TIMEOUT_FIELD.invalid("must not exceed 30 days"));
        }
        if self.hold_secs > MAX_WAIT_SECS {
            return Err(HOLD_FIELD.invalid("must not exceed 30 days"));
        }
        if self.request_timeout_secs == 0 {
            return Err(REQUEST_TIMEOUT_FIELD.invalid("must be at least 1 second"));
        }
        self.resolve_user_data()?;
        Ok(())
    }

    /// Builds the [`InstanceSpec`] described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_spec(&self) -> Result<InstanceSpec, ConfigError> {
        self.validate()?;
        InstanceSpec::builder()
            .count(self.count)
            .name(&self.instance_name)
            .image_name(&self.image_name)
            .flavor_name(&self.flavor_name)
            .key_name(&self.key_name)
            .environment_name(&self.environment_name)
            .user_data(self.resolve_user_data()?)
            .assign_floating_ip(self.assign_floating_ip)
            .build()
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the poll, hold, and post-action settings for a lease.
    #[must_use]
    pub const fn timings(&self) -> LeaseTimings {
        LeaseTimings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            hold: Duration::from_secs(self.hold_secs),
            ingress_port: if self.ingress_port == 0 {
                None
            } else {
                Some(self.ingress_port)
            },
        }
    }

    fn resolve_user_data(&self) -> Result<Option<String>, ConfigError> {
        resolve_cloud_init_user_data(
            self.cloud_init_user_data.as_deref(),
            self.cloud_init_user_data_file.as_deref(),
        )
        .map_err(ConfigError::from)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces cloud-init validation problems.
    #[error("cloud-init configuration invalid: {0}")]
    CloudInit(String),
    /// Raised when the cloud-init user-data file cannot be read.
    #[error("failed to read cloud-init user-data file `{path}`: {message}")]
    CloudInitFileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<CloudInitError> for ConfigError {
    fn from(value: CloudInitError) -> Self {
        match value {
            CloudInitError::BothProvided => Self::CloudInit(String::from(concat!(
                "cloud-init user-data cannot be provided both inline and via file: ",
                "set only one of HYPERSTACK_CLOUD_INIT_USER_DATA or ",
                "HYPERSTACK_CLOUD_INIT_USER_DATA_FILE"
            ))),
            CloudInitError::FileRead { path, message } => {
                Self::CloudInitFileRead { path, message }
            }
            other => Self::CloudInit(other.to_string()),
        }
    }
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
