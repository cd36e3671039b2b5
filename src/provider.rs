//! Provider abstraction for provisioning disposable compute instances.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Opaque identifier assigned by the provider to an instance.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wraps a provider identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Lifecycle status reported by the provider.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InstanceStatus {
    /// The instance exists but is not usable yet.
    Pending,
    /// The instance is running and usable.
    Active,
    /// The provider reports the instance as failed.
    Error,
    /// The provider did not report a status.
    Unknown,
}

impl InstanceStatus {
    /// Maps a raw provider status string onto the lifecycle enum.
    ///
    /// Statuses other than `ACTIVE`, `ERROR`, and `UNKNOWN` (for example
    /// `BUILD` or `CREATING`) are treated as pending.
    #[must_use]
    pub fn from_provider(raw: Option<&str>) -> Self {
        let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::Unknown;
        };
        if value.eq_ignore_ascii_case("ACTIVE") {
            Self::Active
        } else if value.eq_ignore_ascii_case("ERROR") {
            Self::Error
        } else if value.eq_ignore_ascii_case("UNKNOWN") {
            Self::Unknown
        } else {
            Self::Pending
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Provider view of a single instance at the time it was fetched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRecord {
    /// Provider assigned identifier.
    pub id: InstanceId,
    /// Display name.
    pub name: String,
    /// Latest status reported by the provider.
    pub status: InstanceStatus,
    /// Public (floating) address, when one has been assigned.
    pub public_ip: Option<String>,
}

/// Parameters required to create a batch of instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Number of instances to create in one request.
    pub count: u32,
    /// Display name given to every instance in the batch.
    pub name: String,
    /// Image to boot from.
    pub image_name: String,
    /// Flavor (size) of each instance.
    pub flavor_name: String,
    /// Key pair injected for SSH access.
    pub key_name: String,
    /// Environment (region scoped project) the instances belong to.
    pub environment_name: String,
    /// Boot-time user data (cloud-init) passed through unchanged.
    pub user_data: Option<String>,
    /// Whether the provider should attach a public address.
    pub assign_floating_ip: bool,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::new()
    }

    /// Validates the instance parameters, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any string field is empty and
    /// [`SpecError::ZeroCount`] when no instances are requested.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.count == 0 {
            return Err(SpecError::ZeroCount);
        }
        let required = [
            ("name", &self.name),
            ("image_name", &self.image_name),
            ("flavor_name", &self.flavor_name),
            ("key_name", &self.key_name),
            ("environment_name", &self.environment_name),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(SpecError::Validation(field.to_owned()));
            }
        }
        if self
            .user_data
            .as_deref()
            .is_some_and(|data| data.trim().is_empty())
        {
            return Err(SpecError::Validation(String::from("user_data")));
        }
        Ok(())
    }
}

/// Builder for [`InstanceSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpecBuilder {
    count: u32,
    name: String,
    image_name: String,
    flavor_name: String,
    key_name: String,
    environment_name: String,
    user_data: Option<String>,
    assign_floating_ip: bool,
}

impl Default for InstanceSpecBuilder {
    fn default() -> Self {
        Self {
            count: 1,
            name: String::new(),
            image_name: String::new(),
            flavor_name: String::new(),
            key_name: String::new(),
            environment_name: String::new(),
            user_data: None,
            assign_floating_ip: true,
        }
    }
}

impl InstanceSpecBuilder {
    /// Creates a builder requesting one instance with a public address.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of instances.
    #[must_use]
    pub const fn count(mut self, value: u32) -> Self {
        self.count = value;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the image name.
    #[must_use]
    pub fn image_name(mut self, value: impl Into<String>) -> Self {
        self.image_name = value.into();
        self
    }

    /// Sets the flavor name.
    #[must_use]
    pub fn flavor_name(mut self, value: impl Into<String>) -> Self {
        self.flavor_name = value.into();
        self
    }

    /// Sets the key pair name.
    #[must_use]
    pub fn key_name(mut self, value: impl Into<String>) -> Self {
        self.key_name = value.into();
        self
    }

    /// Sets the environment name.
    #[must_use]
    pub fn environment_name(mut self, value: impl Into<String>) -> Self {
        self.environment_name = value.into();
        self
    }

    /// Sets the optional boot-time user data. The payload is not trimmed.
    #[must_use]
    pub fn user_data(mut self, value: Option<String>) -> Self {
        self.user_data = value;
        self
    }

    /// Sets whether a public address is assigned.
    #[must_use]
    pub const fn assign_floating_ip(mut self, value: bool) -> Self {
        self.assign_floating_ip = value;
        self
    }

    /// Builds and validates the [`InstanceSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when any required field is empty or the count
    /// is zero.
    pub fn build(self) -> Result<InstanceSpec, SpecError> {
        let spec = InstanceSpec {
            count: self.count,
            name: self.name.trim().to_owned(),
            image_name: self.image_name.trim().to_owned(),
            flavor_name: self.flavor_name.trim().to_owned(),
            key_name: self.key_name.trim().to_owned(),
            environment_name: self.environment_name.trim().to_owned(),
            user_data: self.user_data,
            assign_floating_ip: self.assign_floating_ip,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Errors raised while validating an [`InstanceSpec`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the request asks for zero instances.
    #[error("instance count must be at least 1")]
    ZeroCount,
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Request/response interface implemented by cloud providers.
///
/// Implementations attempt each request once and report failure; retry and
/// fatality decisions belong to the caller.
pub trait Provider {
    /// Provider specific error type returned by every operation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Issues one create call for the whole batch and returns the instances
    /// the provider acknowledged. An empty list is a valid response.
    fn create_instances<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, Vec<InstanceRecord>, Self::Error>;

    /// Lists every instance visible to the credential, unfiltered.
    fn list_instances(&self) -> ProviderFuture<'_, Vec<InstanceRecord>, Self::Error>;

    /// Opens a single TCP port to the world on the instance.
    fn open_ingress_port<'a>(
        &'a self,
        id: &'a InstanceId,
        port: u16,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Requests deletion of the instance.
    fn delete_instance<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error>;
}
