//! Hyperstack implementation of the [`Provider`] interface.
//!
//! Every operation is a single JSON request against the
//! `core/virtual-machines` endpoints, authenticated with the static
//! `api_key` header. Non-success statuses surface as
//! [`HyperstackError::Request`] with the response body attached.

mod error;
mod types;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::LeaseConfig;
use crate::provider::{InstanceId, InstanceRecord, InstanceSpec, Provider, ProviderFuture};
use types::{CreateInstancesRequest, InstancesEnvelope, SecurityRuleRequest};

pub use error::HyperstackError;

const API_KEY_HEADER: &str = "api_key";
const VIRTUAL_MACHINES: [&str; 2] = ["core", "virtual-machines"];
const SECURITY_RULES: &str = "sg-rules";

/// Default request timeout applied to every call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider that manages virtual machines through the Hyperstack REST API.
#[derive(Clone, Debug)]
pub struct HyperstackProvider {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl HyperstackProvider {
    /// Constructs a provider for the given API root.
    ///
    /// # Errors
    ///
    /// Returns [`HyperstackError::Config`] when the base URL is malformed or
    /// the API key is blank.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, HyperstackError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(HyperstackError::Config(String::from("api key is empty")));
        }
        let parsed = Url::parse(base_url.trim())
            .map_err(|err| HyperstackError::Config(format!("invalid base url {base_url}: {err}")))?;
        if parsed.cannot_be_a_base() {
            return Err(HyperstackError::Config(format!(
                "base url {base_url} cannot carry a path"
            )));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| HyperstackError::Config(err.to_string()))?;
        Ok(Self {
            client,
            base_url: parsed,
            api_key,
        })
    }

    /// Constructs a provider from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HyperstackError::Config`] when the configuration fails
    /// validation.
    pub fn from_config(config: &LeaseConfig) -> Result<Self, HyperstackError> {
        config.validate()?;
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn endpoint(&self, extra: &[&str]) -> Result<Url, HyperstackError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| HyperstackError::Config(String::from("base url cannot carry a path")))?
            .pop_if_empty()
            .extend(VIRTUAL_MACHINES)
            .extend(extra);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<Response, HyperstackError> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|err| HyperstackError::Transport {
                operation: operation.to_owned(),
                message: err.to_string(),
            })?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "provider responded");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(HyperstackError::Request {
            operation: operation.to_owned(),
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(
        operation: &str,
        response: Response,
    ) -> Result<T, HyperstackError> {
        response
            .json::<T>()
            .await
            .map_err(|err| HyperstackError::Decode {
                operation: operation.to_owned(),
                message: err.to_string(),
            })
    }
}

impl Provider for HyperstackProvider {
    type Error = HyperstackError;

    fn create_instances<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, Vec<InstanceRecord>, Self::Error> {
        Box::pin(async move {
            const OPERATION: &str = "create instances";
            let url = self.endpoint(&[])?;
            let body = CreateInstancesRequest::from(spec);
            let response = self
                .send(OPERATION, self.client.post(url).json(&body))
                .await?;
            let envelope: InstancesEnvelope = Self::decode(OPERATION, response).await?;
            Ok(envelope.into_records())
        })
    }

    fn list_instances(&self) -> ProviderFuture<'_, Vec<InstanceRecord>, Self::Error> {
        Box::pin(async move {
            const OPERATION: &str = "list instances";
            let url = self.endpoint(&[])?;
            let response = self.send(OPERATION, self.client.get(url)).await?;
            let envelope: InstancesEnvelope = Self::decode(OPERATION, response).await?;
            Ok(envelope.into_records())
        })
    }

    fn open_ingress_port<'a>(
        &'a self,
        id: &'a InstanceId,
        port: u16,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let url = self.endpoint(&[id.as_str(), SECURITY_RULES])?;
            let rule = SecurityRuleRequest::tcp_ingress(port);
            self.send("open ingress port", self.client.post(url).json(&rule))
                .await?;
            Ok(())
        })
    }

    fn delete_instance<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let url = self.endpoint(&[id.as_str()])?;
            self.send("delete instance", self.client.delete(url))
                .await?;
            Ok(())
        })
    }
}
