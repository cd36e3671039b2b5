//! Wire types for the Hyperstack virtual machine endpoints.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::provider::{InstanceId, InstanceRecord, InstanceSpec, InstanceStatus};

const ANY_IPV4: &str = "0.0.0.0/0";

/// Body of `POST core/virtual-machines`.
#[derive(Debug, Serialize)]
pub(super) struct CreateInstancesRequest<'a> {
    name: &'a str,
    environment_name: &'a str,
    image_name: &'a str,
    flavor_name: &'a str,
    key_name: &'a str,
    assign_floating_ip: bool,
    count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<&'a str>,
}

impl<'a> From<&'a InstanceSpec> for CreateInstancesRequest<'a> {
    fn from(spec: &'a InstanceSpec) -> Self {
        Self {
            name: &spec.name,
            environment_name: &spec.environment_name,
            image_name: &spec.image_name,
            flavor_name: &spec.flavor_name,
            key_name: &spec.key_name,
            assign_floating_ip: spec.assign_floating_ip,
            count: spec.count,
            user_data: spec.user_data.as_deref(),
        }
    }
}

/// Body of `POST core/virtual-machines/{id}/sg-rules`.
#[derive(Debug, Serialize)]
pub(super) struct SecurityRuleRequest {
    remote_ip_prefix: &'static str,
    direction: &'static str,
    ethertype: &'static str,
    protocol: &'static str,
    port_range_min: u16,
    port_range_max: u16,
}

impl SecurityRuleRequest {
    pub(super) const fn tcp_ingress(port: u16) -> Self {
        Self {
            remote_ip_prefix: ANY_IPV4,
            direction: "ingress",
            ethertype: "IPv4",
            protocol: "tcp",
            port_range_min: port,
            port_range_max: port,
        }
    }
}

/// Envelope shared by the create and list responses.
#[derive(Debug, Default, Deserialize)]
pub(super) struct InstancesEnvelope {
    #[serde(default)]
    instances: Vec<WireInstance>,
}

impl InstancesEnvelope {
    /// Converts the wire entries into records, skipping entries without an
    /// identifier.
    pub(super) fn into_records(self) -> Vec<InstanceRecord> {
        self.instances
            .into_iter()
            .filter_map(WireInstance::into_record)
            .collect()
    }
}

/// The provider encodes identifiers as numbers; strings are accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Text(value) => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireInstance {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    floating_ip: Option<String>,
}

impl WireInstance {
    fn into_record(self) -> Option<InstanceRecord> {
        let Some(id) = self
            .id
            .map(WireId::into_string)
            .filter(|value| !value.trim().is_empty())
        else {
            warn!(name = ?self.name, "provider returned an instance without an id");
            return None;
        };
        Some(InstanceRecord {
            id: InstanceId::new(id),
            name: self.name.unwrap_or_default(),
            status: InstanceStatus::from_provider(self.status.as_deref()),
            public_ip: self.floating_ip.filter(|ip| !ip.trim().is_empty()),
        })
    }
}
