//! ---
//! adit_section: "05-networking-external-interfaces"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Manager and Instance connectivity."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{NetError, Result};

/// A channel as enumerated by the Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Channel identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Human label shown in the operator dropdown.
    #[serde(rename = "Name")]
    pub name: String,
}

/// A manual messaging rule, invocable by operator command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    /// Rule identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Human label used for the operator action list.
    #[serde(rename = "Name")]
    pub name: String,
}

/// A channel variable defined on the Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Variable identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Human label.
    #[serde(rename = "Name")]
    pub name: String,
}

/// One worker of the AdIT cluster serving the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    /// Stable instance identifier (GUID).
    #[serde(rename = "ID")]
    pub id: String,
    /// Human label; may change over the instance's lifetime.
    #[serde(rename = "Name")]
    pub name: String,
    /// Free-form operator description.
    #[serde(rename = "Description", default)]
    pub description: String,
    /// Address shared by the status and control endpoints.
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    /// HTTP port of the status endpoint.
    #[serde(rename = "APIPortNumber")]
    pub api_port: u16,
    /// Port of the bidirectional control transport.
    #[serde(rename = "ControlInterfacePortNumber")]
    pub control_port: u16,
}

/// Raw rule row as served by the Manager; the interesting part is the
/// embedded JSON document carrying the rule type.
#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "JSON", default)]
    json: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddedRule {
    #[serde(rename = "RuleType")]
    rule_type: i64,
}

const MANUAL_RULE_TYPE: i64 = 1;

/// Typed client for the Manager REST API.
#[derive(Debug, Clone)]
pub struct ManagerClient {
    http: reqwest::Client,
    base: String,
}

impl ManagerClient {
    /// Build a client for `endpoint` in `host:port` form.
    pub fn new(http: reqwest::Client, endpoint: &str) -> Self {
        Self {
            http,
            base: format!("http://{}", endpoint),
        }
    }

    /// Enumerate the channels the Manager knows about.
    pub async fn fetch_channels(&self, timeout: Duration) -> Result<Vec<ChannelDescriptor>> {
        self.get_json(&format!("{}/channels", self.base), timeout).await
    }

    /// Fetch the manual messaging rules of a channel.
    ///
    /// The Manager serves every rule; only rules whose embedded JSON decodes
    /// and carries `RuleType == 1` are returned. Everything else is
    /// silently excluded.
    pub async fn fetch_rules(
        &self,
        channel_id: &str,
        timeout: Duration,
    ) -> Result<Vec<RuleDescriptor>> {
        let raw: Vec<RawRule> = self
            .get_json(
                &format!("{}/channels/{}/messaging-rules", self.base, channel_id),
                timeout,
            )
            .await?;

        let rules = raw
            .into_iter()
            .filter_map(|rule| match serde_json::from_str::<EmbeddedRule>(&rule.json) {
                Ok(embedded) if embedded.rule_type == MANUAL_RULE_TYPE => Some(RuleDescriptor {
                    id: rule.id,
                    name: rule.name,
                }),
                Ok(_) => None,
                Err(err) => {
                    debug!(rule = %rule.id, error = %err, "skipping rule with undecodable embedded JSON");
                    None
                }
            })
            .collect();
        Ok(rules)
    }

    /// Fetch the variables defined on a channel.
    pub async fn fetch_variables(
        &self,
        channel_id: &str,
        timeout: Duration,
    ) -> Result<Vec<VariableDescriptor>> {
        self.get_json(
            &format!("{}/channels/{}/variables", self.base, channel_id),
            timeout,
        )
        .await
    }

    /// Fetch the instances registered for a channel, in Manager order.
    pub async fn fetch_instances(
        &self,
        channel_id: &str,
        timeout: Duration,
    ) -> Result<Vec<InstanceDescriptor>> {
        self.get_json(
            &format!("{}/channels/{}/instances", self.base, channel_id),
            timeout,
        )
        .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(NetError::from_reqwest)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(NetError::HttpStatus(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(NetError::from_reqwest)?;
        serde_json::from_slice(&body).map_err(|err| NetError::Decode(err.to_string()))
    }
}
