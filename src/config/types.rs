use serde::{Deserialize, Serialize};

use super::dns::DnsConfig;
use super::inbound::Inbound;
use super::outbound::Outbound;
use super::routing::RoutingConfig;
use crate::common::{Error, Result};

/// Omit-if-default predicate shared by every `skip_serializing_if` in the wire model.
pub(crate) fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Config Document: the JSON root handed to the proxy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,
    pub routing: RoutingConfig,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
}

impl Default for Config {
    /// Minimal document: one socks entry, `direct` and `block`, no rules.
    fn default() -> Self {
        Self {
            log: None,
            api: None,
            dns: None,
            stats: None,
            metrics: None,
            policy: None,
            routing: RoutingConfig::default(),
            inbounds: vec![Inbound::socks("entry", 1080)],
            outbounds: vec![Outbound::direct(), Outbound::block()],
        }
    }
}

impl Config {
    /// The document a fresh profile starts from: DNS demo servers, the
    /// china-direct presets and a catch-all rule.
    pub fn preset() -> Self {
        Self {
            log: Some(LogConfig::default()),
            dns: Some(DnsConfig::demo()),
            routing: RoutingConfig::preset(),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn outbound(&self, tag: &str) -> Option<&Outbound> {
        self.outbounds.iter().find(|o| o.tag == tag)
    }

    pub fn outbound_mut(&mut self, tag: &str) -> Option<&mut Outbound> {
        self.outbounds.iter_mut().find(|o| o.tag == tag)
    }

    pub fn inbound(&self, tag: &str) -> Option<&Inbound> {
        self.inbounds.iter().find(|i| i.tag == tag)
    }

    pub fn outbound_tags(&self) -> Vec<String> {
        self.outbounds.iter().map(|o| o.tag.clone()).collect()
    }

    /// First socks inbound, used by the app to point local tooling at the proxy.
    pub fn find_socks_proxy(&self) -> Option<&Inbound> {
        self.inbounds.iter().find(|i| i.protocol() == "socks")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    #[serde(skip_serializing_if = "is_default")]
    pub access: String,
    #[serde(skip_serializing_if = "is_default")]
    pub error: String,
    pub loglevel: String,
    #[serde(rename = "dnsLog", skip_serializing_if = "is_default")]
    pub dns_log: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            access: String::new(),
            error: String::new(),
            loglevel: "warning".to_string(),
            dns_log: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub tag: String,
    #[serde(skip_serializing_if = "is_default")]
    pub services: Vec<String>,
}

/// Presence alone switches stats collection on; the block has no fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsConfig {}

pub const METRICS_OUTBOUND_TAG: &str = "metrics-service";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub tag: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            tag: METRICS_OUTBOUND_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<PolicySystem>,
}

impl PolicyConfig {
    /// All four traffic counters on.
    pub fn enable_all() -> Self {
        Self {
            system: Some(PolicySystem {
                stats_inbound_uplink: true,
                stats_inbound_downlink: true,
                stats_outbound_uplink: true,
                stats_outbound_downlink: true,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicySystem {
    pub stats_inbound_uplink: bool,
    pub stats_inbound_downlink: bool,
    pub stats_outbound_uplink: bool,
    pub stats_outbound_downlink: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_config_is_minimal() {
        let config = Config::default();
        assert_eq!(config.inbounds.len(), 1);
        assert_eq!(config.outbound_tags(), vec!["direct", "block"]);
        assert!(config.routing.rules.is_empty());

        let v = serde_json::to_value(&config).unwrap();
        assert!(v.get("policy").is_none());
        assert!(v.get("metrics").is_none());
        assert!(v.get("stats").is_none());
    }

    #[test]
    fn empty_document_decodes_to_empty_lists() {
        let config = Config::from_json("{}").unwrap();
        assert!(config.inbounds.is_empty());
        assert!(config.outbounds.is_empty());
        assert_eq!(config.routing.domain_strategy, "AsIs");
    }

    #[test]
    fn policy_enable_all_wire_shape() {
        let v = serde_json::to_value(PolicyConfig::enable_all()).unwrap();
        assert_eq!(
            v,
            json!({"system": {
                "statsInboundUplink": true,
                "statsInboundDownlink": true,
                "statsOutboundUplink": true,
                "statsOutboundDownlink": true
            }})
        );
    }

    #[test]
    fn stats_block_is_empty_object() {
        assert_eq!(serde_json::to_value(StatsConfig {}).unwrap(), json!({}));
    }

    #[test]
    fn unknown_protocol_is_config_error() {
        let err = Config::from_json(r#"{"outbounds":[{"tag":"x","protocol":"wireguard"}]}"#)
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("wireguard"), "{}", err);
    }

    #[test]
    fn preset_survives_json_round_trip() {
        let config = Config::preset();
        let text = config.to_json().unwrap();
        assert_eq!(Config::from_json(&text).unwrap(), config);
    }
}
