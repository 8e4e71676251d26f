use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::is_default;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DnsConfig {
    #[serde(skip_serializing_if = "is_default")]
    pub tag: String,
    #[serde(skip_serializing_if = "is_default")]
    pub query_strategy: String,
    pub servers: Vec<DnsServer>,
    #[serde(skip_serializing_if = "is_default")]
    pub hosts: BTreeMap<String, HostMapping>,
    #[serde(rename = "clientIP", skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_fallback: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_fallback_if_match: Option<bool>,
}

impl DnsConfig {
    pub fn demo() -> Self {
        Self {
            tag: "dns-server".to_string(),
            servers: vec![
                DnsServer::Address("114.114.114.114".to_string()),
                DnsServer::Address("8.8.8.8".to_string()),
            ],
            ..Self::default()
        }
    }
}

/// A DNS server in either the bare-address or the full object form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DnsServer {
    Address(String),
    Full(DnsServerObject),
}

impl DnsServer {
    pub fn address(&self) -> &str {
        match self {
            DnsServer::Address(a) => a,
            DnsServer::Full(s) => &s.address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DnsServerObject {
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "is_default")]
    pub domains: Vec<String>,
    #[serde(rename = "expectIPs", skip_serializing_if = "Option::is_none")]
    pub expect_ips: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_fallback: Option<bool>,
    #[serde(rename = "clientIP", skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

impl Default for DnsServerObject {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 53,
            domains: Vec::new(),
            expect_ips: None,
            skip_fallback: None,
            client_ip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostMapping {
    Single(String),
    Multiple(Vec<String>),
}

impl HostMapping {
    pub fn addresses(&self) -> Vec<&str> {
        match self {
            HostMapping::Single(a) => vec![a.as_str()],
            HostMapping::Multiple(list) => list.iter().map(String::as_str).collect(),
        }
    }
}
