use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::types::is_default;

/// Routing table as stored in the document: ordered rules plus balancers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoutingConfig {
    pub domain_strategy: String,
    pub domain_matcher: String,
    #[serde(skip_serializing_if = "is_default")]
    pub balancers: Vec<BalancerConfig>,
    pub rules: Vec<RuleConfig>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            domain_strategy: "AsIs".to_string(),
            domain_matcher: "hybrid".to_string(),
            balancers: Vec::new(),
            rules: Vec::new(),
        }
    }
}

impl RoutingConfig {
    pub fn preset() -> Self {
        Self {
            balancers: vec![BalancerConfig::proxy()],
            rules: vec![
                RuleConfig::china_ip_direct(),
                RuleConfig::china_domain_direct(),
                RuleConfig::match_all(),
            ],
            ..Self::default()
        }
    }

    pub fn rule(&self, rule_tag: &str) -> Option<&RuleConfig> {
        self.rules.iter().find(|r| r.rule_tag == rule_tag)
    }

    pub fn balancer(&self, tag: &str) -> Option<&BalancerConfig> {
        self.balancers.iter().find(|b| b.tag == tag)
    }
}

/// Where a matching rule sends the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget<'a> {
    Outbound(&'a str),
    Balancer(&'a str),
}

/// One `field` rule. Every non-empty field must match; entries within a field are OR'ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub rule_tag: String,
    #[serde(skip_serializing_if = "is_default")]
    pub domain_matcher: String,
    #[serde(skip_serializing_if = "is_default")]
    pub domain: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub ip: Vec<String>,
    #[serde(skip_serializing_if = "is_default", deserialize_with = "port_spec")]
    pub port: String,
    #[serde(skip_serializing_if = "is_default", deserialize_with = "port_spec")]
    pub source_port: String,
    #[serde(skip_serializing_if = "is_default")]
    pub source: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub user: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub inbound_tag: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub protocol: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub attrs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "is_default")]
    pub outbound_tag: String,
    #[serde(skip_serializing_if = "is_default")]
    pub balancer_tag: String,
    #[serde(skip_serializing_if = "is_default")]
    pub network: String,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            kind: "field".to_string(),
            rule_tag: String::new(),
            domain_matcher: String::new(),
            domain: Vec::new(),
            ip: Vec::new(),
            port: String::new(),
            source_port: String::new(),
            source: Vec::new(),
            user: Vec::new(),
            inbound_tag: Vec::new(),
            protocol: Vec::new(),
            attrs: BTreeMap::new(),
            outbound_tag: String::new(),
            balancer_tag: String::new(),
            network: String::new(),
        }
    }
}

/// Ports may be written as a bare number or as a `"53,443,1000-2000"` list.
fn port_spec<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortSpec {
        Number(u16),
        Text(String),
    }
    Ok(match PortSpec::deserialize(deserializer)? {
        PortSpec::Number(n) => n.to_string(),
        PortSpec::Text(s) => s,
    })
}

impl RuleConfig {
    pub fn to_outbound(rule_tag: &str, outbound_tag: &str) -> Self {
        Self {
            rule_tag: rule_tag.to_string(),
            outbound_tag: outbound_tag.to_string(),
            ..Self::default()
        }
    }

    pub fn china_ip_direct() -> Self {
        Self {
            ip: vec!["geoip:cn".to_string()],
            ..Self::to_outbound("china-ip-direct", "direct")
        }
    }

    pub fn china_domain_direct() -> Self {
        Self {
            domain: vec!["geosite:cn".to_string()],
            ..Self::to_outbound("china-domain-direct", "direct")
        }
    }

    /// Catch-all into the `proxy` balancer. Only `balancerTag` is set: an
    /// `outboundTag` here would win and point at no outbound.
    pub fn match_all() -> Self {
        Self {
            rule_tag: "match-all".to_string(),
            port: "1-65535".to_string(),
            balancer_tag: "proxy".to_string(),
            ..Self::default()
        }
    }

    /// `outboundTag` wins over `balancerTag`; `None` when neither is set.
    pub fn target(&self) -> Option<RuleTarget<'_>> {
        if !self.outbound_tag.is_empty() {
            Some(RuleTarget::Outbound(&self.outbound_tag))
        } else if !self.balancer_tag.is_empty() {
            Some(RuleTarget::Balancer(&self.balancer_tag))
        } else {
            None
        }
    }

    pub fn networks(&self) -> Vec<&str> {
        self.network
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn set_networks(&mut self, networks: &[&str]) {
        self.network = networks.join(",");
    }

    /// Label used in logs and diagnostics: the rule tag, or its position.
    pub fn label(&self, index: usize) -> String {
        if self.rule_tag.is_empty() {
            format!("#{}", index)
        } else {
            self.rule_tag.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BalancerConfig {
    pub tag: String,
    pub selector: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub fallback_tag: String,
    #[serde(skip_serializing_if = "is_default")]
    pub strategy: StrategyConfig,
}

impl BalancerConfig {
    /// Pool over every outbound whose tag mentions neither `direct` nor
    /// `block`, falling back to `direct`.
    pub fn proxy() -> Self {
        Self {
            tag: "proxy".to_string(),
            selector: vec!["^((?!direct|block).)*$".to_string()],
            fallback_tag: "direct".to_string(),
            strategy: StrategyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// `random` (also when empty), `roundRobin`, `leastPing` or `leastLoad`.
    #[serde(rename = "type", skip_serializing_if = "is_default")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<StrategySettings>,
}

/// Tuning knobs for `leastLoad`, consumed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub expected: u32,
    #[serde(rename = "maxRTT", skip_serializing_if = "is_default")]
    pub max_rtt: String,
    pub tolerance: f64,
    pub baselines: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub costs: Vec<CostObject>,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            expected: 2,
            max_rtt: String::new(),
            tolerance: 0.01,
            baselines: vec!["1s".to_string()],
            costs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostObject {
    pub regexp: bool,
    #[serde(rename = "match")]
    pub pattern: String,
    pub value: f64,
}

impl Default for CostObject {
    fn default() -> Self {
        Self {
            regexp: false,
            pattern: String::new(),
            value: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_always_emits_type_and_tag() {
        let v = serde_json::to_value(RuleConfig::default()).unwrap();
        assert_eq!(v, json!({"type": "field", "ruleTag": ""}));
    }

    #[test]
    fn outbound_tag_wins_over_balancer() {
        let rule = RuleConfig {
            balancer_tag: "pool".into(),
            ..RuleConfig::to_outbound("both", "direct")
        };
        assert_eq!(rule.target(), Some(RuleTarget::Outbound("direct")));

        assert_eq!(RuleConfig::match_all().target(), Some(RuleTarget::Balancer("proxy")));
        assert_eq!(RuleConfig::default().target(), None);
    }

    #[test]
    fn numeric_port_is_accepted() {
        let rule: RuleConfig =
            serde_json::from_value(json!({"port": 53, "outboundTag": "dns"})).unwrap();
        assert_eq!(rule.port, "53");
        assert_eq!(rule.kind, "field");
    }

    #[test]
    fn rule_networks_split_and_join() {
        let mut rule = RuleConfig::default();
        rule.set_networks(&["tcp", "udp"]);
        assert_eq!(rule.network, "tcp,udp");
        assert_eq!(rule.networks(), vec!["tcp", "udp"]);
    }

    #[test]
    fn preset_order_is_ip_domain_catchall() {
        let routing = RoutingConfig::preset();
        let tags: Vec<&str> = routing.rules.iter().map(|r| r.rule_tag.as_str()).collect();
        assert_eq!(tags, vec!["china-ip-direct", "china-domain-direct", "match-all"]);
        assert!(routing.balancer("proxy").is_some());
    }

    #[test]
    fn balancer_default_strategy_is_omitted() {
        let v = serde_json::to_value(BalancerConfig::proxy()).unwrap();
        assert!(v.get("strategy").is_none());
        assert_eq!(v["fallbackTag"], "direct");
    }

    #[test]
    fn strategy_settings_wire_names() {
        let strategy = StrategyConfig {
            kind: "leastLoad".into(),
            settings: Some(StrategySettings {
                max_rtt: "1s".into(),
                ..Default::default()
            }),
        };
        let v = serde_json::to_value(&strategy).unwrap();
        assert_eq!(v["type"], "leastLoad");
        assert_eq!(v["settings"]["maxRTT"], "1s");
        assert_eq!(v["settings"]["expected"], 2);
    }
}
