use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::inbound::{Inbound, InboundSettings};
use super::routing::RuleConfig;
use super::types::{Config, PolicyConfig, StatsConfig, METRICS_OUTBOUND_TAG};
use crate::common::addr::free_local_port;
use crate::common::{Error, Result};

pub const METRICS_INBOUND_TAG: &str = "metrics-api";
pub const METRICS_RULE_TAG: &str = "metrics-rule";

impl Config {
    fn metrics_tag(&self) -> &str {
        self.metrics
            .as_ref()
            .map(|m| m.tag.as_str())
            .unwrap_or(METRICS_OUTBOUND_TAG)
    }

    /// Wire the engine's metrics endpoint onto a free loopback port.
    ///
    /// Idempotent: a second call finds the inbound and rule already present
    /// and allocates nothing.
    pub fn enable_metrics(&mut self) -> Result<u16> {
        let port = match self.inbound(METRICS_INBOUND_TAG) {
            Some(existing) => existing.port,
            None => free_local_port()?,
        };
        self.enable_metrics_on(port)?;
        Ok(self.metrics_port().unwrap_or(port))
    }

    /// As [`enable_metrics`](Self::enable_metrics) with an explicit port.
    ///
    /// All conflicts are checked before anything is touched, so on error the
    /// document is unchanged. The rule goes in front of the table so that no
    /// catch-all rule shadows it.
    pub fn enable_metrics_on(&mut self, port: u16) -> Result<()> {
        let metrics = self.metrics.clone().unwrap_or_default();

        if let Some(existing) = self.inbound(METRICS_INBOUND_TAG) {
            if !matches!(existing.settings, InboundSettings::Dokodemo(_)) {
                return Err(Error::config(format!(
                    "inbound '{}' exists but is {}, not dokodemo-door",
                    METRICS_INBOUND_TAG,
                    existing.protocol()
                )));
            }
        }
        if let Some(rule) = self.routing.rule(METRICS_RULE_TAG) {
            if rule.outbound_tag != metrics.tag {
                return Err(Error::config(format!(
                    "rule '{}' exists but routes to '{}'",
                    METRICS_RULE_TAG, rule.outbound_tag
                )));
            }
        }
        if self.outbound(&metrics.tag).is_some() {
            return Err(Error::config(format!(
                "outbound tag '{}' is reserved for metrics",
                metrics.tag
            )));
        }

        self.stats = Some(StatsConfig {});
        let mut policy = self.policy.take().unwrap_or_default();
        policy.system = PolicyConfig::enable_all().system;
        self.policy = Some(policy);

        if self.inbound(METRICS_INBOUND_TAG).is_none() {
            self.inbounds.push(Inbound::dokodemo(METRICS_INBOUND_TAG, port));
        }
        if self.routing.rule(METRICS_RULE_TAG).is_none() {
            let rule = RuleConfig {
                inbound_tag: vec![METRICS_INBOUND_TAG.to_string()],
                ..RuleConfig::to_outbound(METRICS_RULE_TAG, &metrics.tag)
            };
            self.routing.rules.insert(0, rule);
        }
        info!(tag = %metrics.tag, port = port, "metrics enabled");
        self.metrics = Some(metrics);
        Ok(())
    }

    /// Undo [`enable_metrics`](Self::enable_metrics): drop every rule routed
    /// to the metrics outbound and the inbounds those rules listen on, then
    /// clear the stats and metrics blocks and the policy's `system` counters.
    /// The rest of the policy block stays, so a document that had no policy
    /// comes back with an empty one.
    pub fn disable_metrics(&mut self) {
        let tag = self.metrics_tag().to_string();
        let inbound_tags: Vec<String> = self
            .routing
            .rules
            .iter()
            .filter(|r| r.outbound_tag == tag)
            .flat_map(|r| r.inbound_tag.iter().cloned())
            .collect();

        let before = (self.inbounds.len(), self.routing.rules.len());
        self.inbounds.retain(|i| !inbound_tags.contains(&i.tag));
        self.routing.rules.retain(|r| r.outbound_tag != tag);
        debug!(
            inbounds = before.0 - self.inbounds.len(),
            rules = before.1 - self.routing.rules.len(),
            "metrics wiring removed"
        );

        self.stats = None;
        self.metrics = None;
        if let Some(policy) = self.policy.as_mut() {
            policy.system = None;
        }
    }

    /// Port of the inbound feeding the metrics rule, if metrics are wired.
    pub fn metrics_port(&self) -> Option<u16> {
        let tag = self.metrics_tag();
        let rule = self.routing.rules.iter().find(|r| r.outbound_tag == tag)?;
        self.inbounds
            .iter()
            .find(|i| rule.inbound_tag.contains(&i.tag))
            .map(|i| i.port)
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

pub fn metrics_endpoint(port: u16) -> String {
    format!("http://127.0.0.1:{}/debug/vars", port)
}

/// Counters served by the engine on the metrics port.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsReport {
    pub stats: MetricsStats,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsStats {
    pub inbound: BTreeMap<String, Traffic>,
    pub outbound: BTreeMap<String, Traffic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Traffic {
    pub uplink: u64,
    pub downlink: u64,
}

impl MetricsReport {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Sum of all outbound counters.
    pub fn outbound_total(&self) -> Traffic {
        self.stats
            .outbound
            .values()
            .fold(Traffic::default(), |acc, t| Traffic {
                uplink: acc.uplink + t.uplink,
                downlink: acc.downlink + t.downlink,
            })
    }

    /// GET the report from the engine's metrics port.
    pub async fn query(client: &reqwest::Client, port: u16) -> anyhow::Result<Self> {
        let report = client
            .get(metrics_endpoint(port))
            .send()
            .await?
            .error_for_status()?
            .json::<MetricsReport>()
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::outbound::Outbound;

    fn with_user_rules() -> Config {
        let mut config = Config::default();
        config.routing.rules.push(RuleConfig::to_outbound("user-rule", "direct"));
        config.inbounds.push(Inbound::socks("second", 1081));
        config
    }

    #[test]
    fn enable_then_disable_is_identity() {
        let original = with_user_rules();
        let mut config = original.clone();
        config.enable_metrics_on(10085).unwrap();
        assert_ne!(config, original);
        config.disable_metrics();
        assert_eq!(config.inbounds, original.inbounds);
        assert_eq!(config.routing.rules, original.routing.rules);
        assert_eq!(config.outbounds, original.outbounds);
        assert_eq!(config.policy, Some(PolicyConfig::default()));
        assert_eq!(Config { policy: None, ..config }, original);
    }

    #[test]
    fn existing_policy_block_survives_enable_disable() {
        let mut original = with_user_rules();
        original.policy = Some(PolicyConfig::default());
        let mut config = original.clone();
        config.enable_metrics_on(10085).unwrap();
        assert_eq!(config.policy, Some(PolicyConfig::enable_all()));
        config.disable_metrics();
        assert_eq!(config, original);
        assert!(config.to_json().unwrap().contains("\"policy\": {}"));
    }

    #[test]
    fn enable_is_idempotent() {
        let mut config = with_user_rules();
        config.enable_metrics_on(10085).unwrap();
        let once = config.clone();
        config.enable_metrics_on(20000).unwrap();
        assert_eq!(config, once);
        assert_eq!(config.metrics_port(), Some(10085));
    }

    #[test]
    fn enable_wires_inbound_rule_and_policy() {
        let mut config = with_user_rules();
        config.enable_metrics_on(10085).unwrap();

        let inbound = config.inbound(METRICS_INBOUND_TAG).unwrap();
        assert_eq!(inbound.protocol(), "dokodemo-door");
        assert_eq!(inbound.port, 10085);

        let rule = &config.routing.rules[0];
        assert_eq!(rule.rule_tag, METRICS_RULE_TAG);
        assert_eq!(rule.inbound_tag, vec![METRICS_INBOUND_TAG]);
        assert_eq!(rule.outbound_tag, METRICS_OUTBOUND_TAG);

        assert_eq!(config.policy, Some(PolicyConfig::enable_all()));
        assert!(config.stats.is_some());
        assert_eq!(config.metrics_port(), Some(10085));
    }

    #[test]
    fn enable_allocates_a_port() {
        let mut config = Config::default();
        let port = config.enable_metrics().unwrap();
        assert_ne!(port, 0);
        assert_eq!(config.enable_metrics().unwrap(), port);
    }

    #[test]
    fn conflicting_inbound_leaves_document_unchanged() {
        let mut config = Config::default();
        config.inbounds.push(Inbound::socks(METRICS_INBOUND_TAG, 2000));
        let before = config.clone();
        assert!(config.enable_metrics_on(10085).unwrap_err().is_config());
        assert_eq!(config, before);
    }

    #[test]
    fn reserved_outbound_tag_is_rejected() {
        let mut config = Config::default();
        let mut ob = Outbound::direct();
        ob.tag = METRICS_OUTBOUND_TAG.into();
        config.outbounds.push(ob);
        let before = config.clone();
        assert!(config.enable_metrics_on(10085).is_err());
        assert_eq!(config, before);
    }

    #[test]
    fn disable_without_enable_is_noop_on_tables() {
        let original = with_user_rules();
        let mut config = original.clone();
        config.disable_metrics();
        assert_eq!(config, original);
    }

    #[test]
    fn report_parses_engine_output() {
        let report = MetricsReport::from_json(
            r#"{"cmdline":["xray"],"stats":{
                "inbound":{"entry":{"uplink":10,"downlink":20}},
                "outbound":{"proxy":{"uplink":5,"downlink":7},"direct":{"uplink":1,"downlink":2}}
            }}"#,
        )
        .unwrap();
        assert_eq!(report.stats.inbound["entry"].downlink, 20);
        assert_eq!(
            report.outbound_total(),
            Traffic {
                uplink: 6,
                downlink: 9
            }
        );
        assert_eq!(metrics_endpoint(10085), "http://127.0.0.1:10085/debug/vars");
    }
}
