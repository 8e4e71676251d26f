pub mod balancer;
pub mod geo;
pub mod geoip;
pub mod geosite;
pub mod matcher;
pub mod rules;
pub mod trie;

use std::collections::HashMap;

use tracing::{debug, info};

use crate::common::{Error, RefKind, Result, Session};
use crate::config::Config;
use balancer::{AllViable, Balancer, HealthView, Strategy};
use geo::GeoData;
use matcher::MatcherMode;
use rules::{MatchContext, Rule, Target};

/// Where a connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub outbound: String,
    /// `ruleTag`, or `#<index>` for untagged rules.
    pub rule: String,
    pub rule_index: usize,
    pub balancer: Option<String>,
    /// Set when the balancer strategy's real choice belongs to the engine.
    pub deferred: Option<Strategy>,
    pub via_fallback: bool,
}

/// Compiled routing table.
///
/// Built once from a config snapshot; `route` takes `&self` and is safe to
/// call from many connections at once.
pub struct Router {
    rules: Vec<Rule>,
    balancers: HashMap<String, Balancer>,
    /// Configured outbounds; the pool every balancer selects from.
    outbound_tags: Vec<String>,
    /// Metrics sink: a valid rule target, never a balancer member.
    metrics_tag: Option<String>,
    geo: GeoData,
}

impl Router {
    /// Compile the routing table of `config` against `geo`.
    ///
    /// Malformed rules, bad selectors and dataset references that `geo`
    /// cannot answer are rejected here. Tags pointing at outbounds or
    /// balancers that do not exist are not: they surface per connection as
    /// `DanglingReference` (see `Config::validate` to catch them earlier).
    pub fn new(config: &Config, geo: GeoData) -> Result<Self> {
        let mode = MatcherMode::parse(&config.routing.domain_matcher)?.unwrap_or_default();

        let rules = config
            .routing
            .rules
            .iter()
            .enumerate()
            .map(|(i, r)| Rule::compile(r, i, mode, &geo))
            .collect::<Result<Vec<_>>>()?;

        let mut balancers = HashMap::new();
        for b in &config.routing.balancers {
            let balancer = Balancer::compile(b)?;
            if balancers.insert(b.tag.clone(), balancer).is_some() {
                return Err(Error::config(format!("duplicate balancer tag '{}'", b.tag)));
            }
        }

        let outbound_tags = config.outbound_tags();
        let metrics_tag = config.metrics.as_ref().map(|m| m.tag.clone());

        info!(
            rules = rules.len(),
            balancers = balancers.len(),
            outbounds = outbound_tags.len(),
            "router built"
        );
        Ok(Self {
            rules,
            balancers,
            outbound_tags,
            metrics_tag,
            geo,
        })
    }

    /// Resolve with every balancer candidate considered viable.
    pub fn route(&self, session: &Session) -> Result<RouteDecision> {
        self.route_with_health(session, &AllViable)
    }

    /// First rule in stored order whose fields all match wins; there is no
    /// specificity ranking between rules.
    pub fn route_with_health(
        &self,
        session: &Session,
        health: &dyn HealthView,
    ) -> Result<RouteDecision> {
        let ctx = MatchContext::new(session);
        let Some((index, rule)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.matches_ctx(&ctx, &self.geo))
        else {
            debug!(dest = %session, "no route matched");
            return Err(Error::NoRoute(session.to_string()));
        };

        let decision = match rule.target() {
            Target::Outbound(tag) => {
                if !self.is_outbound(tag) {
                    return Err(Error::dangling(RefKind::Outbound, tag.as_str()));
                }
                RouteDecision {
                    outbound: tag.clone(),
                    rule: rule.label().to_string(),
                    rule_index: index,
                    balancer: None,
                    deferred: None,
                    via_fallback: false,
                }
            }
            Target::Balancer(tag) => {
                let balancer = self
                    .balancers
                    .get(tag)
                    .ok_or_else(|| Error::dangling(RefKind::Balancer, tag.as_str()))?;
                let pick = balancer.resolve(&self.outbound_tags, health)?;
                RouteDecision {
                    outbound: pick.tag,
                    rule: rule.label().to_string(),
                    rule_index: index,
                    balancer: Some(tag.clone()),
                    deferred: pick.deferred.then_some(pick.strategy),
                    via_fallback: pick.fallback,
                }
            }
        };

        debug!(
            dest = %session,
            rule = %decision.rule,
            outbound = %decision.outbound,
            balancer = ?decision.balancer,
            "route matched"
        );
        Ok(decision)
    }

    fn is_outbound(&self, tag: &str) -> bool {
        self.outbound_tags.iter().any(|t| t == tag) || self.metrics_tag.as_deref() == Some(tag)
    }

    /// Whether some rule can only match once the sniffed protocol is known.
    pub fn requires_sniffing(&self) -> bool {
        self.rules.iter().any(Rule::requires_sniffing)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn balancer(&self, tag: &str) -> Option<&Balancer> {
        self.balancers.get(tag)
    }

    pub fn outbound_tags(&self) -> &[String] {
        &self.outbound_tags
    }

    pub fn geo(&self) -> &GeoData {
        &self.geo
    }
}
