use std::borrow::Cow;
use std::fmt;

use super::geo::GeoData;
use super::matcher::{DomainMatcher, IpMatcher, MatcherMode, NetworkSet, PortList};
use crate::common::{Error, Result, Session};
use crate::config::routing::{RuleConfig, RuleTarget};

/// Compiled target of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Outbound(String),
    Balancer(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Outbound(tag) => write!(f, "outbound:{}", tag),
            Target::Balancer(tag) => write!(f, "balancer:{}", tag),
        }
    }
}

/// 路由规则
///
/// A conjunction of field matchers; `None` / empty fields do not constrain.
#[derive(Debug)]
pub struct Rule {
    label: String,
    domain: Option<DomainMatcher>,
    ip: Option<IpMatcher>,
    port: Option<PortList>,
    source_port: Option<PortList>,
    source: Option<IpMatcher>,
    user: Vec<String>,
    inbound_tag: Vec<String>,
    protocol: Vec<String>,
    attrs: Vec<(String, String)>,
    network: Option<NetworkSet>,
    target: Target,
}

/// Per-connection view shared by every rule during one resolution: the
/// destination domain is lowercased once here rather than per rule.
pub struct MatchContext<'a> {
    pub session: &'a Session,
    domain: Option<Cow<'a, str>>,
}

impl<'a> MatchContext<'a> {
    pub fn new(session: &'a Session) -> Self {
        let domain = session.domain.as_deref().map(|d| {
            let d = d.trim_end_matches('.');
            if d.bytes().any(|b| b.is_ascii_uppercase()) {
                Cow::Owned(d.to_ascii_lowercase())
            } else {
                Cow::Borrowed(d)
            }
        });
        Self { session, domain }
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }
}

impl Rule {
    /// Compile one rule. `index` only feeds the label of untagged rules;
    /// `default_mode` is the table-level `domainMatcher`.
    pub fn compile(
        config: &RuleConfig,
        index: usize,
        default_mode: MatcherMode,
        geo: &GeoData,
    ) -> Result<Self> {
        let label = config.label(index);
        Self::compile_inner(config, label.clone(), default_mode, geo)
            .map_err(|e| match e {
                Error::ConfigValidation(msg) => {
                    Error::config(format!("rule '{}': {}", label, msg))
                }
                other => other,
            })
    }

    fn compile_inner(
        config: &RuleConfig,
        label: String,
        default_mode: MatcherMode,
        geo: &GeoData,
    ) -> Result<Self> {
        if !config.kind.is_empty() && config.kind != "field" {
            return Err(Error::config(format!("unsupported rule type '{}'", config.kind)));
        }
        let target = match config.target() {
            Some(RuleTarget::Outbound(tag)) => Target::Outbound(tag.to_string()),
            Some(RuleTarget::Balancer(tag)) => Target::Balancer(tag.to_string()),
            None => return Err(Error::config("neither outboundTag nor balancerTag is set")),
        };
        let mode = MatcherMode::parse(&config.domain_matcher)?.unwrap_or(default_mode);

        let domain = non_empty(&config.domain)
            .map(|d| DomainMatcher::new(d, mode, geo))
            .transpose()?;
        let ip = non_empty(&config.ip)
            .map(|v| IpMatcher::new(v, geo))
            .transpose()?;
        let source = non_empty(&config.source)
            .map(|v| IpMatcher::new(v, geo))
            .transpose()?;
        let port = non_blank(&config.port).map(PortList::parse).transpose()?;
        let source_port = non_blank(&config.source_port)
            .map(PortList::parse)
            .transpose()?;
        let network = non_blank(&config.network)
            .map(NetworkSet::parse)
            .transpose()?;

        Ok(Self {
            label,
            domain,
            ip,
            port,
            source_port,
            source,
            user: config.user.clone(),
            inbound_tag: config.inbound_tag.clone(),
            protocol: config.protocol.iter().map(|p| p.to_ascii_lowercase()).collect(),
            attrs: config
                .attrs
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
            network,
            target,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// A non-empty `protocol` list needs a sniff result to ever match.
    pub fn requires_sniffing(&self) -> bool {
        !self.protocol.is_empty()
    }

    pub fn matches(&self, session: &Session, geo: &GeoData) -> bool {
        self.matches_ctx(&MatchContext::new(session), geo)
    }

    /// Cheap fields first; every present field must match.
    pub fn matches_ctx(&self, ctx: &MatchContext<'_>, geo: &GeoData) -> bool {
        let s = ctx.session;

        if let Some(network) = self.network {
            if !network.contains(s.network) {
                return false;
            }
        }
        if let Some(ports) = &self.port {
            if !ports.contains(s.port) {
                return false;
            }
        }
        if let Some(ports) = &self.source_port {
            match s.source_port() {
                Some(p) if ports.contains(p) => {}
                _ => return false,
            }
        }
        if !self.inbound_tag.is_empty() && !self.inbound_tag.iter().any(|t| *t == s.inbound_tag) {
            return false;
        }
        if !self.user.is_empty() {
            match &s.user {
                Some(user) if self.user.iter().any(|u| u == user) => {}
                _ => return false,
            }
        }
        if !self.protocol.is_empty() {
            match &s.protocol {
                Some(p) if self.protocol.iter().any(|x| x.eq_ignore_ascii_case(p)) => {}
                _ => return false,
            }
        }
        for (key, needle) in &self.attrs {
            match s.attrs.get(key) {
                Some(value) if value.contains(needle.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(source) = &self.source {
            match s.source {
                Some(addr) if source.matches(addr.ip(), geo) => {}
                _ => return false,
            }
        }
        if let Some(ip) = &self.ip {
            match s.ip {
                Some(addr) if ip.matches(addr, geo) => {}
                _ => return false,
            }
        }
        if let Some(domain) = &self.domain {
            match ctx.domain() {
                Some(d) if domain.matches(d, geo) => {}
                _ => return false,
            }
        }
        true
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.label, self.target)
    }
}

fn non_empty(v: &[String]) -> Option<&[String]> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

fn non_blank(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
