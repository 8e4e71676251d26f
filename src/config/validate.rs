use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use tracing::warn;

use super::routing::RuleTarget;
use super::types::Config;
use crate::common::{Error, RefKind, Result};
use crate::router::balancer::{Selector, Strategy};
use crate::router::geoip::parse_cidr;
use crate::router::matcher::{MatcherMode, NetworkSet, PortList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Warn,
    Error,
}

impl fmt::Display for DiagLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagLevel::Warn => write!(f, "WARN"),
            DiagLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// 标准错误码（稳定 API，不可随意变更）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagCode {
    MissingRequiredField,
    DuplicateTag,
    UnresolvedReference,
    InvalidPortRange,
    InvalidAddress,
    InvalidPattern,
    UnknownValue,
    EmptySelection,
    AmbiguousTarget,
}

impl DiagCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            DiagCode::DuplicateTag => "DUPLICATE_TAG",
            DiagCode::UnresolvedReference => "UNRESOLVED_REFERENCE",
            DiagCode::InvalidPortRange => "INVALID_PORT_RANGE",
            DiagCode::InvalidAddress => "INVALID_ADDRESS",
            DiagCode::InvalidPattern => "INVALID_PATTERN",
            DiagCode::UnknownValue => "UNKNOWN_VALUE",
            DiagCode::EmptySelection => "EMPTY_SELECTION",
            DiagCode::AmbiguousTarget => "AMBIGUOUS_TARGET",
        }
    }
}

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 单条诊断信息
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagLevel,
    pub code: DiagCode,
    pub path: String,
    pub message: String,
    /// Set for `UnresolvedReference`: what kind of tag is missing, and which.
    pub reference: Option<(RefKind, String)>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} at {}: {}",
            self.level, self.code, self.path, self.message
        )
    }
}

impl Diagnostic {
    fn into_error(self) -> Error {
        match self.reference {
            Some((kind, tag)) => Error::dangling(kind, tag),
            None => Error::config(format!("{}: {}", self.path, self.message)),
        }
    }
}

/// 诊断收集器
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn error(&mut self, code: DiagCode, path: impl Into<String>, message: impl Into<String>) {
        self.push(DiagLevel::Error, code, path.into(), message.into(), None);
    }

    pub fn warn(&mut self, code: DiagCode, path: impl Into<String>, message: impl Into<String>) {
        self.push(DiagLevel::Warn, code, path.into(), message.into(), None);
    }

    fn unresolved(&mut self, path: String, kind: RefKind, tag: &str) {
        self.push(
            DiagLevel::Error,
            DiagCode::UnresolvedReference,
            path,
            format!("unknown {} '{}'", kind, tag),
            Some((kind, tag.to_string())),
        );
    }

    fn push(
        &mut self,
        level: DiagLevel,
        code: DiagCode,
        path: String,
        message: String,
        reference: Option<(RefKind, String)>,
    ) {
        self.items.push(Diagnostic {
            level,
            code,
            path,
            message,
            reference,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.level == DiagLevel::Error)
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.items
            .iter()
            .filter(|d| d.level == DiagLevel::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.items
            .iter()
            .filter(|d| d.level == DiagLevel::Warn)
            .collect()
    }

    /// Dangling references found, as `(kind, tag)`.
    pub fn dangling(&self) -> Vec<(RefKind, &str)> {
        self.items
            .iter()
            .filter_map(|d| d.reference.as_ref().map(|(k, t)| (*k, t.as_str())))
            .collect()
    }
}

impl Config {
    /// Structural checks over the whole document. Never fails; see
    /// [`validate`](Self::validate) for the `Result` form.
    pub fn diagnostics(&self) -> Diagnostics {
        let mut diags = Diagnostics::default();
        let outbound_tags = check_outbounds(self, &mut diags);
        let inbound_tags = check_inbounds(self, &mut diags);
        let balancer_tags = check_balancers(self, &outbound_tags, &mut diags);
        check_rules(self, &outbound_tags, &inbound_tags, &balancer_tags, &mut diags);
        diags
    }

    /// Fail on the first error-level diagnostic; warnings are logged.
    ///
    /// A dangling tag yields [`Error::DanglingReference`], anything else
    /// [`Error::ConfigValidation`].
    pub fn validate(&self) -> Result<()> {
        let diags = self.diagnostics();
        for d in diags.warnings() {
            warn!(code = %d.code, path = %d.path, "{}", d.message);
        }
        match diags.items.into_iter().find(|d| d.level == DiagLevel::Error) {
            Some(first) => Err(first.into_error()),
            None => Ok(()),
        }
    }
}

fn check_outbounds<'a>(config: &'a Config, diags: &mut Diagnostics) -> HashSet<&'a str> {
    let mut tags = HashSet::new();
    for (i, ob) in config.outbounds.iter().enumerate() {
        let path = format!("outbounds[{}]", i);
        if ob.tag.is_empty() {
            diags.error(DiagCode::MissingRequiredField, format!("{}.tag", path), "outbound tag is empty");
        } else if !tags.insert(ob.tag.as_str()) {
            diags.error(
                DiagCode::DuplicateTag,
                format!("{}.tag", path),
                format!("duplicate outbound tag '{}'", ob.tag),
            );
        }
        match ob.endpoint() {
            Some(("", _)) => diags.error(
                DiagCode::MissingRequiredField,
                format!("{}.settings", path),
                format!("{} outbound '{}' has no server address", ob.protocol(), ob.tag),
            ),
            Some((_, 0)) => diags.error(
                DiagCode::InvalidPortRange,
                format!("{}.settings", path),
                format!("{} outbound '{}' has port 0", ob.protocol(), ob.tag),
            ),
            None if !matches!(ob.protocol(), "freedom" | "blackhole") => diags.error(
                DiagCode::MissingRequiredField,
                format!("{}.settings", path),
                format!("{} outbound '{}' has no server", ob.protocol(), ob.tag),
            ),
            _ => {}
        }
    }
    if let Some(metrics) = &config.metrics {
        tags.insert(metrics.tag.as_str());
    }
    tags
}

fn check_inbounds<'a>(config: &'a Config, diags: &mut Diagnostics) -> HashSet<&'a str> {
    let mut tags = HashSet::new();
    for (i, ib) in config.inbounds.iter().enumerate() {
        let path = format!("inbounds[{}]", i);
        if ib.tag.is_empty() {
            diags.error(DiagCode::MissingRequiredField, format!("{}.tag", path), "inbound tag is empty");
        } else if !tags.insert(ib.tag.as_str()) {
            diags.error(
                DiagCode::DuplicateTag,
                format!("{}.tag", path),
                format!("duplicate inbound tag '{}'", ib.tag),
            );
        }
        if ib.port == 0 {
            diags.error(
                DiagCode::InvalidPortRange,
                format!("{}.port", path),
                format!("inbound '{}' listens on port 0", ib.tag),
            );
        }
        if ib.listen.parse::<std::net::IpAddr>().is_err() {
            diags.error(
                DiagCode::InvalidAddress,
                format!("{}.listen", path),
                format!("'{}' is not an IP address", ib.listen),
            );
        }
    }
    tags
}

fn check_balancers<'a>(
    config: &'a Config,
    outbound_tags: &HashSet<&str>,
    diags: &mut Diagnostics,
) -> HashSet<&'a str> {
    let mut tags = HashSet::new();
    let mut all_outbounds: Vec<String> = config.outbound_tags();
    all_outbounds.sort();

    for (i, b) in config.routing.balancers.iter().enumerate() {
        let path = format!("routing.balancers[{}]", i);
        if b.tag.is_empty() {
            diags.error(DiagCode::MissingRequiredField, format!("{}.tag", path), "balancer tag is empty");
        } else if !tags.insert(b.tag.as_str()) {
            diags.error(
                DiagCode::DuplicateTag,
                format!("{}.tag", path),
                format!("duplicate balancer tag '{}'", b.tag),
            );
        }

        let mut selects_any = false;
        for (j, s) in b.selector.iter().enumerate() {
            match Selector::new(s) {
                Ok(sel) => selects_any |= all_outbounds.iter().any(|t| sel.is_match(t)),
                Err(e) => diags.error(
                    DiagCode::InvalidPattern,
                    format!("{}.selector[{}]", path, j),
                    format!("invalid selector '{}': {}", s, e),
                ),
            }
        }
        if !selects_any {
            diags.warn(
                DiagCode::EmptySelection,
                format!("{}.selector", path),
                format!("balancer '{}' selects no outbound; only its fallback can be used", b.tag),
            );
        }
        if !b.fallback_tag.is_empty() && !outbound_tags.contains(b.fallback_tag.as_str()) {
            diags.unresolved(format!("{}.fallbackTag", path), RefKind::Outbound, &b.fallback_tag);
        }
        if let Err(e) = Strategy::parse(&b.strategy.kind) {
            diags.error(DiagCode::UnknownValue, format!("{}.strategy.type", path), e.to_string());
        }
    }
    tags
}

fn check_rules(
    config: &Config,
    outbound_tags: &HashSet<&str>,
    inbound_tags: &HashSet<&str>,
    balancer_tags: &HashSet<&str>,
    diags: &mut Diagnostics,
) {
    if let Err(e) = MatcherMode::parse(&config.routing.domain_matcher) {
        diags.error(DiagCode::UnknownValue, "routing.domainMatcher", e.to_string());
    }

    for (i, rule) in config.routing.rules.iter().enumerate() {
        let path = format!("routing.rules[{}]", i);

        match rule.target() {
            None => diags.error(
                DiagCode::MissingRequiredField,
                path.clone(),
                format!("rule '{}' has neither outboundTag nor balancerTag", rule.label(i)),
            ),
            Some(RuleTarget::Outbound(tag)) => {
                if !outbound_tags.contains(tag) {
                    diags.unresolved(format!("{}.outboundTag", path), RefKind::Outbound, tag);
                }
                if !rule.balancer_tag.is_empty() {
                    diags.warn(
                        DiagCode::AmbiguousTarget,
                        path.clone(),
                        format!(
                            "rule '{}' sets both targets; balancerTag '{}' is ignored",
                            rule.label(i),
                            rule.balancer_tag
                        ),
                    );
                }
            }
            Some(RuleTarget::Balancer(tag)) => {
                if !balancer_tags.contains(tag) {
                    diags.unresolved(format!("{}.balancerTag", path), RefKind::Balancer, tag);
                }
            }
        }

        for tag in &rule.inbound_tag {
            if !inbound_tags.contains(tag.as_str()) {
                diags.unresolved(format!("{}.inboundTag", path), RefKind::Inbound, tag);
            }
        }

        for (field, spec) in [("port", &rule.port), ("sourcePort", &rule.source_port)] {
            if !spec.trim().is_empty() {
                if let Err(e) = PortList::parse(spec) {
                    diags.error(DiagCode::InvalidPortRange, format!("{}.{}", path, field), e.to_string());
                }
            }
        }
        if let Err(e) = NetworkSet::parse(&rule.network) {
            diags.error(DiagCode::UnknownValue, format!("{}.network", path), e.to_string());
        }
        if let Err(e) = MatcherMode::parse(&rule.domain_matcher) {
            diags.error(DiagCode::UnknownValue, format!("{}.domainMatcher", path), e.to_string());
        }

        for (field, entries) in [("ip", &rule.ip), ("source", &rule.source)] {
            for (j, entry) in entries.iter().enumerate() {
                if entry.starts_with("geoip:") || entry.starts_with("ext:") {
                    continue;
                }
                if parse_cidr(entry.trim()).is_none() {
                    diags.error(
                        DiagCode::InvalidAddress,
                        format!("{}.{}[{}]", path, field, j),
                        format!("invalid IP or CIDR '{}'", entry),
                    );
                }
            }
        }
        for (j, entry) in rule.domain.iter().enumerate() {
            if let Some(pattern) = entry.strip_prefix("regexp:") {
                if let Err(e) = Regex::new(pattern) {
                    diags.error(
                        DiagCode::InvalidPattern,
                        format!("{}.domain[{}]", path, j),
                        format!("invalid regexp '{}': {}", pattern, e),
                    );
                }
            } else if entry.trim().is_empty() {
                diags.error(
                    DiagCode::MissingRequiredField,
                    format!("{}.domain[{}]", path, j),
                    "empty domain entry",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::inbound::Inbound;
    use crate::config::outbound::{Outbound, OutboundSettings, TrojanSettings};
    use crate::config::routing::{BalancerConfig, RuleConfig};

    #[test]
    fn default_config_is_valid() {
        let diags = Config::default().diagnostics();
        assert!(!diags.has_errors(), "{:?}", diags.items);
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn ghost_outbound_is_dangling() {
        let mut config = Config::default();
        config.routing.rules.push(RuleConfig::to_outbound("r", "ghost"));
        let diags = config.diagnostics();
        assert_eq!(diags.dangling(), vec![(RefKind::Outbound, "ghost")]);

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::DanglingReference { kind: RefKind::Outbound, ref tag } if tag == "ghost"
        ));
    }

    #[test]
    fn dangling_balancer_and_inbound() {
        let mut config = Config::default();
        config.routing.rules.push(RuleConfig {
            balancer_tag: "pool".into(),
            inbound_tag: vec!["nowhere".into()],
            ..RuleConfig::to_outbound("r", "")
        });
        let dangling = config.diagnostics().dangling().len();
        assert_eq!(dangling, 2);
    }

    #[test]
    fn duplicate_tags_and_bad_ports() {
        let mut config = Config::default();
        config.outbounds.push(Outbound::direct());
        config.inbounds.push(Inbound::socks("entry", 0));
        config.routing.rules.push(RuleConfig {
            port: "443,9000-80".into(),
            ..RuleConfig::to_outbound("r", "direct")
        });
        let codes: Vec<DiagCode> = config.diagnostics().errors().iter().map(|d| d.code).collect();
        assert!(codes.contains(&DiagCode::DuplicateTag));
        assert!(codes.contains(&DiagCode::InvalidPortRange));
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn outbound_without_server_is_error() {
        let mut config = Config::default();
        config.outbounds.push(Outbound::new(
            "tj",
            OutboundSettings::Trojan(TrojanSettings::default()),
        ));
        assert!(config.diagnostics().has_errors());
    }

    #[test]
    fn both_targets_is_only_a_warning() {
        let mut config = Config::default();
        config.routing.rules.push(RuleConfig {
            balancer_tag: "whatever".into(),
            ..RuleConfig::to_outbound("r", "direct")
        });
        let diags = config.diagnostics();
        assert!(!diags.has_errors(), "{:?}", diags.items);
        assert_eq!(diags.warnings()[0].code, DiagCode::AmbiguousTarget);
    }

    #[test]
    fn balancer_checks() {
        let mut config = Config::default();
        config.routing.balancers.push(BalancerConfig {
            tag: "b".into(),
            selector: vec!["^proxy".into(), "(".into()],
            fallback_tag: "nope".into(),
            ..Default::default()
        });
        let diags = config.diagnostics();
        let codes: Vec<DiagCode> = diags.items.iter().map(|d| d.code).collect();
        assert!(codes.contains(&DiagCode::InvalidPattern));
        assert!(codes.contains(&DiagCode::EmptySelection));
        assert_eq!(diags.dangling(), vec![(RefKind::Outbound, "nope")]);
    }

    #[test]
    fn bad_source_entry_reports_its_own_path() {
        let mut config = Config::default();
        config.routing.rules.push(RuleConfig {
            ip: vec!["10.0.0.0/8".into(), "geoip:private".into()],
            source: vec!["192.168.0.0/16".into(), "not-an-ip".into()],
            ..RuleConfig::to_outbound("r", "direct")
        });
        let diags = config.diagnostics();
        let errors = diags.errors();
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert_eq!(errors[0].code, DiagCode::InvalidAddress);
        assert_eq!(errors[0].path, "routing.rules[0].source[1]");
    }

    #[test]
    fn metrics_outbound_counts_as_known() {
        let mut config = Config::default();
        config.enable_metrics_on(10085).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn diagnostic_display() {
        let mut config = Config::default();
        config.routing.rules.push(RuleConfig::to_outbound("r", "ghost"));
        let text = config.diagnostics().errors()[0].to_string();
        assert_eq!(
            text,
            "[ERROR] UNRESOLVED_REFERENCE at routing.rules[0].outboundTag: unknown outbound 'ghost'"
        );
    }
}
