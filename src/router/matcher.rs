use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use regex::Regex;

use super::geo::GeoData;
use super::geoip::parse_cidr;
use super::trie::{DomainTrie, IpPrefixTrie};
use crate::common::{Error, Network, Result};

/// How a rule's domain list is evaluated. Both modes give identical answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatcherMode {
    /// `domain:`/`full:` entries indexed in a trie / hash set.
    #[default]
    Hybrid,
    /// Every entry checked in order.
    Linear,
}

impl MatcherMode {
    /// Empty means "inherit"; unknown names are rejected.
    pub fn parse(s: &str) -> Result<Option<Self>> {
        match s {
            "" => Ok(None),
            "hybrid" => Ok(Some(MatcherMode::Hybrid)),
            "linear" => Ok(Some(MatcherMode::Linear)),
            other => Err(Error::config(format!("unknown domainMatcher '{}'", other))),
        }
    }
}

/// One parsed `domain` entry.
#[derive(Debug, Clone)]
pub enum DomainEntry {
    Full(String),
    Suffix(String),
    Keyword(String),
    Regex(Regex),
    GeoSite(String),
}

impl DomainEntry {
    /// Prefixes: `full:`, `domain:`, `keyword:`, `regexp:`, `geosite:`.
    /// A bare entry is a keyword.
    pub fn parse(entry: &str, geo: &GeoData) -> Result<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(Error::config("empty domain entry"));
        }
        if let Some(v) = entry.strip_prefix("full:") {
            Ok(DomainEntry::Full(v.to_ascii_lowercase()))
        } else if let Some(v) = entry.strip_prefix("domain:") {
            Ok(DomainEntry::Suffix(v.trim_end_matches('.').to_ascii_lowercase()))
        } else if let Some(v) = entry.strip_prefix("keyword:") {
            Ok(DomainEntry::Keyword(v.to_ascii_lowercase()))
        } else if let Some(v) = entry.strip_prefix("regexp:") {
            Regex::new(v)
                .map(DomainEntry::Regex)
                .map_err(|e| Error::config(format!("invalid regexp '{}': {}", v, e)))
        } else if let Some(v) = entry.strip_prefix("geosite:") {
            if !geo.has_geosite() {
                return Err(Error::config(format!(
                    "'{}' needs the geosite dataset, which is not loaded",
                    entry
                )));
            }
            if !geo.has_category(v) {
                return Err(Error::config(format!("unknown geosite category '{}'", v)));
            }
            Ok(DomainEntry::GeoSite(v.to_ascii_lowercase()))
        } else if entry.starts_with("ext:") {
            Err(Error::Unsupported(format!("external domain list '{}'", entry)))
        } else {
            Ok(DomainEntry::Keyword(entry.to_ascii_lowercase()))
        }
    }

    /// `domain` must be lowercase.
    pub fn matches(&self, domain: &str, geo: &GeoData) -> bool {
        match self {
            DomainEntry::Full(v) => domain == v,
            DomainEntry::Suffix(v) => {
                domain == v
                    || (domain.len() > v.len()
                        && domain.ends_with(v.as_str())
                        && domain.as_bytes()[domain.len() - v.len() - 1] == b'.')
            }
            DomainEntry::Keyword(v) => domain.contains(v.as_str()),
            DomainEntry::Regex(re) => re.is_match(domain),
            DomainEntry::GeoSite(cat) => geo.domain_in_category(cat, domain),
        }
    }
}

/// Compiled `domain` field.
#[derive(Debug)]
pub struct DomainMatcher {
    full: HashSet<String>,
    suffix: DomainTrie,
    rest: Vec<DomainEntry>,
}

impl DomainMatcher {
    pub fn new(entries: &[String], mode: MatcherMode, geo: &GeoData) -> Result<Self> {
        let mut m = Self {
            full: HashSet::new(),
            suffix: DomainTrie::new(),
            rest: Vec::new(),
        };
        for raw in entries {
            let entry = DomainEntry::parse(raw, geo)?;
            match (mode, entry) {
                (MatcherMode::Hybrid, DomainEntry::Full(v)) => {
                    m.full.insert(v);
                }
                (MatcherMode::Hybrid, DomainEntry::Suffix(v)) => m.suffix.insert(&v),
                (_, entry) => m.rest.push(entry),
            }
        }
        Ok(m)
    }

    pub fn matches(&self, domain: &str, geo: &GeoData) -> bool {
        self.full.contains(domain)
            || self.suffix.matches(domain)
            || self.rest.iter().any(|e| e.matches(domain, geo))
    }
}

/// Compiled `ip` / `source` field: literal IPs, CIDRs, `geoip:cc`,
/// `geoip:!cc` and the built-in `geoip:private`.
#[derive(Debug, Default)]
pub struct IpMatcher {
    cidrs: IpPrefixTrie,
    countries: Vec<String>,
    not_countries: Vec<String>,
}

const PRIVATE_CIDRS: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.88.99.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.255.255.255/32",
    "::/128",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
];

impl IpMatcher {
    pub fn new(entries: &[String], geo: &GeoData) -> Result<Self> {
        let mut m = Self::default();
        for raw in entries {
            let entry = raw.trim();
            if let Some(code) = entry.strip_prefix("geoip:") {
                let (negate, code) = match code.strip_prefix('!') {
                    Some(c) => (true, c),
                    None => (false, code),
                };
                let code = code.to_ascii_lowercase();
                if code == "private" && !negate {
                    for cidr in PRIVATE_CIDRS {
                        if let Ok(net) = cidr.parse::<IpNet>() {
                            m.cidrs.insert(&net);
                        }
                    }
                    continue;
                }
                if !geo.has_geoip() {
                    return Err(Error::config(format!(
                        "'{}' needs the geoip dataset, which is not loaded",
                        entry
                    )));
                }
                if !geo.has_country(&code) {
                    return Err(Error::config(format!("unknown geoip code '{}'", code)));
                }
                if negate {
                    m.not_countries.push(code);
                } else {
                    m.countries.push(code);
                }
            } else if entry.starts_with("ext:") {
                return Err(Error::Unsupported(format!("external ip list '{}'", entry)));
            } else {
                let net = parse_cidr(entry)
                    .ok_or_else(|| Error::config(format!("invalid IP or CIDR '{}'", entry)))?;
                m.cidrs.insert(&net);
            }
        }
        Ok(m)
    }

    pub fn matches(&self, ip: IpAddr, geo: &GeoData) -> bool {
        self.cidrs.contains(ip)
            || self.countries.iter().any(|c| geo.ip_in_country(c, ip))
            || self.not_countries.iter().any(|c| !geo.ip_in_country(c, ip))
    }
}

/// `"53,443,1000-2000"`: single ports and inclusive ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortList {
    ranges: Vec<(u16, u16)>,
}

impl PortList {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::config(format!("empty segment in port list '{}'", spec)));
            }
            let range = match part.split_once('-') {
                Some((lo, hi)) => (parse_port(lo.trim(), spec)?, parse_port(hi.trim(), spec)?),
                None => {
                    let p = parse_port(part, spec)?;
                    (p, p)
                }
            };
            if range.0 > range.1 {
                return Err(Error::config(format!(
                    "port range '{}' is reversed in '{}'",
                    part, spec
                )));
            }
            ranges.push(range);
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ranges.iter().any(|&(lo, hi)| lo <= port && port <= hi)
    }
}

fn parse_port(s: &str, spec: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|_| Error::config(format!("invalid port '{}' in '{}'", s, spec)))
}

/// Subset of {tcp, udp}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSet {
    tcp: bool,
    udp: bool,
}

impl NetworkSet {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut set = Self {
            tcp: false,
            udp: false,
        };
        for part in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match part.parse::<Network>().map_err(Error::config)? {
                Network::Tcp => set.tcp = true,
                Network::Udp => set.udp = true,
            }
        }
        Ok(set)
    }

    pub fn contains(self, network: Network) -> bool {
        match network {
            Network::Tcp => self.tcp,
            Network::Udp => self.udp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::geoip::GeoIpDb;
    use crate::router::geosite::GeoSiteDb;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn geo() -> GeoData {
        let mut sites = GeoSiteDb::new();
        sites.insert_text("cn", "baidu.com\nqq.com\n").unwrap();
        GeoData::empty()
            .with_geosite(sites)
            .with_geoip(GeoIpDb::from_table("CN 1.0.1.0/24\nUS 8.8.8.0/24\n").unwrap())
    }

    #[test]
    fn port_list_boundaries_are_inclusive() {
        let ports = PortList::parse("80,443,1000-2000").unwrap();
        for p in [80, 443, 1000, 1500, 1999, 2000] {
            assert!(ports.contains(p), "{}", p);
        }
        for p in [79, 81, 999, 2001, 0, 65535] {
            assert!(!ports.contains(p), "{}", p);
        }
    }

    #[test]
    fn port_list_rejects_malformed() {
        assert!(PortList::parse("").is_err());
        assert!(PortList::parse("80,,443").is_err());
        assert!(PortList::parse("2000-1000").is_err());
        assert!(PortList::parse("http").is_err());
        assert!(PortList::parse("1-70000").is_err());
        assert!(PortList::parse(" 53 , 1-2 ").is_ok());
    }

    #[test]
    fn network_set() {
        let set = NetworkSet::parse("tcp").unwrap();
        assert!(set.contains(Network::Tcp));
        assert!(!set.contains(Network::Udp));
        let set = NetworkSet::parse("TCP, udp").unwrap();
        assert!(set.contains(Network::Udp));
        assert!(NetworkSet::parse("tcp,sctp").is_err());
    }

    #[test]
    fn domain_entry_modes() {
        let g = GeoData::empty();
        let suffix = DomainEntry::parse("domain:example.com", &g).unwrap();
        assert!(suffix.matches("example.com", &g));
        assert!(suffix.matches("a.example.com", &g));
        assert!(!suffix.matches("notexample.com", &g));

        let full = DomainEntry::parse("full:example.com", &g).unwrap();
        assert!(full.matches("example.com", &g));
        assert!(!full.matches("a.example.com", &g));

        let plain = DomainEntry::parse("google", &g).unwrap();
        assert!(plain.matches("www.google.co.jp", &g));

        let re = DomainEntry::parse(r"regexp:\.cn$", &g).unwrap();
        assert!(re.matches("www.gov.cn", &g));
        assert!(!re.matches("cn.example.com", &g));
    }

    #[test]
    fn domain_entry_rejects_bad_input() {
        let g = GeoData::empty();
        assert!(DomainEntry::parse("regexp:(", &g).unwrap_err().is_config());
        assert!(DomainEntry::parse("geosite:cn", &g).unwrap_err().is_config());
        assert!(DomainEntry::parse("geosite:nope", &geo()).is_err());
        assert!(DomainEntry::parse("  ", &g).is_err());
        assert!(matches!(
            DomainEntry::parse("ext:custom.dat:ads", &g),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn hybrid_and_linear_agree() {
        let g = geo();
        let entries = list(&[
            "domain:example.com",
            "full:exact.org",
            "keyword:tracker",
            r"regexp:^ads\.",
            "geosite:cn",
        ]);
        let hybrid = DomainMatcher::new(&entries, MatcherMode::Hybrid, &g).unwrap();
        let linear = DomainMatcher::new(&entries, MatcherMode::Linear, &g).unwrap();
        for (domain, expected) in [
            ("example.com", true),
            ("deep.sub.example.com", true),
            ("badexample.com", false),
            ("exact.org", true),
            ("www.exact.org", false),
            ("mytracker.net", true),
            ("ads.foo.net", true),
            ("www.baidu.com", true),
            ("github.com", false),
        ] {
            assert_eq!(hybrid.matches(domain, &g), expected, "hybrid {}", domain);
            assert_eq!(linear.matches(domain, &g), expected, "linear {}", domain);
        }
    }

    #[test]
    fn ip_matcher_literals_and_cidrs() {
        let g = GeoData::empty();
        let m = IpMatcher::new(&list(&["1.1.1.1", "10.0.0.0/8", "2001:db8::/32"]), &g).unwrap();
        assert!(m.matches("1.1.1.1".parse().unwrap(), &g));
        assert!(!m.matches("1.1.1.2".parse().unwrap(), &g));
        assert!(m.matches("10.9.8.7".parse().unwrap(), &g));
        assert!(m.matches("2001:db8::53".parse().unwrap(), &g));
        assert!(IpMatcher::new(&list(&["not-an-ip"]), &g).is_err());
    }

    #[test]
    fn ip_matcher_geoip() {
        let g = geo();
        let cn = IpMatcher::new(&list(&["geoip:CN"]), &g).unwrap();
        assert!(cn.matches("1.0.1.1".parse().unwrap(), &g));
        assert!(!cn.matches("8.8.8.8".parse().unwrap(), &g));

        let not_cn = IpMatcher::new(&list(&["geoip:!cn"]), &g).unwrap();
        assert!(!not_cn.matches("1.0.1.1".parse().unwrap(), &g));
        assert!(not_cn.matches("8.8.8.8".parse().unwrap(), &g));

        assert!(IpMatcher::new(&list(&["geoip:de"]), &g).is_err());
        assert!(IpMatcher::new(&list(&["geoip:cn"]), &GeoData::empty()).is_err());
    }

    #[test]
    fn geoip_private_is_builtin() {
        let g = GeoData::empty();
        let m = IpMatcher::new(&list(&["geoip:private"]), &g).unwrap();
        assert!(m.matches("192.168.1.1".parse().unwrap(), &g));
        assert!(m.matches("127.0.0.1".parse().unwrap(), &g));
        assert!(m.matches("fd00::1".parse().unwrap(), &g));
        assert!(!m.matches("8.8.8.8".parse().unwrap(), &g));
    }

    #[test]
    fn matcher_mode_parse() {
        assert_eq!(MatcherMode::parse("").unwrap(), None);
        assert_eq!(MatcherMode::parse("linear").unwrap(), Some(MatcherMode::Linear));
        assert!(MatcherMode::parse("fast").is_err());
    }
}
