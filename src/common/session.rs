use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// 网络类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Udp,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "udp" => Ok(Network::Udp),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// 连接会话元数据
///
/// Everything the router may look at when dispatching one connection. `domain`
/// and `ip` are both optional: a connection may arrive with only one of them,
/// or with both once the engine has resolved/sniffed the destination.
/// `protocol` is populated only after sniffing completed upstream.
#[derive(Debug, Clone)]
pub struct Session {
    pub domain: Option<String>,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub source: Option<SocketAddr>,
    pub inbound_tag: String,
    pub network: Network,
    pub protocol: Option<String>,
    pub user: Option<String>,
    pub attrs: HashMap<String, String>,
}

impl Session {
    pub fn new(network: Network, port: u16) -> Self {
        Self {
            domain: None,
            ip: None,
            port,
            source: None,
            inbound_tag: String::new(),
            network,
            protocol: None,
            user: None,
            attrs: HashMap::new(),
        }
    }

    pub fn tcp_domain(domain: &str, port: u16) -> Self {
        Self::new(Network::Tcp, port).with_domain(domain)
    }

    pub fn tcp_ip(ip: IpAddr, port: u16) -> Self {
        Self::new(Network::Tcp, port).with_ip(ip)
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_inbound(mut self, tag: &str) -> Self {
        self.inbound_tag = tag.to_string();
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = Some(protocol.to_string());
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn source_port(&self) -> Option<u16> {
        self.source.map(|s| s.port())
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.domain, self.ip) {
            (Some(domain), _) => write!(f, "{}/{}:{}", self.network, domain, self.port),
            (None, Some(IpAddr::V6(ip))) => write!(f, "{}/[{}]:{}", self.network, ip, self.port),
            (None, Some(ip)) => write!(f, "{}/{}:{}", self.network, ip, self.port),
            (None, None) => write!(f, "{}/?:{}", self.network, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parse_is_case_insensitive() {
        assert_eq!("TCP".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!(" udp ".parse::<Network>().unwrap(), Network::Udp);
        assert!("quic".parse::<Network>().is_err());
    }

    #[test]
    fn display_prefers_domain() {
        let s = Session::tcp_domain("example.com", 443).with_ip("1.2.3.4".parse().unwrap());
        assert_eq!(s.to_string(), "tcp/example.com:443");
        let s = Session::tcp_ip("::1".parse().unwrap(), 53).with_network(Network::Udp);
        assert_eq!(s.to_string(), "udp/[::1]:53");
    }

    #[test]
    fn attr_keys_are_lowercased() {
        let s = Session::tcp_domain("example.com", 80).with_attr(":Method", "GET");
        assert_eq!(s.attrs.get(":method").map(String::as_str), Some("GET"));
    }
}
