//! Share links: one URI per outbound.
//!
//! `vless://`, `trojan://`, `ss://`, `vmess://`, `socks://` and `http(s)://`.
//! The round trip keeps protocol, endpoint, credentials and stream settings;
//! the tag travels in the fragment.

mod http;
mod shadowsocks;
mod socks;
mod trojan;
mod vless;
mod vmess;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use tracing::{info, warn};

use super::outbound::{Outbound, OutboundSettings};
use super::stream::{
    HttpUpgradeSettings, RawHeader, RawSettings, RealitySettings, Security, StreamSettings,
    TlsSettings, Transport, WsSettings,
};
use crate::common::addr::{format_host_port, parse_host_port};
use crate::common::{Error, Result};

/// Result of a bulk import: what parsed, and which lines did not.
#[derive(Debug, Default)]
pub struct LinkImport {
    pub outbounds: Vec<Outbound>,
    pub failures: Vec<LinkFailure>,
}

#[derive(Debug)]
pub struct LinkFailure {
    /// 1-based line number in the imported text.
    pub line: usize,
    pub text: String,
    pub error: Error,
}

impl LinkImport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Encode one outbound. `freedom`/`blackhole` have no link form.
pub fn to_share_link(outbound: &Outbound) -> Result<String> {
    match &outbound.settings {
        OutboundSettings::Vless(s) => vless::encode(outbound, s),
        OutboundSettings::Trojan(s) => trojan::encode(outbound, s),
        OutboundSettings::Shadowsocks(s) => shadowsocks::encode(outbound, s),
        OutboundSettings::Vmess(s) => vmess::encode(outbound, s),
        OutboundSettings::Socks(s) => socks::encode(outbound, s),
        OutboundSettings::Http(s) => http::encode(outbound, s),
        OutboundSettings::Freedom(_) | OutboundSettings::Blackhole(_) => Err(Error::Unsupported(
            format!("{} outbound '{}' has no share link", outbound.protocol(), outbound.tag),
        )),
    }
}

/// Encode every outbound that has a link form, preserving order.
pub fn to_share_links(outbounds: &[Outbound]) -> Vec<String> {
    outbounds
        .iter()
        .filter_map(|ob| match to_share_link(ob) {
            Ok(link) => Some(link),
            Err(e) => {
                warn!(tag = %ob.tag, error = %e, "outbound skipped");
                None
            }
        })
        .collect()
}

/// Decode one link.
pub fn parse_share_link(link: &str) -> Result<Outbound> {
    let link = link.trim();
    let (scheme, _) = link
        .split_once("://")
        .ok_or_else(|| Error::link("missing scheme"))?;
    match scheme.to_ascii_lowercase().as_str() {
        "vless" => vless::decode(link),
        "trojan" => trojan::decode(link),
        "ss" => shadowsocks::decode(link),
        "vmess" => vmess::decode(link),
        "socks" | "socks5" => socks::decode(link),
        "http" | "https" => http::decode(link),
        other => Err(Error::link(format!("unsupported scheme '{}'", other))),
    }
}

/// Decode newline-separated links. Blank lines and `#` comments are skipped;
/// a bad line is recorded in `failures` and the rest still import.
pub fn parse_share_links(text: &str) -> LinkImport {
    let mut import = LinkImport::default();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_share_link(line) {
            Ok(ob) => import.outbounds.push(ob),
            Err(error) => {
                warn!(line = i + 1, error = %error, "share link skipped");
                import.failures.push(LinkFailure {
                    line: i + 1,
                    text: line.to_string(),
                    error,
                });
            }
        }
    }
    info!(
        imported = import.outbounds.len(),
        failed = import.failures.len(),
        "share links parsed"
    );
    import
}

// ── URI plumbing shared by the protocol modules ─────────────────────────────

/// `scheme://userinfo@host:port?query#fragment`, percent-decoded.
struct LinkUri {
    userinfo: Option<String>,
    host: String,
    port: u16,
    query: Vec<(String, String)>,
    fragment: String,
}

impl LinkUri {
    fn parse(link: &str) -> Result<Self> {
        let (_, rest) = link
            .split_once("://")
            .ok_or_else(|| Error::link("missing scheme"))?;
        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) => (r, decode(f)?),
            None => (rest, String::new()),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, parse_query(q)?),
            None => (rest, Vec::new()),
        };
        let (userinfo, authority) = match rest.rsplit_once('@') {
            Some((u, a)) => (Some(u.to_string()), a),
            None => (None, rest),
        };
        let authority = authority.trim_end_matches('/');
        let (host, port) = parse_host_port(authority)
            .ok_or_else(|| Error::link(format!("invalid address '{}'", authority)))?;
        if port == 0 {
            return Err(Error::link(format!("port 0 in '{}'", authority)));
        }
        Ok(Self {
            userinfo,
            host,
            port,
            query,
            fragment,
        })
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Fragment, or `host:port` when the link carries no name.
    fn tag(&self) -> String {
        if self.fragment.is_empty() {
            format_host_port(&self.host, self.port)
        } else {
            self.fragment.clone()
        }
    }

    fn stream(&self, default_security: &str) -> Result<StreamSettings> {
        let host = self.param("host").unwrap_or_default().to_string();
        let path = self.param("path").unwrap_or_default().to_string();
        let transport = match self.param("type").unwrap_or("tcp") {
            "tcp" | "raw" => Transport::Raw(RawSettings {
                header: self.param("headerType").map(|kind| RawHeader {
                    kind: kind.to_string(),
                }),
            }),
            "ws" => Transport::Ws(WsSettings {
                host,
                path,
                ..Default::default()
            }),
            "httpupgrade" => Transport::HttpUpgrade(HttpUpgradeSettings {
                host,
                path,
                ..Default::default()
            }),
            other => return Err(Error::link(format!("unsupported transport '{}'", other))),
        };
        let security = match self.param("security").unwrap_or(default_security) {
            "none" => Security::None,
            "tls" => Security::Tls(self.tls()),
            "reality" => Security::Reality(RealitySettings {
                server_name: self.param("sni").unwrap_or_default().to_string(),
                fingerprint: self.param("fp").unwrap_or_default().to_string(),
                public_key: self.param("pbk").unwrap_or_default().to_string(),
                short_id: self.param("sid").unwrap_or_default().to_string(),
                spider_x: self.param("spx").unwrap_or_default().to_string(),
                ..Default::default()
            }),
            other => return Err(Error::link(format!("unsupported security '{}'", other))),
        };
        Ok(StreamSettings {
            transport,
            security,
        })
    }

    fn tls(&self) -> TlsSettings {
        TlsSettings {
            server_name: self.param("sni").unwrap_or_default().to_string(),
            allow_insecure: matches!(self.param("allowInsecure"), Some("1" | "true")),
            alpn: split_list(self.param("alpn")),
            fingerprint: self.param("fp").unwrap_or_default().to_string(),
        }
    }
}

/// Builds `scheme://userinfo@host:port?query#tag`, percent-encoding each part.
struct LinkBuilder {
    scheme: &'static str,
    userinfo: Option<String>,
    host: String,
    port: u16,
    query: Vec<(&'static str, String)>,
}

impl LinkBuilder {
    fn new(scheme: &'static str, host: &str, port: u16) -> Self {
        Self {
            scheme,
            userinfo: None,
            host: host.to_string(),
            port,
            query: Vec::new(),
        }
    }

    /// `userinfo` is written as given; callers encode it.
    fn userinfo(mut self, userinfo: String) -> Self {
        self.userinfo = Some(userinfo);
        self
    }

    fn param(&mut self, key: &'static str, value: &str) {
        if !value.is_empty() {
            self.query.push((key, value.to_string()));
        }
    }

    /// `type`, `headerType`, `host`, `path`, `security` and the security
    /// parameters. Fails for settings the query string cannot carry.
    fn stream(&mut self, stream: &StreamSettings) -> Result<()> {
        check_linkable(stream)?;
        let network = match &stream.transport {
            Transport::Raw(_) => "tcp",
            other => other.name(),
        };
        self.param("type", network);
        if let Transport::Raw(RawSettings {
            header: Some(header),
        }) = &stream.transport
        {
            self.param("headerType", &header.kind);
        }
        if let Some((host, path)) = stream.transport.host_path() {
            self.param("host", host);
            self.param("path", path);
        }
        self.param("security", stream.security.name());
        match &stream.security {
            Security::None => {}
            Security::Tls(tls) => self.tls(tls),
            Security::Reality(r) => {
                self.param("sni", &r.server_name);
                self.param("fp", &r.fingerprint);
                self.param("pbk", &r.public_key);
                self.param("sid", &r.short_id);
                self.param("spx", &r.spider_x);
            }
        }
        Ok(())
    }

    fn tls(&mut self, tls: &TlsSettings) {
        self.param("sni", &tls.server_name);
        self.param("alpn", &tls.alpn.join(","));
        self.param("fp", &tls.fingerprint);
        if tls.allow_insecure {
            self.param("allowInsecure", "1");
        }
    }

    fn finish(self, tag: &str) -> String {
        let mut out = format!("{}://", self.scheme);
        if let Some(userinfo) = &self.userinfo {
            out.push_str(userinfo);
            out.push('@');
        }
        out.push_str(&format_host_port(&self.host, self.port));
        if !self.query.is_empty() {
            let query: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect();
            out.push('?');
            out.push_str(&query.join("&"));
        }
        if !tag.is_empty() {
            out.push('#');
            out.push_str(&urlencoding::encode(tag));
        }
        out
    }
}

/// Rejects stream settings that a link would silently drop: extra headers,
/// proxy-protocol and heartbeat knobs, server-side REALITY fields and an
/// untyped raw header.
fn check_linkable(stream: &StreamSettings) -> Result<()> {
    let lost = match &stream.transport {
        Transport::Raw(raw) => match &raw.header {
            Some(header) if header.kind.is_empty() => Some("raw header without type"),
            _ => None,
        },
        Transport::Ws(ws) if !ws.headers.is_empty() => Some("ws headers"),
        Transport::Ws(ws) if ws.accept_proxy_protocol => Some("ws acceptProxyProtocol"),
        Transport::Ws(ws) if ws.heartbeat_period != 0 => Some("ws heartbeatPeriod"),
        Transport::HttpUpgrade(hu) if !hu.headers.is_empty() => Some("httpupgrade headers"),
        Transport::HttpUpgrade(hu) if hu.accept_proxy_protocol => {
            Some("httpupgrade acceptProxyProtocol")
        }
        _ => None,
    };
    let lost = lost.or(match &stream.security {
        Security::Reality(r)
            if r.show
                || r.xver != 0
                || !r.target.is_empty()
                || !r.server_names.is_empty()
                || !r.private_key.is_empty()
                || !r.short_ids.is_empty() =>
        {
            Some("server-side reality settings")
        }
        _ => None,
    });
    match lost {
        Some(what) => Err(Error::Unsupported(format!("{} cannot be carried by a share link", what))),
        None => Ok(()),
    }
}

fn decode(s: &str) -> Result<String> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|e| Error::link(format!("bad percent-encoding: {}", e)))
}

fn parse_query(q: &str) -> Result<Vec<(String, String)>> {
    q.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode(k)?, decode(v)?))
        })
        .collect()
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Lenient base64: standard or URL-safe alphabet, padded or not.
pub(crate) fn base64_decode(s: &str) -> Option<String> {
    let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(&s)
        .or_else(|_| URL_SAFE.decode(&s))
        .or_else(|_| STANDARD_NO_PAD.decode(&s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(&s))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// `user:pass` from a userinfo that is either base64 or percent-encoded.
///
/// The split happens before percent-decoding, so an escaped `:` stays in
/// its part. With `escaped`, the base64 payload holds percent-encoded parts
/// too; without it the payload is taken literally (SIP002).
fn credentials(userinfo: &str, escaped: bool) -> Result<(String, String)> {
    let (text, escaped) = match base64_decode(userinfo) {
        Some(text) if text.contains(':') => (text, escaped),
        _ => (userinfo.to_string(), true),
    };
    let (user, pass) = text.split_once(':').unwrap_or((text.as_str(), ""));
    if escaped {
        Ok((decode(user)?, decode(pass)?))
    } else {
        Ok((user.to_string(), pass.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::outbound::{TrojanSettings, VlessSettings};

    #[test]
    fn five_good_one_bad() {
        let text = "\
vless://b831381d-6324-4d53-ad4f-8cda48b30811@a.example.com:443?type=tcp&security=tls&sni=a.example.com#a

trojan://secret@b.example.com:443#b
ss://YWVzLTI1Ni1nY206cGFzcw@c.example.com:8388#c
socks://dXNlcjpwYXNz@d.example.com:1080#d
this is not a link
http://e.example.com:8080#e
";
        let import = parse_share_links(text);
        assert_eq!(import.outbounds.len(), 5);
        assert_eq!(import.failures.len(), 1);
        assert_eq!(import.failures[0].line, 6);
        assert!(matches!(import.failures[0].error, Error::ShareLinkParse(_)));
        let tags: Vec<&str> = import.outbounds.iter().map(|o| o.tag.as_str()).collect();
        assert_eq!(tags, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn missing_fragment_uses_endpoint_as_tag() {
        let ob = parse_share_link("trojan://pw@[2001:db8::1]:443").unwrap();
        assert_eq!(ob.tag, "[2001:db8::1]:443");
    }

    #[test]
    fn freedom_has_no_link() {
        let err = to_share_link(&Outbound::direct()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        let links = to_share_links(&[
            Outbound::direct(),
            Outbound::new("t", OutboundSettings::Trojan(TrojanSettings::new("x.com", 443, "pw"))),
        ]);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn fragment_is_percent_encoded() {
        let ob = Outbound::new(
            "香港 01",
            OutboundSettings::Vless(VlessSettings::new("hk.example.com", 443, "id")),
        );
        let link = to_share_link(&ob).unwrap();
        assert!(link.ends_with("#%E9%A6%99%E6%B8%AF%2001"), "{}", link);
        assert_eq!(parse_share_link(&link).unwrap().tag, "香港 01");
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(parse_share_link("vless://id@example.com#x").is_err());
        assert!(parse_share_link("vless://id@example.com:0#x").is_err());
        assert!(parse_share_link("ftp://example.com:21").is_err());
        assert!(parse_share_link("no scheme here").is_err());
    }

    #[test]
    fn stream_params_default_to_raw() {
        let uri = LinkUri::parse("vless://id@h.com:443?security=none").unwrap();
        let stream = uri.stream("none").unwrap();
        assert_eq!(stream, StreamSettings::default());
        let uri = LinkUri::parse("vless://id@h.com:443?type=grpc").unwrap();
        assert!(uri.stream("none").is_err());
    }
}
