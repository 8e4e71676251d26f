use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::{base64_decode, LinkBuilder, LinkUri};
use crate::common::addr::parse_host_port;
use crate::common::{Error, Result};
use crate::config::outbound::{Outbound, OutboundSettings, ShadowsocksSettings};
use crate::config::stream::StreamSettings;

/// SIP002: `ss://base64url(method:password)@host:port#tag`, with `type`/
/// `security` parameters only when the stream is not plain raw.
pub(super) fn encode(outbound: &Outbound, settings: &ShadowsocksSettings) -> Result<String> {
    let server = settings.servers.first().ok_or_else(|| {
        Error::link(format!("shadowsocks outbound '{}' has no server", outbound.tag))
    })?;
    let userinfo = URL_SAFE_NO_PAD.encode(format!("{}:{}", server.method, server.password));
    let mut link = LinkBuilder::new("ss", &server.address, server.port).userinfo(userinfo);
    if !server.uot {
        link.param("uot", "0");
    }
    if outbound.stream_settings != StreamSettings::default() {
        link.stream(&outbound.stream_settings)?;
    }
    Ok(link.finish(&outbound.tag))
}

/// Accepts SIP002 (base64 or plain userinfo) and the legacy form with the
/// whole `method:password@host:port` base64-encoded.
pub(super) fn decode(link: &str) -> Result<Outbound> {
    let body = link.split_once("://").map(|(_, b)| b).unwrap_or(link);
    let before_fragment = body.split('#').next().unwrap_or(body);
    if !before_fragment.contains('@') {
        return decode_legacy(body);
    }

    let uri = LinkUri::parse(link)?;
    let userinfo = uri
        .userinfo
        .as_deref()
        .ok_or_else(|| Error::link("shadowsocks link without credentials"))?;
    let (method, password) = super::credentials(userinfo, false)?;
    if method.is_empty() || password.is_empty() {
        return Err(Error::link("shadowsocks link without method or password"));
    }
    let mut settings = ShadowsocksSettings::new(&uri.host, uri.port, &method, &password);
    if uri.param("uot") == Some("0") {
        settings.servers[0].uot = false;
    }
    let stream = uri.stream("none")?;
    Ok(Outbound::new(uri.tag(), OutboundSettings::Shadowsocks(settings)).with_stream(stream))
}

fn decode_legacy(body: &str) -> Result<Outbound> {
    let (encoded, tag) = match body.split_once('#') {
        Some((e, t)) => (e, super::decode(t)?),
        None => (body, String::new()),
    };
    let plain = base64_decode(encoded.trim_end_matches('/'))
        .ok_or_else(|| Error::link("shadowsocks link is not base64"))?;
    let (creds, authority) = plain
        .rsplit_once('@')
        .ok_or_else(|| Error::link("shadowsocks link without server"))?;
    let (method, password) = creds
        .split_once(':')
        .ok_or_else(|| Error::link("shadowsocks link without method"))?;
    let (host, port) = parse_host_port(authority)
        .ok_or_else(|| Error::link(format!("invalid address '{}'", authority)))?;
    let tag = if tag.is_empty() {
        authority.to_string()
    } else {
        tag
    };
    Ok(Outbound::new(
        tag,
        OutboundSettings::Shadowsocks(ShadowsocksSettings::new(&host, port, method, password)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::link::to_share_link;
    use crate::config::stream::{Security, TlsSettings, Transport, WsSettings};

    #[test]
    fn sip002_round_trip() {
        let ob = Outbound::new(
            "ss-1",
            OutboundSettings::Shadowsocks(ShadowsocksSettings::new(
                "s.example.com",
                8388,
                "2022-blake3-aes-128-gcm",
                "c2VjcmV0LWtleQ==",
            )),
        );
        let link = to_share_link(&ob).unwrap();
        assert!(link.starts_with("ss://"));
        assert!(!link.contains('='), "{}", link);
        assert_eq!(decode(&link).unwrap(), ob);
    }

    #[test]
    fn plain_userinfo() {
        let ob = decode("ss://chacha20-ietf-poly1305:pa%3Ass@s.example.com:8388#plain").unwrap();
        match ob.settings {
            OutboundSettings::Shadowsocks(s) => {
                assert_eq!(s.servers[0].method, "chacha20-ietf-poly1305");
                assert_eq!(s.servers[0].password, "pa:ss");
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn legacy_whole_base64() {
        // base64("aes-256-gcm:pass@1.2.3.4:8388")
        let ob = decode("ss://YWVzLTI1Ni1nY206cGFzc0AxLjIuMy40OjgzODg=#legacy").unwrap();
        assert_eq!(ob.tag, "legacy");
        assert_eq!(ob.endpoint(), Some(("1.2.3.4", 8388)));
    }

    #[test]
    fn ws_stream_survives() {
        let ob = Outbound::new(
            "ss-ws",
            OutboundSettings::Shadowsocks(ShadowsocksSettings::new(
                "h.com",
                8388,
                "aes-256-gcm",
                "pw",
            )),
        )
        .with_stream(StreamSettings {
            transport: Transport::Ws(WsSettings {
                host: "cdn.h.com".into(),
                path: "/p".into(),
                ..Default::default()
            }),
            security: Security::Tls(TlsSettings {
                server_name: "cdn.h.com".into(),
                ..Default::default()
            }),
        });
        let link = to_share_link(&ob).unwrap();
        assert!(link.contains("type=ws"), "{}", link);
        assert!(link.contains("path=%2Fp"), "{}", link);
        assert_eq!(decode(&link).unwrap(), ob);
    }

    #[test]
    fn uot_flag_survives() {
        let mut settings = ShadowsocksSettings::new("s.example.com", 8388, "aes-128-gcm", "pw");
        settings.servers[0].uot = false;
        let ob = Outbound::new("s", OutboundSettings::Shadowsocks(settings));
        assert_eq!(decode(&to_share_link(&ob).unwrap()).unwrap(), ob);
    }
}
