use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{base64_decode, check_linkable, split_list};
use crate::common::addr::format_host_port;
use crate::common::{Error, Result};
use crate::config::outbound::{Outbound, OutboundSettings, VmessSettings};
use crate::config::stream::{
    HttpUpgradeSettings, RawHeader, RawSettings, Security, StreamSettings, TlsSettings,
    Transport, WsSettings,
};
use crate::config::types::is_default;

/// The v2rayN JSON object carried base64-encoded after `vmess://`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct VmessLink {
    v: String,
    ps: String,
    add: String,
    port: Value,
    id: String,
    aid: Value,
    scy: String,
    net: String,
    #[serde(rename = "type")]
    kind: String,
    host: String,
    path: String,
    tls: String,
    sni: String,
    alpn: String,
    fp: String,
    #[serde(rename = "allowInsecure", skip_serializing_if = "is_default")]
    allow_insecure: bool,
}

pub(super) fn encode(outbound: &Outbound, settings: &VmessSettings) -> Result<String> {
    let server = settings
        .vnext
        .first()
        .ok_or_else(|| Error::link(format!("vmess outbound '{}' has no server", outbound.tag)))?;
    let user = settings
        .user()
        .ok_or_else(|| Error::link(format!("vmess outbound '{}' has no user", outbound.tag)))?;

    let stream = &outbound.stream_settings;
    check_linkable(stream)?;
    let (host, path) = stream.transport.host_path().unwrap_or(("", ""));
    // raw header type; empty means no header
    let kind = match &stream.transport {
        Transport::Raw(RawSettings {
            header: Some(header),
        }) => header.kind.clone(),
        _ => String::new(),
    };
    let mut body = VmessLink {
        v: "2".into(),
        ps: outbound.tag.clone(),
        add: server.address.clone(),
        port: Value::String(server.port.to_string()),
        id: user.id.clone(),
        aid: Value::String("0".into()),
        scy: user.security.clone(),
        net: match &stream.transport {
            Transport::Raw(_) => "tcp".into(),
            other => other.name().into(),
        },
        kind,
        host: host.into(),
        path: path.into(),
        ..Default::default()
    };
    match &stream.security {
        Security::None => {}
        Security::Tls(tls) => {
            body.tls = "tls".into();
            body.sni = tls.server_name.clone();
            body.alpn = tls.alpn.join(",");
            body.fp = tls.fingerprint.clone();
            body.allow_insecure = tls.allow_insecure;
        }
        Security::Reality(_) => {
            return Err(Error::Unsupported(format!(
                "vmess outbound '{}' over reality has no share link",
                outbound.tag
            )))
        }
    }
    Ok(format!("vmess://{}", STANDARD.encode(serde_json::to_string(&body)?)))
}

pub(super) fn decode(link: &str) -> Result<Outbound> {
    let encoded = link.split_once("://").map(|(_, b)| b).unwrap_or(link);
    let text = base64_decode(encoded).ok_or_else(|| Error::link("vmess link is not base64"))?;
    let body: VmessLink = serde_json::from_str(&text)
        .map_err(|e| Error::link(format!("vmess link body: {}", e)))?;

    let port = match &body.port {
        Value::String(s) => s.trim().parse::<u16>().ok(),
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        _ => None,
    }
    .filter(|p| *p != 0)
    .ok_or_else(|| Error::link(format!("vmess link has invalid port {}", body.port)))?;
    if body.add.is_empty() || body.id.is_empty() {
        return Err(Error::link("vmess link without address or id"));
    }

    let transport = match body.net.as_str() {
        "" | "tcp" | "raw" => Transport::Raw(RawSettings {
            header: (!body.kind.is_empty()).then(|| RawHeader {
                kind: body.kind.clone(),
            }),
        }),
        "ws" => Transport::Ws(WsSettings {
            host: body.host.clone(),
            path: body.path.clone(),
            ..Default::default()
        }),
        "httpupgrade" => Transport::HttpUpgrade(HttpUpgradeSettings {
            host: body.host.clone(),
            path: body.path.clone(),
            ..Default::default()
        }),
        other => return Err(Error::link(format!("unsupported transport '{}'", other))),
    };
    let security = match body.tls.as_str() {
        "" | "none" => Security::None,
        "tls" => Security::Tls(TlsSettings {
            server_name: body.sni.clone(),
            allow_insecure: body.allow_insecure,
            alpn: split_list(Some(body.alpn.as_str())),
            fingerprint: body.fp.clone(),
        }),
        other => return Err(Error::link(format!("unsupported security '{}'", other))),
    };

    let security_name = if body.scy.is_empty() { "auto" } else { body.scy.as_str() };
    let tag = if body.ps.is_empty() {
        format_host_port(&body.add, port)
    } else {
        body.ps.clone()
    };
    Ok(Outbound::new(
        tag,
        OutboundSettings::Vmess(VmessSettings::new(&body.add, port, &body.id, security_name)),
    )
    .with_stream(StreamSettings {
        transport,
        security,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::link::to_share_link;

    #[test]
    fn ws_tls_round_trip() {
        let ob = Outbound::new(
            "vm",
            OutboundSettings::Vmess(VmessSettings::new(
                "v.example.com",
                443,
                "27848739-7e62-4138-9fd3-098a63964b6b",
                "aes-128-gcm",
            )),
        )
        .with_stream(StreamSettings {
            transport: Transport::Ws(WsSettings {
                host: "v.example.com".into(),
                path: "/vm".into(),
                ..Default::default()
            }),
            security: Security::Tls(TlsSettings {
                server_name: "v.example.com".into(),
                alpn: vec!["h2".into(), "http/1.1".into()],
                ..Default::default()
            }),
        });
        let link = to_share_link(&ob).unwrap();
        assert!(link.starts_with("vmess://"));
        assert_eq!(decode(&link).unwrap(), ob);
    }

    #[test]
    fn raw_http_header_round_trip() {
        let ob = Outbound::new(
            "vm-http",
            OutboundSettings::Vmess(VmessSettings::new("v.example.com", 80, "id", "auto")),
        )
        .with_stream(StreamSettings {
            transport: Transport::Raw(RawSettings {
                header: Some(RawHeader {
                    kind: "http".into(),
                }),
            }),
            security: Security::None,
        });
        let link = to_share_link(&ob).unwrap();
        let text = base64_decode(link.trim_start_matches("vmess://")).unwrap();
        assert!(text.contains(r#""type":"http""#), "{}", text);
        assert_eq!(decode(&link).unwrap(), ob);
    }

    #[test]
    fn numeric_port_and_missing_security() {
        let body = r#"{"v":"2","ps":"","add":"1.2.3.4","port":10086,"id":"abc","aid":0,"net":"tcp"}"#;
        let link = format!("vmess://{}", STANDARD.encode(body));
        let ob = decode(&link).unwrap();
        assert_eq!(ob.tag, "1.2.3.4:10086");
        assert_eq!(ob.endpoint(), Some(("1.2.3.4", 10086)));
        match &ob.settings {
            OutboundSettings::Vmess(s) => assert_eq!(s.user().unwrap().security, "auto"),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode("vmess://%%%").is_err());
        let link = format!("vmess://{}", STANDARD.encode(r#"{"add":"h","port":"x","id":"i"}"#));
        assert!(decode(&link).is_err());
    }
}
