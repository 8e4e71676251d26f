use super::{LinkBuilder, LinkUri};
use crate::common::{Error, Result};
use crate::config::outbound::{Outbound, OutboundSettings, VlessSettings};

// vless://uuid@host:port?encryption=none&flow=..&type=..&security=..#tag
pub(super) fn encode(outbound: &Outbound, settings: &VlessSettings) -> Result<String> {
    let server = settings
        .vnext
        .first()
        .ok_or_else(|| Error::link(format!("vless outbound '{}' has no server", outbound.tag)))?;
    let user = settings
        .user()
        .ok_or_else(|| Error::link(format!("vless outbound '{}' has no user", outbound.tag)))?;

    let mut link = LinkBuilder::new("vless", &server.address, server.port)
        .userinfo(urlencoding::encode(&user.id).into_owned());
    link.param("encryption", &user.encryption);
    link.param("flow", &user.flow);
    link.stream(&outbound.stream_settings)?;
    Ok(link.finish(&outbound.tag))
}

pub(super) fn decode(link: &str) -> Result<Outbound> {
    let uri = LinkUri::parse(link)?;
    let id = match uri.userinfo.as_deref() {
        Some(u) if !u.is_empty() => super::decode(u)?,
        _ => return Err(Error::link("vless link without id")),
    };

    let mut settings = VlessSettings::new(&uri.host, uri.port, &id);
    if let Some(user) = settings.vnext[0].users.first_mut() {
        if let Some(enc) = uri.param("encryption") {
            user.encryption = enc.to_string();
        }
        user.flow = uri.param("flow").unwrap_or_default().to_string();
    }
    Ok(Outbound::new(uri.tag(), OutboundSettings::Vless(settings)).with_stream(uri.stream("none")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::stream::{
        RawHeader, RawSettings, RealitySettings, Security, StreamSettings, Transport, WsSettings,
    };

    #[test]
    fn reality_vision_round_trip() {
        let mut settings = VlessSettings::new("r.example.com", 443, "b831381d-6324-4d53-ad4f-8cda48b30811");
        settings.vnext[0].users[0].flow = "xtls-rprx-vision".into();
        let ob = Outbound::new("reality", OutboundSettings::Vless(settings)).with_stream(StreamSettings {
            transport: Transport::default(),
            security: Security::Reality(RealitySettings {
                server_name: "www.microsoft.com".into(),
                fingerprint: "chrome".into(),
                public_key: "pbk-value".into(),
                short_id: "6ba85179".into(),
                ..Default::default()
            }),
        });

        let link = super::super::to_share_link(&ob).unwrap();
        assert!(link.starts_with("vless://b831381d-6324-4d53-ad4f-8cda48b30811@r.example.com:443?"));
        assert!(link.contains("flow=xtls-rprx-vision"));
        assert!(link.contains("security=reality"));
        assert!(link.contains("pbk=pbk-value"));

        assert_eq!(decode(&link).unwrap(), ob);
    }

    #[test]
    fn ws_tls_from_client_link() {
        let ob = decode(
            "vless://id-1@cdn.example.com:443?encryption=none&security=tls&sni=cdn.example.com\
             &type=ws&host=cdn.example.com&path=%2Fray%3Fed%3D2048#ws",
        )
        .unwrap();
        match &ob.stream_settings.transport {
            Transport::Ws(WsSettings { host, path, .. }) => {
                assert_eq!(host, "cdn.example.com");
                assert_eq!(path, "/ray?ed=2048");
            }
            other => panic!("unexpected transport {:?}", other),
        }
        assert_eq!(ob.stream_settings.tls().unwrap().server_name, "cdn.example.com");
    }

    #[test]
    fn raw_http_header_survives() {
        let link = "vless://id-2@h.example.com:80?type=tcp&headerType=http&security=none#hdr";
        let ob = decode(link).unwrap();
        assert_eq!(
            ob.stream_settings.transport,
            Transport::Raw(RawSettings {
                header: Some(RawHeader {
                    kind: "http".into()
                })
            })
        );
        let again = super::super::to_share_link(&ob).unwrap();
        assert!(again.contains("headerType=http"), "{}", again);
        assert_eq!(decode(&again).unwrap(), ob);
    }

    #[test]
    fn lossy_streams_are_refused() {
        let mut ob = decode("vless://id-3@h.example.com:443?type=ws&path=%2Fw#w").unwrap();
        if let Transport::Ws(ws) = &mut ob.stream_settings.transport {
            ws.headers.insert("User-Agent".into(), "x".into());
        }
        let err = super::super::to_share_link(&ob).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)), "{}", err);

        let mut ob = decode("vless://id-4@h.example.com:443?security=reality&pbk=k#r").unwrap();
        if let Security::Reality(r) = &mut ob.stream_settings.security {
            r.private_key = "server-only".into();
        }
        assert!(super::super::to_share_link(&ob).is_err());
    }

    #[test]
    fn id_is_required() {
        assert!(decode("vless://@example.com:443").is_err());
        assert!(decode("vless://example.com:443").is_err());
    }
}
