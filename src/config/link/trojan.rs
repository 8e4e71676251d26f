use super::{LinkBuilder, LinkUri};
use crate::common::{Error, Result};
use crate::config::outbound::{Outbound, OutboundSettings, TrojanSettings};

// trojan://password@host:port?security=tls&sni=..&type=..#tag
pub(super) fn encode(outbound: &Outbound, settings: &TrojanSettings) -> Result<String> {
    let server = settings
        .servers
        .first()
        .ok_or_else(|| Error::link(format!("trojan outbound '{}' has no server", outbound.tag)))?;
    let mut link = LinkBuilder::new("trojan", &server.address, server.port)
        .userinfo(urlencoding::encode(&server.password).into_owned());
    link.param("email", &server.email);
    link.stream(&outbound.stream_settings)?;
    Ok(link.finish(&outbound.tag))
}

/// Links without `security` are TLS: that is what trojan runs over.
pub(super) fn decode(link: &str) -> Result<Outbound> {
    let uri = LinkUri::parse(link)?;
    let password = match uri.userinfo.as_deref() {
        Some(u) if !u.is_empty() => super::decode(u)?,
        _ => return Err(Error::link("trojan link without password")),
    };
    let mut settings = TrojanSettings::new(&uri.host, uri.port, &password);
    if let Some(server) = settings.servers.first_mut() {
        server.email = uri.param("email").unwrap_or_default().to_string();
    }
    Ok(Outbound::new(uri.tag(), OutboundSettings::Trojan(settings)).with_stream(uri.stream("tls")?))
}
