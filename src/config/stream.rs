use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::types::is_default;
use crate::common::Error;

/// Transport layer of an outbound/inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    Raw(RawSettings),
    Ws(WsSettings),
    HttpUpgrade(HttpUpgradeSettings),
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Raw(RawSettings::default())
    }
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Raw(_) => "raw",
            Transport::Ws(_) => "ws",
            Transport::HttpUpgrade(_) => "httpupgrade",
        }
    }

    /// `(host, path)` for transports that carry them.
    pub fn host_path(&self) -> Option<(&str, &str)> {
        match self {
            Transport::Raw(_) => None,
            Transport::Ws(ws) => Some((&ws.host, &ws.path)),
            Transport::HttpUpgrade(hu) => Some((&hu.host, &hu.path)),
        }
    }
}

/// Security layer stacked on top of the transport.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Security {
    #[default]
    None,
    Tls(TlsSettings),
    Reality(RealitySettings),
}

impl Security {
    pub fn name(&self) -> &'static str {
        match self {
            Security::None => "none",
            Security::Tls(_) => "tls",
            Security::Reality(_) => "reality",
        }
    }
}

/// `streamSettings`: network transport × security, each carrying its own sub-config.
///
/// On the wire only the sub-settings selected by `network`/`security` are emitted;
/// on decode the discriminants are checked before the matching block is read.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "RawStreamSettings")]
pub struct StreamSettings {
    pub transport: Transport,
    pub security: Security,
}

impl StreamSettings {
    pub fn raw_tls(tls: TlsSettings) -> Self {
        Self {
            transport: Transport::default(),
            security: Security::Tls(tls),
        }
    }

    pub fn tls(&self) -> Option<&TlsSettings> {
        match &self.security {
            Security::Tls(tls) => Some(tls),
            _ => None,
        }
    }

    pub fn reality(&self) -> Option<&RealitySettings> {
        match &self.security {
            Security::Reality(r) => Some(r),
            _ => None,
        }
    }
}

impl Serialize for StreamSettings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("StreamSettings", 4)?;
        st.serialize_field("network", self.transport.name())?;
        st.serialize_field("security", self.security.name())?;
        match &self.transport {
            Transport::Raw(raw) => st.serialize_field("rawSettings", raw)?,
            Transport::Ws(ws) => st.serialize_field("wsSettings", ws)?,
            Transport::HttpUpgrade(hu) => st.serialize_field("httpupgradeSettings", hu)?,
        }
        match &self.security {
            Security::None => st.skip_field("tlsSettings")?,
            Security::Tls(tls) => st.serialize_field("tlsSettings", tls)?,
            Security::Reality(r) => st.serialize_field("realitySettings", r)?,
        }
        st.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStreamSettings {
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    security: Option<String>,
    #[serde(default)]
    raw_settings: Option<RawSettings>,
    #[serde(default)]
    tcp_settings: Option<RawSettings>,
    #[serde(default)]
    ws_settings: Option<WsSettings>,
    #[serde(default, alias = "httpUpgradeSettings")]
    httpupgrade_settings: Option<HttpUpgradeSettings>,
    #[serde(default)]
    tls_settings: Option<TlsSettings>,
    #[serde(default)]
    reality_settings: Option<RealitySettings>,
}

impl TryFrom<RawStreamSettings> for StreamSettings {
    type Error = Error;

    fn try_from(raw: RawStreamSettings) -> Result<Self, Self::Error> {
        let network = raw.network.as_deref().unwrap_or("raw");
        let transport = match network {
            "raw" | "tcp" => Transport::Raw(
                raw.raw_settings
                    .or(raw.tcp_settings)
                    .unwrap_or_default(),
            ),
            "ws" | "websocket" => Transport::Ws(raw.ws_settings.unwrap_or_default()),
            "httpupgrade" => Transport::HttpUpgrade(raw.httpupgrade_settings.unwrap_or_default()),
            other => return Err(Error::config(format!("unsupported network '{}'", other))),
        };
        let security = match raw.security.as_deref().unwrap_or("none") {
            "" | "none" => Security::None,
            "tls" => Security::Tls(raw.tls_settings.unwrap_or_default()),
            "reality" => Security::Reality(raw.reality_settings.unwrap_or_default()),
            other => return Err(Error::config(format!("unsupported security '{}'", other))),
        };
        Ok(Self {
            transport,
            security,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<RawHeader>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawHeader {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WsSettings {
    #[serde(skip_serializing_if = "is_default")]
    pub accept_proxy_protocol: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub path: String,
    #[serde(skip_serializing_if = "is_default")]
    pub host: String,
    #[serde(skip_serializing_if = "is_default")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "is_default")]
    pub heartbeat_period: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpUpgradeSettings {
    #[serde(skip_serializing_if = "is_default")]
    pub accept_proxy_protocol: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub path: String,
    #[serde(skip_serializing_if = "is_default")]
    pub host: String,
    #[serde(skip_serializing_if = "is_default")]
    pub headers: BTreeMap<String, String>,
}

/// TLS client settings. Only non-default values reach the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(skip_serializing_if = "is_default")]
    pub server_name: String,
    #[serde(skip_serializing_if = "is_default")]
    pub allow_insecure: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub alpn: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub fingerprint: String,
}

/// REALITY settings; the first block is server side, the second client side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RealitySettings {
    #[serde(skip_serializing_if = "is_default")]
    pub show: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub target: String,
    #[serde(skip_serializing_if = "is_default")]
    pub xver: u8,
    #[serde(skip_serializing_if = "is_default")]
    pub server_names: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub private_key: String,
    #[serde(skip_serializing_if = "is_default")]
    pub short_ids: Vec<String>,

    #[serde(skip_serializing_if = "is_default")]
    pub fingerprint: String,
    #[serde(skip_serializing_if = "is_default")]
    pub server_name: String,
    #[serde(skip_serializing_if = "is_default")]
    pub public_key: String,
    #[serde(skip_serializing_if = "is_default")]
    pub short_id: String,
    #[serde(skip_serializing_if = "is_default", rename = "spiderX")]
    pub spider_x: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MuxSettings {
    pub enabled: bool,
    pub concurrency: i32,
    pub xudp_concurrency: i32,
    #[serde(rename = "xudpProxyUDP443")]
    pub xudp_proxy_udp443: String,
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            concurrency: 8,
            xudp_concurrency: 16,
            xudp_proxy_udp443: "reject".to_string(),
        }
    }
}
