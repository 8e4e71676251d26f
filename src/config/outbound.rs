use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::stream::{MuxSettings, Security, StreamSettings, TlsSettings, Transport};
use super::types::is_default;
use crate::common::Error;

/// Per-protocol outbound payload. The variant decides the `protocol` string on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundSettings {
    Http(HttpSettings),
    Socks(SocksSettings),
    Vless(VlessSettings),
    Vmess(VmessSettings),
    Trojan(TrojanSettings),
    Shadowsocks(ShadowsocksSettings),
    Freedom(FreedomSettings),
    Blackhole(BlackholeSettings),
}

impl OutboundSettings {
    pub fn protocol(&self) -> &'static str {
        match self {
            OutboundSettings::Http(_) => "http",
            OutboundSettings::Socks(_) => "socks",
            OutboundSettings::Vless(_) => "vless",
            OutboundSettings::Vmess(_) => "vmess",
            OutboundSettings::Trojan(_) => "trojan",
            OutboundSettings::Shadowsocks(_) => "shadowsocks",
            OutboundSettings::Freedom(_) => "freedom",
            OutboundSettings::Blackhole(_) => "blackhole",
        }
    }

    /// Select the payload type from the discriminant, then decode `settings` into it.
    pub fn from_protocol(protocol: &str, settings: Option<Value>) -> Result<Self, Error> {
        let settings = match protocol {
            "http" => OutboundSettings::Http(decode_payload(protocol, settings)?),
            "socks" => OutboundSettings::Socks(decode_payload(protocol, settings)?),
            "vless" => OutboundSettings::Vless(decode_payload(protocol, settings)?),
            "vmess" => OutboundSettings::Vmess(decode_payload(protocol, settings)?),
            "trojan" => OutboundSettings::Trojan(decode_payload(protocol, settings)?),
            "shadowsocks" => OutboundSettings::Shadowsocks(decode_payload(protocol, settings)?),
            "freedom" => OutboundSettings::Freedom(decode_payload(protocol, settings)?),
            "blackhole" => OutboundSettings::Blackhole(decode_payload(protocol, settings)?),
            other => {
                return Err(Error::config(format!(
                    "unknown outbound protocol '{}'",
                    other
                )))
            }
        };
        Ok(settings)
    }
}

pub(crate) fn decode_payload<T: DeserializeOwned>(
    protocol: &str,
    settings: Option<Value>,
) -> Result<T, Error> {
    let value = match settings {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(v) => v,
    };
    serde_json::from_value(value)
        .map_err(|e| Error::config(format!("invalid {} settings: {}", protocol, e)))
}

/// A configured upstream endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawOutbound")]
pub struct Outbound {
    pub tag: String,
    pub settings: OutboundSettings,
    pub stream_settings: StreamSettings,
    pub mux: Option<MuxSettings>,
}

impl Outbound {
    pub fn new(tag: impl Into<String>, settings: OutboundSettings) -> Self {
        Self {
            tag: tag.into(),
            settings,
            stream_settings: StreamSettings::default(),
            mux: None,
        }
    }

    pub fn direct() -> Self {
        Self::new("direct", OutboundSettings::Freedom(FreedomSettings::default()))
    }

    pub fn block() -> Self {
        Self::new(
            "block",
            OutboundSettings::Blackhole(BlackholeSettings::with_response("none")),
        )
    }

    pub fn with_stream(mut self, stream: StreamSettings) -> Self {
        self.stream_settings = stream;
        self
    }

    pub fn protocol(&self) -> &'static str {
        self.settings.protocol()
    }

    /// Replace the protocol payload.
    ///
    /// Switching to trojan normalizes the stream to raw transport with TLS,
    /// keeping any TLS parameters already present.
    pub fn set_settings(&mut self, settings: OutboundSettings) {
        if matches!(settings, OutboundSettings::Trojan(_)) {
            let tls = self.stream_settings.tls().cloned().unwrap_or_default();
            self.stream_settings = StreamSettings {
                transport: Transport::default(),
                security: Security::Tls(tls),
            };
        }
        self.settings = settings;
    }

    /// First server address/port, for protocols that dial one.
    pub fn endpoint(&self) -> Option<(&str, u16)> {
        match &self.settings {
            OutboundSettings::Http(s) => s.servers.first().map(|v| (v.address.as_str(), v.port)),
            OutboundSettings::Socks(s) => Some((s.address.as_str(), s.port)),
            OutboundSettings::Vless(s) => s.vnext.first().map(|v| (v.address.as_str(), v.port)),
            OutboundSettings::Vmess(s) => s.vnext.first().map(|v| (v.address.as_str(), v.port)),
            OutboundSettings::Trojan(s) => s.servers.first().map(|v| (v.address.as_str(), v.port)),
            OutboundSettings::Shadowsocks(s) => {
                s.servers.first().map(|v| (v.address.as_str(), v.port))
            }
            OutboundSettings::Freedom(_) | OutboundSettings::Blackhole(_) => None,
        }
    }
}

impl Serialize for Outbound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Outbound", 5)?;
        st.serialize_field("tag", &self.tag)?;
        st.serialize_field("protocol", self.protocol())?;
        st.serialize_field("settings", &self.settings)?;
        st.serialize_field("streamSettings", &self.stream_settings)?;
        match &self.mux {
            Some(mux) => st.serialize_field("mux", mux)?,
            None => st.skip_field("mux")?,
        }
        st.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutbound {
    #[serde(default)]
    tag: String,
    #[serde(default = "default_outbound_protocol")]
    protocol: String,
    #[serde(default)]
    settings: Option<Value>,
    #[serde(default)]
    stream_settings: Option<StreamSettings>,
    #[serde(default)]
    mux: Option<MuxSettings>,
}

fn default_outbound_protocol() -> String {
    "freedom".to_string()
}

impl TryFrom<RawOutbound> for Outbound {
    type Error = Error;

    fn try_from(raw: RawOutbound) -> Result<Self, Self::Error> {
        let settings = OutboundSettings::from_protocol(&raw.protocol, raw.settings)
            .map_err(|e| Error::config(format!("outbound '{}': {}", raw.tag, e)))?;
        Ok(Self {
            tag: raw.tag,
            settings,
            stream_settings: raw.stream_settings.unwrap_or_default(),
            mux: raw.mux,
        })
    }
}

// ── per-protocol payloads ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub servers: Vec<HttpServer>,
}

impl HttpSettings {
    pub fn new(host: &str, port: u16, user: &str, pass: &str) -> Self {
        let mut server = HttpServer {
            address: host.to_string(),
            port,
            users: Vec::new(),
        };
        if !user.is_empty() || !pass.is_empty() {
            server.users.push(Credential {
                user: user.to_string(),
                pass: pass.to_string(),
                level: 0,
            });
        }
        Self {
            servers: vec![server],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServer {
    pub address: String,
    pub port: u16,
    pub users: Vec<Credential>,
}

impl Default for HttpServer {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 8080,
            users: Vec::new(),
        }
    }
}

/// user/pass pair shared by the http and socks payloads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credential {
    pub user: String,
    pub pass: String,
    #[serde(skip_serializing_if = "is_default")]
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocksSettings {
    pub address: String,
    pub port: u16,
    pub users: Vec<Credential>,
}

impl Default for SocksSettings {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 1080,
            users: Vec::new(),
        }
    }
}

impl SocksSettings {
    pub fn new(host: &str, port: u16, user: &str, pass: &str) -> Self {
        let mut settings = Self {
            address: host.to_string(),
            port,
            users: Vec::new(),
        };
        if !user.is_empty() || !pass.is_empty() {
            settings.users.push(Credential {
                user: user.to_string(),
                pass: pass.to_string(),
                level: 0,
            });
        }
        settings
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VlessSettings {
    pub vnext: Vec<VlessServer>,
}

impl VlessSettings {
    pub fn new(host: &str, port: u16, id: &str) -> Self {
        Self {
            vnext: vec![VlessServer {
                address: host.to_string(),
                port,
                users: vec![VlessUser {
                    id: id.to_string(),
                    ..Default::default()
                }],
            }],
        }
    }

    pub fn user(&self) -> Option<&VlessUser> {
        self.vnext.first().and_then(|s| s.users.first())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VlessServer {
    pub address: String,
    pub port: u16,
    pub users: Vec<VlessUser>,
}

impl Default for VlessServer {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 443,
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VlessUser {
    pub id: String,
    pub encryption: String,
    #[serde(skip_serializing_if = "is_default")]
    pub flow: String,
    #[serde(skip_serializing_if = "is_default")]
    pub level: u32,
}

impl Default for VlessUser {
    fn default() -> Self {
        Self {
            id: String::new(),
            encryption: "none".to_string(),
            flow: String::new(),
            level: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VmessSettings {
    pub vnext: Vec<VmessServer>,
}

impl VmessSettings {
    pub fn new(host: &str, port: u16, id: &str, security: &str) -> Self {
        Self {
            vnext: vec![VmessServer {
                address: host.to_string(),
                port,
                users: vec![VmessUser {
                    id: id.to_string(),
                    security: security.to_string(),
                    ..Default::default()
                }],
            }],
        }
    }

    pub fn user(&self) -> Option<&VmessUser> {
        self.vnext.first().and_then(|s| s.users.first())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmessServer {
    pub address: String,
    pub port: u16,
    pub users: Vec<VmessUser>,
}

impl Default for VmessServer {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 443,
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmessUser {
    pub id: String,
    pub security: String,
    #[serde(skip_serializing_if = "is_default")]
    pub level: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub experiments: String,
}

impl Default for VmessUser {
    fn default() -> Self {
        Self {
            id: String::new(),
            security: "auto".to_string(),
            level: 0,
            experiments: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrojanSettings {
    pub servers: Vec<TrojanServer>,
}

impl TrojanSettings {
    pub fn new(host: &str, port: u16, password: &str) -> Self {
        Self {
            servers: vec![TrojanServer {
                address: host.to_string(),
                port,
                password: password.to_string(),
                ..Default::default()
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrojanServer {
    pub address: String,
    pub port: u16,
    pub password: String,
    #[serde(skip_serializing_if = "is_default")]
    pub email: String,
    #[serde(skip_serializing_if = "is_default")]
    pub level: u32,
}

impl Default for TrojanServer {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 443,
            password: String::new(),
            email: String::new(),
            level: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowsocksSettings {
    pub servers: Vec<ShadowsocksServer>,
}

impl ShadowsocksSettings {
    pub fn new(host: &str, port: u16, method: &str, password: &str) -> Self {
        Self {
            servers: vec![ShadowsocksServer {
                address: host.to_string(),
                port,
                method: method.to_string(),
                password: password.to_string(),
                ..Default::default()
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowsocksServer {
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "is_default")]
    pub email: String,
    pub password: String,
    pub method: String,
    pub uot: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub level: u32,
}

impl Default for ShadowsocksServer {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 1234,
            email: String::new(),
            password: String::new(),
            method: String::new(),
            uot: true,
            level: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FreedomSettings {
    #[serde(skip_serializing_if = "is_default")]
    pub domain_strategy: String,
    #[serde(skip_serializing_if = "is_default")]
    pub redirect: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackholeSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BlackholeResponse>,
}

impl BlackholeSettings {
    pub fn with_response(kind: &str) -> Self {
        Self {
            response: Some(BlackholeResponse {
                kind: kind.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackholeResponse {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for BlackholeResponse {
    fn default() -> Self {
        Self {
            kind: "none".to_string(),
        }
    }
}

/// Convenience for building a TLS stream with just an SNI.
pub fn tls_stream(server_name: &str) -> StreamSettings {
    StreamSettings::raw_tls(TlsSettings {
        server_name: server_name.to_string(),
        ..Default::default()
    })
}
