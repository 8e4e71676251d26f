use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::outbound::decode_payload;
use super::types::is_default;
use crate::common::Error;

/// Per-protocol inbound payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InboundSettings {
    Socks(SocksInboundSettings),
    Http(HttpInboundSettings),
    Vless(VlessInboundSettings),
    Trojan(TrojanInboundSettings),
    Dokodemo(DokodemoSettings),
}

impl InboundSettings {
    pub fn protocol(&self) -> &'static str {
        match self {
            InboundSettings::Socks(_) => "socks",
            InboundSettings::Http(_) => "http",
            InboundSettings::Vless(_) => "vless",
            InboundSettings::Trojan(_) => "trojan",
            InboundSettings::Dokodemo(_) => "dokodemo-door",
        }
    }

    pub fn from_protocol(protocol: &str, settings: Option<Value>) -> Result<Self, Error> {
        Ok(match protocol {
            "socks" => InboundSettings::Socks(decode_payload(protocol, settings)?),
            "http" => InboundSettings::Http(decode_payload(protocol, settings)?),
            "vless" => InboundSettings::Vless(decode_payload(protocol, settings)?),
            "trojan" => InboundSettings::Trojan(decode_payload(protocol, settings)?),
            "dokodemo-door" => InboundSettings::Dokodemo(decode_payload(protocol, settings)?),
            other => {
                return Err(Error::config(format!(
                    "unknown inbound protocol '{}'",
                    other
                )))
            }
        })
    }
}

/// A local listener. `tag` is what `inboundTag` rule entries refer to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawInbound")]
pub struct Inbound {
    pub tag: String,
    pub listen: String,
    pub port: u16,
    pub settings: InboundSettings,
    pub sniffing: Option<SniffingSettings>,
}

impl Inbound {
    pub fn new(tag: impl Into<String>, port: u16, settings: InboundSettings) -> Self {
        Self {
            tag: tag.into(),
            listen: "127.0.0.1".to_string(),
            port,
            settings,
            sniffing: None,
        }
    }

    /// Local socks entry with UDP enabled.
    pub fn socks(tag: impl Into<String>, port: u16) -> Self {
        Self::new(
            tag,
            port,
            InboundSettings::Socks(SocksInboundSettings {
                udp: true,
                ip: String::new(),
            }),
        )
    }

    pub fn dokodemo(tag: impl Into<String>, port: u16) -> Self {
        Self::new(tag, port, InboundSettings::Dokodemo(DokodemoSettings::default()))
    }

    pub fn with_sniffing(mut self, sniffing: SniffingSettings) -> Self {
        self.sniffing = Some(sniffing);
        self
    }

    pub fn protocol(&self) -> &'static str {
        self.settings.protocol()
    }
}

impl Serialize for Inbound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Inbound", 6)?;
        st.serialize_field("tag", &self.tag)?;
        st.serialize_field("listen", &self.listen)?;
        st.serialize_field("port", &self.port)?;
        st.serialize_field("protocol", self.protocol())?;
        st.serialize_field("settings", &self.settings)?;
        match &self.sniffing {
            Some(sniffing) => st.serialize_field("sniffing", sniffing)?,
            None => st.skip_field("sniffing")?,
        }
        st.end()
    }
}

#[derive(Deserialize)]
struct RawInbound {
    tag: String,
    #[serde(default = "default_listen")]
    listen: String,
    port: u16,
    protocol: String,
    #[serde(default)]
    settings: Option<Value>,
    #[serde(default)]
    sniffing: Option<SniffingSettings>,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

impl TryFrom<RawInbound> for Inbound {
    type Error = Error;

    fn try_from(raw: RawInbound) -> Result<Self, Self::Error> {
        let settings = InboundSettings::from_protocol(&raw.protocol, raw.settings)
            .map_err(|e| Error::config(format!("inbound '{}': {}", raw.tag, e)))?;
        Ok(Self {
            tag: raw.tag,
            listen: raw.listen,
            port: raw.port,
            settings,
            sniffing: raw.sniffing,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SocksInboundSettings {
    #[serde(skip_serializing_if = "is_default")]
    pub udp: bool,
    /// UDP relay address advertised to clients; only meaningful with `udp`.
    #[serde(skip_serializing_if = "is_default")]
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpInboundSettings {
    #[serde(skip_serializing_if = "is_default")]
    pub allow_transparent: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub user_level: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VlessInboundSettings {
    pub decryption: String,
    pub clients: Vec<VlessClient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<Vec<Fallback>>,
}

impl Default for VlessInboundSettings {
    fn default() -> Self {
        Self {
            decryption: "none".to_string(),
            clients: Vec::new(),
            fallbacks: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VlessClient {
    pub id: String,
    #[serde(skip_serializing_if = "is_default")]
    pub level: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub email: String,
    #[serde(skip_serializing_if = "is_default")]
    pub flow: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrojanInboundSettings {
    pub clients: Vec<TrojanClient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<Vec<Fallback>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrojanClient {
    pub password: String,
    #[serde(skip_serializing_if = "is_default")]
    pub email: String,
    #[serde(skip_serializing_if = "is_default")]
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fallback {
    pub dest: u16,
    #[serde(skip_serializing_if = "is_default")]
    pub xver: u8,
    #[serde(skip_serializing_if = "is_default")]
    pub alpn: String,
    #[serde(skip_serializing_if = "is_default")]
    pub path: String,
}

/// dokodemo-door: forwards everything it accepts to `address:port`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DokodemoSettings {
    pub address: String,
    #[serde(skip_serializing_if = "is_default")]
    pub port: u16,
    #[serde(skip_serializing_if = "is_tcp_only")]
    pub network: String,
    #[serde(skip_serializing_if = "is_default")]
    pub follow_redirect: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub user_level: u32,
}

fn is_tcp_only(network: &String) -> bool {
    network == "tcp"
}

impl Default for DokodemoSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 0,
            network: "tcp".to_string(),
            follow_redirect: false,
            user_level: 0,
        }
    }
}

impl DokodemoSettings {
    pub fn networks(&self) -> Vec<&str> {
        self.network
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn set_networks(&mut self, networks: &[&str]) {
        self.network = networks.join(",");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SniffingSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub dest_override: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub metadata_only: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub domains_excluded: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub route_only: bool,
}

impl Default for SniffingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dest_override: vec!["http".to_string(), "tls".to_string(), "quic".to_string()],
            metadata_only: false,
            domains_excluded: Vec::new(),
            route_only: false,
        }
    }
}
