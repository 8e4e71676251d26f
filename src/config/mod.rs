pub mod dns;
pub mod inbound;
pub mod link;
pub mod metrics;
pub mod outbound;
pub mod profile;
pub mod routing;
pub mod stream;
pub mod subscription;
pub mod types;
pub mod validate;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

pub use types::Config;

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

/// Read and validate a config document. JSON by default, YAML for
/// `.yaml`/`.yml` files.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;

    let config: Config = if is_yaml(path) {
        serde_yml::from_str(&content)
            .with_context(|| format!("failed to parse YAML config {}", path.display()))?
    } else {
        Config::from_json(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?
    };

    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    info!(
        path = %path.display(),
        inbounds = config.inbounds.len(),
        outbounds = config.outbounds.len(),
        rules = config.routing.rules.len(),
        "config loaded"
    );
    Ok(config)
}

/// Validate and write `config` as pretty JSON, via temp file + rename so the
/// engine never reads a half-written document.
pub fn save_config(config: &Config, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    config.validate().context("refusing to save invalid config")?;
    let json = config.to_json()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, json.as_bytes())
        .with_context(|| format!("failed to write {}", Path::new(&tmp).display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;

    info!(path = %path.display(), bytes = json.len(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Error, RefKind};
    use crate::config::routing::RuleConfig;

    #[test]
    fn save_then_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let mut config = Config::default();
        config.routing.rules.push(RuleConfig::to_outbound("all", "direct"));

        save_config(&config, &path).unwrap();
        assert!(!dir.path().join("nested/config.json.tmp").exists());
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
inbounds:
  - tag: entry
    protocol: socks
    port: 1080
    settings:
      udp: true
outbounds:
  - tag: direct
    protocol: freedom
routing:
  rules:
    - ruleTag: lan
      ip: ["10.0.0.0/8"]
      outboundTag: direct
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.routing.rules[0].rule_tag, "lan");
        assert_eq!(config.inbounds[0].protocol(), "socks");
    }

    #[test]
    fn dangling_rule_is_refused_on_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.routing.rules.push(RuleConfig::to_outbound("r", "ghost"));

        let err = save_config(&config, &path).unwrap_err();
        let root = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(
            root,
            Error::DanglingReference { kind: RefKind::Outbound, tag } if tag == "ghost"
        ));
        assert!(!path.exists());

        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_protocol_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"outbounds":[{"tag":"x","protocol":"wireguard"}]}"#).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("wireguard"), "{:#}", err);
    }
}
