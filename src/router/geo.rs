use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use super::geoip::GeoIpDb;
use super::geosite::GeoSiteDb;

/// Read-only dataset snapshot consulted by `geoip:` / `geosite:` entries.
///
/// Loaded once before routing starts and shared via `Arc`; matching never
/// touches the filesystem. A router built without a dataset rejects rules
/// that reference it.
#[derive(Debug, Default, Clone)]
pub struct GeoData {
    geoip: Option<Arc<GeoIpDb>>,
    geosite: Option<Arc<GeoSiteDb>>,
}

impl GeoData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_geoip(mut self, db: GeoIpDb) -> Self {
        self.geoip = Some(Arc::new(db));
        self
    }

    pub fn with_geosite(mut self, db: GeoSiteDb) -> Self {
        self.geosite = Some(Arc::new(db));
        self
    }

    /// Load whichever datasets are given. `geoip` may be an `.mmdb` file or
    /// a `CC cidr` text table; `geosite` is a directory of `<category>.txt`.
    pub fn load(geoip: Option<&Path>, geosite: Option<&Path>) -> Result<Self> {
        let mut data = Self::empty();
        if let Some(path) = geoip {
            let db = if path.extension().and_then(|e| e.to_str()) == Some("mmdb") {
                GeoIpDb::load(path)?
            } else {
                GeoIpDb::load_table(path)?
            };
            data = data.with_geoip(db);
        }
        if let Some(dir) = geosite {
            data = data.with_geosite(GeoSiteDb::load_dir(dir)?);
        }
        Ok(data)
    }

    pub fn has_geoip(&self) -> bool {
        self.geoip.is_some()
    }

    pub fn has_geosite(&self) -> bool {
        self.geosite.is_some()
    }

    pub fn has_country(&self, code: &str) -> bool {
        self.geoip.as_ref().is_some_and(|db| db.has_country(code))
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.geosite.as_ref().is_some_and(|db| db.has_category(category))
    }

    pub fn ip_in_country(&self, code: &str, ip: IpAddr) -> bool {
        self.geoip.as_ref().is_some_and(|db| db.contains(code, ip))
    }

    /// `domain` must be lowercase.
    pub fn domain_in_category(&self, category: &str, domain: &str) -> bool {
        self.geosite
            .as_ref()
            .is_some_and(|db| db.matches(domain, category))
    }
}
