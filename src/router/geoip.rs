use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

use anyhow::Result;
use ipnet::IpNet;
use tracing::info;

use super::trie::IpPrefixTrie;

/// GeoIP 数据库
///
/// Either a MaxMind mmdb file, or an in-memory country → CIDR table
/// (text lines of `CC cidr`), useful for trimmed datasets and tests.
pub struct GeoIpDb {
    source: Source,
}

enum Source {
    Mmdb(maxminddb::Reader<Vec<u8>>),
    Table(HashMap<String, IpPrefixTrie>),
}

impl std::fmt::Debug for GeoIpDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Source::Mmdb(_) => f.write_str("GeoIpDb(mmdb)"),
            Source::Table(t) => write!(f, "GeoIpDb(table, {} countries)", t.len()),
        }
    }
}

impl GeoIpDb {
    /// 从 mmdb 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path).map_err(|e| {
            anyhow::anyhow!("failed to load GeoIP database '{}': {}", path.display(), e)
        })?;
        info!(path = %path.display(), "GeoIP database loaded");
        Ok(Self {
            source: Source::Mmdb(reader),
        })
    }

    /// 从文本表加载, 每行 `CC cidr`
    pub fn load_table(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("failed to read GeoIP table '{}': {}", path.display(), e)
        })?;
        let db = Self::from_table(&content)?;
        info!(path = %path.display(), "GeoIP table loaded");
        Ok(db)
    }

    pub fn from_table(content: &str) -> Result<Self> {
        let mut table: HashMap<String, IpPrefixTrie> = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(code), Some(cidr)) = (parts.next(), parts.next()) else {
                anyhow::bail!("GeoIP table line {}: expected 'CC cidr'", lineno + 1);
            };
            let net = parse_cidr(cidr)
                .ok_or_else(|| anyhow::anyhow!("GeoIP table line {}: bad cidr '{}'", lineno + 1, cidr))?;
            table.entry(code.to_ascii_lowercase()).or_default().insert(&net);
        }
        Ok(Self {
            source: Source::Table(table),
        })
    }

    /// 查询 IP 对应的国家 ISO 代码（如 "CN", "US"）
    pub fn lookup_country(&self, ip: IpAddr) -> Option<String> {
        match &self.source {
            Source::Mmdb(reader) => mmdb_country(reader, ip).map(str::to_string),
            Source::Table(table) => table
                .iter()
                .find(|(_, trie)| trie.contains(ip))
                .map(|(code, _)| code.to_ascii_uppercase()),
        }
    }

    /// Whether `ip` belongs to `code`. Codes compare case-insensitively.
    pub fn contains(&self, code: &str, ip: IpAddr) -> bool {
        match &self.source {
            Source::Mmdb(reader) => {
                mmdb_country(reader, ip).is_some_and(|c| c.eq_ignore_ascii_case(code))
            }
            Source::Table(table) => table_get(table, code).is_some_and(|t| t.contains(ip)),
        }
    }

    /// Whether `code` can be answered. An mmdb covers every ISO code.
    pub fn has_country(&self, code: &str) -> bool {
        match &self.source {
            Source::Mmdb(_) => code.len() == 2 && code.bytes().all(|b| b.is_ascii_alphabetic()),
            Source::Table(table) => table_get(table, code).is_some(),
        }
    }
}

fn table_get<'a>(table: &'a HashMap<String, IpPrefixTrie>, code: &str) -> Option<&'a IpPrefixTrie> {
    if code.bytes().any(|b| b.is_ascii_uppercase()) {
        table.get(&code.to_ascii_lowercase())
    } else {
        table.get(code)
    }
}

fn mmdb_country(reader: &maxminddb::Reader<Vec<u8>>, ip: IpAddr) -> Option<&str> {
    #[derive(serde::Deserialize)]
    struct Country<'a> {
        #[serde(borrow)]
        country: Option<CountryInfo<'a>>,
    }
    #[derive(serde::Deserialize)]
    struct CountryInfo<'a> {
        iso_code: Option<&'a str>,
    }

    let result: Country<'_> = reader.lookup(ip).ok()?;
    result.country?.iso_code
}

/// Accept `a.b.c.d/n`, or a bare address as a host route.
pub(crate) fn parse_cidr(s: &str) -> Option<IpNet> {
    if let Ok(net) = s.parse::<IpNet>() {
        return Some(net);
    }
    s.parse::<IpAddr>().ok().map(IpNet::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
# country cidr
CN 1.0.1.0/24
CN 223.0.0.0/11
US 8.8.8.0/24
JP 2001:200::/23
";

    #[test]
    fn table_lookup() {
        let db = GeoIpDb::from_table(TABLE).unwrap();
        assert!(db.contains("cn", "1.0.1.7".parse().unwrap()));
        assert!(db.contains("CN", "223.5.5.5".parse().unwrap()));
        assert!(!db.contains("cn", "8.8.8.8".parse().unwrap()));
        assert!(db.contains("jp", "2001:200::1".parse().unwrap()));
        assert_eq!(
            db.lookup_country("8.8.8.8".parse().unwrap()).as_deref(),
            Some("US")
        );
        assert_eq!(db.lookup_country("9.9.9.9".parse().unwrap()), None);
    }

    #[test]
    fn table_knows_its_countries() {
        let db = GeoIpDb::from_table(TABLE).unwrap();
        assert!(db.has_country("us"));
        assert!(db.has_country("US"));
        assert!(!db.has_country("de"));
    }

    #[test]
    fn table_rejects_bad_lines() {
        assert!(GeoIpDb::from_table("CN").is_err());
        assert!(GeoIpDb::from_table("CN 300.1.1.1/8").is_err());
    }

    #[test]
    fn load_table_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geoip.txt");
        fs::write(&path, TABLE).unwrap();
        let db = GeoIpDb::load_table(&path).unwrap();
        assert!(db.has_country("cn"));
    }

    #[test]
    fn missing_mmdb_is_error() {
        assert!(GeoIpDb::load(Path::new("/nonexistent/geoip.mmdb")).is_err());
    }

    #[test]
    fn parse_cidr_accepts_bare_address() {
        assert_eq!(parse_cidr("1.2.3.4").unwrap().prefix_len(), 32);
        assert_eq!(parse_cidr("::1").unwrap().prefix_len(), 128);
        assert_eq!(parse_cidr("10.0.0.0/8").unwrap().prefix_len(), 8);
        assert!(parse_cidr("example.com").is_none());
    }
}
