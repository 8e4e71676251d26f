use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::Result;
use regex::Regex;
use tracing::info;

use super::trie::DomainTrie;

/// GeoSite 数据库
///
/// 支持纯文本域名列表文件格式，每行一条规则:
/// - `domain:example.com` -- 完全匹配
/// - `domain_suffix:example.com` -- 后缀匹配
/// - `domain_keyword:google` -- 关键字匹配
/// - `regexp:^ads\d+\.` -- 正则匹配
/// - `example.com` -- 默认为后缀匹配
///
/// Each category is compiled once at load time; lookups never allocate.
#[derive(Debug, Default)]
pub struct GeoSiteDb {
    /// 分类名 -> 规则集合
    categories: HashMap<String, SiteList>,
}

#[derive(Debug, Default)]
struct SiteList {
    full: HashSet<String>,
    suffix: DomainTrie,
    keywords: Vec<String>,
    regexes: Vec<Regex>,
}

impl SiteList {
    fn parse(content: &str) -> Result<Self> {
        let mut list = SiteList::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(domain) = line.strip_prefix("domain:") {
                list.full.insert(domain.to_lowercase());
            } else if let Some(suffix) = line.strip_prefix("domain_suffix:") {
                list.suffix.insert(suffix);
            } else if let Some(keyword) = line.strip_prefix("domain_keyword:") {
                list.keywords.push(keyword.to_lowercase());
            } else if let Some(pattern) = line.strip_prefix("regexp:") {
                let re = Regex::new(pattern)
                    .map_err(|e| anyhow::anyhow!("invalid geosite regexp '{}': {}", pattern, e))?;
                list.regexes.push(re);
            } else {
                // 默认为后缀匹配
                list.suffix.insert(line);
            }
        }
        Ok(list)
    }

    fn len(&self) -> usize {
        self.full.len() + self.suffix.len() + self.keywords.len() + self.regexes.len()
    }

    fn matches(&self, domain: &str) -> bool {
        self.full.contains(domain)
            || self.suffix.matches(domain)
            || self.keywords.iter().any(|k| domain.contains(k.as_str()))
            || self.regexes.iter().any(|re| re.is_match(domain))
    }
}

impl GeoSiteDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从文本文件加载一个分类
    pub fn load(path: &Path, category: &str) -> Result<Self> {
        let mut db = Self::new();
        db.load_category(path, category)?;
        Ok(db)
    }

    /// 从目录加载: 每个 `<category>.txt` 文件对应一个分类
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut db = Self::new();
        let entries = fs::read_dir(dir)
            .map_err(|e| anyhow::anyhow!("failed to read geosite dir '{}': {}", dir.display(), e))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let category = stem.to_string();
                db.load_category(&path, &category)?;
            }
        }
        Ok(db)
    }

    fn load_category(&mut self, path: &Path, category: &str) -> Result<()> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("failed to read geosite file '{}': {}", path.display(), e)
        })?;
        self.insert_text(category, &content)?;
        info!(
            path = %path.display(),
            category = category,
            count = self.category_len(category),
            "GeoSite category loaded"
        );
        Ok(())
    }

    /// Parse `content` in the list format above and register it as `category`.
    pub fn insert_text(&mut self, category: &str, content: &str) -> Result<()> {
        let list = SiteList::parse(content)?;
        self.categories.insert(category.to_lowercase(), list);
        Ok(())
    }

    /// 检查域名是否匹配指定分类
    ///
    /// `domain` must be lowercase.
    pub fn matches(&self, domain: &str, category: &str) -> bool {
        match self.lookup(category) {
            Some(list) => list.matches(domain),
            None => false,
        }
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.lookup(category).is_some()
    }

    fn lookup(&self, category: &str) -> Option<&SiteList> {
        if category.bytes().any(|b| b.is_ascii_uppercase()) {
            self.categories.get(&category.to_ascii_lowercase())
        } else {
            self.categories.get(category)
        }
    }

    fn category_len(&self, category: &str) -> usize {
        self.lookup(category).map(SiteList::len).unwrap_or(0)
    }

    /// 获取所有已加载的分类名
    pub fn categories(&self) -> Vec<&str> {
        self.categories.keys().map(|s| s.as_str()).collect()
    }
}
