use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;

/// Label-aligned domain suffix set.
///
/// Domains are inserted in reverse-label order, e.g. "www.example.com"
/// is stored as ["com", "example", "www"]. A lookup matches when any
/// inserted suffix ends the queried domain on a label boundary, so
/// `example.com` covers `www.example.com` but not `notexample.com`.
#[derive(Debug, Default)]
pub struct DomainTrie {
    root: TrieNode,
    entries: usize,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    terminal: bool,
}

impl DomainTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, domain: &str) {
        let domain = domain.trim_end_matches('.');
        if domain.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for label in domain.rsplit('.') {
            node = node.children.entry(label.to_ascii_lowercase()).or_default();
        }
        if !node.terminal {
            node.terminal = true;
            self.entries += 1;
        }
    }

    /// `domain` must already be lowercase; no allocation happens here.
    pub fn matches(&self, domain: &str) -> bool {
        let mut node = &self.root;
        for label in domain.trim_end_matches('.').rsplit('.') {
            match node.children.get(label) {
                Some(child) => {
                    if child.terminal {
                        return true;
                    }
                    node = child;
                }
                None => return false,
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// Binary trie for CIDR membership.
/// Supports both IPv4 (32-bit) and IPv6 (128-bit).
#[derive(Debug, Default)]
pub struct IpPrefixTrie {
    root_v4: IpTrieNode,
    root_v6: IpTrieNode,
    entries: usize,
}

#[derive(Debug, Default)]
struct IpTrieNode {
    children: [Option<Box<IpTrieNode>>; 2],
    terminal: bool,
}

impl IpPrefixTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cidr: &IpNet) {
        let (bits, width, prefix_len, root) = match cidr {
            IpNet::V4(v4) => (
                u32::from(v4.network()) as u128,
                32u32,
                v4.prefix_len(),
                &mut self.root_v4,
            ),
            IpNet::V6(v6) => (
                u128::from(v6.network()),
                128u32,
                v6.prefix_len(),
                &mut self.root_v6,
            ),
        };

        let mut node = root;
        for i in 0..prefix_len as u32 {
            let idx = ((bits >> (width - 1 - i)) & 1) as usize;
            node = &mut **node.children[idx].get_or_insert_with(Default::default);
        }
        if !node.terminal {
            node.terminal = true;
            self.entries += 1;
        }
    }

    /// Whether any inserted prefix covers `addr`. IPv4-mapped IPv6 addresses
    /// are looked up as IPv4.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let (bits, width, root) = match addr {
            IpAddr::V4(v4) => (u32::from(v4) as u128, 32u32, &self.root_v4),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => (u32::from(v4) as u128, 32u32, &self.root_v4),
                None => (u128::from(v6), 128u32, &self.root_v6),
            },
        };

        let mut node = root;
        if node.terminal {
            return true;
        }
        for i in 0..width {
            let idx = ((bits >> (width - 1 - i)) & 1) as usize;
            match &node.children[idx] {
                Some(child) => {
                    if child.terminal {
                        return true;
                    }
                    node = &**child;
                }
                None => return false,
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}
