use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::common::{Error, Result};
use crate::config::routing::BalancerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Random,
    RoundRobin,
    LeastPing,
    LeastLoad,
}

impl Strategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "random" => Ok(Strategy::Random),
            "roundRobin" => Ok(Strategy::RoundRobin),
            "leastPing" => Ok(Strategy::LeastPing),
            "leastLoad" => Ok(Strategy::LeastLoad),
            other => Err(Error::config(format!("unknown balancer strategy '{}'", other))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Random => "random",
            Strategy::RoundRobin => "roundRobin",
            Strategy::LeastPing => "leastPing",
            Strategy::LeastLoad => "leastLoad",
        }
    }

    /// Strategies that need live latency/load figures only the engine has.
    pub fn is_deferred(self) -> bool {
        matches!(self, Strategy::LeastPing | Strategy::LeastLoad)
    }
}

/// Viability signal for balancer candidates, reported by the engine.
pub trait HealthView: Send + Sync {
    fn is_viable(&self, tag: &str) -> bool;
}

/// Every candidate counts as viable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllViable;

impl HealthView for AllViable {
    fn is_viable(&self, _tag: &str) -> bool {
        true
    }
}

impl<F> HealthView for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_viable(&self, tag: &str) -> bool {
        self(tag)
    }
}

/// Outcome of one balancer resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub tag: String,
    pub strategy: Strategy,
    /// The strategy's real choice is left to the engine; `tag` is the first
    /// viable candidate.
    pub deferred: bool,
    /// No viable candidate; `tag` is the fallback.
    pub fallback: bool,
}

/// One balancer selector pattern.
///
/// Compiled with `fancy_regex` so negative look-ahead works; the stock
/// proxy pool is `^((?!direct|block).)*$`.
#[derive(Debug, Clone)]
pub struct Selector(fancy_regex::Regex);

impl Selector {
    pub fn new(pattern: &str) -> std::result::Result<Self, fancy_regex::Error> {
        fancy_regex::Regex::new(pattern).map(Selector)
    }

    /// A pattern that exhausts the backtrack limit counts as no match.
    pub fn is_match(&self, tag: &str) -> bool {
        self.0.is_match(tag).unwrap_or(false)
    }
}

/// Named pool of outbounds selected by regex over the current tag set.
///
/// Membership is recomputed on every call, so adding or removing outbounds
/// changes the pool without rebuilding the balancer.
#[derive(Debug)]
pub struct Balancer {
    tag: String,
    selectors: Vec<Selector>,
    fallback_tag: String,
    strategy: Strategy,
    cursor: AtomicUsize,
}

impl Balancer {
    pub fn compile(config: &BalancerConfig) -> Result<Self> {
        if config.tag.is_empty() {
            return Err(Error::config("balancer without tag"));
        }
        let selectors = config
            .selector
            .iter()
            .map(|s| {
                Selector::new(s).map_err(|e| {
                    Error::config(format!(
                        "balancer '{}': invalid selector '{}': {}",
                        config.tag, s, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let strategy = Strategy::parse(&config.strategy.kind)
            .map_err(|e| Error::config(format!("balancer '{}': {}", config.tag, e)))?;
        Ok(Self {
            tag: config.tag.clone(),
            selectors,
            fallback_tag: config.fallback_tag.clone(),
            strategy,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn fallback_tag(&self) -> &str {
        &self.fallback_tag
    }

    fn selects(&self, tag: &str) -> bool {
        self.selectors.iter().any(|re| re.is_match(tag))
    }

    /// Outbound tags matched by any selector, in the order given.
    pub fn candidates<'a>(&self, outbound_tags: &'a [String]) -> Vec<&'a str> {
        outbound_tags
            .iter()
            .map(String::as_str)
            .filter(|t| self.selects(t))
            .collect()
    }

    /// Pick an outbound from `outbound_tags`.
    ///
    /// Falls back to `fallbackTag` when no candidate is viable; fails with
    /// `NoViableOutbound` when the fallback is empty or not a known tag.
    pub fn resolve(&self, outbound_tags: &[String], health: &dyn HealthView) -> Result<Pick> {
        let viable = || {
            outbound_tags
                .iter()
                .filter(|t| self.selects(t) && health.is_viable(t))
        };
        let count = viable().count();
        if count == 0 {
            return self.fallback(outbound_tags);
        }

        let index = match self.strategy {
            Strategy::Random => rand::thread_rng().gen_range(0..count),
            Strategy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % count,
            Strategy::LeastPing | Strategy::LeastLoad => 0,
        };
        match viable().nth(index) {
            Some(tag) => Ok(Pick {
                tag: tag.clone(),
                strategy: self.strategy,
                deferred: self.strategy.is_deferred(),
                fallback: false,
            }),
            // HealthView changed its answer between the two passes
            None => self.fallback(outbound_tags),
        }
    }

    fn fallback(&self, outbound_tags: &[String]) -> Result<Pick> {
        if self.fallback_tag.is_empty() || !outbound_tags.iter().any(|t| *t == self.fallback_tag) {
            return Err(Error::NoViableOutbound(self.tag.clone()));
        }
        Ok(Pick {
            tag: self.fallback_tag.clone(),
            strategy: self.strategy,
            deferred: false,
            fallback: true,
        })
    }
}
