use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::outbound::Outbound;
use super::types::Config;

/// A named config document, optionally fed by a subscription URL.
///
/// `subscription_proxy_names` lists the outbound tags the last subscription
/// import put into `config`; the next import replaces exactly those, so
/// profiles never step on each other's or the user's outbounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub subscription_proxy_names: Vec<String>,
    pub config: Config,
    /// Unix seconds.
    pub created_at: u64,
    pub updated_at: u64,
}

/// What an [`apply_subscription`](Profile::apply_subscription) changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionMerge {
    pub removed: usize,
    pub added: usize,
    /// `(original, assigned)` for imported tags that collided.
    pub renamed: Vec<(String, String)>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Profile {
    /// New profile on top of [`Config::preset`].
    pub fn new(name: &str, url: &str) -> Self {
        let now = now_secs();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            url: url.to_string(),
            subscription_proxy_names: Vec::new(),
            config: Config::preset(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_subscription(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Swap the previously imported outbounds for `outbounds`.
    ///
    /// Imported tags that clash with an outbound still in the document (or
    /// with an earlier import in the same batch) get a `-2`, `-3`, ... suffix.
    pub fn apply_subscription(&mut self, outbounds: Vec<Outbound>) -> SubscriptionMerge {
        let previous: HashSet<&str> = self
            .subscription_proxy_names
            .iter()
            .map(String::as_str)
            .collect();
        let before = self.config.outbounds.len();
        self.config
            .outbounds
            .retain(|o| !previous.contains(o.tag.as_str()));
        let mut merge = SubscriptionMerge {
            removed: before - self.config.outbounds.len(),
            ..Default::default()
        };

        let mut taken: HashSet<String> =
            self.config.outbounds.iter().map(|o| o.tag.clone()).collect();
        let mut names = Vec::with_capacity(outbounds.len());
        for mut ob in outbounds {
            if taken.contains(&ob.tag) {
                let renamed = (2..)
                    .map(|n| format!("{}-{}", ob.tag, n))
                    .find(|t| !taken.contains(t))
                    .unwrap_or_default();
                merge.renamed.push((ob.tag.clone(), renamed.clone()));
                ob.tag = renamed;
            }
            taken.insert(ob.tag.clone());
            names.push(ob.tag.clone());
            self.config.outbounds.push(ob);
        }
        merge.added = names.len();
        self.subscription_proxy_names = names;
        self.updated_at = now_secs();

        info!(
            profile = %self.name,
            removed = merge.removed,
            added = merge.added,
            renamed = merge.renamed.len(),
            "subscription applied"
        );
        merge
    }

    /// Outbounds that came from the subscription.
    pub fn subscription_outbounds(&self) -> impl Iterator<Item = &Outbound> {
        self.config
            .outbounds
            .iter()
            .filter(|o| self.subscription_proxy_names.contains(&o.tag))
    }
}
