//! Invalidation Engine
//!
//! Matches entries by key pattern or tag set. Matching is read-only: the
//! engine scans tiers and hands `(tier, key, generation)` triples back to the
//! manager, which performs the removals or TTL updates.
//!
//! Registered rules are evaluated only when explicitly applied.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use super::tier::Tier;
use crate::config::duration_str;
use crate::error::Result;

// =============================================================================
// Matchers
// =============================================================================

/// Compiled matcher over entries
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    /// Regular expression over keys
    Pattern(Regex),
    /// Entries carrying any of these tags
    Tags(BTreeSet<String>),
}

impl KeyMatcher {
    /// Compile a key pattern once for a whole scan
    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(KeyMatcher::Pattern(Regex::new(pattern)?))
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyMatcher::Tags(tags.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, entry: &CacheEntry) -> bool {
        match self {
            KeyMatcher::Pattern(regex) => regex.is_match(entry.key()),
            KeyMatcher::Tags(tags) => entry.has_any_tag(tags),
        }
    }
}

/// Serializable form of a matcher, as stored in rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMatcher {
    Pattern(String),
    Tags(Vec<String>),
}

impl RuleMatcher {
    pub fn compile(&self) -> Result<KeyMatcher> {
        match self {
            RuleMatcher::Pattern(pattern) => KeyMatcher::pattern(pattern),
            RuleMatcher::Tags(tags) => Ok(KeyMatcher::tags(tags.iter().cloned())),
        }
    }
}

// =============================================================================
// Rules
// =============================================================================

/// What a rule does to the entries it matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Drop the entry
    Remove,
    /// Restart the entry's TTL clock
    RefreshTtl,
    /// Lengthen the entry's effective TTL
    ExtendTtl(#[serde(with = "duration_str")] Duration),
}

impl RuleAction {
    /// Replacement entry for TTL actions; `None` means remove
    pub fn rewrite(
        &self,
        entry: &CacheEntry,
        now: u64,
        ttl_default: Option<Duration>,
    ) -> Option<CacheEntry> {
        match self {
            RuleAction::Remove => None,
            RuleAction::RefreshTtl => Some(entry.refreshed(now)),
            RuleAction::ExtendTtl(extra) => {
                // Entries without any TTL never expire; extending is a no-op
                let ttl = entry.ttl().or(ttl_default).map(|ttl| ttl.saturating_add(*extra));
                Some(entry.with_ttl(ttl))
            }
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

/// On-demand invalidation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRule {
    pub id: String,
    pub matcher: RuleMatcher,
    pub action: RuleAction,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl InvalidationRule {
    /// Enabled rule removing matching entries
    pub fn new(id: impl Into<String>, matcher: RuleMatcher) -> Self {
        Self {
            id: id.into(),
            matcher,
            action: RuleAction::Remove,
            enabled: true,
        }
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.action = action;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// An entry selected by a matcher
#[derive(Debug, Clone)]
pub struct MatchedEntry {
    /// Position of the tier in the manager's (fastest first) order
    pub tier: usize,
    pub entry: CacheEntry,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: InvalidationRule,
    matcher: KeyMatcher,
}

/// Rule registry plus the matching scan
#[derive(Debug, Default)]
pub struct InvalidationEngine {
    rules: RwLock<BTreeMap<String, CompiledRule>>,
}

impl InvalidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, replacing any rule with the same id.
    /// The matcher is compiled here so bad patterns fail at registration.
    pub fn add_rule(&self, rule: InvalidationRule) -> Result<()> {
        let matcher = rule.matcher.compile()?;
        self.rules
            .write()
            .insert(rule.id.clone(), CompiledRule { rule, matcher });
        Ok(())
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        self.rules.write().remove(id).is_some()
    }

    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.rules.write().get_mut(id) {
            Some(compiled) => {
                compiled.rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Registered rules in id order
    pub fn rules(&self) -> Vec<InvalidationRule> {
        self.rules
            .read()
            .values()
            .map(|compiled| compiled.rule.clone())
            .collect()
    }

    /// Matcher and action of an enabled rule
    pub fn enabled_rule(&self, id: &str) -> Option<(KeyMatcher, RuleAction)> {
        self.rules
            .read()
            .get(id)
            .filter(|compiled| compiled.rule.enabled)
            .map(|compiled| (compiled.matcher.clone(), compiled.rule.action))
    }

    /// Ids of every enabled rule, in id order
    pub fn enabled_ids(&self) -> Vec<String> {
        self.rules
            .read()
            .values()
            .filter(|compiled| compiled.rule.enabled)
            .map(|compiled| compiled.rule.id.clone())
            .collect()
    }

    /// Scan every tier and collect matching entries.
    ///
    /// Each tier's key set is captured when its scan starts, so anything
    /// written before the call is considered.
    pub fn collect_matches(&self, tiers: &[Tier], matcher: &KeyMatcher) -> Result<Vec<MatchedEntry>> {
        let mut matched = Vec::new();
        for (position, tier) in tiers.iter().enumerate() {
            for entry in tier.scan()? {
                let entry = entry?;
                if matcher.matches(&entry) {
                    matched.push(MatchedEntry {
                        tier: position,
                        entry,
                    });
                }
            }
        }
        Ok(matched)
    }
}
