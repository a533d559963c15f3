//! Per-model, per-tier pricing and the pure cost computation.
//!
//! A rule's tiers are ordered ascending by threshold; the tier whose
//! threshold is the highest one not exceeding a request's `input_tokens`
//! prices the entire request. Crossing a boundary is a switch, not a
//! marginal blend: every token of the request, including cache reads and
//! writes, is billed at the selected tier's rates.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TokenCounts;

/// Context size at which Claude models switch to long-context rates.
pub const LONG_CONTEXT_THRESHOLD: u64 = 200_000;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("failed to read pricing table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid pricing table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("pricing rule '{0}' has no tiers")]
    EmptyRule(String),
}

/// One pricing bracket. Rates are USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateTier {
    #[serde(default)]
    pub threshold_tokens: u64,
    pub input_per_1m: f64,
    pub output_per_1m: f64,
    #[serde(default)]
    pub cache_read_per_1m: f64,
    #[serde(default)]
    pub cache_write_per_1m: f64,
}

/// Rates for one model, or for a model family when the pattern ends in
/// `*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub model_pattern: String,
    pub tiers: Vec<RateTier>,
}

impl PricingRule {
    fn active_tier(&self, input_tokens: u64) -> Option<&RateTier> {
        self.tiers
            .iter()
            .rev()
            .find(|tier| tier.threshold_tokens <= input_tokens)
            .or_else(|| self.tiers.first())
    }
}

/// Outcome of pricing one request. `priced` is false when no rule
/// matched; the cost is then exactly zero and the caller is expected to
/// flag the record rather than drop it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub cost_usd: f64,
    pub priced: bool,
}

impl Quote {
    const UNPRICED: Quote = Quote {
        cost_usd: 0.0,
        priced: false,
    };
}

/// Read-only mapping from model identifier to tiered rates. Shared by
/// all scans; reloadable independently of scan lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    rules: Vec<PricingRule>,
}

impl PricingTable {
    pub fn new(mut rules: Vec<PricingRule>) -> Result<Self, PricingError> {
        for rule in &mut rules {
            if rule.tiers.is_empty() {
                return Err(PricingError::EmptyRule(rule.model_pattern.clone()));
            }
            rule.tiers.sort_by_key(|tier| tier.threshold_tokens);
        }
        Ok(Self { rules })
    }

    pub fn load(path: &Path) -> Result<Self, PricingError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, PricingError> {
        let table: PricingTable = serde_json::from_str(data)?;
        Self::new(table.rules)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Exact match wins over family patterns; among matching family
    /// patterns, the longest prefix wins. Matching is case-insensitive.
    pub fn find(&self, model: &str) -> Option<&PricingRule> {
        let model = model.to_ascii_lowercase();
        if let Some(rule) = self.rules.iter().find(|rule| {
            !rule.model_pattern.ends_with('*')
                && rule.model_pattern.eq_ignore_ascii_case(&model)
        }) {
            return Some(rule);
        }
        self.rules
            .iter()
            .filter_map(|rule| {
                let pattern = rule.model_pattern.to_ascii_lowercase();
                let prefix = pattern.strip_suffix('*')?.to_string();
                model.starts_with(&prefix).then_some((prefix.len(), rule))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, rule)| rule)
    }

    /// Pure: no I/O, no rounding beyond the rate precision itself.
    pub fn quote(&self, model: &str, tokens: TokenCounts) -> Quote {
        let Some(rule) = self.find(model) else {
            return Quote::UNPRICED;
        };
        let Some(tier) = rule.active_tier(tokens.input_tokens) else {
            return Quote::UNPRICED;
        };
        let cost = tokens.input_tokens as f64 * tier.input_per_1m
            + tokens.output_tokens as f64 * tier.output_per_1m
            + tokens.cache_read_tokens as f64 * tier.cache_read_per_1m
            + tokens.cache_write_tokens as f64 * tier.cache_write_per_1m;
        Quote {
            cost_usd: cost / 1_000_000.0,
            priced: true,
        }
    }

    /// Default rates for the model families the three tools report,
    /// including the Claude long-context tier.
    pub fn builtin() -> Self {
        let flat = |pattern: &str, input: f64, output: f64, read: f64, write: f64| PricingRule {
            model_pattern: pattern.to_string(),
            tiers: vec![RateTier {
                threshold_tokens: 0,
                input_per_1m: input,
                output_per_1m: output,
                cache_read_per_1m: read,
                cache_write_per_1m: write,
            }],
        };
        let rules = vec![
            flat("claude-opus-4*", 15.0, 75.0, 1.5, 18.75),
            PricingRule {
                model_pattern: "claude-sonnet-4*".to_string(),
                tiers: vec![
                    RateTier {
                        threshold_tokens: 0,
                        input_per_1m: 3.0,
                        output_per_1m: 15.0,
                        cache_read_per_1m: 0.3,
                        cache_write_per_1m: 3.75,
                    },
                    RateTier {
                        threshold_tokens: LONG_CONTEXT_THRESHOLD,
                        input_per_1m: 6.0,
                        output_per_1m: 22.5,
                        cache_read_per_1m: 0.6,
                        cache_write_per_1m: 7.5,
                    },
                ],
            },
            flat("claude-3-7-sonnet*", 3.0, 15.0, 0.3, 3.75),
            flat("claude-haiku-4*", 1.0, 5.0, 0.1, 1.25),
            flat("claude-3-5-haiku*", 0.8, 4.0, 0.08, 1.0),
            flat("gpt-5-mini*", 0.25, 2.0, 0.025, 0.0),
            flat("gpt-5-nano*", 0.05, 0.4, 0.005, 0.0),
            flat("gpt-5*", 1.25, 10.0, 0.125, 0.0),
            flat("gpt-4.1-mini*", 0.4, 1.6, 0.1, 0.0),
            flat("gpt-4.1*", 2.0, 8.0, 0.5, 0.0),
            flat("gpt-4o*", 2.5, 10.0, 1.25, 0.0),
        ];
        Self { rules }
    }
}
