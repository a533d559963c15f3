use std::fmt;

use serde::{Deserialize, Serialize};

pub mod pricing;

pub use pricing::{PricingError, PricingRule, PricingTable, Quote, RateTier};

/// The fixed set of coding-agent tools whose logs are understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    ClaudeCode,
    CodexCli,
    #[serde(rename = "opencode")]
    OpenCode,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::ClaudeCode, Tool::CodexCli, Tool::OpenCode];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::ClaudeCode => "claude-code",
            Tool::CodexCli => "codex-cli",
            Tool::OpenCode => "opencode",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl TokenCounts {
    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_write_tokens)
    }

    /// Field-wise difference against an earlier cumulative snapshot.
    pub fn saturating_delta(&self, prev: &TokenCounts) -> TokenCounts {
        TokenCounts {
            input_tokens: self.input_tokens.saturating_sub(prev.input_tokens),
            output_tokens: self.output_tokens.saturating_sub(prev.output_tokens),
            cache_read_tokens: self.cache_read_tokens.saturating_sub(prev.cache_read_tokens),
            cache_write_tokens: self.cache_write_tokens.saturating_sub(prev.cache_write_tokens),
        }
    }
}

/// An unpriced token-usage record as parsed straight from a source log.
///
/// `id` is the source's own identity for the record (request or message
/// id), unique within its file; sources that carry none fall back to the
/// exact field tuple for deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub ts: String,
    pub model: String,
    pub tokens: TokenCounts,
    pub id: Option<String>,
}

/// A priced, normalized usage record as exposed to the presentation
/// layer. `cost_usd` is always recomputed from the model, the token
/// counts, and the pricing table; it is never read back from a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub timestamp: String,
    pub tool: Tool,
    pub model: String,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
    pub unpriced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_has_stable_string_form() {
        assert_eq!(Tool::ClaudeCode.as_str(), "claude-code");
        assert_eq!(Tool::CodexCli.to_string(), "codex-cli");
        let json = serde_json::to_string(&Tool::OpenCode).expect("serialize");
        assert_eq!(json, "\"opencode\"");
    }

    #[test]
    fn saturating_delta_handles_counter_reset() {
        let prev = TokenCounts {
            input_tokens: 100,
            output_tokens: 40,
            cache_read_tokens: 10,
            cache_write_tokens: 0,
        };
        let current = TokenCounts {
            input_tokens: 150,
            output_tokens: 60,
            cache_read_tokens: 5,
            cache_write_tokens: 0,
        };
        let delta = current.saturating_delta(&prev);
        assert_eq!(delta.input_tokens, 50);
        assert_eq!(delta.output_tokens, 20);
        assert_eq!(delta.cache_read_tokens, 0);
    }

    #[test]
    fn zero_counts_are_detected() {
        assert!(TokenCounts::default().is_zero());
        let counts = TokenCounts {
            cache_write_tokens: 1,
            ..TokenCounts::default()
        };
        assert!(!counts.is_zero());
        assert_eq!(counts.total(), 1);
    }
}
