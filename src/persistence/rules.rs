//! Save Rules
//!
//! A save rule is a `(seconds, changes)` pair using the grammar of the Redis
//! `save` directive: `"900 1 300 10"` means "save after 900 seconds if at
//! least 1 key changed, or after 300 seconds if at least 10 keys changed".

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Longest delay between two rule checks.
pub const MAX_CHECK_DELAY: Duration = Duration::from_secs(60);

/// Shortest delay between two rule checks.
pub const MIN_CHECK_DELAY: Duration = Duration::from_millis(1);

/// Errors that can occur while parsing save rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// Rules come in `seconds changes` pairs
    #[error("save rules need an even number of values, got {0}")]
    OddTokenCount(usize),

    /// A value is not a positive integer
    #[error("invalid save rule value '{0}': expected a positive integer")]
    InvalidValue(String),
}

/// Save after `seconds` have elapsed if at least `changes` writes happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRule {
    pub seconds: u64,
    pub changes: u64,
}

impl SaveRule {
    pub fn new(seconds: u64, changes: u64) -> Self {
        Self { seconds, changes }
    }

    /// Parses a rule string, disabling snapshots instead of failing.
    ///
    /// A malformed string is logged and yields no rules at all.
    pub fn from_config(rules: &str) -> Vec<SaveRule> {
        match parse_save_rules(rules) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(rules, error = %e, "Invalid save rules, snapshots disabled");
                Vec::new()
            }
        }
    }

    /// Whether this rule is satisfied.
    pub fn is_met(&self, dirty: u64, elapsed: Duration) -> bool {
        dirty >= self.changes && elapsed >= self.period()
    }

    fn period(&self) -> Duration {
        Duration::from_secs(self.seconds)
    }
}

impl fmt::Display for SaveRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seconds, self.changes)
    }
}

/// Parses whitespace separated `seconds changes` pairs.
///
/// All or nothing: one bad value rejects the whole string. An empty string
/// is a valid, empty rule set.
pub fn parse_save_rules(text: &str) -> Result<Vec<SaveRule>, RuleError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() % 2 != 0 {
        return Err(RuleError::OddTokenCount(tokens.len()));
    }

    tokens
        .chunks_exact(2)
        .map(|pair| -> Result<SaveRule, RuleError> {
            Ok(SaveRule::new(parse_positive(pair[0])?, parse_positive(pair[1])?))
        })
        .collect()
}

/// Formats rules back into the configuration grammar.
pub fn format_save_rules(rules: &[SaveRule]) -> String {
    rules
        .iter()
        .map(SaveRule::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_positive(token: &str) -> Result<u64, RuleError> {
    match token.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(RuleError::InvalidValue(token.to_string())),
    }
}

/// Outcome of one rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveDecision {
    /// A rule is satisfied
    SaveNow,
    /// Nothing to do yet; check again after this delay
    CheckIn(Duration),
}

/// Decides whether to save given `dirty` writes and `elapsed` time since the
/// last save.
///
/// When no rule is met yet, the next check is scheduled for the earliest
/// moment a rule whose write threshold is already reached would become due.
/// If no write threshold is reached, the check falls back to the shortest
/// rule period. Delays stay within [`MIN_CHECK_DELAY`] and
/// [`MAX_CHECK_DELAY`].
pub fn evaluate(rules: &[SaveRule], dirty: u64, elapsed: Duration) -> SaveDecision {
    if rules.iter().any(|rule| rule.is_met(dirty, elapsed)) {
        return SaveDecision::SaveNow;
    }

    let wait = rules
        .iter()
        .filter(|rule| dirty >= rule.changes)
        .map(|rule| rule.period().saturating_sub(elapsed))
        .min()
        .or_else(|| rules.iter().map(SaveRule::period).min())
        .unwrap_or(MAX_CHECK_DELAY);

    SaveDecision::CheckIn(wait.clamp(MIN_CHECK_DELAY, MAX_CHECK_DELAY))
}
