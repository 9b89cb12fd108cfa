//! Lifecycle states a Connect:Direct process can be reported in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tokens counted when no `--states` override is given.
pub const DEFAULT_STATE_TOKENS: [&str; 4] = ["HOLD", "WAIT", "TIMER", "EXEC"];

/// A lifecycle state, identified by the literal token the remote node prints
/// for it (e.g. `HOLD`).
///
/// The set is open: any token whose lowercased form is usable inside a
/// metric name is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LifecycleState {
    token: String,
}

impl LifecycleState {
    /// Create a state from its token, validating it.
    pub fn new(token: impl Into<String>) -> Result<Self, InvalidStateToken> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(InvalidStateToken(token));
        }
        let metric_safe = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !metric_safe {
            return Err(InvalidStateToken(token));
        }
        Ok(Self {
            token: trimmed.to_string(),
        })
    }

    /// The literal token searched for in raw output.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Lowercased token, as used in metric names.
    pub fn metric_key(&self) -> String {
        self.token.to_ascii_lowercase()
    }

    /// The default `HOLD`, `WAIT`, `TIMER`, `EXEC` set.
    pub fn defaults() -> Vec<Self> {
        DEFAULT_STATE_TOKENS
            .iter()
            .map(|t| Self {
                token: (*t).to_string(),
            })
            .collect()
    }

    /// Parse a comma-separated token list, dropping duplicates but keeping
    /// first-seen order.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, InvalidStateToken> {
        let mut states: Vec<Self> = Vec::new();
        for raw in list.split(',') {
            let state = Self::new(raw)?;
            if !states.contains(&state) {
                states.push(state);
            }
        }
        Ok(states)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

impl FromStr for LifecycleState {
    type Err = InvalidStateToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for LifecycleState {
    type Error = InvalidStateToken;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LifecycleState> for String {
    fn from(state: LifecycleState) -> Self {
        state.token
    }
}

/// A state token that cannot be used as a metric name component.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid lifecycle state token {0:?}: expected non-empty [A-Za-z0-9_]")]
pub struct InvalidStateToken(pub String);
