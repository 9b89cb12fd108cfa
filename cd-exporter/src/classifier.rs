//! Lifecycle state classification of raw job listings.
//!
//! This is plain substring counting over whatever text the node returned, not
//! a parse of the listing format. Dashboards were built on the numbers this
//! produces, so the counting rule must not get any smarter.

use crate::domain::LifecycleState;

/// Per-state counts from one classified listing, in configured state order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateCounts {
    counts: Vec<(LifecycleState, u64)>,
}

impl StateCounts {
    /// All-zero counts for the given states.
    pub fn zeroed(states: &[LifecycleState]) -> Self {
        Self {
            counts: states.iter().map(|s| (s.clone(), 0)).collect(),
        }
    }

    /// Count for a state, `None` if the state was not classified.
    pub fn get(&self, state: &LifecycleState) -> Option<u64> {
        self.counts
            .iter()
            .find(|(s, _)| s == state)
            .map(|(_, count)| *count)
    }

    /// Count looked up by token.
    pub fn get_token(&self, token: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|(s, _)| s.token() == token)
            .map(|(_, count)| *count)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LifecycleState, u64)> {
        self.counts.iter().map(|(s, c)| (s, *c))
    }

    /// Sum over all states.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(_, c)| c).sum()
    }
}

impl std::fmt::Display for StateCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (state, count) in &self.counts {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", state, count)?;
            first = false;
        }
        Ok(())
    }
}

/// Count non-overlapping, left-to-right occurrences of `token` in `output`.
///
/// After each match the cursor skips the whole match, so `"AAAA"` holds two
/// `"AA"`, not three. An empty token matches nothing.
pub fn count_occurrences(output: &str, token: &str) -> u64 {
    if token.is_empty() {
        return 0;
    }

    let mut count = 0;
    let mut cursor = 0;
    while let Some(pos) = output[cursor..].find(token) {
        count += 1;
        cursor += pos + token.len();
    }
    count
}

/// Classify a raw listing into one count per state.
pub fn classify(output: &str, states: &[LifecycleState]) -> StateCounts {
    StateCounts {
        counts: states
            .iter()
            .map(|state| (state.clone(), count_occurrences(output, state.token())))
            .collect(),
    }
}
