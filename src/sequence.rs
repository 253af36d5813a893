//! Per-field request sequencing
//!
//! In-flight backend calls cannot be cancelled. Each call instead carries a
//! token; only the most recently issued token may apply its response.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestSequence {
    latest: u64,
    outstanding: bool,
}

impl RequestSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new token; every earlier token becomes stale.
    pub fn issue(&mut self) -> RequestToken {
        self.latest += 1;
        self.outstanding = true;
        RequestToken(self.latest)
    }

    /// Makes every issued token stale without issuing a new one.
    pub fn invalidate(&mut self) {
        self.latest += 1;
        self.outstanding = false;
    }

    pub fn is_latest(&self, token: RequestToken) -> bool {
        self.outstanding && token.0 == self.latest
    }

    /// Settles the latest request. Returns false for stale tokens, which must
    /// be discarded by the caller.
    pub fn settle(&mut self, token: RequestToken) -> bool {
        if !self.is_latest(token) {
            return false;
        }
        self.outstanding = false;
        true
    }

    /// Whether the latest issued request has not settled yet.
    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_latest_token_settles() {
        let mut sequence = RequestSequence::new();
        let first = sequence.issue();
        let second = sequence.issue();

        assert!(!sequence.settle(first));
        assert!(sequence.is_outstanding());
        assert!(sequence.settle(second));
        assert!(!sequence.is_outstanding());
    }

    #[test]
    fn a_token_settles_once() {
        let mut sequence = RequestSequence::new();
        let token = sequence.issue();
        assert!(sequence.settle(token));
        assert!(!sequence.settle(token));
    }

    #[test]
    fn invalidate_discards_pending_work() {
        let mut sequence = RequestSequence::new();
        let token = sequence.issue();
        sequence.invalidate();
        assert!(!sequence.settle(token));
        assert!(!sequence.is_outstanding());

        let next = sequence.issue();
        assert!(next > token);
        assert!(sequence.settle(next));
    }
}
