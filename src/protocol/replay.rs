//! EAPOL-Key replay counter tracking
//!
//! The authenticator owns the outbound counter. Every frame it sends carries
//! a fresh value, and exactly that value may be echoed back once. Supplicant
//! requests carry their own counter, which must strictly increase.

/// Authenticator-side key replay counter
#[derive(Debug, Clone, Default)]
pub struct KeyReplayCounter {
    /// Value carried by the last frame sent
    counter: u64,
    /// Whether a response to `counter` is still acceptable
    valid: bool,
}

impl KeyReplayCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance for a new outgoing frame and return the value to send
    pub fn next(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        self.valid = true;
        self.counter
    }

    /// Check whether a received (non-request) frame answers the last frame
    /// sent
    pub fn matches(&self, received: u64) -> bool {
        self.valid && received == self.counter
    }

    /// Consume the current value once a response has been accepted
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Restart at zero (station re-association)
    pub fn reset(&mut self) {
        self.counter = 0;
        self.valid = false;
    }

    pub fn current(&self) -> u64 {
        self.counter
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Replay protection for supplicant-originated EAPOL-Key requests
#[derive(Debug, Clone, Default)]
pub struct RequestReplay {
    /// Highest counter accepted since the last PMK change
    last: Option<u64>,
}

impl RequestReplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request is fresh when no request has been accepted yet or its
    /// counter is strictly greater than the last one
    pub fn is_fresh(&self, counter: u64) -> bool {
        match self.last {
            Some(last) => counter > last,
            None => true,
        }
    }

    pub fn record(&mut self, counter: u64) {
        self.last = Some(counter);
    }

    /// Forget the last request counter (new PMK)
    pub fn clear(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_counter_accepts_only_last_value() {
        let mut rc = KeyReplayCounter::new();
        assert!(!rc.matches(0));

        let first = rc.next();
        assert_eq!(first, 1);
        assert!(rc.matches(1));

        let second = rc.next();
        assert_eq!(second, 2);
        assert!(!rc.matches(1));
        assert!(rc.matches(2));
    }

    #[test]
    fn test_counter_single_use() {
        let mut rc = KeyReplayCounter::new();
        let v = rc.next();
        rc.invalidate();
        assert!(!rc.matches(v));
    }

    #[test]
    fn test_counter_reset() {
        let mut rc = KeyReplayCounter::new();
        rc.next();
        rc.next();
        rc.reset();
        assert_eq!(rc.current(), 0);
        assert!(!rc.is_valid());
        assert_eq!(rc.next(), 1);
    }

    #[test]
    fn test_request_strictly_increasing() {
        let mut rr = RequestReplay::new();
        assert!(rr.is_fresh(0));
        rr.record(5);
        assert!(!rr.is_fresh(5));
        assert!(!rr.is_fresh(4));
        assert!(rr.is_fresh(6));
        rr.clear();
        assert!(rr.is_fresh(1));
    }

    proptest! {
        #[test]
        fn prop_accepted_requests_strictly_increase(counters in proptest::collection::vec(any::<u64>(), 0..64)) {
            let mut rr = RequestReplay::new();
            let mut accepted = Vec::new();
            for c in counters {
                if rr.is_fresh(c) {
                    rr.record(c);
                    accepted.push(c);
                }
            }
            prop_assert!(accepted.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
