//! Per-symbol alert cooldown with an injectable clock

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_COOLDOWN_SECS: i64 = 1800;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replays
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Remembers when each key last alerted; a key may alert again once `ttl` has passed.
pub struct Cooldown<C: Clock = SystemClock> {
    clock: C,
    ttl: Duration,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Cooldown<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }

    /// From a std duration; out-of-range values fall back to the default TTL
    pub fn from_std(ttl: std::time::Duration) -> Self {
        Self::new(Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(DEFAULT_COOLDOWN_SECS)))
    }
}

impl<C: Clock> Cooldown<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            clock,
            ttl,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn should_alert(&self, key: &str) -> bool {
        let now = self.clock.now();
        match self.last_sent.lock().get(key) {
            Some(sent) => now - *sent >= self.ttl,
            None => true,
        }
    }

    pub fn record(&self, key: &str) {
        let now = self.clock.now();
        self.last_sent.lock().insert(key.to_string(), now);
    }

    pub fn remaining_secs(&self, key: &str) -> i64 {
        let now = self.clock.now();
        self.last_sent
            .lock()
            .get(key)
            .map(|sent| (self.ttl - (now - *sent)).num_seconds().max(0))
            .unwrap_or(0)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut map = self.last_sent.lock();
        let before = map.len();
        map.retain(|_, sent| now - *sent < self.ttl);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.last_sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cooldown() -> (Cooldown<ManualClock>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let cd = Cooldown::with_clock(Duration::seconds(DEFAULT_COOLDOWN_SECS), clock.clone());
        (cd, clock)
    }

    #[test]
    fn test_blocks_until_ttl_expires() {
        let (cd, clock) = cooldown();
        assert!(cd.should_alert("BTC"));
        cd.record("BTC");
        assert!(!cd.should_alert("BTC"));
        assert!(cd.should_alert("ETH"));

        clock.advance(Duration::seconds(1799));
        assert!(!cd.should_alert("BTC"));
        assert_eq!(cd.remaining_secs("BTC"), 1);

        clock.advance(Duration::seconds(1));
        assert!(cd.should_alert("BTC"));
        assert_eq!(cd.remaining_secs("BTC"), 0);
    }

    #[test]
    fn test_prune_expired() {
        let (cd, clock) = cooldown();
        cd.record("BTC");
        clock.advance(Duration::minutes(20));
        cd.record("ETH");
        clock.advance(Duration::minutes(15));

        assert_eq!(cd.prune(), 1);
        assert_eq!(cd.len(), 1);
        assert!(!cd.should_alert("ETH"));
    }
}
