use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Commands that must not be re-sent when the ground link delivers a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Guarded {
    Takeoff,
    Land,
}

#[derive(Debug)]
pub struct CommandRateLimit {
    last: HashMap<Guarded, Instant>,
    min_interval: Duration,
}

impl CommandRateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: HashMap::new(), min_interval }
    }

    pub fn allow(&mut self, what: Guarded) -> bool {
        self.allow_at(what, Instant::now())
    }

    fn allow_at(&mut self, what: Guarded, now: Instant) -> bool {
        if let Some(t) = self.last.get(&what) {
            if now.duration_since(*t) < self.min_interval {
                return false;
            }
        }
        self.last.insert(what, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_interval_is_refused() {
        let mut rl = CommandRateLimit::new(Duration::from_secs(2));
        let t0 = Instant::now();
        assert!(rl.allow_at(Guarded::Takeoff, t0));
        assert!(!rl.allow_at(Guarded::Takeoff, t0 + Duration::from_millis(500)));
        // kinds are tracked separately
        assert!(rl.allow_at(Guarded::Land, t0 + Duration::from_millis(600)));
        assert!(rl.allow_at(Guarded::Takeoff, t0 + Duration::from_secs(3)));
    }
}
