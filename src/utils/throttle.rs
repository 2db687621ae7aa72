//! Log throttling
//!
//! Capture backends fail in bursts (unplugged camera, stalled stream), and
//! a pacer at 30 fps would otherwise emit a warning per tick.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Limits how often the same keyed message is logged
///
/// ```rust
/// use poolcam::utils::LogThrottler;
///
/// let throttler = LogThrottler::with_secs(5);
/// assert!(throttler.should_log("session-1:read"));
/// assert!(!throttler.should_log("session-1:read"));
/// ```
pub struct LogThrottler {
    last_logged: Mutex<HashMap<String, (Instant, u64)>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` may be logged now.
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Like [`should_log`](Self::should_log), but returns how many messages
    /// were suppressed since the last one that got through.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut map = self.last_logged.lock();

        match map.get_mut(key) {
            Some((last, suppressed)) if now.duration_since(*last) < self.interval => {
                *suppressed = suppressed.saturating_add(1);
                None
            }
            Some(entry) => {
                let suppressed = entry.1;
                *entry = (now, 0);
                Some(suppressed)
            }
            None => {
                map.insert(key.to_string(), (now, 0));
                Some(0)
            }
        }
    }

    /// Forget a key, e.g. once the failing source recovers
    pub fn clear(&self, key: &str) {
        self.last_logged.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.last_logged.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled warning
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            tracing::warn!(suppressed, $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_call_logs() {
        let throttler = LogThrottler::with_secs(1);
        assert_eq!(throttler.check("k"), Some(0));
    }

    #[test]
    fn test_suppressed_count_reported() {
        let throttler = LogThrottler::new(Duration::from_millis(50));

        assert!(throttler.should_log("k"));
        assert!(!throttler.should_log("k"));
        assert!(!throttler.should_log("k"));

        thread::sleep(Duration::from_millis(80));
        assert_eq!(throttler.check("k"), Some(2));
    }

    #[test]
    fn test_keys_independent_and_clear() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("a"));
        assert!(throttler.should_log("b"));
        assert!(!throttler.should_log("a"));
        assert_eq!(throttler.len(), 2);

        throttler.clear("a");
        assert!(throttler.should_log("a"));
        assert!(!throttler.is_empty());
    }
}
