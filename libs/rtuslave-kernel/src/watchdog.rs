//! Communication watchdog
//!
//! When enabled, the master is expected to read the timeout register
//! periodically; each read retriggers the deadline. A missed deadline raises
//! the lost alarm once; the next read clears it and reports the link as
//! reestablished. Both events fire exactly once per transition.

use tracing::{debug, warn};

use crate::timer::Deadline;

/// Alarm transitions reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    Lost,
    Reestablished,
}

/// Watchdog over the master's polling cadence.
#[derive(Debug, Clone)]
pub struct CommWatchdog {
    /// Timeout latched at boot; 0 means disabled
    timeout_ms: u16,
    deadline: Deadline,
    alarm_raised: bool,
}

impl CommWatchdog {
    /// Arm from the boot-time timeout. Values beyond the timer range are
    /// clamped.
    pub fn new(now_ms: u32, timeout_ms: u16) -> Self {
        let timeout_ms = if Deadline::is_valid_interval(timeout_ms as u32) {
            timeout_ms
        } else {
            warn!(
                "Watchdog timeout {}ms exceeds timer range, clamping to {}ms",
                timeout_ms,
                Deadline::MAX_INTERVAL_MS
            );
            Deadline::MAX_INTERVAL_MS
        };
        Self {
            timeout_ms,
            deadline: Deadline::after(now_ms, timeout_ms),
            alarm_raised: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.timeout_ms > 0
    }

    pub fn alarm_raised(&self) -> bool {
        self.alarm_raised
    }

    pub fn timeout_ms(&self) -> u16 {
        self.timeout_ms
    }

    /// Periodic evaluation; emits `Lost` on the first elapsed poll.
    pub fn poll(&mut self, now_ms: u32) -> Option<WatchdogEvent> {
        if !self.enabled() || self.alarm_raised || !self.deadline.check(now_ms) {
            return None;
        }
        self.alarm_raised = true;
        debug!("Communication lost, no poll within {}ms", self.timeout_ms);
        Some(WatchdogEvent::Lost)
    }

    /// The master read the timeout register: retrigger, and clear a pending
    /// alarm.
    pub fn feed(&mut self, now_ms: u32) -> Option<WatchdogEvent> {
        if !self.enabled() {
            return None;
        }
        self.deadline.set(now_ms, self.timeout_ms);
        if self.alarm_raised {
            self.alarm_raised = false;
            debug!("Communication reestablished");
            return Some(WatchdogEvent::Reestablished);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_watchdog_never_fires() {
        let mut watchdog = CommWatchdog::new(0, 0);
        assert!(!watchdog.enabled());
        for t in (0..100_000).step_by(10_000) {
            assert_eq!(watchdog.poll(t), None);
            assert_eq!(watchdog.feed(t), None);
        }
    }

    #[test]
    fn test_lost_fires_exactly_once() {
        let mut watchdog = CommWatchdog::new(0, 500);
        assert_eq!(watchdog.poll(499), None);
        assert_eq!(watchdog.poll(600), Some(WatchdogEvent::Lost));
        assert!(watchdog.alarm_raised());
        // No refire until a feed clears the alarm
        assert_eq!(watchdog.poll(700), None);
        assert_eq!(watchdog.poll(10_000), None);
    }

    #[test]
    fn test_feed_clears_alarm_once() {
        let mut watchdog = CommWatchdog::new(0, 500);
        assert_eq!(watchdog.poll(600), Some(WatchdogEvent::Lost));
        assert_eq!(watchdog.feed(650), Some(WatchdogEvent::Reestablished));
        // Alarm cleared, further feeds are plain retriggers
        assert_eq!(watchdog.feed(700), None);
        assert!(!watchdog.alarm_raised());
    }

    #[test]
    fn test_feed_retriggers_deadline() {
        let mut watchdog = CommWatchdog::new(0, 500);
        assert_eq!(watchdog.feed(400), None);
        // Old deadline (500) passed, but the feed moved it to 900
        assert_eq!(watchdog.poll(600), None);
        assert_eq!(watchdog.poll(900), Some(WatchdogEvent::Lost));
    }

    #[test]
    fn test_oversized_timeout_is_clamped() {
        let watchdog = CommWatchdog::new(0, 0xFFFF);
        assert_eq!(watchdog.timeout_ms(), Deadline::MAX_INTERVAL_MS);
        assert!(watchdog.enabled());
    }
}
