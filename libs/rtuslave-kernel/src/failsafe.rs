//! Failsafe coil pulsing
//!
//! Latching actuators stay energized only while they are pulsed. The driver
//! generates a square wave over a mask of coils: `phase = true` for the on
//! time, `phase = false` for the off time, anchored with [`Deadline::next`]
//! so the cadence does not drift with poll jitter. The application forwards
//! each pulse to the hardware pins of masked coils and keeps its logical
//! coil states out of it; if the kernel (or the whole slave) stalls, the
//! pulsing stops and the load de-energizes within one period.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::timer::Deadline;

/// Runtime pulse configuration, typically read by the application from its
/// own holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailsafeConfig {
    /// Bit i set: coil i is pulsed by this driver
    pub mask: u16,
    /// Coil states to assume on power-up
    pub safe_state: u16,
    /// Phase-high duration in ms
    pub on_ms: u16,
    /// Phase-low duration in ms
    pub off_ms: u16,
}

/// One edge of the pulse train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailsafePulse {
    pub phase: bool,
    pub mask: u16,
    pub safe_state: u16,
}

/// Cyclic pulse generator for masked coils.
#[derive(Debug, Clone, Default)]
pub struct FailsafeDriver {
    config: Option<FailsafeConfig>,
    phase: bool,
    deadline: Deadline,
}

impl FailsafeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the driver. A zero mask or zero on-time disables it.
    pub fn enable(&mut self, now_ms: u32, config: FailsafeConfig) {
        if config.mask == 0 || config.on_ms == 0 {
            debug!("Failsafe pulsing disabled");
            self.config = None;
            return;
        }
        if !Deadline::is_valid_interval(config.on_ms as u32)
            || !Deadline::is_valid_interval(config.off_ms as u32)
        {
            warn!(
                "Failsafe pulse times {}/{}ms exceed timer range, driver disabled",
                config.on_ms, config.off_ms
            );
            self.config = None;
            return;
        }
        debug!(
            "Failsafe pulsing enabled: mask={:04X}, on={}ms, off={}ms",
            config.mask, config.on_ms, config.off_ms
        );
        self.config = Some(config);
        // First poll emits the rising edge immediately
        self.phase = false;
        self.deadline = Deadline::elapsed_at(now_ms);
    }

    pub fn disable(&mut self) {
        self.config = None;
    }

    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Mask of coils currently owned by the pulse path.
    pub fn mask(&self) -> u16 {
        self.config.map(|c| c.mask).unwrap_or(0)
    }

    /// Advance the pulse train; emits an edge when its time has come.
    pub fn poll(&mut self, now_ms: u32) -> Option<FailsafePulse> {
        let config = self.config?;
        if !self.deadline.check(now_ms) {
            return None;
        }
        self.phase = !self.phase;
        // Anchor the next edge to this one, not to the poll instant
        self.deadline
            .next(if self.phase { config.on_ms } else { config.off_ms });
        Some(FailsafePulse {
            phase: self.phase,
            mask: config.mask,
            safe_state: config.safe_state,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const CONFIG: FailsafeConfig = FailsafeConfig {
        mask: 0b0011,
        safe_state: 0,
        on_ms: 100,
        off_ms: 50,
    };

    #[test]
    fn test_disabled_driver_is_silent() {
        let mut driver = FailsafeDriver::new();
        assert!(!driver.enabled());
        assert_eq!(driver.poll(1_000), None);
        assert_eq!(driver.mask(), 0);
    }

    #[test]
    fn test_pulse_train_edges() {
        let mut driver = FailsafeDriver::new();
        driver.enable(0, CONFIG);
        assert_eq!(driver.mask(), 0b0011);

        // Rising edge right away
        let pulse = driver.poll(0).unwrap();
        assert!(pulse.phase);
        assert_eq!(pulse.mask, 0b0011);

        // Nothing during the on time
        assert_eq!(driver.poll(99), None);

        // Falling edge after on_ms
        let pulse = driver.poll(100).unwrap();
        assert!(!pulse.phase);

        // Rising edge after off_ms
        let pulse = driver.poll(150).unwrap();
        assert!(pulse.phase);
    }

    #[test]
    fn test_cadence_does_not_drift_with_late_polls() {
        let mut driver = FailsafeDriver::new();
        driver.enable(0, CONFIG);
        driver.poll(0).unwrap();

        // Poll 30ms late: falling edge emitted, but the next rising edge is
        // still anchored at 150
        assert!(driver.poll(130).is_some());
        assert_eq!(driver.poll(149), None);
        assert!(driver.poll(150).is_some());
    }

    #[test]
    fn test_zero_mask_disables() {
        let mut driver = FailsafeDriver::new();
        driver.enable(0, FailsafeConfig { mask: 0, ..CONFIG });
        assert!(!driver.enabled());
    }

    #[test]
    fn test_oversized_times_disable() {
        let mut driver = FailsafeDriver::new();
        driver.enable(
            0,
            FailsafeConfig {
                on_ms: 0xFFFF,
                ..CONFIG
            },
        );
        assert!(!driver.enabled());
    }
}
