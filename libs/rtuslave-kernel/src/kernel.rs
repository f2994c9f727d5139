//! The slave kernel
//!
//! A single long-lived object the application owns: it binds the frame
//! engine to the serial link, mirrors the persisted settings into the
//! configuration register window, runs the communication watchdog and the
//! failsafe pulse driver, and routes every decoded request either to the
//! window or to the application's accessors.
//!
//! Control flow is single-threaded cooperative: [`SlaveKernel::poll`] is the
//! only progress point, and all callbacks run synchronously on it.

use serde_json::json;
use tracing::{debug, info, warn};

use rtuslave_frame::{
    CallbackKind, DirectionControl, EngineStats, FrameBuffer, FrameHandler, ModbusStatus,
    MonotonicClock, RtuSlave, SerialLink,
};

use crate::app::{KernelServices, SlaveApplication};
use crate::error::Result;
use crate::failsafe::{FailsafeConfig, FailsafeDriver};
use crate::nvconfig::ConfigManager;
use crate::settings::{KernelSettings, DEFAULT_MAGIC};
use crate::store::ConfigStore;
use crate::watchdog::{CommWatchdog, WatchdogEvent};
use crate::window::{
    in_window, range_in_window, ConfigRegister, ConfigWindow, CONFIG_WINDOW_BASE,
    REBOOT_REQUEST_VALUE,
};

/// Platform reset capability.
///
/// Invoked from [`SlaveKernel::poll`] after a reboot request was written to
/// the configuration window. On hosted builds this usually tears the main
/// loop down and reconstructs the kernel; on a target it is the MCU reset.
pub trait RebootHook {
    fn reboot(&mut self);
}

/// Hardware and platform collaborators, injected at construction.
pub struct KernelParts {
    pub link: Box<dyn SerialLink>,
    pub direction: Option<Box<dyn DirectionControl>>,
    pub store: Box<dyn ConfigStore>,
    pub clock: Box<dyn MonotonicClock>,
    pub reboot: Box<dyn RebootHook>,
}

/// Build-time kernel parameters.
#[derive(Debug, Clone, Copy)]
pub struct KernelOptions {
    /// Storage validity sentinel for this build
    pub magic: u32,
    /// Length of the application's persistent payload, 0 for none
    pub app_config_len: usize,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            magic: DEFAULT_MAGIC,
            app_config_len: 0,
        }
    }
}

/// Dispatch-side state: everything a request handler may need to touch.
///
/// Split from [`SlaveKernel`] so the engine can borrow it as the
/// [`FrameHandler`] while the kernel keeps hold of the engine itself.
struct KernelState {
    app: Box<dyn SlaveApplication>,
    enabled: [bool; CallbackKind::COUNT],
    window: ConfigWindow,
    /// Persisted header image; window writes mutate and persist it, the
    /// running configuration keeps the boot values
    header: KernelSettings,
    config: ConfigManager,
    watchdog: CommWatchdog,
    failsafe: FailsafeDriver,
    reboot_pending: bool,
}

impl KernelState {
    fn enabled(&self, kind: CallbackKind) -> bool {
        self.enabled[kind.index()]
    }

    fn take_reboot_request(&mut self) -> bool {
        std::mem::take(&mut self.reboot_pending)
    }

    /// Read from the configuration window.
    ///
    /// Reading the timeout register doubles as the watchdog heartbeat: the
    /// deadline is retriggered and a pending alarm is cleared.
    fn read_config_regs(
        &mut self,
        now_ms: u32,
        address: u16,
        quantity: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        if !range_in_window(address, quantity) {
            return ModbusStatus::IllegalDataAddress;
        }
        let base = address - CONFIG_WINDOW_BASE;
        for i in 0..quantity {
            let Some(reg) = ConfigRegister::from_index(base + i) else {
                return ModbusStatus::IllegalDataAddress;
            };
            frame.set_register(i, self.window.get(reg));

            if reg == ConfigRegister::CommTimeout {
                if let Some(WatchdogEvent::Reestablished) = self.watchdog.feed(now_ms) {
                    self.app.on_communication_reestablished();
                }
            }
        }
        ModbusStatus::Ok
    }

    /// Write into the configuration window and apply side effects.
    fn write_config_regs(
        &mut self,
        address: u16,
        quantity: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        if !range_in_window(address, quantity) {
            return ModbusStatus::IllegalDataAddress;
        }
        let base = address - CONFIG_WINDOW_BASE;
        for i in 0..quantity {
            let Some(reg) = ConfigRegister::from_index(base + i) else {
                return ModbusStatus::IllegalDataAddress;
            };
            let value = frame.register(i);
            match reg {
                ConfigRegister::SlaveId => {
                    debug!("Slave id set to {}", value);
                    self.header.slave_id = value;
                    self.window.set(reg, value);
                },
                ConfigRegister::BaudRate => {
                    debug!("Baud rate set to {}", value);
                    self.header.baud_rate = value;
                    self.window.set(reg, value);
                },
                ConfigRegister::CommTimeout => {
                    debug!("Comm timeout set to {}ms", value);
                    self.header.comm_timeout_ms = value;
                    self.window.set(reg, value);
                },
                ConfigRegister::RebootRequest => {
                    if value == REBOOT_REQUEST_VALUE {
                        debug!("Reboot requested, deferred to next poll");
                        self.reboot_pending = true;
                    }
                    // Ephemeral: the mirror always reads back 0
                    self.window.set(reg, 0);
                },
            }
        }

        if let Err(err) = self.config.persist_header(&self.header) {
            warn!("Failed to persist settings header: {}", err);
            return ModbusStatus::SlaveDeviceFailure;
        }
        debug!("Configuration set, effective on next boot");
        ModbusStatus::Ok
    }
}

impl FrameHandler for KernelState {
    fn handle(
        &mut self,
        now_ms: u32,
        kind: CallbackKind,
        address: u16,
        quantity: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        match kind {
            CallbackKind::ReadHoldingRegisters => {
                if in_window(address) {
                    self.read_config_regs(now_ms, address, quantity, frame)
                } else if self.enabled(kind) {
                    let mut services = KernelServices {
                        config: &mut self.config,
                        failsafe_mask: self.failsafe.mask(),
                    };
                    self.app
                        .access_holding_registers(&mut services, false, address, quantity, frame)
                } else {
                    ModbusStatus::IllegalDataAddress
                }
            },
            CallbackKind::WriteHoldingRegisters => {
                if in_window(address) {
                    self.write_config_regs(address, quantity, frame)
                } else if self.enabled(kind) {
                    let mut services = KernelServices {
                        config: &mut self.config,
                        failsafe_mask: self.failsafe.mask(),
                    };
                    self.app
                        .access_holding_registers(&mut services, true, address, quantity, frame)
                } else {
                    ModbusStatus::IllegalDataAddress
                }
            },
            CallbackKind::ReadCoils | CallbackKind::WriteCoils => {
                if self.enabled(kind) {
                    let mut services = KernelServices {
                        config: &mut self.config,
                        failsafe_mask: self.failsafe.mask(),
                    };
                    self.app.access_coils(
                        &mut services,
                        kind.is_write(),
                        address,
                        quantity,
                        frame,
                    )
                } else {
                    ModbusStatus::IllegalFunction
                }
            },
            CallbackKind::ReadDiscreteInputs => {
                if self.enabled(kind) {
                    let mut services = KernelServices {
                        config: &mut self.config,
                        failsafe_mask: self.failsafe.mask(),
                    };
                    self.app
                        .access_discrete_inputs(&mut services, address, quantity, frame)
                } else {
                    ModbusStatus::IllegalFunction
                }
            },
            CallbackKind::ReadInputRegisters => {
                if self.enabled(kind) {
                    let mut services = KernelServices {
                        config: &mut self.config,
                        failsafe_mask: self.failsafe.mask(),
                    };
                    self.app
                        .access_input_registers(&mut services, address, quantity, frame)
                } else {
                    ModbusStatus::IllegalFunction
                }
            },
        }
    }
}

/// Modbus RTU slave kernel.
pub struct SlaveKernel {
    engine: RtuSlave,
    state: KernelState,
    clock: Box<dyn MonotonicClock>,
    reboot: Box<dyn RebootHook>,
}

impl SlaveKernel {
    /// Load persisted settings, bind the frame engine and start listening.
    ///
    /// When the storage is uninitialized (magic mismatch) the kernel runs on
    /// factory defaults and `defaults_required()` reports true; writing the
    /// defaults is left to the application.
    pub fn new(
        parts: KernelParts,
        options: KernelOptions,
        app: Box<dyn SlaveApplication>,
    ) -> Result<Self> {
        let (config, settings) =
            ConfigManager::load(parts.store, options.magic, options.app_config_len)?;

        let now = parts.clock.now_ms();
        let watchdog = CommWatchdog::new(now, settings.comm_timeout_ms);
        let window = ConfigWindow::from_settings(&settings);

        let mut engine = RtuSlave::new(
            parts.link,
            parts.direction,
            (settings.slave_id & 0xFF) as u8,
            u32::from(settings.baud_rate),
        );
        // The configuration window must always be reachable
        engine.install(CallbackKind::ReadHoldingRegisters);
        engine.install(CallbackKind::WriteHoldingRegisters);

        info!(
            "Kernel initialized: slave id {}, baud {}, comm timeout {}ms, config window @0x{:04X}",
            settings.slave_id, settings.baud_rate, settings.comm_timeout_ms, CONFIG_WINDOW_BASE
        );

        Ok(Self {
            engine,
            state: KernelState {
                app,
                enabled: [false; CallbackKind::COUNT],
                window,
                header: settings,
                config,
                watchdog,
                failsafe: FailsafeDriver::new(),
                reboot_pending: false,
            },
            clock: parts.clock,
            reboot: parts.reboot,
        })
    }

    /// Drive the kernel: frame engine first, then the deferred reboot, then
    /// the watchdog and the failsafe pulse train.
    ///
    /// Must be called often enough for the engine's inter-character timing
    /// (typically every millisecond or two at 9600 baud).
    pub fn poll(&mut self) {
        let now = self.clock.now_ms();

        self.engine.poll(now, &mut self.state);

        if self.state.take_reboot_request() {
            info!("Performing requested reboot");
            self.reboot.reboot();
        }

        if let Some(WatchdogEvent::Lost) = self.state.watchdog.poll(now) {
            self.state.app.on_communication_lost();
        }

        if let Some(pulse) = self.state.failsafe.poll(now) {
            self.state
                .app
                .drive_failsafe_coils(pulse.phase, pulse.mask, pulse.safe_state);
        }
    }

    /// Opt in to a callback slot.
    ///
    /// The holding-register slots are always installed for the configuration
    /// window; enabling them additionally forwards sub-window addresses to
    /// the application.
    pub fn enable_callback(&mut self, kind: CallbackKind) {
        match kind {
            CallbackKind::ReadHoldingRegisters | CallbackKind::WriteHoldingRegisters => {
                // Already installed in the engine
            },
            other => self.engine.install(other),
        }
        self.state.enabled[kind.index()] = true;
    }

    /// Arm the failsafe pulse driver.
    pub fn enable_failsafe(&mut self, config: FailsafeConfig) {
        let now = self.clock.now_ms();
        self.state.failsafe.enable(now, config);
    }

    pub fn disable_failsafe(&mut self) {
        self.state.failsafe.disable();
    }

    /// Mask of coils currently owned by the pulse path.
    pub fn failsafe_mask(&self) -> u16 {
        self.state.failsafe.mask()
    }

    /// True until the application initializes the storage.
    pub fn defaults_required(&self) -> bool {
        self.state.config.defaults_required()
    }

    /// Initialize storage with the factory header and the application's
    /// default payload.
    pub fn write_defaults(&mut self, app_payload: &[u8]) -> Result<()> {
        let defaults = self.state.config.write_defaults(app_payload)?;
        self.state.header = defaults;
        Ok(())
    }

    /// The application's persistent payload as last loaded or persisted.
    pub fn app_config(&self) -> &[u8] {
        self.state.config.payload()
    }

    /// Persist the application's payload outside of a request context.
    pub fn persist_app_config(&mut self, payload: &[u8]) -> Result<()> {
        self.state.config.persist_payload(payload)?;
        Ok(())
    }

    /// Persisted header image (window mutations land here, effective next
    /// boot).
    pub fn settings(&self) -> KernelSettings {
        self.state.header
    }

    /// Unit id the engine is bound to this boot.
    pub fn slave_id(&self) -> u8 {
        self.engine.unit_id()
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Diagnostic snapshot.
    pub fn diagnostics(&self) -> serde_json::Value {
        json!({
            "slave_id": self.engine.unit_id(),
            "settings": self.state.header,
            "defaults_required": self.defaults_required(),
            "watchdog": {
                "enabled": self.state.watchdog.enabled(),
                "timeout_ms": self.state.watchdog.timeout_ms(),
                "alarm_raised": self.state.watchdog.alarm_raised(),
            },
            "failsafe_mask": self.state.failsafe.mask(),
            "engine": self.engine.stats(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rtuslave_frame::{testkit, LoopbackLink, ManualClock};
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct RebootFlag(Rc<Cell<u32>>);

    impl RebootHook for RebootFlag {
        fn reboot(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    struct NullApp;
    impl SlaveApplication for NullApp {}

    fn kernel(
        link: &LoopbackLink,
        store: &MemoryStore,
        clock: &ManualClock,
    ) -> SlaveKernel {
        SlaveKernel::new(
            KernelParts {
                link: Box::new(link.clone()),
                direction: None,
                store: Box::new(store.clone()),
                clock: Box::new(clock.clone()),
                reboot: Box::new(RebootFlag::default()),
            },
            KernelOptions::default(),
            Box::new(NullApp),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_storage_runs_on_defaults() {
        let link = LoopbackLink::new();
        let store = MemoryStore::new(64);
        let clock = ManualClock::new();
        let kernel = kernel(&link, &store, &clock);

        assert!(kernel.defaults_required());
        assert_eq!(kernel.slave_id(), 1);
        assert_eq!(link.baud_rate(), 9600);
    }

    #[test]
    fn test_config_window_reachable_without_enabling() {
        let link = LoopbackLink::new();
        let store = MemoryStore::new(64);
        let clock = ManualClock::new();
        let mut kernel = kernel(&link, &store, &clock);

        link.inject(&testkit::read_request(1, 0x03, 0x0100, 3));
        kernel.poll();

        let response = link.take_output();
        assert_eq!(
            testkit::parse_read_registers(&response, 1, 0x03),
            Some(vec![1, 9600, 0])
        );
    }

    #[test]
    fn test_sub_window_holding_needs_enable() {
        let link = LoopbackLink::new();
        let store = MemoryStore::new(64);
        let clock = ManualClock::new();
        let mut kernel = kernel(&link, &store, &clock);

        link.inject(&testkit::read_request(1, 0x03, 0x0000, 1));
        kernel.poll();

        assert_eq!(
            testkit::parse_exception(&link.take_output(), 1, 0x03),
            Some(0x02)
        );
    }

    #[test]
    fn test_diagnostics_shape() {
        let link = LoopbackLink::new();
        let store = MemoryStore::new(64);
        let clock = ManualClock::new();
        let kernel = kernel(&link, &store, &clock);

        let diag = kernel.diagnostics();
        assert_eq!(diag["slave_id"], 1);
        assert_eq!(diag["defaults_required"], true);
        assert_eq!(diag["watchdog"]["enabled"], false);
    }
}
