//! Shared test rig
//!
//! Wires a kernel to an in-memory link, store and clock, with a small
//! reference application: eight holding registers, four coils (with distinct
//! logical states and physical pin images), two discrete inputs and two
//! input registers. Holding registers persist as the application payload the
//! way a real device would persist its settings.

#![allow(dead_code)] // Not every test binary touches every helper

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rtuslave_frame::{testkit, CallbackKind, FrameBuffer, LoopbackLink, ManualClock, ModbusStatus};
use rtuslave_kernel::{
    KernelOptions, KernelParts, KernelServices, MemoryStore, RebootHook, SlaveApplication,
    SlaveKernel,
};

pub const NUM_HOLDING: u16 = 8;
pub const NUM_COILS: u16 = 4;
pub const NUM_DISCRETE: u16 = 2;
pub const NUM_INPUTS: u16 = 2;

/// Application payload: the eight holding registers, little-endian.
pub const APP_CONFIG_LEN: usize = NUM_HOLDING as usize * 2;

#[derive(Default)]
pub struct AppState {
    pub holding: [u16; NUM_HOLDING as usize],
    pub coils: [bool; NUM_COILS as usize],
    /// Physical pin image, written by the normal path and the pulse path
    pub pins: [bool; NUM_COILS as usize],
    pub discrete: [bool; NUM_DISCRETE as usize],
    pub inputs: [u16; NUM_INPUTS as usize],
    pub lost_events: u32,
    pub reestablished_events: u32,
    pub failsafe_mask: u16,
    pub pulse_edges: u32,
}

pub struct TestApp {
    state: Rc<RefCell<AppState>>,
}

impl TestApp {
    pub fn new(state: Rc<RefCell<AppState>>) -> Self {
        Self { state }
    }
}

impl SlaveApplication for TestApp {
    fn access_holding_registers(
        &mut self,
        services: &mut KernelServices<'_>,
        write: bool,
        address: u16,
        length: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        if u32::from(address) + u32::from(length) > u32::from(NUM_HOLDING) {
            return ModbusStatus::IllegalDataAddress;
        }
        let mut state = self.state.borrow_mut();
        for i in 0..length {
            let reg = (address + i) as usize;
            if write {
                state.holding[reg] = frame.register(i);
            } else {
                frame.set_register(i, state.holding[reg]);
            }
        }
        if write {
            let mut payload = [0u8; APP_CONFIG_LEN];
            for (reg, value) in state.holding.iter().enumerate() {
                payload[reg * 2..reg * 2 + 2].copy_from_slice(&value.to_le_bytes());
            }
            if services.persist_app_config(&payload).is_err() {
                return ModbusStatus::SlaveDeviceFailure;
            }
        }
        ModbusStatus::Ok
    }

    fn access_coils(
        &mut self,
        services: &mut KernelServices<'_>,
        write: bool,
        address: u16,
        length: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        if u32::from(address) + u32::from(length) > u32::from(NUM_COILS) {
            return ModbusStatus::IllegalDataAddress;
        }
        let mut state = self.state.borrow_mut();
        for i in 0..length {
            let coil = (address + i) as usize;
            if write {
                let on = frame.coil(i);
                state.coils[coil] = on;
                // Masked coils are driven by the pulse path only
                if services.failsafe_mask() & (1 << coil) == 0 {
                    state.pins[coil] = on;
                }
            } else {
                frame.set_coil(i, state.coils[coil]);
            }
        }
        ModbusStatus::Ok
    }

    fn access_discrete_inputs(
        &mut self,
        _services: &mut KernelServices<'_>,
        address: u16,
        length: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        if u32::from(address) + u32::from(length) > u32::from(NUM_DISCRETE) {
            return ModbusStatus::IllegalDataAddress;
        }
        let state = self.state.borrow();
        for i in 0..length {
            frame.set_coil(i, state.discrete[(address + i) as usize]);
        }
        ModbusStatus::Ok
    }

    fn access_input_registers(
        &mut self,
        _services: &mut KernelServices<'_>,
        address: u16,
        length: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        if u32::from(address) + u32::from(length) > u32::from(NUM_INPUTS) {
            return ModbusStatus::IllegalDataAddress;
        }
        let state = self.state.borrow();
        for i in 0..length {
            frame.set_register(i, state.inputs[(address + i) as usize]);
        }
        ModbusStatus::Ok
    }

    fn on_communication_lost(&mut self) {
        self.state.borrow_mut().lost_events += 1;
    }

    fn on_communication_reestablished(&mut self) {
        self.state.borrow_mut().reestablished_events += 1;
    }

    fn drive_failsafe_coils(&mut self, phase: bool, mask: u16, _safe_state: u16) {
        let mut state = self.state.borrow_mut();
        state.failsafe_mask = mask;
        state.pulse_edges += 1;
        for coil in 0..NUM_COILS as usize {
            if mask & (1 << coil) != 0 && state.coils[coil] {
                state.pins[coil] = phase;
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct RebootCounter(Rc<Cell<u32>>);

impl RebootCounter {
    pub fn count(&self) -> u32 {
        self.0.get()
    }
}

impl RebootHook for RebootCounter {
    fn reboot(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

pub struct Rig {
    pub link: LoopbackLink,
    pub store: MemoryStore,
    pub clock: ManualClock,
    pub reboots: RebootCounter,
    pub app: Rc<RefCell<AppState>>,
    pub kernel: SlaveKernel,
    enabled: Vec<CallbackKind>,
}

impl Rig {
    /// Fresh rig over erased storage.
    pub fn new(enabled: &[CallbackKind]) -> Self {
        let store = MemoryStore::new(64);
        Self::boot(store, LoopbackLink::new(), ManualClock::new(), enabled)
    }

    fn boot(
        store: MemoryStore,
        link: LoopbackLink,
        clock: ManualClock,
        enabled: &[CallbackKind],
    ) -> Self {
        let app = Rc::new(RefCell::new(AppState::default()));
        let reboots = RebootCounter::default();
        let mut kernel = SlaveKernel::new(
            KernelParts {
                link: Box::new(link.clone()),
                direction: None,
                store: Box::new(store.clone()),
                clock: Box::new(clock.clone()),
                reboot: Box::new(reboots.clone()),
            },
            KernelOptions {
                app_config_len: APP_CONFIG_LEN,
                ..KernelOptions::default()
            },
            Box::new(TestApp::new(app.clone())),
        )
        .expect("kernel construction");

        for kind in enabled {
            kernel.enable_callback(*kind);
        }

        // Populate application state from the persisted payload, the way a
        // device loads its settings at boot
        let payload = kernel.app_config().to_vec();
        if payload.len() == APP_CONFIG_LEN && !kernel.defaults_required() {
            let mut state = app.borrow_mut();
            for reg in 0..NUM_HOLDING as usize {
                state.holding[reg] = u16::from_le_bytes([payload[reg * 2], payload[reg * 2 + 1]]);
            }
        }

        Self {
            link,
            store,
            clock,
            reboots,
            app,
            kernel,
            enabled: enabled.to_vec(),
        }
    }

    /// Tear the kernel down and boot a fresh one over the same storage,
    /// link and clock: the test rig's version of a reboot.
    pub fn reboot(self) -> Self {
        Self::boot(self.store, self.link, self.clock, &self.enabled)
    }

    /// One master transaction: inject the request, poll once, collect the
    /// response bytes.
    pub fn transact(&mut self, request: &[u8]) -> Vec<u8> {
        self.link.inject(request);
        self.kernel.poll();
        self.link.take_output()
    }

    /// Read registers from the slave, panicking on an exception response.
    pub fn read_holding(&mut self, address: u16, quantity: u16) -> Vec<u16> {
        let unit = self.kernel.slave_id();
        let response = self.transact(&testkit::read_request(unit, 0x03, address, quantity));
        testkit::parse_read_registers(&response, unit, 0x03)
            .unwrap_or_else(|| panic!("expected register data, got {:02X?}", response))
    }
}
