//! Four-coil slave with failsafe pulsing
//!
//! The slave maintains four coils (coil 0 stands in for an LED) and four
//! application holding registers 0..3 configuring the failsafe feature:
//!
//! | Reg | Meaning |
//! |-----|---------|
//! | 0   | Coil enable mask |
//! | 1   | Power-on coil state |
//! | 2   | Pulse on-time \[ms] |
//! | 3   | Pulse off-time \[ms] |
//!
//! The kernel's configuration window lives at 0x100..0x103 as always. The
//! demo plays a scripted master session over the loopback line: first boot
//! with factory defaults, coil writes, a second of pulse watching, then a
//! reboot request and a fresh boot over the same storage.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use rtuslave_demos::{init_logging, load_config, transact, RestartSignal};
use rtuslave_frame::{testkit, CallbackKind, FrameBuffer, LoopbackLink, SystemClock};
use rtuslave_kernel::{
    FailsafeConfig, KernelOptions, KernelParts, KernelServices, MemoryStore, ModbusStatus,
    SlaveApplication, SlaveKernel,
};

const NUM_COILS: u16 = 4;
const NUM_HOLDING: u16 = 4;
const APP_CONFIG_LEN: usize = NUM_HOLDING as usize * 2;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[clap(short, long, value_parser, default_value = "demo.json")]
    config: PathBuf,

    /// Log filter, overriding the configuration file
    #[clap(long)]
    log_level: Option<String>,
}

/// Persistent application settings, one holding register each.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FailsafeRegs {
    mask: u16,
    power_on: u16,
    on_ms: u16,
    off_ms: u16,
}

impl Default for FailsafeRegs {
    fn default() -> Self {
        Self {
            mask: 0b0011,
            power_on: 0b0001,
            on_ms: 200,
            off_ms: 200,
        }
    }
}

impl FailsafeRegs {
    fn get(&self, reg: u16) -> u16 {
        match reg {
            0 => self.mask,
            1 => self.power_on,
            2 => self.on_ms,
            _ => self.off_ms,
        }
    }

    fn set(&mut self, reg: u16, value: u16) {
        match reg {
            0 => self.mask = value,
            1 => self.power_on = value,
            2 => self.on_ms = value,
            _ => self.off_ms = value,
        }
    }

    fn encode(&self) -> [u8; APP_CONFIG_LEN] {
        let mut bytes = [0u8; APP_CONFIG_LEN];
        for reg in 0..NUM_HOLDING {
            bytes[reg as usize * 2..reg as usize * 2 + 2]
                .copy_from_slice(&self.get(reg).to_le_bytes());
        }
        bytes
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut regs = Self::default();
        if bytes.len() >= APP_CONFIG_LEN {
            for reg in 0..NUM_HOLDING {
                let i = reg as usize * 2;
                regs.set(reg, u16::from_le_bytes([bytes[i], bytes[i + 1]]));
            }
        }
        regs
    }

    fn pulse_config(&self) -> FailsafeConfig {
        FailsafeConfig {
            mask: self.mask,
            safe_state: self.power_on,
            on_ms: self.on_ms,
            off_ms: self.off_ms,
        }
    }
}

#[derive(Debug, Default)]
struct CoilBank {
    /// Logical coil states as seen over the bus
    coils: [bool; NUM_COILS as usize],
    /// Physical pin image ("the LED")
    pins: [bool; NUM_COILS as usize],
    settings: FailsafeRegs,
}

struct CoilApp {
    bank: Rc<RefCell<CoilBank>>,
}

impl SlaveApplication for CoilApp {
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
        let mut bank = self.bank.borrow_mut();
        for i in 0..length {
            let coil = (address + i) as usize;
            if write {
                let on = frame.coil(i);
                bank.coils[coil] = on;
                // Failsafe coils are pulsed, never driven from here
                if services.failsafe_mask() & (1 << coil) == 0 {
                    bank.pins[coil] = on;
                }
            } else {
                frame.set_coil(i, bank.coils[coil]);
            }
        }
        ModbusStatus::Ok
    }

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
        let mut bank = self.bank.borrow_mut();
        for i in 0..length {
            let reg = address + i;
            if write {
                bank.settings.set(reg, frame.register(i));
            } else {
                frame.set_register(i, bank.settings.get(reg));
            }
        }
        if write {
            let payload = bank.settings.encode();
            if services.persist_app_config(&payload).is_err() {
                return ModbusStatus::SlaveDeviceFailure;
            }
            info!("Failsafe settings persisted, effective on next boot");
        }
        ModbusStatus::Ok
    }

    fn drive_failsafe_coils(&mut self, phase: bool, mask: u16, _safe_state: u16) {
        let mut bank = self.bank.borrow_mut();
        for coil in 0..NUM_COILS as usize {
            if mask & (1 << coil) != 0 && bank.coils[coil] {
                bank.pins[coil] = phase;
            }
        }
    }
}

/// Construct the kernel over the shared storage, writing defaults on first
/// boot, then apply the persisted application settings.
fn boot(
    line: &LoopbackLink,
    store: &MemoryStore,
    restart: &RestartSignal,
) -> Result<(SlaveKernel, Rc<RefCell<CoilBank>>)> {
    let bank = Rc::new(RefCell::new(CoilBank::default()));
    let mut kernel = SlaveKernel::new(
        KernelParts {
            link: Box::new(line.clone()),
            direction: None,
            store: Box::new(store.clone()),
            clock: Box::new(SystemClock::new()),
            reboot: Box::new(restart.clone()),
        },
        KernelOptions {
            app_config_len: APP_CONFIG_LEN,
            ..KernelOptions::default()
        },
        Box::new(CoilApp { bank: bank.clone() }),
    )
    .context("kernel construction")?;

    if kernel.defaults_required() {
        info!("Uninitialized storage, writing factory defaults");
        kernel.write_defaults(&FailsafeRegs::default().encode())?;
    }

    let settings = FailsafeRegs::decode(kernel.app_config());
    {
        let mut bank = bank.borrow_mut();
        bank.settings = settings;
        for coil in 0..NUM_COILS as usize {
            let on = settings.power_on & (1 << coil) != 0;
            bank.coils[coil] = on;
            bank.pins[coil] = on;
        }
    }

    kernel.enable_callback(CallbackKind::ReadCoils);
    kernel.enable_callback(CallbackKind::WriteCoils);
    kernel.enable_callback(CallbackKind::ReadHoldingRegisters);
    kernel.enable_callback(CallbackKind::WriteHoldingRegisters);

    if settings.mask != 0 {
        kernel.enable_failsafe(settings.pulse_config());
        info!(
            "Failsafe pulsing armed: mask={:04X}, on={}ms, off={}ms",
            settings.mask, settings.on_ms, settings.off_ms
        );
    }

    Ok((kernel, bank))
}

fn pin_picture(bank: &CoilBank) -> String {
    bank.pins
        .iter()
        .map(|on| if *on { '#' } else { '.' })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config);
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));

    info!("Starting simple coils demo");

    let line = LoopbackLink::new();
    let store = MemoryStore::new(config.store_bytes);
    let restart = RestartSignal::new();

    let (mut kernel, bank) = boot(&line, &store, &restart)?;
    let unit = kernel.slave_id();

    // Master: inspect the configuration window
    let response = transact(&mut kernel, &line, &testkit::read_request(unit, 0x03, 0x0100, 3));
    info!(
        "Config window: {:?}",
        testkit::parse_read_registers(&response, unit, 0x03)
    );

    // Master: energize coils 0 and 1, coil 3 as a plain output
    transact(
        &mut kernel,
        &line,
        &testkit::write_multiple_coils(unit, 0, &[true, true, false, true]),
    );
    info!("Coils written, pins now [{}]", pin_picture(&bank.borrow()));

    // Watch the pulse train for a second of real time
    let deadline = Instant::now() + Duration::from_secs(1);
    let mut last_picture = String::new();
    while Instant::now() < deadline {
        kernel.poll();
        let picture = pin_picture(&bank.borrow());
        if picture != last_picture {
            info!("Pins [{}]", picture);
            last_picture = picture;
        }
        std::thread::sleep(Duration::from_millis(config.poll_interval_ms));
    }

    // Logical state is untouched by the pulsing
    let response = transact(&mut kernel, &line, &testkit::read_request(unit, 0x01, 0, 4));
    info!(
        "Logical coils: {:?}",
        testkit::parse_read_bits(&response, unit, 0x01, 4)
    );

    // Master: request a reboot; the kernel executes it within the same poll
    transact(
        &mut kernel,
        &line,
        &testkit::write_single_register(unit, 0x0103, 0xFFFF),
    );
    if restart.take() {
        drop(kernel);
        let (mut kernel, _bank) = boot(&line, &store, &restart)?;
        let response = transact(&mut kernel, &line, &testkit::read_request(unit, 0x03, 0x0100, 3));
        info!(
            "After reboot, config window: {:?}",
            testkit::parse_read_registers(&response, unit, 0x03)
        );
        info!("Diagnostics: {}", kernel.diagnostics());
    }

    info!("Demo finished");
    Ok(())
}
