//! Weather-station slave with a parallel sensor task
//!
//! A simulated sensor thread produces temperature and humidity readings
//! (scaled by 10, the DHT22 convention) into a mutex-guarded register pair.
//! The Modbus side exposes them as input registers 0 and 1, plus one
//! application holding register 0 with the sampling interval in seconds,
//! persisted across reboots.
//!
//! Register access takes the mutex with a bounded 5ms wait. A failed
//! acquisition means the sensor task is wedged or starved; the failure is
//! latched and every later request answers SLAVE DEVICE FAILURE until the
//! device reboots.
//!
//! The scripted master session also exercises the communication watchdog:
//! it persists a 500ms timeout, reboots the slave, goes silent past the
//! deadline and then resumes heartbeat reads of register 0x102.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tracing::{info, warn};

use rtuslave_demos::{init_logging, load_config, transact, RestartSignal};
use rtuslave_frame::{testkit, CallbackKind, FrameBuffer, LoopbackLink, SystemClock};
use rtuslave_kernel::{
    KernelOptions, KernelParts, KernelServices, MemoryStore, ModbusStatus, SlaveApplication,
    SlaveKernel,
};

const NUM_INPUTS: u16 = 2;
const NUM_HOLDING: u16 = 1;
const APP_CONFIG_LEN: usize = 2;

/// Bounded wait for the register mutex.
const LOCK_TIMEOUT: Duration = Duration::from_millis(5);

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

/// State shared with the sensor thread.
struct SensorShared {
    /// [temperature x0.1 deg C, humidity x0.1 %]
    readings: Mutex<[u16; NUM_INPUTS as usize]>,
    /// Sampling interval in seconds, mirrored from holding register 0
    interval_s: AtomicU16,
    /// Set-once latch: a bounded lock acquisition failed
    lock_failure: AtomicBool,
    stop: AtomicBool,
}

impl SensorShared {
    fn new(interval_s: u16) -> Self {
        Self {
            readings: Mutex::new([0; NUM_INPUTS as usize]),
            interval_s: AtomicU16::new(interval_s),
            lock_failure: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }
}

/// Simulated DHT22: deterministic drift around plausible values.
fn sensor_task(shared: Arc<SensorShared>) {
    let mut tick: u16 = 0;
    while !shared.stop.load(Ordering::Relaxed) {
        let readings = [215 + tick % 20, 480 + tick % 50];
        if let Some(mut guard) = shared.readings.try_lock_for(LOCK_TIMEOUT) {
            *guard = readings;
        } else {
            warn!("Sensor task failed to take the register lock");
            shared.lock_failure.store(true, Ordering::Relaxed);
        }
        tick = tick.wrapping_add(1);

        // Scaled down so the demo shows several updates per second
        let interval = shared.interval_s.load(Ordering::Relaxed).max(1);
        std::thread::sleep(Duration::from_millis(u64::from(interval) * 100));
    }
}

struct WeatherApp {
    shared: Arc<SensorShared>,
    sampling_interval_s: Rc<RefCell<u16>>,
}

impl WeatherApp {
    /// Latched lock failures poison every later request until reboot.
    fn latched(&self) -> bool {
        self.shared.lock_failure.load(Ordering::Relaxed)
    }
}

impl SlaveApplication for WeatherApp {
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
        if self.latched() {
            warn!("Register lock failure latched, failing request");
            return ModbusStatus::SlaveDeviceFailure;
        }
        // Consistent snapshot without starving the sensor task
        let Some(guard) = self.shared.readings.try_lock_for(LOCK_TIMEOUT) else {
            warn!("Failed to take the register lock for a read");
            self.shared.lock_failure.store(true, Ordering::Relaxed);
            return ModbusStatus::SlaveDeviceFailure;
        };
        for i in 0..length {
            frame.set_register(i, guard[(address + i) as usize]);
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
        if write {
            let interval = frame.register(0);
            *self.sampling_interval_s.borrow_mut() = interval;
            self.shared.interval_s.store(interval, Ordering::Relaxed);
            if services
                .persist_app_config(&interval.to_le_bytes())
                .is_err()
            {
                return ModbusStatus::SlaveDeviceFailure;
            }
            info!("Sampling interval set to {}s and persisted", interval);
        } else {
            frame.set_register(0, *self.sampling_interval_s.borrow());
        }
        ModbusStatus::Ok
    }

    fn on_communication_lost(&mut self) {
        warn!("Master went silent, taking safety measures");
    }

    fn on_communication_reestablished(&mut self) {
        info!("Master is polling again");
    }
}

fn decode_interval(payload: &[u8]) -> u16 {
    if payload.len() >= 2 {
        u16::from_le_bytes([payload[0], payload[1]]).max(1)
    } else {
        10
    }
}

fn boot(
    line: &LoopbackLink,
    store: &MemoryStore,
    restart: &RestartSignal,
    shared: &Arc<SensorShared>,
) -> Result<SlaveKernel> {
    let app = WeatherApp {
        shared: shared.clone(),
        sampling_interval_s: Rc::new(RefCell::new(10)),
    };
    let interval_handle = app.sampling_interval_s.clone();

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
        Box::new(app),
    )
    .context("kernel construction")?;

    if kernel.defaults_required() {
        info!("Uninitialized storage, writing factory defaults");
        kernel.write_defaults(&10u16.to_le_bytes())?;
    }

    let interval = decode_interval(kernel.app_config());
    *interval_handle.borrow_mut() = interval;
    shared.interval_s.store(interval, Ordering::Relaxed);

    kernel.enable_callback(CallbackKind::ReadInputRegisters);
    kernel.enable_callback(CallbackKind::ReadHoldingRegisters);
    kernel.enable_callback(CallbackKind::WriteHoldingRegisters);

    Ok(kernel)
}

/// Poll the slave for `duration` of real time.
fn run_slave(kernel: &mut SlaveKernel, poll_interval: Duration, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        kernel.poll();
        std::thread::sleep(poll_interval);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config);
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));

    info!("Starting weather station demo");

    let line = LoopbackLink::new();
    let store = MemoryStore::new(config.store_bytes);
    let restart = RestartSignal::new();
    let shared = Arc::new(SensorShared::new(10));

    let sensor = {
        let shared = shared.clone();
        std::thread::spawn(move || sensor_task(shared))
    };

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut kernel = boot(&line, &store, &restart, &shared)?;
    let unit = kernel.slave_id();

    // Master: a few sensor readouts
    for _ in 0..3 {
        run_slave(&mut kernel, poll_interval, Duration::from_millis(300));
        let response = transact(&mut kernel, &line, &testkit::read_request(unit, 0x04, 0, 2));
        match testkit::parse_read_registers(&response, unit, 0x04) {
            Some(regs) => info!(
                "Sensor: {:.1} deg C, {:.1} %RH",
                f64::from(regs[0]) / 10.0,
                f64::from(regs[1]) / 10.0
            ),
            None => warn!("Sensor read failed: {:02X?}", response),
        }
    }

    // Master: speed the sampling up and persist it
    transact(
        &mut kernel,
        &line,
        &testkit::write_single_register(unit, 0x0000, 2),
    );

    // Master: arm a 500ms communication watchdog, effective after reboot
    transact(
        &mut kernel,
        &line,
        &testkit::write_single_register(unit, 0x0102, 500),
    );
    transact(
        &mut kernel,
        &line,
        &testkit::write_single_register(unit, 0x0103, 0xFFFF),
    );

    if restart.take() {
        drop(kernel);
        kernel = boot(&line, &store, &restart, &shared)?;
        info!("Rebooted, diagnostics: {}", kernel.diagnostics());
    }

    // Heartbeat reads keep the watchdog quiet
    for _ in 0..3 {
        run_slave(&mut kernel, poll_interval, Duration::from_millis(200));
        let response = transact(
            &mut kernel,
            &line,
            &testkit::read_request(unit, 0x03, 0x0102, 1),
        );
        info!(
            "Heartbeat: timeout register = {:?}",
            testkit::parse_read_registers(&response, unit, 0x03)
        );
    }

    // Master goes silent past the deadline: exactly one lost notification
    info!("Master going silent for 700ms");
    run_slave(&mut kernel, poll_interval, Duration::from_millis(700));

    // And resumes: the next heartbeat read clears the alarm
    let response = transact(
        &mut kernel,
        &line,
        &testkit::read_request(unit, 0x03, 0x0102, 1),
    );
    info!(
        "Heartbeat after silence: {:?}",
        testkit::parse_read_registers(&response, unit, 0x03)
    );

    shared.stop.store(true, Ordering::Relaxed);
    let _ = sensor.join();

    info!("Demo finished");
    Ok(())
}
