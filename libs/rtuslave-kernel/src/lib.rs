//! Reusable Modbus RTU slave kernel
//!
//! An application-agnostic base for building Modbus RTU slaves on RS-485.
//! The kernel owns the frame engine and layers four things over it:
//!
//! - **Dispatch**: decoded requests are routed to typed application
//!   accessors for the four classical data models (coils, discrete inputs,
//!   holding registers, input registers), opt-in per function-code slot.
//! - **Configuration window**: holding registers 0x100..0x103 expose slave
//!   id, baud rate, watchdog timeout and a reboot request, persisted to
//!   non-volatile storage with a magic-word first-boot protocol.
//! - **Communication watchdog**: alarms when the master stops polling the
//!   timeout register, with lost/reestablished notifications.
//! - **Failsafe coils**: an optional cyclic pulse driver keeping latching
//!   actuators energized only while the slave is alive.
//!
//! The application provides a [`SlaveApplication`] value plus the hardware
//! collaborators in [`KernelParts`], then calls [`SlaveKernel::poll`] from
//! its main loop:
//!
//! ```no_run
//! use rtuslave_frame::{CallbackKind, LoopbackLink, SystemClock};
//! use rtuslave_kernel::{
//!     KernelOptions, KernelParts, MemoryStore, RebootHook, SlaveApplication, SlaveKernel,
//! };
//!
//! struct MyApp;
//! impl SlaveApplication for MyApp {}
//!
//! struct NoReset;
//! impl RebootHook for NoReset {
//!     fn reboot(&mut self) {}
//! }
//!
//! # fn main() -> rtuslave_kernel::Result<()> {
//! let mut kernel = SlaveKernel::new(
//!     KernelParts {
//!         link: Box::new(LoopbackLink::new()),
//!         direction: None,
//!         store: Box::new(MemoryStore::new(64)),
//!         clock: Box::new(SystemClock::new()),
//!         reboot: Box::new(NoReset),
//!     },
//!     KernelOptions::default(),
//!     Box::new(MyApp),
//! )?;
//!
//! if kernel.defaults_required() {
//!     kernel.write_defaults(&[])?;
//! }
//!
//! kernel.enable_callback(CallbackKind::ReadCoils);
//! loop {
//!     kernel.poll();
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod error;
pub mod failsafe;
pub mod kernel;
pub mod nvconfig;
pub mod settings;
pub mod store;
pub mod timer;
pub mod watchdog;
pub mod window;

mod trace;

pub use app::{KernelServices, SlaveApplication};
pub use error::{KernelError, Result};
pub use failsafe::{FailsafeConfig, FailsafeDriver, FailsafePulse};
pub use kernel::{KernelOptions, KernelParts, RebootHook, SlaveKernel};
pub use nvconfig::ConfigManager;
pub use settings::{KernelSettings, DEFAULT_MAGIC};
pub use store::{ConfigStore, MemoryStore, StorageError};
pub use timer::Deadline;
pub use watchdog::{CommWatchdog, WatchdogEvent};
pub use window::{ConfigRegister, CONFIG_WINDOW_BASE, CONFIG_WINDOW_LEN, REBOOT_REQUEST_VALUE};

// The frame engine types applications interact with directly
pub use rtuslave_frame::{CallbackKind, FrameBuffer, ModbusStatus};
