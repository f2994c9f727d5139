//! Modbus RTU slave frame engine
//!
//! The low tier of the `rtuslave` stack: byte-level RTU frame assembly with
//! CRC validation and t3.5 timing, function-code decoding for FC 01, 02, 03,
//! 04, 05, 06, 15 and 16, and dispatch to a vtable-bearing [`FrameHandler`].
//! Everything application-shaped (entity tables, configuration registers,
//! watchdogs) lives above, in `rtuslave-kernel`.
//!
//! # Architecture
//!
//! - [`RtuSlave`] owns the serial link, the RS-485 direction pin and the
//!   frame buffers, and is driven by a cooperative `poll(now_ms, handler)`.
//! - [`FrameBuffer`] is the scratch shared with the handler: request-relative
//!   accessors only, no raw frame access.
//! - [`SerialLink`] / [`DirectionControl`] / [`MonotonicClock`] are the
//!   hardware seams; [`LoopbackLink`], [`SystemClock`] and [`ManualClock`]
//!   serve host builds and tests.

pub mod buffer;
pub mod constants;
pub mod crc;
pub mod link;
pub mod slave;
pub mod status;
pub mod testkit;

pub use buffer::FrameBuffer;
pub use link::{
    DirectionControl, LoopbackLink, ManualClock, MonotonicClock, SerialLink, SystemClock,
};
pub use slave::{EngineStats, FrameHandler, RtuSlave};
pub use status::{CallbackKind, ModbusStatus};
