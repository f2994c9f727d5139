//! Application-facing contract
//!
//! The application hands the kernel one value implementing
//! [`SlaveApplication`]: four entity accessors, two watchdog notifications
//! and the failsafe pulse hook. Accessors move data through the request
//! scratch ([`FrameBuffer`]) with request-relative indices and answer with a
//! [`ModbusStatus`]; anything but `Ok` becomes the exception byte of the
//! response.
//!
//! Every accessor must validate the requested range against its own entity
//! count and answer ILLEGAL DATA ADDRESS before touching the scratch. The
//! engine ceilings `length`, but `address` arrives straight off the wire and
//! can be any 16-bit value, so the check must widen:
//! `u32::from(address) + u32::from(length) > u32::from(ENTITY_COUNT)` — a
//! plain u16 `address + length` overflows for high addresses.

use tracing::debug;

use rtuslave_frame::{FrameBuffer, ModbusStatus};

use crate::nvconfig::ConfigManager;
use crate::store::StorageError;

/// Kernel capabilities lent to the accessors for the duration of one
/// request.
pub struct KernelServices<'a> {
    pub(crate) config: &'a mut ConfigManager,
    pub(crate) failsafe_mask: u16,
}

impl KernelServices<'_> {
    /// Persist the application's configuration payload behind the kernel
    /// header.
    pub fn persist_app_config(&mut self, payload: &[u8]) -> Result<(), StorageError> {
        self.config.persist_payload(payload)
    }

    /// The application payload as last loaded or persisted.
    pub fn app_config(&self) -> &[u8] {
        self.config.payload()
    }

    /// Mask of coils currently owned by the failsafe pulse path.
    ///
    /// The normal coil-write path must leave the physical outputs of masked
    /// coils alone.
    pub fn failsafe_mask(&self) -> u16 {
        self.failsafe_mask
    }
}

/// The capability set an application exposes to the kernel.
///
/// Every method has a default: accessors reject with ILLEGAL FUNCTION
/// (install only what the device supports), notifications trace and return.
#[allow(unused_variables)]
pub trait SlaveApplication {
    /// Holding registers below the configuration window (R/W).
    fn access_holding_registers(
        &mut self,
        services: &mut KernelServices<'_>,
        write: bool,
        address: u16,
        length: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        ModbusStatus::IllegalFunction
    }

    /// Coils (R/W).
    fn access_coils(
        &mut self,
        services: &mut KernelServices<'_>,
        write: bool,
        address: u16,
        length: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        ModbusStatus::IllegalFunction
    }

    /// Discrete inputs (R/O).
    fn access_discrete_inputs(
        &mut self,
        services: &mut KernelServices<'_>,
        address: u16,
        length: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        ModbusStatus::IllegalFunction
    }

    /// Input registers (R/O).
    fn access_input_registers(
        &mut self,
        services: &mut KernelServices<'_>,
        address: u16,
        length: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus {
        ModbusStatus::IllegalFunction
    }

    /// The watchdog gave up on the master.
    fn on_communication_lost(&mut self) {
        debug!("Communication lost (default handler)");
    }

    /// The master is polling again.
    fn on_communication_reestablished(&mut self) {
        debug!("Communication reestablished (default handler)");
    }

    /// One edge of the failsafe pulse train.
    ///
    /// Drive the physical output of every masked, logically-on coil to
    /// `phase`; never touch the logical coil state here.
    fn drive_failsafe_coils(&mut self, phase: bool, mask: u16, safe_state: u16) {}
}
