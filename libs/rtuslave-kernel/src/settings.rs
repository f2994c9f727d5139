//! Persistent kernel settings header
//!
//! The first bytes of non-volatile storage hold the kernel's own settings;
//! whatever the application persists comes after. The magic word is the sole
//! validity guard: any other value means the storage was never initialized.

use serde::{Deserialize, Serialize};

/// Default magic sentinel. Builds may pick their own to force
/// re-initialization of deployed devices.
pub const DEFAULT_MAGIC: u32 = 0x1122_33AB;

/// Kernel settings as persisted and as applied at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSettings {
    /// Modbus unit id the slave answers to
    pub slave_id: u16,
    /// Serial line speed in bits/s
    pub baud_rate: u16,
    /// Communication watchdog timeout in ms, 0 disables the watchdog
    pub comm_timeout_ms: u16,
    /// Validity sentinel
    pub magic: u32,
}

impl KernelSettings {
    /// Encoded size: slave_id(2) + baud_rate(2) + comm_timeout(2) + magic(4).
    pub const LEN: usize = 10;

    /// Factory defaults, stamped with `magic`.
    pub fn defaults(magic: u32) -> Self {
        Self {
            slave_id: 1,
            baud_rate: 9600,
            comm_timeout_ms: 0,
            magic,
        }
    }

    /// True when the stored sentinel matches the expected one.
    pub fn is_valid(&self, magic: u32) -> bool {
        self.magic == magic
    }

    /// Little-endian wire encoding.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0..2].copy_from_slice(&self.slave_id.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.baud_rate.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.comm_timeout_ms.to_le_bytes());
        bytes[6..10].copy_from_slice(&self.magic.to_le_bytes());
        bytes
    }

    /// Decode from the first [`Self::LEN`] bytes of storage.
    pub fn decode(bytes: &[u8; Self::LEN]) -> Self {
        Self {
            slave_id: u16::from_le_bytes([bytes[0], bytes[1]]),
            baud_rate: u16::from_le_bytes([bytes[2], bytes[3]]),
            comm_timeout_ms: u16::from_le_bytes([bytes[4], bytes[5]]),
            magic: u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        }
    }
}
