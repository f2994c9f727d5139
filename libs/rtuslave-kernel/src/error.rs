//! Kernel error types

use thiserror::Error;

use crate::store::StorageError;

pub type Result<T> = std::result::Result<T, KernelError>;

/// Failures surfaced by the kernel's own API.
///
/// Modbus-level problems never appear here: they travel back to the master
/// as exception bytes and the bus keeps running.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KernelError {
    pub fn config(msg: impl Into<String>) -> Self {
        KernelError::Config(msg.into())
    }
}
