//! Non-volatile storage seam
//!
//! The kernel persists its settings header (and the application's payload)
//! through a byte-addressed store with explicit commit semantics, matching
//! EEPROM-style backends where byte writes land in a shadow buffer until
//! flushed.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Storage backend failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Access at {offset}..{end} outside store of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        end: usize,
        capacity: usize,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Commit failed: {0}")]
    Commit(String),
}

/// Byte-addressed non-volatile memory.
pub trait ConfigStore {
    /// Read `buffer.len()` bytes starting at `offset`.
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), StorageError>;

    /// Write `data` starting at `offset`. May land in a shadow buffer.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    /// Flush shadowed writes to the backend.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Usable capacity in bytes.
    fn capacity(&self) -> usize;
}

/// In-memory store for tests, demos and host-side rigs.
///
/// Fresh cells read back 0xFF like erased flash. Clones share the same
/// backing, so a kernel rebuilt over a cloned handle observes everything the
/// previous instance persisted, which is how the test rigs model a reboot.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    cells: Rc<RefCell<Vec<u8>>>,
}

impl MemoryStore {
    /// An erased store of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: Rc::new(RefCell::new(vec![0xFF; capacity])),
        }
    }

    /// A store pre-loaded with `image` (for corruption scenarios).
    pub fn with_image(image: &[u8]) -> Self {
        Self {
            cells: Rc::new(RefCell::new(image.to_vec())),
        }
    }

    /// Snapshot of the full contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.borrow().clone()
    }
}

impl ConfigStore for MemoryStore {
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), StorageError> {
        let cells = self.cells.borrow();
        let end = offset + buffer.len();
        if end > cells.len() {
            return Err(StorageError::OutOfBounds {
                offset,
                end,
                capacity: cells.len(),
            });
        }
        buffer.copy_from_slice(&cells[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let mut cells = self.cells.borrow_mut();
        let end = offset + data.len();
        if end > cells.len() {
            return Err(StorageError::OutOfBounds {
                offset,
                end,
                capacity: cells.len(),
            });
        }
        cells[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.cells.borrow().len()
    }
}
