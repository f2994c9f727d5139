//! Non-volatile configuration lifecycle
//!
//! Storage layout is the kernel settings header followed by an opaque,
//! application-defined payload. The manager loads both at construction,
//! decides whether factory defaults are required, and performs the three
//! persistence operations the kernel and the application need: header-only,
//! payload-only, and the combined defaults write.
//!
//! Defaults are never written implicitly. The application checks
//! `defaults_required()` after constructing the kernel and decides when to
//! initialize storage.

use tracing::{debug, warn};

use crate::settings::KernelSettings;
use crate::store::{ConfigStore, StorageError};
use crate::trace::hex_dump;

/// Owner of the store and of the application payload cache.
pub struct ConfigManager {
    store: Box<dyn ConfigStore>,
    magic: u32,
    payload: Vec<u8>,
    defaults_required: bool,
}

impl ConfigManager {
    /// Read header + payload and judge validity.
    ///
    /// Returns the manager and the settings to apply this boot: the stored
    /// ones when the magic matches, factory defaults otherwise.
    pub fn load(
        mut store: Box<dyn ConfigStore>,
        magic: u32,
        payload_len: usize,
    ) -> Result<(Self, KernelSettings), StorageError> {
        let mut header = [0u8; KernelSettings::LEN];
        store.read(0, &mut header)?;

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            store.read(KernelSettings::LEN, &mut payload)?;
        }

        let stored = KernelSettings::decode(&header);
        hex_dump("Stored settings header", &header);

        let (settings, defaults_required) = if stored.is_valid(magic) {
            debug!("Settings magic OK ({:08X})", stored.magic);
            (stored, false)
        } else {
            warn!(
                "Bad settings magic {:08X}, factory defaults required",
                stored.magic
            );
            // Run on factory values, but keep the magic invalid so a header
            // persisted before the defaults write never validates storage
            let mut defaults = KernelSettings::defaults(magic);
            defaults.magic = 0;
            (defaults, true)
        };

        Ok((
            Self {
                store,
                magic,
                payload,
                defaults_required,
            },
            settings,
        ))
    }

    /// True until a defaults write initializes the storage.
    pub fn defaults_required(&self) -> bool {
        self.defaults_required
    }

    /// Application payload as last loaded or persisted.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Initialize storage: factory-default header plus the caller's payload.
    ///
    /// The header is stamped with defaults regardless of what the kernel is
    /// currently running with; the new values apply from the next boot.
    /// Returns the settings that were written.
    pub fn write_defaults(
        &mut self,
        app_payload: &[u8],
    ) -> Result<KernelSettings, StorageError> {
        if app_payload.len() != self.payload.len() {
            warn!(
                "Defaults payload is {} bytes, configured length is {}",
                app_payload.len(),
                self.payload.len()
            );
        }
        let defaults = KernelSettings::defaults(self.magic);
        debug!("Writing factory defaults");

        self.store.write(0, &defaults.encode())?;
        self.store.write(KernelSettings::LEN, app_payload)?;
        self.store.commit()?;

        self.payload.clear();
        self.payload.extend_from_slice(app_payload);
        self.defaults_required = false;
        Ok(defaults)
    }

    /// Persist the kernel header, leaving the payload area untouched.
    pub fn persist_header(&mut self, settings: &KernelSettings) -> Result<(), StorageError> {
        let bytes = settings.encode();
        hex_dump("Persisting settings header", &bytes);
        self.store.write(0, &bytes)?;
        self.store.commit()
    }

    /// Persist the application payload, leaving the header untouched.
    pub fn persist_payload(&mut self, payload: &[u8]) -> Result<(), StorageError> {
        debug!("Persisting {} byte application payload", payload.len());
        self.store.write(KernelSettings::LEN, payload)?;
        self.store.commit()?;
        self.payload.clear();
        self.payload.extend_from_slice(payload);
        Ok(())
    }
}
