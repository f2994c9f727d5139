//! Debug helpers

use tracing::trace;

/// Emit a labeled hex dump at trace level.
pub(crate) fn hex_dump(label: &str, bytes: &[u8]) {
    if tracing::enabled!(tracing::Level::TRACE) {
        let hex = bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ");
        trace!("{}: [{}]", label, hex);
    }
}
