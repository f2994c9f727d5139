//! Modbus RTU protocol constants
//!
//! Sizes and limits derive from the official Modbus specification: the RTU
//! ADU is capped at 256 bytes, leaving 253 bytes of PDU after the unit id
//! and the CRC.

// ============================================================================
// Frame sizes
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size.
///
/// RTU ADU (256 bytes) - unit id (1 byte) - CRC (2 bytes) = 253 bytes.
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum ADU (Application Data Unit) size on an RTU line.
pub const MAX_ADU_SIZE: usize = 256;

/// Smallest frame worth looking at: unit id + function code + CRC.
pub const MIN_ADU_SIZE: usize = 4;

// ============================================================================
// Unit ids
// ============================================================================

/// Broadcast unit id: write requests execute, nothing is answered.
pub const BROADCAST_UNIT_ID: u8 = 0;

/// Highest unit id a slave may be bound to.
pub const MAX_UNIT_ID: u8 = 247;

// ============================================================================
// Function codes
// ============================================================================

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set in the function code of an exception response.
pub const FC_EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Quantity ceilings
// ============================================================================

/// FC01/FC02: response is 1 + 1 + ceil(N/8) <= 253, the standard caps N at 2000.
pub const MAX_READ_COILS: u16 = 2000;

/// FC03/FC04: response is 1 + 1 + 2N <= 253, so N <= 125.
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC15: request is 1 + 2 + 2 + 1 + ceil(N/8) <= 253, the standard caps N at 1968.
pub const MAX_WRITE_COILS: u16 = 1968;

/// FC16: request is 1 + 2 + 2 + 1 + 2N <= 253, so N <= 123.
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Single-coil wire values
// ============================================================================

/// FC05 payload for "coil on".
pub const COIL_ON: u16 = 0xFF00;

/// FC05 payload for "coil off".
pub const COIL_OFF: u16 = 0x0000;
