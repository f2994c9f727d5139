//! Modbus status byte and callback slot identifiers

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Status returned by request handlers.
///
/// `Ok` means "answer normally"; everything else becomes the exception byte
/// of a `fc | 0x80` response. Numeric values follow the Modbus standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum ModbusStatus {
    #[default]
    Ok = 0x00,
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    SlaveDeviceFailure = 0x04,
}

impl ModbusStatus {
    /// The exception byte put on the wire, `None` for `Ok`.
    pub fn exception_code(self) -> Option<u8> {
        match self {
            ModbusStatus::Ok => None,
            other => Some(other as u8),
        }
    }

    pub fn is_ok(self) -> bool {
        self == ModbusStatus::Ok
    }
}

impl std::fmt::Display for ModbusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModbusStatus::Ok => write!(f, "OK"),
            ModbusStatus::IllegalFunction => write!(f, "ILLEGAL FUNCTION"),
            ModbusStatus::IllegalDataAddress => write!(f, "ILLEGAL DATA ADDRESS"),
            ModbusStatus::SlaveDeviceFailure => write!(f, "SLAVE DEVICE FAILURE"),
        }
    }
}

/// Callback slots the engine dispatches to.
///
/// The wire distinguishes eight function codes but only six kinds of access:
/// single and multiple write variants share a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallbackKind {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteCoils,
    WriteHoldingRegisters,
}

impl CallbackKind {
    /// Number of callback slots.
    pub const COUNT: usize = 6;

    /// Slot index into per-kind tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            CallbackKind::ReadCoils => 0,
            CallbackKind::ReadDiscreteInputs => 1,
            CallbackKind::ReadHoldingRegisters => 2,
            CallbackKind::ReadInputRegisters => 3,
            CallbackKind::WriteCoils => 4,
            CallbackKind::WriteHoldingRegisters => 5,
        }
    }

    /// Map a request function code to its callback slot.
    pub fn from_function_code(fc: u8) -> Option<Self> {
        match fc {
            FC_READ_COILS => Some(CallbackKind::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Some(CallbackKind::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Some(CallbackKind::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Some(CallbackKind::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL | FC_WRITE_MULTIPLE_COILS => Some(CallbackKind::WriteCoils),
            FC_WRITE_SINGLE_REGISTER | FC_WRITE_MULTIPLE_REGISTERS => {
                Some(CallbackKind::WriteHoldingRegisters)
            },
            _ => None,
        }
    }

    /// True for the two slots that mutate entities.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            CallbackKind::WriteCoils | CallbackKind::WriteHoldingRegisters
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_exception_codes_follow_standard() {
        assert_eq!(ModbusStatus::Ok.exception_code(), None);
        assert_eq!(ModbusStatus::IllegalFunction.exception_code(), Some(0x01));
        assert_eq!(
            ModbusStatus::IllegalDataAddress.exception_code(),
            Some(0x02)
        );
        assert_eq!(
            ModbusStatus::SlaveDeviceFailure.exception_code(),
            Some(0x04)
        );
    }

    #[test]
    fn test_function_code_slot_map() {
        assert_eq!(
            CallbackKind::from_function_code(0x01),
            Some(CallbackKind::ReadCoils)
        );
        assert_eq!(
            CallbackKind::from_function_code(0x05),
            Some(CallbackKind::WriteCoils)
        );
        assert_eq!(
            CallbackKind::from_function_code(0x0F),
            Some(CallbackKind::WriteCoils)
        );
        assert_eq!(
            CallbackKind::from_function_code(0x06),
            Some(CallbackKind::WriteHoldingRegisters)
        );
        assert_eq!(
            CallbackKind::from_function_code(0x10),
            Some(CallbackKind::WriteHoldingRegisters)
        );
        // FC07 (read exception status) is unsupported
        assert_eq!(CallbackKind::from_function_code(0x07), None);
    }

    #[test]
    fn test_slot_indices_are_dense() {
        let kinds = [
            CallbackKind::ReadCoils,
            CallbackKind::ReadDiscreteInputs,
            CallbackKind::ReadHoldingRegisters,
            CallbackKind::ReadInputRegisters,
            CallbackKind::WriteCoils,
            CallbackKind::WriteHoldingRegisters,
        ];
        for (expected, kind) in kinds.iter().enumerate() {
            assert_eq!(kind.index(), expected);
        }
        assert_eq!(kinds.len(), CallbackKind::COUNT);
    }
}
