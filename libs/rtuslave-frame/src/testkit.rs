//! Master-side frame synthesis and response parsing
//!
//! Test rigs and demo scripts need to put well-formed requests on the wire
//! and pick responses apart. This module is that tooling; it is not a master
//! implementation (no retries, no scheduling, no transaction state).

use std::cell::Cell;
use std::rc::Rc;

use crate::constants::*;
use crate::crc::{check_adu, crc16};
use crate::link::DirectionControl;

fn finish(mut adu: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&adu);
    adu.extend_from_slice(&crc.to_le_bytes());
    adu
}

/// FC01..FC04 read request.
pub fn read_request(unit: u8, fc: u8, address: u16, quantity: u16) -> Vec<u8> {
    debug_assert!(matches!(fc, 0x01..=0x04));
    let mut adu = vec![unit, fc];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&quantity.to_be_bytes());
    finish(adu)
}

/// FC06 write single register.
pub fn write_single_register(unit: u8, address: u16, value: u16) -> Vec<u8> {
    let mut adu = vec![unit, FC_WRITE_SINGLE_REGISTER];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&value.to_be_bytes());
    finish(adu)
}

/// FC05 write single coil.
pub fn write_single_coil(unit: u8, address: u16, on: bool) -> Vec<u8> {
    let value = if on { COIL_ON } else { COIL_OFF };
    let mut adu = vec![unit, FC_WRITE_SINGLE_COIL];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&value.to_be_bytes());
    finish(adu)
}

/// FC16 write multiple registers.
pub fn write_multiple_registers(unit: u8, address: u16, values: &[u16]) -> Vec<u8> {
    let mut adu = vec![unit, FC_WRITE_MULTIPLE_REGISTERS];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    adu.push((values.len() * 2) as u8);
    for value in values {
        adu.extend_from_slice(&value.to_be_bytes());
    }
    finish(adu)
}

/// FC15 write multiple coils.
pub fn write_multiple_coils(unit: u8, address: u16, states: &[bool]) -> Vec<u8> {
    let byte_count = states.len().div_ceil(8);
    let mut adu = vec![unit, FC_WRITE_MULTIPLE_COILS];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&(states.len() as u16).to_be_bytes());
    adu.push(byte_count as u8);
    let mut data = vec![0u8; byte_count];
    for (i, on) in states.iter().enumerate() {
        if *on {
            data[i / 8] |= 1 << (i % 8);
        }
    }
    adu.extend_from_slice(&data);
    finish(adu)
}

fn response_pdu<'a>(adu: &'a [u8], unit: u8, fc: u8) -> Option<&'a [u8]> {
    if adu.len() < MIN_ADU_SIZE || adu[0] != unit || adu[1] != fc || !check_adu(adu) {
        return None;
    }
    Some(&adu[1..adu.len() - 2])
}

/// Register payload of an FC03/FC04 response.
pub fn parse_read_registers(adu: &[u8], unit: u8, fc: u8) -> Option<Vec<u16>> {
    let pdu = response_pdu(adu, unit, fc)?;
    let byte_count = *pdu.get(1)? as usize;
    let data = pdu.get(2..2 + byte_count)?;
    Some(
        data.chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect(),
    )
}

/// Bit payload of an FC01/FC02 response, trimmed to `count` entries.
pub fn parse_read_bits(adu: &[u8], unit: u8, fc: u8, count: usize) -> Option<Vec<bool>> {
    let pdu = response_pdu(adu, unit, fc)?;
    let byte_count = *pdu.get(1)? as usize;
    let data = pdu.get(2..2 + byte_count)?;
    if count > byte_count * 8 {
        return None;
    }
    Some((0..count).map(|i| data[i / 8] & (1 << (i % 8)) != 0).collect())
}

/// Exception code carried by a `fc | 0x80` response, if that is what `adu` is.
pub fn parse_exception(adu: &[u8], unit: u8, fc: u8) -> Option<u8> {
    let pdu = response_pdu(adu, unit, fc | FC_EXCEPTION_FLAG)?;
    pdu.get(1).copied()
}

/// True when `adu` is a well-formed non-exception response for `fc`.
pub fn is_ack(adu: &[u8], unit: u8, fc: u8) -> bool {
    response_pdu(adu, unit, fc).is_some()
}

/// Direction pin that records its transitions.
#[derive(Debug, Clone, Default)]
pub struct RecordingDirectionPin {
    transmitting: Rc<Cell<bool>>,
    toggles: Rc<Cell<u32>>,
}

impl RecordingDirectionPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting.get()
    }

    pub fn toggles(&self) -> u32 {
        self.toggles.get()
    }
}

impl DirectionControl for RecordingDirectionPin {
    fn set_transmit(&mut self, enabled: bool) {
        if self.transmitting.get() != enabled {
            self.toggles.set(self.toggles.get() + 1);
        }
        self.transmitting.set(enabled);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_read_request_wire_format() {
        // Reference frame: unit 1, FC03, addr 0, qty 10 => CRC C5 CD
        assert_eq!(
            read_request(0x01, 0x03, 0x0000, 10),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
    }

    #[test]
    fn test_write_multiple_coils_packing() {
        let adu = write_multiple_coils(0x01, 0x0000, &[true, true, false, false, true]);
        // unit, fc, addr, qty=5, bc=1, data=0b00010011, crc
        assert_eq!(&adu[..7], &[0x01, 0x0F, 0x00, 0x00, 0x00, 0x05, 0x01]);
        assert_eq!(adu[7], 0b0001_0011);
        assert!(check_adu(&adu));
    }

    #[test]
    fn test_parse_rejects_wrong_unit() {
        let response = finish(vec![0x02, 0x03, 0x02, 0x00, 0x2A]);
        assert!(parse_read_registers(&response, 0x01, 0x03).is_none());
        assert_eq!(
            parse_read_registers(&response, 0x02, 0x03),
            Some(vec![0x002A])
        );
    }

    #[test]
    fn test_parse_exception_frame() {
        let response = finish(vec![0x01, 0x83, 0x02]);
        assert_eq!(parse_exception(&response, 0x01, 0x03), Some(0x02));
        assert!(!is_ack(&response, 0x01, 0x03));
    }
}
