//! Request/response scratch buffer
//!
//! A fixed-size, stack-allocated pair of PDU buffers shared between the
//! engine and the request handler. The handler never sees raw frames: write
//! requests are read out with [`FrameBuffer::register`]/[`FrameBuffer::coil`],
//! read responses are filled in with [`FrameBuffer::set_register`]/
//! [`FrameBuffer::set_coil`]. Indices are request-relative (`0..quantity`),
//! not entity addresses.

use crate::constants::*;

/// Byte offset of the value field in single-write request PDUs (FC05/FC06).
const SINGLE_VALUE_OFFSET: usize = 3;

/// Byte offset of the data field in multi-write request PDUs (FC15/FC16).
const MULTI_DATA_OFFSET: usize = 6;

/// Byte offset of the data field in read response PDUs (FC01..FC04).
const READ_DATA_OFFSET: usize = 2;

/// Scratch buffer for one request/response exchange.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Request PDU as received (function code first)
    req: [u8; MAX_PDU_SIZE],
    req_len: usize,
    /// Response PDU under construction
    resp: [u8; MAX_PDU_SIZE],
    resp_len: usize,
}

impl FrameBuffer {
    pub(crate) fn new() -> Self {
        Self {
            req: [0; MAX_PDU_SIZE],
            req_len: 0,
            resp: [0; MAX_PDU_SIZE],
            resp_len: 0,
        }
    }

    /// Load a request PDU, discarding any previous exchange.
    pub(crate) fn load_request(&mut self, pdu: &[u8]) {
        debug_assert!(pdu.len() <= MAX_PDU_SIZE);
        let len = pdu.len().min(MAX_PDU_SIZE);
        self.req[..len].copy_from_slice(&pdu[..len]);
        self.req_len = len;
        self.resp_len = 0;
    }

    /// Function code of the loaded request.
    #[inline]
    pub fn function_code(&self) -> u8 {
        if self.req_len > 0 {
            self.req[0]
        } else {
            0
        }
    }

    /// Pre-build the response header for a read request so the handler can
    /// fill the data area in place.
    pub(crate) fn prepare_read_response(&mut self, quantity: u16) {
        let byte_count = match self.function_code() {
            FC_READ_COILS | FC_READ_DISCRETE_INPUTS => quantity.div_ceil(8) as usize,
            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => quantity as usize * 2,
            _ => return,
        };
        self.resp[0] = self.function_code();
        self.resp[1] = byte_count as u8;
        self.resp[READ_DATA_OFFSET..READ_DATA_OFFSET + byte_count].fill(0);
        self.resp_len = READ_DATA_OFFSET + byte_count;
    }

    /// Build the echo/acknowledge response for a write request.
    pub(crate) fn prepare_write_response(&mut self) {
        // FC05/FC06 echo the full 5-byte request; FC15/FC16 acknowledge
        // with function code, address and quantity.
        let len = match self.function_code() {
            FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER => self.req_len.min(5),
            FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => 5,
            _ => return,
        };
        self.resp[..len].copy_from_slice(&self.req[..len]);
        self.resp_len = len;
    }

    /// The response PDU built so far.
    pub(crate) fn response(&self) -> &[u8] {
        &self.resp[..self.resp_len]
    }

    // ========================================================================
    // Handler-facing accessors
    // ========================================================================

    /// Incoming register value `i` of a write request (FC06/FC16).
    pub fn register(&self, i: u16) -> u16 {
        let offset = match self.function_code() {
            FC_WRITE_SINGLE_REGISTER => SINGLE_VALUE_OFFSET,
            FC_WRITE_MULTIPLE_REGISTERS => MULTI_DATA_OFFSET + i as usize * 2,
            _ => {
                debug_assert!(false, "register() on a non-register-write request");
                return 0;
            },
        };
        if offset + 1 >= self.req_len {
            debug_assert!(false, "register index {} out of request range", i);
            return 0;
        }
        u16::from_be_bytes([self.req[offset], self.req[offset + 1]])
    }

    /// Incoming coil state `i` of a write request (FC05/FC15).
    pub fn coil(&self, i: u16) -> bool {
        match self.function_code() {
            FC_WRITE_SINGLE_COIL => {
                if SINGLE_VALUE_OFFSET + 1 >= self.req_len {
                    debug_assert!(false, "coil() on a truncated request");
                    return false;
                }
                u16::from_be_bytes([
                    self.req[SINGLE_VALUE_OFFSET],
                    self.req[SINGLE_VALUE_OFFSET + 1],
                ]) == COIL_ON
            },
            FC_WRITE_MULTIPLE_COILS => {
                let offset = MULTI_DATA_OFFSET + i as usize / 8;
                if offset >= self.req_len {
                    debug_assert!(false, "coil index {} out of request range", i);
                    return false;
                }
                self.req[offset] & (1 << (i % 8)) != 0
            },
            _ => {
                debug_assert!(false, "coil() on a non-coil-write request");
                false
            },
        }
    }

    /// Put register value `i` into the read response (FC03/FC04).
    pub fn set_register(&mut self, i: u16, value: u16) {
        let offset = READ_DATA_OFFSET + i as usize * 2;
        if !matches!(
            self.function_code(),
            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS
        ) || offset + 1 >= self.resp_len
        {
            debug_assert!(false, "set_register({}) outside the response area", i);
            return;
        }
        self.resp[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Put coil state `i` into the read response (FC01/FC02).
    pub fn set_coil(&mut self, i: u16, on: bool) {
        let offset = READ_DATA_OFFSET + i as usize / 8;
        if !matches!(
            self.function_code(),
            FC_READ_COILS | FC_READ_DISCRETE_INPUTS
        ) || offset >= self.resp_len
        {
            debug_assert!(false, "set_coil({}) outside the response area", i);
            return;
        }
        let bit = 1u8 << (i % 8);
        if on {
            self.resp[offset] |= bit;
        } else {
            self.resp[offset] &= !bit;
        }
    }
}
