//! RTU slave frame engine
//!
//! Assembles ADUs off a byte-oriented serial link, validates unit id and
//! CRC, decodes the eight supported function codes and dispatches to a
//! [`FrameHandler`]. Responses (including exception frames) are built and
//! transmitted here, wrapped with RS-485 direction control.
//!
//! Frame boundaries follow RTU timing: a frame is complete either when the
//! buffered length reaches the length implied by its function code, or after
//! t3.5 (3.5 character times) of bus silence. The early-completion path keeps
//! latency low; the silence path catches function codes whose length cannot
//! be predicted.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::buffer::FrameBuffer;
use crate::constants::*;
use crate::crc::{check_adu, crc16};
use crate::link::{DirectionControl, SerialLink};
use crate::status::{CallbackKind, ModbusStatus};

/// Receiver of decoded requests.
///
/// One handler serves all six callback slots; `kind` selects the entity
/// table. The handler reads write payloads from `frame` and fills read
/// responses into it, then returns the status the engine should answer with.
pub trait FrameHandler {
    fn handle(
        &mut self,
        now_ms: u32,
        kind: CallbackKind,
        address: u16,
        quantity: u16,
        frame: &mut FrameBuffer,
    ) -> ModbusStatus;
}

/// Engine counters, readable for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Valid frames addressed to this slave (or broadcast)
    pub frames_received: u32,
    /// Normal responses transmitted
    pub responses_sent: u32,
    /// Exception responses transmitted
    pub exceptions_sent: u32,
    /// Frames discarded on CRC mismatch
    pub crc_errors: u32,
    /// Frames addressed to another unit
    pub ignored: u32,
    /// Frames dropped (short, overlong, malformed broadcast reads)
    pub dropped: u32,
}

/// Modbus RTU slave frame engine.
pub struct RtuSlave {
    link: Box<dyn SerialLink>,
    direction: Option<Box<dyn DirectionControl>>,
    unit_id: u8,
    silence_ms: u32,
    adu: [u8; MAX_ADU_SIZE],
    adu_len: usize,
    last_byte_ms: u32,
    installed: [bool; CallbackKind::COUNT],
    buffer: FrameBuffer,
    stats: EngineStats,
}

impl RtuSlave {
    /// Bind the engine to a link, apply the line speed, and start listening.
    ///
    /// No callback slot is installed yet; requests to uninstalled slots
    /// answer ILLEGAL FUNCTION.
    pub fn new(
        mut link: Box<dyn SerialLink>,
        direction: Option<Box<dyn DirectionControl>>,
        unit_id: u8,
        baud: u32,
    ) -> Self {
        if unit_id == BROADCAST_UNIT_ID || unit_id > MAX_UNIT_ID {
            warn!("Unit id {} outside the standard 1..=247 range", unit_id);
        }
        link.set_baud_rate(baud);
        let mut engine = Self {
            link,
            direction,
            unit_id,
            silence_ms: silence_interval_ms(baud),
            adu: [0; MAX_ADU_SIZE],
            adu_len: 0,
            last_byte_ms: 0,
            installed: [false; CallbackKind::COUNT],
            buffer: FrameBuffer::new(),
            stats: EngineStats::default(),
        };
        if let Some(dir) = engine.direction.as_mut() {
            dir.set_transmit(false);
        }
        debug!(
            "RTU engine bound: unit_id={}, baud={}, t3.5={}ms",
            unit_id, baud, engine.silence_ms
        );
        engine
    }

    /// Install a callback slot so matching requests reach the handler.
    pub fn install(&mut self, kind: CallbackKind) {
        self.installed[kind.index()] = true;
    }

    pub fn is_installed(&self, kind: CallbackKind) -> bool {
        self.installed[kind.index()]
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Drain the link and process at most one complete frame.
    ///
    /// Must be called often enough that the inter-character timing of the
    /// line is respected (sub-millisecond gaps at 9600 baud and above).
    pub fn poll(&mut self, now_ms: u32, handler: &mut dyn FrameHandler) {
        while let Some(byte) = self.link.read() {
            if self.adu_len >= MAX_ADU_SIZE {
                warn!("ADU buffer overrun, discarding frame");
                self.stats.dropped += 1;
                self.adu_len = 0;
            }
            self.adu[self.adu_len] = byte;
            self.adu_len += 1;
            self.last_byte_ms = now_ms;
        }

        if self.adu_len == 0 {
            return;
        }

        let complete = match expected_adu_len(&self.adu[..self.adu_len]) {
            Some(expected) if self.adu_len >= expected => Some(expected),
            _ if now_ms.wrapping_sub(self.last_byte_ms) >= self.silence_ms => Some(self.adu_len),
            _ => None,
        };

        if let Some(frame_len) = complete {
            self.process_frame(frame_len, now_ms, handler);
            // Anything past the processed frame was inter-frame garbage
            self.adu_len = 0;
        }
    }

    fn process_frame(&mut self, len: usize, now_ms: u32, handler: &mut dyn FrameHandler) {
        let frame = &self.adu[..len];
        trace!("RX {}", hex(frame));

        if len < MIN_ADU_SIZE {
            self.stats.dropped += 1;
            return;
        }

        let unit = frame[0];
        let broadcast = unit == BROADCAST_UNIT_ID;
        if !broadcast && unit != self.unit_id {
            self.stats.ignored += 1;
            return;
        }

        if !check_adu(frame) {
            warn!("CRC mismatch on {}-byte frame", len);
            self.stats.crc_errors += 1;
            return;
        }

        self.stats.frames_received += 1;
        let fc = frame[1];

        let Some(kind) = CallbackKind::from_function_code(fc) else {
            debug!("Unsupported function code {:02X}", fc);
            if !broadcast {
                self.send_exception(fc, ModbusStatus::IllegalFunction);
            }
            return;
        };

        let pdu_len = len - 3;
        let (address, quantity) = match decode_request(&self.adu[1..1 + pdu_len]) {
            Ok(decoded) => decoded,
            Err(status) => {
                debug!("Malformed FC{:02X} request: {}", fc, status);
                if !broadcast {
                    self.send_exception(fc, status);
                }
                return;
            },
        };

        if broadcast && !kind.is_write() {
            self.stats.dropped += 1;
            return;
        }

        if !self.installed[kind.index()] {
            debug!("FC{:02X} has no installed callback", fc);
            if !broadcast {
                self.send_exception(fc, ModbusStatus::IllegalFunction);
            }
            return;
        }

        self.buffer.load_request(&self.adu[1..1 + pdu_len]);
        if !kind.is_write() {
            self.buffer.prepare_read_response(quantity);
        }

        debug!(
            "Dispatch FC={:02X} kind={:?} addr=0x{:04X} qty={}",
            fc, kind, address, quantity
        );
        let status = handler.handle(now_ms, kind, address, quantity, &mut self.buffer);

        if broadcast {
            // Broadcast writes execute silently
            return;
        }

        if status.is_ok() {
            if kind.is_write() {
                self.buffer.prepare_write_response();
            }
            self.send_response();
        } else {
            self.send_exception(fc, status);
        }
    }

    fn send_response(&mut self) {
        let (frame, len) = {
            let pdu = self.buffer.response();
            build_adu(self.unit_id, pdu)
        };
        self.transmit(&frame[..len]);
        self.stats.responses_sent += 1;
    }

    fn send_exception(&mut self, fc: u8, status: ModbusStatus) {
        let Some(code) = status.exception_code() else {
            return;
        };
        let pdu = [fc | FC_EXCEPTION_FLAG, code];
        let (frame, len) = build_adu(self.unit_id, &pdu);
        self.transmit(&frame[..len]);
        self.stats.exceptions_sent += 1;
    }

    fn transmit(&mut self, frame: &[u8]) {
        trace!("TX {}", hex(frame));
        if let Some(dir) = self.direction.as_mut() {
            dir.set_transmit(true);
        }
        self.link.write_all(frame);
        self.link.flush();
        if let Some(dir) = self.direction.as_mut() {
            dir.set_transmit(false);
        }
    }
}

/// Wrap a PDU into a complete ADU with unit id and trailing CRC.
fn build_adu(unit_id: u8, pdu: &[u8]) -> ([u8; MAX_ADU_SIZE], usize) {
    debug_assert!(pdu.len() <= MAX_PDU_SIZE);
    let mut frame = [0u8; MAX_ADU_SIZE];
    frame[0] = unit_id;
    frame[1..1 + pdu.len()].copy_from_slice(pdu);
    let crc = crc16(&frame[..1 + pdu.len()]);
    frame[1 + pdu.len()..3 + pdu.len()].copy_from_slice(&crc.to_le_bytes());
    (frame, pdu.len() + 3)
}

/// ADU length implied by the function code, once enough bytes arrived.
fn expected_adu_len(adu: &[u8]) -> Option<usize> {
    if adu.len() < 2 {
        return None;
    }
    match adu[1] {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS | FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER => Some(8),
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => {
            // unit + fc + addr(2) + qty(2) + byte count + data + crc(2)
            if adu.len() >= 7 {
                Some(9 + adu[6] as usize)
            } else {
                None
            }
        },
        _ => None,
    }
}

/// Decode (address, quantity) from a validated-CRC request PDU.
///
/// Quantity ceilings and byte counts are enforced here so handlers only see
/// well-formed ranges. The status vocabulary is restricted to the kernel's
/// exception set, so malformed counts answer ILLEGAL DATA ADDRESS.
fn decode_request(pdu: &[u8]) -> std::result::Result<(u16, u16), ModbusStatus> {
    if pdu.len() < 5 {
        return Err(ModbusStatus::IllegalDataAddress);
    }
    let fc = pdu[0];
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let word = u16::from_be_bytes([pdu[3], pdu[4]]);

    match fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
            if word == 0 || word > MAX_READ_COILS || pdu.len() != 5 {
                return Err(ModbusStatus::IllegalDataAddress);
            }
            Ok((address, word))
        },
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            if word == 0 || word > MAX_READ_REGISTERS || pdu.len() != 5 {
                return Err(ModbusStatus::IllegalDataAddress);
            }
            Ok((address, word))
        },
        FC_WRITE_SINGLE_COIL => {
            if pdu.len() != 5 || (word != COIL_ON && word != COIL_OFF) {
                return Err(ModbusStatus::IllegalDataAddress);
            }
            Ok((address, 1))
        },
        FC_WRITE_SINGLE_REGISTER => {
            if pdu.len() != 5 {
                return Err(ModbusStatus::IllegalDataAddress);
            }
            Ok((address, 1))
        },
        FC_WRITE_MULTIPLE_COILS => {
            let byte_count = *pdu.get(5).ok_or(ModbusStatus::IllegalDataAddress)? as usize;
            if word == 0
                || word > MAX_WRITE_COILS
                || byte_count != word.div_ceil(8) as usize
                || pdu.len() != 6 + byte_count
            {
                return Err(ModbusStatus::IllegalDataAddress);
            }
            Ok((address, word))
        },
        FC_WRITE_MULTIPLE_REGISTERS => {
            let byte_count = *pdu.get(5).ok_or(ModbusStatus::IllegalDataAddress)? as usize;
            if word == 0
                || word > MAX_WRITE_REGISTERS
                || byte_count != word as usize * 2
                || pdu.len() != 6 + byte_count
            {
                return Err(ModbusStatus::IllegalDataAddress);
            }
            Ok((address, word))
        },
        _ => Err(ModbusStatus::IllegalFunction),
    }
}

/// t3.5 inter-frame silence for a line speed.
///
/// 3.5 character times of 11 bits each, floored to the 2ms the standard
/// fixes for 19200 baud and above.
fn silence_interval_ms(baud: u32) -> u32 {
    if baud >= 19_200 {
        2
    } else {
        38_500u32.div_ceil(baud.max(1)).max(2)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
