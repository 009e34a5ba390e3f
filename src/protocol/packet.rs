//! Wire packet for the register protocol.
//!
//! Every bus exchange moves exactly one fixed-size frame in each direction:
//!
//! ```text
//! byte 0        header: op code in bits 6..7, register count in bits 0..5
//! byte 1        page
//! byte 2        offset
//! bytes 3..67   32 registers, little-endian u16
//! byte 67       CRC-8 over bytes 0..67 with the CRC byte held at zero
//! ```
//!
//! Registers beyond `count` carry the sentinel `0x55AA` rather than zero so a
//! stuck-low or stuck-high link shows up as a CRC or sentinel anomaly instead
//! of plausible-looking zeros.

/// Protocol maximum register count per exchange.
pub const MAX_REGS: usize = 32;

/// Encoded frame length in bytes: header, page, offset, registers, CRC.
pub const FRAME_LEN: usize = 3 + 2 * MAX_REGS + 1;

/// Fill value for registers beyond `count`.
pub const PAD_SENTINEL: u16 = 0x55AA;

const OP_SHIFT: u8 = 6;
const COUNT_MASK: u8 = 0x3F;

/// Operation code carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Register read request, or its reply carrying the values.
    Read,
    /// Register write request, or its zero-count acknowledgment.
    Write,
    /// Failure reported by the coprocessor.
    Error,
}

impl OpCode {
    fn to_bits(self) -> u8 {
        match self {
            OpCode::Read => 0,
            OpCode::Write => 1,
            OpCode::Error => 2,
        }
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(OpCode::Read),
            1 => Some(OpCode::Write),
            2 => Some(OpCode::Error),
            _ => None,
        }
    }
}

/// Packet construction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// More registers requested than the protocol maximum.
    TooManyRegisters,
}

/// Frame decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Stored CRC does not match the recomputed CRC.
    Crc,
    /// Header op code bits are not a known operation.
    Opcode,
    /// Header register count exceeds the protocol maximum.
    Count,
}

/// One wire unit: constructed per call, never retained past its round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    op: OpCode,
    count: u8,
    page: u8,
    offset: u8,
    regs: [u16; MAX_REGS],
}

impl Packet {
    fn new(op: OpCode, page: u8, offset: u8, count: usize) -> Result<Self, PacketError> {
        if count > MAX_REGS {
            return Err(PacketError::TooManyRegisters);
        }
        Ok(Self {
            op,
            count: count as u8,
            page,
            offset,
            regs: [PAD_SENTINEL; MAX_REGS],
        })
    }

    /// Builds a read request for `count` registers.
    pub fn read_request(page: u8, offset: u8, count: usize) -> Result<Self, PacketError> {
        Self::new(OpCode::Read, page, offset, count)
    }

    /// Builds a write request carrying `values`.
    pub fn write_request(page: u8, offset: u8, values: &[u16]) -> Result<Self, PacketError> {
        let mut packet = Self::new(OpCode::Write, page, offset, values.len())?;
        packet.regs[..values.len()].copy_from_slice(values);
        Ok(packet)
    }

    /// Builds a reply frame; used by reply validation tests and the simulated
    /// board.
    pub fn reply(op: OpCode, page: u8, offset: u8, values: &[u16]) -> Result<Self, PacketError> {
        let mut packet = Self::new(op, page, offset, values.len())?;
        packet.regs[..values.len()].copy_from_slice(values);
        Ok(packet)
    }

    pub fn op(&self) -> OpCode {
        self.op
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn page(&self) -> u8 {
        self.page
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }

    /// The meaningful registers, `count` of them.
    pub fn regs(&self) -> &[u16] {
        &self.regs[..self.count as usize]
    }

    /// Encodes the packet into a wire frame, CRC included.
    pub fn encode(&self, frame: &mut [u8; FRAME_LEN]) {
        frame[0] = (self.op.to_bits() << OP_SHIFT) | (self.count & COUNT_MASK);
        frame[1] = self.page;
        frame[2] = self.offset;
        for (i, reg) in self.regs.iter().enumerate() {
            let bytes = reg.to_le_bytes();
            frame[3 + 2 * i] = bytes[0];
            frame[4 + 2 * i] = bytes[1];
        }
        frame[FRAME_LEN - 1] = 0;
        frame[FRAME_LEN - 1] = crc8(frame);
    }

    /// Decodes and validates a wire frame.
    pub fn decode(frame: &[u8; FRAME_LEN]) -> Result<Self, DecodeError> {
        let mut scratch = *frame;
        scratch[FRAME_LEN - 1] = 0;
        if crc8(&scratch) != frame[FRAME_LEN - 1] {
            return Err(DecodeError::Crc);
        }

        let op = OpCode::from_bits(frame[0] >> OP_SHIFT).ok_or(DecodeError::Opcode)?;
        let count = frame[0] & COUNT_MASK;
        if count as usize > MAX_REGS {
            return Err(DecodeError::Count);
        }

        let mut regs = [PAD_SENTINEL; MAX_REGS];
        for (i, reg) in regs.iter_mut().enumerate() {
            *reg = u16::from_le_bytes([frame[3 + 2 * i], frame[4 + 2 * i]]);
        }

        Ok(Self {
            op,
            count,
            page: frame[1],
            offset: frame[2],
            regs,
        })
    }
}

/// CRC-8 with the reflected 0x31 polynomial, init 0.
///
/// Bitwise rather than table-driven; the frame is 68 bytes and the link runs
/// at kHz exchange rates, so the table buys nothing.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8C;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
