//! Simulated I/O coprocessor for host testing.
//!
//! [`SimBoard`] implements [`BusInterface`] by decoding request frames
//! against an in-memory register map and producing well-formed replies. It
//! also records write headers so tests can assert the order of bus actions
//! (for example the clear-then-retime sequence of a PWM frequency change),
//! and injects faults: failed transfers, error-op replies, corrupted reply
//! frames.
//!
//! Always available, like the mock time source, so integration tests outside
//! the crate can drive the full stack without hardware.

use heapless::{FnvIndexMap, Vec};

use crate::protocol::packet::{OpCode, Packet, FRAME_LEN, MAX_REGS};
use crate::protocol::{PAGE_SETUP, SETUP_FORCE_SAFETY_OFF};
use crate::transport::{BusError, BusInterface};

/// Capacity of the simulated register map. Power of two, as the index map
/// requires; comfortably more than the pages the driver touches.
const REG_CAPACITY: usize = 1024;

/// Maximum recorded writes before the log saturates.
const WRITE_LOG_CAPACITY: usize = 128;

/// Header of one observed register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub page: u8,
    pub offset: u8,
    pub count: u8,
    /// First register of the write, for quick assertions.
    pub first_value: u16,
}

/// In-memory coprocessor.
pub struct SimBoard {
    regs: FnvIndexMap<u16, u16, REG_CAPACITY>,
    writes: Vec<WriteRecord, WRITE_LOG_CAPACITY>,
    fail_exchanges: u32,
    error_replies: u32,
    corrupt_replies: u32,
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            regs: FnvIndexMap::new(),
            writes: Vec::new(),
            fail_exchanges: 0,
            error_replies: 0,
            corrupt_replies: 0,
        }
    }

    fn key(page: u8, offset: u8) -> u16 {
        (page as u16) << 8 | offset as u16
    }

    /// Seeds a register, as firmware state the host will read.
    pub fn set_register(&mut self, page: u8, offset: u8, value: u16) {
        // Capacity overflow only happens if a test seeds more than the map
        // holds, which is a test bug; surface it loudly.
        self.regs
            .insert(Self::key(page, offset), value)
            .expect("sim register map full");
    }

    /// Reads a register back, defaulting to zero like erased firmware state.
    pub fn register(&self, page: u8, offset: u8) -> u16 {
        *self.regs.get(&Self::key(page, offset)).unwrap_or(&0)
    }

    /// Makes the next `n` exchanges fail with a bus transfer error.
    pub fn fail_next_exchanges(&mut self, n: u32) {
        self.fail_exchanges = n;
    }

    /// Makes the next `n` requests answered with the `Error` op code.
    pub fn reject_next_requests(&mut self, n: u32) {
        self.error_replies = n;
    }

    /// Corrupts the next `n` reply frames after the CRC is sealed.
    pub fn corrupt_next_replies(&mut self, n: u32) {
        self.corrupt_replies = n;
    }

    /// All writes observed so far, oldest first.
    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    /// Writes observed on one page, oldest first.
    pub fn writes_to_page(&self, page: u8) -> impl Iterator<Item = &WriteRecord> {
        self.writes.iter().filter(move |w| w.page == page)
    }

    /// Forgets the write log; register contents are kept.
    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    fn record_write(&mut self, packet: &Packet) {
        let record = WriteRecord {
            page: packet.page(),
            offset: packet.offset(),
            count: packet.count(),
            first_value: packet.regs().first().copied().unwrap_or(0),
        };
        // Saturating: a full log drops the oldest information last; tests
        // that care clear the log between phases.
        let _ = self.writes.push(record);
    }

    fn build_reply(&mut self, request: &Packet) -> Packet {
        if self.error_replies > 0 {
            self.error_replies -= 1;
            return Packet::reply(OpCode::Error, request.page(), request.offset(), &[])
                .expect("empty reply always fits");
        }

        match request.op() {
            OpCode::Read => {
                let mut values = [0u16; MAX_REGS];
                let count = request.count() as usize;
                for (i, value) in values[..count].iter_mut().enumerate() {
                    *value = self.register(request.page(), request.offset() + i as u8);
                }
                Packet::reply(OpCode::Read, request.page(), request.offset(), &values[..count])
                    .expect("reply count mirrors a validated request")
            }
            OpCode::Write => {
                self.record_write(request);
                for (i, &value) in request.regs().iter().enumerate() {
                    let offset = request.offset() + i as u8;
                    // The safety release is write-only in firmware and shares
                    // its offset with the CRC high word; storing it would
                    // shadow the CRC readback.
                    if request.page() == PAGE_SETUP && offset == SETUP_FORCE_SAFETY_OFF {
                        continue;
                    }
                    self.set_register(request.page(), offset, value);
                }
                Packet::reply(OpCode::Write, request.page(), request.offset(), &[])
                    .expect("empty reply always fits")
            }
            OpCode::Error => Packet::reply(OpCode::Error, request.page(), request.offset(), &[])
                .expect("empty reply always fits"),
        }
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl BusInterface for SimBoard {
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        if self.fail_exchanges > 0 {
            self.fail_exchanges -= 1;
            return Err(BusError::Transfer);
        }

        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(tx);
        let request = match Packet::decode(&frame) {
            Ok(packet) => packet,
            // A board that cannot parse the request stays silent; the host
            // sees garbage and classifies it as corruption.
            Err(_) => return Err(BusError::Timeout),
        };

        let reply = self.build_reply(&request);
        let mut out = [0u8; FRAME_LEN];
        reply.encode(&mut out);

        if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            out[7] ^= 0x5A;
            // Keep the CRC byte as sealed over the uncorrupted frame so the
            // host's recomputation disagrees.
        }

        rx.copy_from_slice(&out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::crc8;
    use crate::protocol::FORCE_SAFETY_MAGIC;

    fn roundtrip(board: &mut SimBoard, request: &Packet) -> Result<Packet, BusError> {
        let mut tx = [0u8; FRAME_LEN];
        request.encode(&mut tx);
        let mut rx = [0u8; FRAME_LEN];
        board.exchange(&tx, &mut rx)?;
        Ok(Packet::decode(&rx).expect("sim replies are well-formed"))
    }

    #[test]
    fn read_returns_seeded_registers() {
        let mut board = SimBoard::new();
        board.set_register(1, 2, 0x0410);
        board.set_register(1, 3, 0x0020);

        let request = Packet::read_request(1, 2, 2).unwrap();
        let reply = roundtrip(&mut board, &request).unwrap();
        assert_eq!(reply.regs(), &[0x0410, 0x0020]);
    }

    #[test]
    fn write_is_stored_and_logged() {
        let mut board = SimBoard::new();
        let request = Packet::write_request(54, 0, &[1500, 1200]).unwrap();
        roundtrip(&mut board, &request).unwrap();

        assert_eq!(board.register(54, 0), 1500);
        assert_eq!(board.register(54, 1), 1200);
        assert_eq!(
            board.writes(),
            &[WriteRecord {
                page: 54,
                offset: 0,
                count: 2,
                first_value: 1500
            }]
        );
    }

    #[test]
    fn safety_release_register_is_write_only() {
        let mut board = SimBoard::new();
        board.set_register(PAGE_SETUP, SETUP_FORCE_SAFETY_OFF, 0x1234);

        let request =
            Packet::write_request(PAGE_SETUP, SETUP_FORCE_SAFETY_OFF, &[FORCE_SAFETY_MAGIC])
                .unwrap();
        roundtrip(&mut board, &request).unwrap();

        // Acknowledged and logged, but the CRC high word behind the offset
        // survives.
        assert_eq!(board.register(PAGE_SETUP, SETUP_FORCE_SAFETY_OFF), 0x1234);
        assert_eq!(board.writes()[0].first_value, FORCE_SAFETY_MAGIC);
    }

    #[test]
    fn fault_injection_counts_down() {
        let mut board = SimBoard::new();
        board.fail_next_exchanges(2);

        let request = Packet::read_request(1, 2, 1).unwrap();
        assert!(roundtrip(&mut board, &request).is_err());
        assert!(roundtrip(&mut board, &request).is_err());
        assert!(roundtrip(&mut board, &request).is_ok());
    }

    #[test]
    fn rejected_request_gets_error_op() {
        let mut board = SimBoard::new();
        board.reject_next_requests(1);

        let request = Packet::read_request(1, 2, 1).unwrap();
        let reply = roundtrip(&mut board, &request).unwrap();
        assert_eq!(reply.op(), OpCode::Error);
    }

    #[test]
    fn corrupted_reply_fails_host_crc() {
        let mut board = SimBoard::new();
        board.corrupt_next_replies(1);

        let request = Packet::read_request(1, 2, 4).unwrap();
        let mut tx = [0u8; FRAME_LEN];
        request.encode(&mut tx);
        let mut rx = [0u8; FRAME_LEN];
        board.exchange(&tx, &mut rx).unwrap();

        let mut scratch = rx;
        let stored = scratch[FRAME_LEN - 1];
        scratch[FRAME_LEN - 1] = 0;
        assert_ne!(crc8(&scratch), stored);
    }
}
