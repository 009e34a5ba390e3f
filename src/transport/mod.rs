//! Frame-level link transport.
//!
//! [`Transport`] turns one register request into exactly one bus exchange and
//! validates the reply's integrity. It never retries: the link has a hard
//! real-time budget shared by every subsystem, and an unconditional retry
//! here could starve the others. Retry policy belongs to the callers, which
//! each own a deadline and can afford to wait a tick.

use crate::protocol::packet::{DecodeError, OpCode, Packet, FRAME_LEN};

/// Physical bus failure, as reported by the bus implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The write-then-read transfer failed.
    Transfer,
    /// The far end did not respond within the bus timeout.
    Timeout,
}

/// One atomic "write request frame, read reply frame" exchange.
///
/// Implementations wrap whatever physically carries the bytes (SPI on real
/// hardware, an in-memory board in tests). The exchange must be atomic with
/// respect to other bus users; serialization across callers is handled above
/// this trait by the register client's lock.
pub trait BusInterface {
    /// Writes `tx` to the device and reads the reply into `rx`.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError>;
}

/// Classified exchange failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Physical failure; propagated to the caller, never retried here.
    Bus(BusError),
    /// Reply frame failed integrity checks; retryable by the caller.
    CrcMismatch,
    /// The far end reported the `Error` operation code.
    Protocol,
    /// Reply register count differs from the request; protocol-class failure.
    CountMismatch,
}

impl TransportError {
    /// True for failures that mean the request itself was rejected, as
    /// opposed to frame corruption worth retrying.
    pub fn is_protocol(&self) -> bool {
        matches!(self, TransportError::Protocol | TransportError::CountMismatch)
    }
}

/// Frame codec plus reply validation over a [`BusInterface`].
pub struct Transport<B: BusInterface> {
    bus: B,
}

impl<B: BusInterface> Transport<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Performs one exchange and returns the decoded, validated reply.
    ///
    /// A read reply must echo the requested count; a write is acknowledged
    /// with a zero-count frame. Anything else is a [`TransportError`].
    pub fn exchange(&mut self, request: &Packet) -> Result<Packet, TransportError> {
        let mut tx = [0u8; FRAME_LEN];
        request.encode(&mut tx);
        let mut rx = [0u8; FRAME_LEN];
        self.bus.exchange(&tx, &mut rx).map_err(TransportError::Bus)?;

        let reply = Packet::decode(&rx).map_err(|e| match e {
            // A malformed header is indistinguishable from line noise that
            // happened to keep the CRC intact; classify both as corruption.
            DecodeError::Crc | DecodeError::Opcode | DecodeError::Count => {
                TransportError::CrcMismatch
            }
        })?;

        if reply.op() == OpCode::Error {
            return Err(TransportError::Protocol);
        }

        let expected = match request.op() {
            OpCode::Read => request.count(),
            _ => 0,
        };
        if reply.count() != expected {
            return Err(TransportError::CountMismatch);
        }

        Ok(reply)
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Consumes the transport, returning the bus. Used at link teardown.
    pub fn release(self) -> B {
        self.bus
    }
}
