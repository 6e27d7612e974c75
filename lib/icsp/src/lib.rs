// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bit-banged PIC18 ICSP (in-circuit serial programming) protocol engine.
//!
//! ICSP is a two-wire synchronous protocol: the programmer drives a clock
//! (PGC) and a half-duplex data line (PGD) while holding the part in
//! program mode (PGM). Each operation is a 4-bit instruction, optionally
//! followed by a 16-bit operand, shifted LSB first.
//!
//! This crate speaks the protocol through a [`Transport`]: a byte channel
//! where every written byte drives the GPIO lines for one sample period and
//! the echo of the driven lines can be read back afterwards (the FTDI
//! synchronous bit-bang model). One protocol bit costs two transport bytes,
//! a rising and a falling clock edge, so readback sampling positions are
//! fixed byte offsets within a frame.
//!
//! The pieces, bottom up:
//!
//! 1. [`frame`] encodes an instruction into the GPIO transition bytes.
//! 2. [`Channel`] transmits frames and decodes TABLAT readback bytes.
//! 3. [`dump_registers`] sweeps target memory through a channel.
//!
//! The crate is transport-agnostic and allocation-free; callers provide the
//! transport and the destination buffer.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use core::fmt;

mod channel;
pub mod dump;
pub mod frame;

pub use channel::{Channel, RESPONSE_BIT_OFFSET};
pub use dump::{dump_registers, DumpError};

bitflags! {
    /// Lines of the adapter's GPIO word, as wired to the target's ICSP port.
    ///
    /// The bit positions are those of the FTDI TTL-232R-5V-WE cable and are
    /// part of the protocol contract, not per-invocation configuration.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Pins: u8 {
        /// Programming clock, PGC (orange wire, reader pin 5).
        const PGC = 1 << 0;
        /// Programming data, PGD (green wire, reader pin 4). Half duplex:
        /// this is also the line sampled out of the echoed stream.
        const PGD = 1 << 2;
        /// Program-mode enable, PGM (brown wire, reader pin 6). Doubles as
        /// the reset-hold line and stays asserted for the whole session.
        const PGM = 1 << 3;
    }
}

impl Pins {
    /// Alias for [`Pins::PGM`] in its reset-hold role.
    pub const CLR: Self = Self::PGM;

    /// Lines driven as outputs when the adapter's bit mode is configured.
    pub const OUTPUTS: Self = Self::PGC.union(Self::PGD).union(Self::PGM);
}

/// The 4-bit ICSP instruction set of the PIC18 target. This is a closed
/// enumeration; the dump sequence only ever issues `CoreInstruction` and
/// `TablatOut`, but the remaining encodings are part of the same contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Execute the 16-bit operand as a core instruction.
    CoreInstruction = 0b0000,
    /// Shift out the contents of TABLAT.
    TablatOut = 0b0010,
    TableRead = 0b1000,
    TableReadPostInc = 0b1001,
    TableReadPostDec = 0b1010,
    TableReadPreInc = 0b1011,
    TableWrite = 0b1100,
    TableWritePostInc2 = 0b1101,
    TableWriteStartPgmPostInc2 = 0b1110,
    TableWriteStartPgm = 0b1111,
}

impl Opcode {
    /// Every opcode, for exhaustive sweeps.
    pub const ALL: [Self; 10] = [
        Self::CoreInstruction,
        Self::TablatOut,
        Self::TableRead,
        Self::TableReadPostInc,
        Self::TableReadPostDec,
        Self::TableReadPreInc,
        Self::TableWrite,
        Self::TableWritePostInc2,
        Self::TableWriteStartPgmPostInc2,
        Self::TableWriteStartPgm,
    ];
}

/// Core-instruction operands issued during the dump, i.e. PIC18 instruction
/// encodings executed on the target's core. Named after their assembly
/// mnemonics; the values are fixed by the target's instruction set.
pub mod core_inst {
    /// `MOVLW 0` -- load the literal zero into WREG.
    pub const MOVLW_0: u16 = 0x0E00;
    /// `MOVWF FSR0H` -- copy WREG into the high byte of the FSR0 pointer.
    pub const MOVWF_FSR0H: u16 = 0x6EEA;
    /// `MOVWF FSR0L` -- copy WREG into the low byte of the FSR0 pointer.
    pub const MOVWF_FSR0L: u16 = 0x6EE9;
    /// `MOVF POSTINC0, W` -- fetch the byte FSR0 points at into WREG and
    /// post-increment FSR0.
    pub const MOVF_POSTINC0_W: u16 = 0x50EE;
    /// `MOVWF TABLAT` -- stage WREG in the table latch for readback.
    pub const MOVWF_TABLAT: u16 = 0x6EF5;
}

/// A duplex byte channel to the GPIO adapter.
///
/// Every byte written drives the output lines for one sample period; the
/// adapter simultaneously samples the lines and queues the result, so each
/// write must be followed by a read of equal length to drain the echo.
/// Implementations are expected to block until the transfer completes or
/// the underlying driver reports failure; the protocol layer never retries.
pub trait Transport {
    /// Drives `bytes` onto the lines. Returns the number of bytes accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Reads echoed line samples into `out`. Returns the number of bytes
    /// transferred.
    fn read(&mut self, out: &mut [u8]) -> Result<usize, TransportError>;
}

/// Ways a [`Transport`] can fail. Any of these is terminal for the session:
/// after a failed transfer the target's shift-register state is unknown.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The channel is not open. Nothing has been driven onto the lines.
    Unavailable,
    /// The underlying driver reported a non-success status code.
    Io(u32),
    /// A transfer moved fewer bytes than requested. The adapter's FIFO is
    /// now out of step with the frame boundaries.
    Short { expected: usize, actual: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str("transport is not open"),
            Self::Io(status) => {
                write!(f, "transport I/O failed (status {status})")
            }
            Self::Short { expected, actual } => {
                write!(f, "short transfer: {actual} of {expected} bytes")
            }
        }
    }
}

impl core::error::Error for TransportError {}

#[cfg(test)]
pub(crate) mod testutil {
    use super::{Transport, TransportError};
    use std::collections::VecDeque;

    /// Loopback transport double: records every frame written and echoes it
    /// back on the next read, like the adapter's synchronous bit-bang mode.
    /// Echoes can be overridden to simulate the target pulling PGD, and any
    /// write can be scripted to fail.
    #[derive(Default)]
    pub struct MockTransport {
        pub writes: Vec<Vec<u8>>,
        pending: VecDeque<Vec<u8>>,
        scripted: VecDeque<Vec<u8>>,
        pub fail_write_at: Option<usize>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues `echo` to be returned instead of the loopback of the
        /// corresponding write.
        pub fn script_echo(&mut self, echo: Vec<u8>) {
            self.scripted.push_back(echo);
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
            if self.fail_write_at == Some(self.writes.len()) {
                return Err(TransportError::Io(4));
            }
            self.writes.push(bytes.to_vec());
            let echo = self
                .scripted
                .pop_front()
                .unwrap_or_else(|| bytes.to_vec());
            self.pending.push_back(echo);
            Ok(bytes.len())
        }

        fn read(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
            let echo =
                self.pending.pop_front().ok_or(TransportError::Unavailable)?;
            out[..echo.len()].copy_from_slice(&echo);
            Ok(echo.len())
        }
    }
}
