// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instruction issue and TABLAT readback over a loopback transport.

use crate::frame;
use crate::{Opcode, Pins, Transport, TransportError};

/// Offset into an echoed write frame of the byte carrying the target's
/// first response bit.
///
/// The target starts shifting TABLAT out one clock after the 4-bit opcode
/// completes, one bit per clock, sampled on the falling edge. With two echo
/// bytes per clock the first response bit is readable at byte `1 + 2 * 12`,
/// and the remaining bits follow at stride 2. This is fixed shift latency
/// of the part, i.e. protocol contract, not something to rederive.
pub const RESPONSE_BIT_OFFSET: usize = 1 + 2 * 12;

/// An ICSP instruction channel over a [`Transport`].
///
/// The target is a stateful shift register: operations execute strictly in
/// issue order, and every transmitted frame's echo is drained before the
/// next frame goes out. There is no retry at this layer; a failed transfer
/// leaves the target's state unknown and the error propagates to the
/// session owner.
pub struct Channel<T> {
    pub(crate) transport: T,
}

impl<T: Transport> Channel<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Issues an instruction with a 16-bit operand. The echoed frame is
    /// drained and discarded.
    pub fn write(
        &mut self,
        op: Opcode,
        operand: u16,
    ) -> Result<(), TransportError> {
        let tx = frame::encode_write(op, operand);
        let mut echo = [0; frame::WRITE_FRAME_LEN];
        self.roundtrip(&tx, &mut echo)
    }

    /// Issues `TablatOut` and decodes the byte the target shifts back.
    ///
    /// The request goes out as a full write frame with a zero operand: the
    /// target needs the sixteen operand-clock pulses to shift its eight
    /// response bits onto PGD, and on a loopback transport those pulses
    /// only exist if we drive them. Response bits are sampled at fixed
    /// offsets in the echo and reassembled MSB last, matching the order
    /// they leave the part.
    pub fn read_tablat(&mut self) -> Result<u8, TransportError> {
        let tx = frame::encode_write(Opcode::TablatOut, 0);
        let mut echo = [0; frame::WRITE_FRAME_LEN];
        self.roundtrip(&tx, &mut echo)?;

        let mut out = 0u8;
        for i in 0..8 {
            out >>= 1;
            if echo[i * 2 + RESPONSE_BIT_OFFSET] & Pins::PGD.bits() != 0 {
                out |= 0x80;
            }
        }
        Ok(out)
    }

    /// One blocking write followed by one blocking read of equal length.
    ///
    /// The read is mandatory even when the caller has no use for the echo:
    /// the adapter queues one sampled byte per driven byte, and anything
    /// left in that queue shifts every later frame's sampling offsets.
    fn roundtrip(
        &mut self,
        tx: &[u8],
        echo: &mut [u8],
    ) -> Result<(), TransportError> {
        let written = self.transport.write(tx)?;
        if written != tx.len() {
            return Err(TransportError::Short {
                expected: tx.len(),
                actual: written,
            });
        }
        let read = self.transport.read(echo)?;
        if read != echo.len() {
            return Err(TransportError::Short {
                expected: echo.len(),
                actual: read,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn write_transmits_one_frame_and_drains_the_echo() {
        let mut chan = Channel::new(MockTransport::new());
        chan.write(Opcode::CoreInstruction, 0x6EEA).unwrap();
        assert_eq!(chan.transport.writes.len(), 1);
        assert_eq!(
            chan.transport.writes[0],
            frame::encode_write(Opcode::CoreInstruction, 0x6EEA)
        );
        // A second write must not see stale echo bytes.
        chan.write(Opcode::CoreInstruction, 0x0E00).unwrap();
    }

    #[test]
    fn read_tablat_samples_fixed_offsets_msb_last() {
        // Synthetic echo: PGD asserted at the sampled offsets for response
        // bits 0, 2, 4 and 6. Each sampled bit is shifted in at the top, so
        // the alternating pattern decodes to 0b0101_0101.
        let mut echo = vec![0u8; frame::WRITE_FRAME_LEN];
        for i in [0, 2, 4, 6] {
            echo[i * 2 + RESPONSE_BIT_OFFSET] |= Pins::PGD.bits();
        }
        let mut mock = MockTransport::new();
        mock.script_echo(echo);
        let mut chan = Channel::new(mock);
        assert_eq!(chan.read_tablat().unwrap(), 0x55);
    }

    #[test]
    fn read_tablat_full_scale() {
        let mut echo = vec![0u8; frame::WRITE_FRAME_LEN];
        for i in 0..8 {
            echo[i * 2 + RESPONSE_BIT_OFFSET] |= Pins::PGD.bits();
        }
        let mut mock = MockTransport::new();
        mock.script_echo(echo);
        let mut chan = Channel::new(mock);
        assert_eq!(chan.read_tablat().unwrap(), 0xFF);

        let mut mock = MockTransport::new();
        mock.script_echo(vec![0; frame::WRITE_FRAME_LEN]);
        let mut chan = Channel::new(mock);
        assert_eq!(chan.read_tablat().unwrap(), 0x00);
    }

    #[test]
    fn read_tablat_ignores_other_lines_in_the_echo() {
        // PGC/PGM activity in the echo must not leak into the decode.
        let mut echo = frame::encode_write(Opcode::TablatOut, 0).to_vec();
        for byte in &mut echo {
            *byte &= !Pins::PGD.bits();
        }
        echo[3 * 2 + RESPONSE_BIT_OFFSET] |= Pins::PGD.bits();
        let mut mock = MockTransport::new();
        mock.script_echo(echo);
        let mut chan = Channel::new(mock);
        assert_eq!(chan.read_tablat().unwrap(), 1 << 3);
    }

    #[test]
    fn transport_failure_propagates_without_retry() {
        let mut mock = MockTransport::new();
        mock.fail_write_at = Some(0);
        let mut chan = Channel::new(mock);
        assert_eq!(
            chan.write(Opcode::CoreInstruction, 0),
            Err(TransportError::Io(4))
        );
        assert!(chan.transport.writes.is_empty());
    }
}
