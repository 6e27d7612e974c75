// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Frame encoding: instructions to GPIO transition bytes.
//!
//! Each protocol bit becomes two transport bytes: first the data value with
//! the clock raised, then the identical byte with the clock dropped, giving
//! the target a clean falling edge to latch on. PGM stays asserted in every
//! byte so the part never leaves program mode mid-frame. A single trailing
//! byte returns clock and data to idle while keeping PGM up.
//!
//! Frame lengths are therefore a pure function of the bit count:
//! `2 * bits + 1`.

use crate::{Opcode, Pins};

/// Opcode width in bits; every frame starts with these.
pub const OPCODE_BITS: usize = 4;
/// Operand width in bits for instruction+operand frames.
pub const OPERAND_BITS: usize = 16;

/// Byte length of an instruction+operand frame.
pub const WRITE_FRAME_LEN: usize = 2 * (OPCODE_BITS + OPERAND_BITS) + 1;
/// Byte length of an instruction-only frame.
pub const COMMAND_FRAME_LEN: usize = 2 * OPCODE_BITS + 1;

/// Encodes a 4-bit instruction plus 16-bit operand, LSB first, opcode
/// before operand.
pub fn encode_write(op: Opcode, operand: u16) -> [u8; WRITE_FRAME_LEN] {
    let mut frame = [0; WRITE_FRAME_LEN];
    fill(&mut frame, (operand as u32) << OPCODE_BITS | op as u32);
    frame
}

/// Encodes a 4-bit instruction with no operand.
pub fn encode_command(op: Opcode) -> [u8; COMMAND_FRAME_LEN] {
    let mut frame = [0; COMMAND_FRAME_LEN];
    fill(&mut frame, op as u32);
    frame
}

/// Serializes `bits` into `frame`, one rising/falling byte pair per bit,
/// consuming `(frame.len() - 1) / 2` bits. The last byte becomes the idle
/// byte.
fn fill(frame: &mut [u8], mut bits: u32) {
    for pair in frame.chunks_exact_mut(2) {
        let mut out = Pins::CLR | Pins::PGC;
        if bits & 1 != 0 {
            out |= Pins::PGD;
        }
        bits >>= 1;
        pair[0] = out.bits();
        pair[1] = (out ^ Pins::PGC).bits();
    }
    // chunks_exact_mut leaves the odd final byte untouched.
    frame[frame.len() - 1] = Pins::CLR.bits();
}
