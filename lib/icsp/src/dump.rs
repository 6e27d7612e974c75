// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register sweep: pointer initialization plus post-increment reads.

use crate::{core_inst, Channel, Opcode, Transport, TransportError};
use core::fmt;

/// A register sweep aborted partway. The destination buffer's contents are
/// unspecified and must not be consumed; the target's pointer state after a
/// failed instruction is unknown, so there is no resume path either.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DumpError {
    Transport {
        /// Register index being worked on when the transport failed; 0
        /// means the failure happened during pointer initialization.
        register: usize,
        cause: TransportError,
    },
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self::Transport { register, cause } = self;
        write!(f, "dump aborted at register {register}: {cause}")
    }
}

impl core::error::Error for DumpError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        let Self::Transport { cause, .. } = self;
        Some(cause)
    }
}

/// Sweeps `buf.len()` registers of target memory into `buf`.
///
/// The sequence first zeroes the 16-bit FSR0 pointer (literal into WREG,
/// WREG into each pointer half), then for each index fetches through the
/// pointer with post-increment, stages the byte in TABLAT, and reads it
/// back. Because the first fetch already advances the pointer, the first
/// useful byte lands at index 1; index 0 is never written and keeps
/// whatever the caller put there.
///
/// Each read depends on the pointer state left by the previous one, so the
/// sweep is inherently serial; expect a duration proportional to
/// `buf.len()` times the transport's per-frame latency.
pub fn dump_registers<T: Transport>(
    channel: &mut Channel<T>,
    buf: &mut [u8],
) -> Result<(), DumpError> {
    // FSR0 := 0, high half first.
    const INIT: [u16; 4] = [
        core_inst::MOVLW_0,
        core_inst::MOVWF_FSR0H,
        core_inst::MOVLW_0,
        core_inst::MOVWF_FSR0L,
    ];
    for operand in INIT {
        channel
            .write(Opcode::CoreInstruction, operand)
            .map_err(|cause| DumpError::Transport { register: 0, cause })?;
    }

    for i in 1..buf.len() {
        let fail = |cause| DumpError::Transport { register: i, cause };
        channel
            .write(Opcode::CoreInstruction, core_inst::MOVF_POSTINC0_W)
            .map_err(fail)?;
        channel
            .write(Opcode::CoreInstruction, core_inst::MOVWF_TABLAT)
            .map_err(fail)?;
        buf[i] = channel.read_tablat().map_err(fail)?;
    }
    Ok(())
}
