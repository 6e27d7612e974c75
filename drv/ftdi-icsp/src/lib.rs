// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FTDI D2XX synchronous bit-bang transport for the ICSP engine.
//!
//! In synchronous bit-bang mode the FTDI part drives its D-bus from every
//! byte written and, for every byte driven, queues one sample of the bus
//! back into its read FIFO. That gives the loopback write/read pairing the
//! protocol layer is built around. The sample clock is the configured baud
//! rate, which bounds PGC at half that rate.
//!
//! Wiring for the TTL-232R-5V-WE cable against an HID RW300/RW400 ICSP
//! header (VPP is raised to 9V externally; the cable has no line for it):
//!
//! | cable wire | reader pin | signal |
//! |------------|------------|--------|
//! | black      | 1          | VSS    |
//! | red        | 2          | VDD    |
//! | (none)     | 3          | VPP    |
//! | green      | 4          | PGD    |
//! | orange     | 5          | PGC    |
//! | brown      | 6          | PGM    |
//!
//! [`Adapter::open`] configures the device and proves the loop is live;
//! dropping the [`Adapter`] returns the lines to inputs and closes the
//! device, on every exit path.

use std::fmt;
use std::time::Duration;

use icsp::{Pins, Transport, TransportError};
use libftd2xx::{BitMode, FtStatus, Ftdi, FtdiCommon};

/// Sample clock of the bit-bang engine. 1 MHz keeps PGC comfortably inside
/// the target's programming-clock budget while a full register sweep stays
/// around ten seconds.
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// How long a transfer may stall before the D2XX runtime gives up. Echo
/// bytes arrive within microseconds of the write at any supported baud
/// rate, so these are generous.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// An open, configured FTDI cable speaking ICSP levels.
pub struct Adapter {
    device: Ftdi,
}

/// Failures opening or configuring the adapter.
#[derive(Debug)]
pub enum AdapterError {
    /// The D2XX runtime rejected an open or configuration call. On Linux
    /// the usual cause is the in-kernel driver still owning the device
    /// (`rmmod ftdi_sio usbserial`).
    Status(FtStatus),
    /// The post-configuration loopback check failed.
    Sync(TransportError),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => {
                write!(f, "D2XX call failed: {status:?}")
            }
            Self::Sync(cause) => {
                write!(f, "adapter loopback check failed: {cause}")
            }
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Status(status) => Some(status),
            Self::Sync(cause) => Some(cause),
        }
    }
}

impl From<FtStatus> for AdapterError {
    fn from(status: FtStatus) -> Self {
        Self::Status(status)
    }
}

impl Adapter {
    /// Opens the FTDI device at enumeration index `index` and puts it in
    /// synchronous bit-bang mode at `baud`, with the three ICSP lines as
    /// outputs. Finishes by clocking one idle byte through the loop and
    /// draining its echo, which both parks the lines (PGM low, part held
    /// in reset until a frame raises it) and verifies that writes actually
    /// come back.
    pub fn open(index: i32, baud: u32) -> Result<Self, AdapterError> {
        let mut device = Ftdi::with_index(index)?;
        log::debug!("opened FTDI device at index {index}");

        device.set_bit_mode(Pins::OUTPUTS.bits(), BitMode::SyncBitbang)?;
        device.set_baud_rate(baud)?;
        device.set_timeouts(READ_TIMEOUT, WRITE_TIMEOUT)?;
        log::debug!(
            "sync bit-bang configured: outputs {:#04x}, {baud} baud",
            Pins::OUTPUTS.bits()
        );

        let mut adapter = Self { device };
        adapter.tick().map_err(AdapterError::Sync)?;
        Ok(adapter)
    }

    /// Reads back the instantaneous state of the data bus, for preflight
    /// reporting.
    pub fn bus_state(&mut self) -> Result<u8, AdapterError> {
        Ok(self.device.bit_mode()?)
    }

    /// Drives a single all-lines-low byte and drains its echo.
    fn tick(&mut self) -> Result<(), TransportError> {
        let mut echo = [0u8; 1];
        self.write(&[0x00])?;
        self.read(&mut echo)?;
        Ok(())
    }
}

impl Transport for Adapter {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let n = self.device.write(bytes).map_err(status_error)?;
        log::trace!("wrote {n} of {} bytes", bytes.len());
        Ok(n)
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.device.read(out).map_err(status_error)?;
        log::trace!("read {n} of {} bytes", out.len());
        Ok(n)
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        // Best effort: put the lines back to inputs so nothing keeps
        // driving the reader, then release the device.
        if let Err(status) = self.device.set_bit_mode(0x00, BitMode::Reset) {
            log::warn!("bit mode reset failed on close: {status:?}");
        }
        if let Err(status) = self.device.close() {
            log::warn!("device close failed: {status:?}");
        }
    }
}

fn status_error(status: FtStatus) -> TransportError {
    match status {
        FtStatus::INVALID_HANDLE
        | FtStatus::DEVICE_NOT_FOUND
        | FtStatus::DEVICE_NOT_OPENED => TransportError::Unavailable,
        other => TransportError::Io(other as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_level_failures_map_to_unavailable() {
        assert_eq!(
            status_error(FtStatus::INVALID_HANDLE),
            TransportError::Unavailable
        );
        assert_eq!(
            status_error(FtStatus::DEVICE_NOT_FOUND),
            TransportError::Unavailable
        );
        assert_eq!(
            status_error(FtStatus::IO_ERROR),
            TransportError::Io(FtStatus::IO_ERROR as u32)
        );
    }
}
