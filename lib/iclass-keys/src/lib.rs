// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recovering iClass key material from raw reader memory.
//!
//! The reader stores its DES keys with the 8x8 bit matrix transposed (and
//! re-transposed on use), so a raw 8-byte window out of a memory dump is
//! not directly usable. Recovery is two pure transforms:
//!
//! * [`permute`], the bit-matrix transpose, applied three times by the
//!   firmware and therefore three times here; and
//! * [`shave`], clearing the DES parity bit of every byte.
//!
//! Both are deterministic and total; nothing in this crate can fail.

#![cfg_attr(not(test), no_std)]

/// Length in bytes of a single DES key. 3DES material is two consecutive
/// windows of this size.
pub const KEY_LEN: usize = 8;

/// Transposes `key` as an 8x8 bit matrix.
///
/// Output byte `i` collects column `7 - i` of the input (mask `0x80 >> i`),
/// assembling from the low bit up while the mask sweeps columns from the
/// high bit down. The bit order is load-bearing: this exact reversed
/// assembly is what the reader firmware implements, and it makes the
/// transform self-inverse.
pub fn permute(key: [u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let mut res = [0; KEY_LEN];
    for (i, out) in res.iter_mut().enumerate() {
        let mask = 0x80u8 >> i;
        let mut p = 0u8;
        for &byte in &key {
            p >>= 1;
            if byte & mask != 0 {
                p |= 0x80;
            }
        }
        *out = p;
    }
    res
}

/// Applies [`permute`] three times, mirroring the firmware's iteration
/// count. The transform is self-inverse, so this equals a single
/// application; the firmware's count is kept for fidelity.
pub fn permute_iterated(key: [u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let mut k = key;
    for _ in 0..3 {
        k = permute(k);
    }
    k
}

/// Clears the least significant bit of every byte, the DES parity-bit
/// convention.
pub fn shave(key: [u8; KEY_LEN]) -> [u8; KEY_LEN] {
    key.map(|byte| byte & 0xFE)
}

/// The stages of recovering one key from a dump window. The intermediates
/// are kept because they are worth showing to the operator when a recovered
/// key looks implausible.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Derivation {
    /// The raw window as extracted from the dump.
    pub parsed: [u8; KEY_LEN],
    /// After the iterated bit-matrix transpose.
    pub permuted: [u8; KEY_LEN],
    /// After parity shaving; the usable key.
    pub shaved: [u8; KEY_LEN],
}

impl Derivation {
    pub fn of(window: [u8; KEY_LEN]) -> Self {
        let permuted = permute_iterated(window);
        Self {
            parsed: window,
            permuted,
            shaved: shave(permuted),
        }
    }

    /// The final key candidate.
    pub fn key(&self) -> [u8; KEY_LEN] {
        self.shaved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn permute_is_an_involution(key in any::<[u8; KEY_LEN]>()) {
            prop_assert_eq!(permute(permute(key)), key);
        }

        #[test]
        fn odd_iteration_count_collapses_to_one(
            key in any::<[u8; KEY_LEN]>(),
        ) {
            prop_assert_eq!(permute_iterated(key), permute(key));
        }

        #[test]
        fn shave_clears_every_parity_bit(key in any::<[u8; KEY_LEN]>()) {
            for byte in shave(key) {
                prop_assert_eq!(byte & 1, 0);
            }
        }

        #[test]
        fn shave_touches_nothing_else(key in any::<[u8; KEY_LEN]>()) {
            for (a, b) in key.iter().zip(shave(key)) {
                prop_assert_eq!(a & 0xFE, b);
            }
        }
    }

    #[test]
    fn permute_moves_rows_to_columns() {
        // A single set bit: byte 2, bit 5 (mask 0x20 = 0x80 >> 2) must land
        // in output byte 2... as bit 2.
        let mut key = [0u8; KEY_LEN];
        key[2] = 0x20;
        let mut expected = [0u8; KEY_LEN];
        expected[2] = 0x04;
        assert_eq!(permute(key), expected);
    }

    #[test]
    fn golden_pipeline_vector() {
        // Hand-transposed reference for the ramp window. The transpose of
        // {11 22 33 44 55 66 77 88} is {80 78 66 55 80 78 66 55}; shaving
        // only changes the odd bytes 0x55 -> 0x54.
        let window = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        let d = Derivation::of(window);
        assert_eq!(d.parsed, window);
        assert_eq!(
            d.permuted,
            [0x80, 0x78, 0x66, 0x55, 0x80, 0x78, 0x66, 0x55]
        );
        assert_eq!(
            d.key(),
            [0x80, 0x78, 0x66, 0x54, 0x80, 0x78, 0x66, 0x54]
        );
    }

    #[test]
    fn derivation_from_a_ramp_buffer_window() {
        // End to end over a register-buffer shaped input: fill with the
        // `index * 0x11` ramp and take the 8-byte window at offset 0.
        let buf: Vec<u8> =
            (0..16).map(|i| (i * 0x11 % 0x100) as u8).collect();
        let mut window = [0u8; KEY_LEN];
        window.copy_from_slice(&buf[..KEY_LEN]);
        let d = Derivation::of(window);
        assert_eq!(
            d.permuted,
            [0x00, 0xF0, 0xCC, 0xAA, 0x00, 0xF0, 0xCC, 0xAA]
        );
        // Every transposed byte already has an even low bit here, so the
        // shave stage is a no-op for this particular window.
        assert_eq!(d.key(), d.permuted);
    }
}
