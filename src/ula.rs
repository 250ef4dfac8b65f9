/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The ULA's I/O face: keyboard half-rows, the border, and the EAR/MIC
//! bits. Video rendering is the embedder's business; the ULA state here is
//! what the CPU can observe through port 0xFE.

/// Eight half-rows of five keys, active low.
pub type KeyboardMatrix = [u8; 8];

#[derive(Clone, Copy, Debug)]
pub struct Ula {
    /// Key state per half-row, bits 0-4, 0 = pressed.
    pub keyboard: KeyboardMatrix,
    pub border: u8,
    /// Last byte written to port 0xFE (MIC bit 3, EAR bit 4).
    pub last_out: u8,
    /// External EAR level when no tape is running.
    pub ear_in: bool,
}

impl Default for Ula {
    fn default() -> Self {
        Ula::new()
    }
}

impl Ula {
    pub fn new() -> Self {
        Ula {
            keyboard: [0x1f; 8],
            border: 7,
            last_out: 0,
            ear_in: false,
        }
    }

    /// Marks a key down or up. `half_row` indexes A8-A15, `key` bits 0-4.
    pub fn set_key(&mut self, half_row: usize, key: u8, pressed: bool) {
        if pressed {
            self.keyboard[half_row] &= !(1 << key);
        } else {
            self.keyboard[half_row] |= 1 << key;
        }
    }

    /// An IN from port 0xFE: the selected half-rows ANDed together, the
    /// EAR level on bit 6, bits 5 and 7 floating high.
    pub fn read(&self, port: u16, tape_ear: Option<bool>) -> u8 {
        let mut keys = 0x1f;
        for half_row in 0..8 {
            if port & (0x100 << half_row) == 0 {
                keys &= self.keyboard[half_row];
            }
        }
        let ear = tape_ear.unwrap_or(self.ear_in);
        keys | 0xa0 | if ear { 0x40 } else { 0x00 }
    }

    /// An OUT to port 0xFE.
    pub fn write(&mut self, _port: u16, value: u8) {
        self.border = value & 0x07;
        self.last_out = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_keyboard_reads_bf() {
        let ula = Ula::new();
        assert_eq!(ula.read(0x7ffe, None), 0xbf);
        assert_eq!(ula.read(0x00fe, None), 0xbf);
    }

    #[test]
    fn a_pressed_key_pulls_its_line_low() {
        let mut ula = Ula::new();
        // CAPS SHIFT: half-row 0, bit 0
        ula.set_key(0, 0, true);
        assert_eq!(ula.read(0xfefe, None), 0xbe);
        // not visible through another half-row
        assert_eq!(ula.read(0xfdfe, None), 0xbf);
        ula.set_key(0, 0, false);
        assert_eq!(ula.read(0xfefe, None), 0xbf);
    }

    #[test]
    fn ear_bit_follows_the_tape() {
        let ula = Ula::new();
        assert_eq!(ula.read(0x7ffe, Some(true)), 0xff);
        assert_eq!(ula.read(0x7ffe, Some(false)), 0xbf);
    }

    #[test]
    fn out_sets_the_border() {
        let mut ula = Ula::new();
        ula.write(0xfe, 0x15);
        assert_eq!(ula.border, 5);
        assert_eq!(ula.last_out, 0x15);
    }
}
