/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Beta 128 disk interface: a WD1793 behind ports 0x1F/0x3F/0x5F/0x7F,
//! a system register on 0xFF, and a TR-DOS ROM that pages itself in when
//! the program counter enters its entry area.
use ferrospec_peripherals::fdd::{Fdd, FddEventTypes, FddParams, FddType};
use ferrospec_peripherals::wd_fdc::{WdEventTypes, WdFdc, WdFlags, WdType};

use crate::machines::{Capabilities, MachineSpec};

pub const BETA_NUM_DRIVES: usize = 4;

pub struct Beta128 {
    pub fdc: WdFdc,
    /// Wired up at all on this machine.
    pub available: bool,
    /// TR-DOS ROM currently paged in.
    pub active: bool,
    pub pc_mask: u16,
    pub pc_value: u16,
    pub system_register: u8,
}

impl Beta128 {
    pub fn new(spec: &MachineSpec, wd_types: WdEventTypes, fdd_types: FddEventTypes) -> Self {
        let drives = (0..BETA_NUM_DRIVES)
            .map(|unit| {
                Fdd::new(FddType::Shugart, FddParams::DOUBLE_80, unit as u32, fdd_types)
            })
            .collect();
        let mut fdc = WdFdc::new(WdType::Fd1793, 0, WdFlags::BETA128, drives, wd_types);
        fdc.dden = true;
        let mut beta = Beta128 {
            fdc,
            available: false,
            active: false,
            pc_mask: 0xff00,
            pc_value: 0x3d00,
            system_register: 0,
        };
        beta.reset(spec);
        beta
    }

    pub fn reset(&mut self, spec: &MachineSpec) {
        self.available = true;
        self.active = false;
        if spec.capabilities.contains(Capabilities::MEMORY_128) {
            self.pc_mask = 0xff00;
            self.pc_value = 0x3d00;
        } else {
            // 48-style machines decode a wider entry window
            self.pc_mask = 0xfe00;
            self.pc_value = 0x3c00;
        }
        self.fdc.master_reset();
    }

    /// The 0xFF system register: drive select, side, density, HLT.
    pub fn system_write(&mut self, b: u8) {
        self.fdc.select_drive((b & 0x03) as usize);
        // 0x08 blocks HLT, normally set
        self.fdc.set_hlt(b & 0x08 != 0);
        let head = if b & 0x10 != 0 { 0 } else { 1 };
        let unit = self.fdc.current_unit();
        self.fdc.drive_mut(unit).set_head(head);
        // density: reset = FM, set = MFM
        self.fdc.dden = b & 0x20 != 0;
        self.system_register = b;
    }

    /// Reading 0xFF returns the INTRQ and DRQ lines.
    pub fn system_read(&self) -> u8 {
        let mut b = 0;
        if self.fdc.intrq {
            b |= 0x80;
        }
        if self.fdc.datarq {
            b |= 0x40;
        }
        b
    }
}
