/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The +3's µPD765 wiring: two drives, with only US0 decoded so units 2
//! and 3 mirror 0 and 1, and the motor shared through 0x1FFD bit 3.
use ferrospec_peripherals::fdd::{Fdd, FddEventTypes, FddParams, FddType};
use ferrospec_peripherals::upd_fdc::{UpdClock, UpdEventTypes, UpdFdc, UpdType};

pub fn make_fdc(upd_types: UpdEventTypes, fdd_types: FddEventTypes) -> UpdFdc {
    let drives = vec![
        // drive A: the internal single-sided 3" unit
        Fdd::new(FddType::IbmPc, FddParams::SINGLE_40, 0, fdd_types),
        // drive B: an external unit
        Fdd::new(FddType::IbmPc, FddParams::DOUBLE_80, 1, fdd_types),
    ];
    UpdFdc::new(UpdType::Upd765a, UpdClock::Clock4Mhz, drives, [0, 1, 0, 1], upd_types)
}
