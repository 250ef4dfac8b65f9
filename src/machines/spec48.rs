/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Spectrum 16, 48 and 48 NTSC.
use ferrospec_core::contention::ContentionParams;
use ferrospec_core::memory::MemoryPage;
use ferrospec_formats::snapshot::MachineId;

use super::{Capabilities, MachineSpec, Timings};
use crate::machine::Board;

const CONTENTION_48: ContentionParams = ContentionParams {
    base: 14335,
    pattern: [6, 5, 4, 3, 2, 1, 0, 0],
    tstates_per_line: 224,
};

const CONTENTION_48_NTSC: ContentionParams = ContentionParams {
    base: 8959,
    pattern: [6, 5, 4, 3, 2, 1, 0, 0],
    tstates_per_line: 224,
};

pub(crate) const SPEC48: MachineSpec = MachineSpec {
    id: MachineId::Spectrum48,
    name: "Spectrum 48K",
    capabilities: Capabilities::empty(),
    timings: Timings {
        processor_speed: 3_500_000,
        tstates_per_frame: 69888,
        tstates_per_line: 224,
        interrupt_length: 32,
    },
    contention: Some(CONTENTION_48),
    floating_bus: true,
    rom_banks: 1,
    ram_banks: 8,
};

pub(crate) const SPEC16: MachineSpec = MachineSpec {
    id: MachineId::Spectrum16,
    name: "Spectrum 16K",
    ..SPEC48
};

pub(crate) const SPEC48_NTSC: MachineSpec = MachineSpec {
    id: MachineId::Spectrum48Ntsc,
    name: "Spectrum 48K (NTSC)",
    timings: Timings {
        processor_speed: 3_527_500,
        tstates_per_frame: 59736,
        tstates_per_line: 224,
        interrupt_length: 32,
    },
    contention: Some(CONTENTION_48_NTSC),
    ..SPEC48
};

/// The fixed 16/48K memory arrangement.
pub(crate) fn memory_map_48(board: &mut Board) {
    let spec = board.spec;
    let contended = |bank| spec.bank_contended(bank);
    if board.paging.romcs {
        board.memory.map_16k(0x0000, MemoryPage {
            source: ferrospec_core::memory::PageSource::Betadisk,
            ..MemoryPage::UNMAPPED
        });
    } else {
        board.memory.map_16k(0x0000, MemoryPage::rom(0, 0));
    }
    board.memory.map_16k(0x4000, MemoryPage {
        contended: contended(5),
        ..MemoryPage::ram(5, 0)
    });
    if board.spec.id == MachineId::Spectrum16 {
        board.memory.map_16k(0x8000, MemoryPage::UNMAPPED);
        board.memory.map_16k(0xc000, MemoryPage::UNMAPPED);
    } else {
        board.memory.map_16k(0x8000, MemoryPage::ram(2, 0));
        board.memory.map_16k(0xc000, MemoryPage::ram(0, 0));
    }
    board.memory.current_screen = 5;
}
