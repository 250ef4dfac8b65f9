/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Spectrum 128 and +2.
use ferrospec_core::contention::ContentionParams;
use ferrospec_core::memory::{MemoryPage, PageSource};
use ferrospec_formats::snapshot::MachineId;

use super::{Capabilities, MachineSpec, Timings};
use crate::machine::Board;

const CONTENTION_128: ContentionParams = ContentionParams {
    base: 14361,
    pattern: [6, 5, 4, 3, 2, 1, 0, 0],
    tstates_per_line: 228,
};

pub(crate) const SPEC128: MachineSpec = MachineSpec {
    id: MachineId::Spectrum128,
    name: "Spectrum 128K",
    capabilities: Capabilities::MEMORY_128,
    timings: Timings {
        processor_speed: 3_546_900,
        tstates_per_frame: 70908,
        tstates_per_line: 228,
        interrupt_length: 36,
    },
    contention: Some(CONTENTION_128),
    floating_bus: true,
    rom_banks: 2,
    ram_banks: 8,
};

pub(crate) const SPECPLUS2: MachineSpec = MachineSpec {
    id: MachineId::SpectrumPlus2,
    name: "Spectrum +2",
    ..SPEC128
};

/// A write to 0x7FFD on the 128/+2 (and the Pentagon family, which layers
/// its extended bits on top before calling here).
pub(crate) fn write_7ffd(board: &mut Board, b: u8) {
    if board.paging.locked {
        return;
    }
    board.paging.last_7ffd = b;
    board.paging.current_page = b & 0x07;
    board.paging.current_rom = (b >> 4) & 0x01;
    board.paging.locked = b & 0x20 != 0;
    board.update_memory_map();
}

/// The three-page 128-style arrangement: ROM, bank 5, bank 2, switched
/// bank, with the shadow screen following bit 3 of the last 0x7FFD byte.
pub(crate) fn memory_map_128(board: &mut Board) {
    let spec = board.spec;
    let contended = |bank| spec.bank_contended(bank);
    if board.paging.romcs {
        board.memory.map_16k(0x0000, MemoryPage {
            source: PageSource::Betadisk,
            ..MemoryPage::UNMAPPED
        });
    } else {
        board.memory.map_16k(0x0000, MemoryPage::rom(board.paging.current_rom, 0));
    }
    board.memory.map_16k(0x4000, MemoryPage {
        contended: contended(5),
        ..MemoryPage::ram(5, 0)
    });
    board.memory.map_16k(0x8000, MemoryPage::ram(2, 0));
    let page = board.paging.current_page;
    board.memory.map_16k(0xc000, MemoryPage {
        contended: contended(page),
        ..MemoryPage::ram(page, 0)
    });
    board.memory.current_screen = if board.paging.last_7ffd & 0x08 != 0 { 7 } else { 5 };
}
