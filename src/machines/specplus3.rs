/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Spectrum +2A and +3.
use ferrospec_core::contention::ContentionParams;
use ferrospec_core::memory::MemoryPage;
use ferrospec_formats::snapshot::MachineId;

use super::{Capabilities, MachineSpec, Timings};
use crate::machine::Board;

const CONTENTION_PLUS3: ContentionParams = ContentionParams {
    base: 14361,
    pattern: [1, 0, 7, 6, 5, 4, 3, 2],
    tstates_per_line: 228,
};

pub(crate) const SPECPLUS2A: MachineSpec = MachineSpec {
    id: MachineId::SpectrumPlus2A,
    name: "Spectrum +2A",
    capabilities: Capabilities::MEMORY_128.union(Capabilities::MEMORY_PLUS3),
    timings: Timings {
        processor_speed: 3_546_900,
        tstates_per_frame: 70908,
        tstates_per_line: 228,
        interrupt_length: 32,
    },
    contention: Some(CONTENTION_PLUS3),
    floating_bus: false,
    rom_banks: 4,
    ram_banks: 8,
};

pub(crate) const SPECPLUS3: MachineSpec = MachineSpec {
    id: MachineId::SpectrumPlus3,
    name: "Spectrum +3",
    capabilities: Capabilities::MEMORY_128
        .union(Capabilities::MEMORY_PLUS3)
        .union(Capabilities::UPD_FDC),
    ..SPECPLUS2A
};

/// The all-RAM configurations bit 1-2 of 0x1FFD select.
const SPECIAL_CONFIGS: [[u8; 4]; 4] = [
    [0, 1, 2, 3],
    [4, 5, 6, 7],
    [4, 5, 6, 3],
    [4, 7, 6, 3],
];

pub(crate) fn plus3_write_7ffd(board: &mut Board, b: u8) {
    if board.paging.locked {
        return;
    }
    board.paging.last_7ffd = b;
    board.paging.current_page = b & 0x07;
    board.paging.locked = b & 0x20 != 0;
    board.update_memory_map();
}

pub(crate) fn plus3_write_1ffd(board: &mut Board, b: u8) {
    // the disk motor rides on this port whatever the lock state
    board.set_disk_motor(b & 0x08 != 0);
    if board.paging.locked {
        return;
    }
    board.paging.last_1ffd = b;
    board.paging.special = b & 0x01 != 0;
    board.update_memory_map();
}

pub(crate) fn memory_map_plus3(board: &mut Board) {
    let spec = board.spec;
    let contended = |bank| spec.bank_contended(bank);
    if board.paging.special {
        let config =
            SPECIAL_CONFIGS[((board.paging.last_1ffd & 0x06) >> 1) as usize];
        for (slot, &bank) in config.iter().enumerate() {
            board.memory.map_16k((slot as u16) << 14, MemoryPage {
                contended: contended(bank),
                ..MemoryPage::ram(bank, 0)
            });
        }
    } else {
        let rom = ((board.paging.last_1ffd & 0x04) >> 1)
            | ((board.paging.last_7ffd & 0x10) >> 4);
        board.memory.map_16k(0x0000, MemoryPage::rom(rom, 0));
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
    }
    board.memory.current_screen = if board.paging.last_7ffd & 0x08 != 0 { 7 } else { 5 };
}
