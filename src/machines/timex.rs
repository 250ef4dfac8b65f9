/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Timex machines (TC2048, TC2068, TS2068) and the Spectrum SE.
//!
//! All of them carry the SCLD's horizontal paging: port 0x00F4 selects,
//! chunk by 8 KiB chunk, either the home bank or the bank port 0x00FF
//! bit 7 points at (DOCK cartridge or EXROM).
use ferrospec_core::contention::ContentionParams;
use ferrospec_core::memory::{MemoryPage, PageSource};
use ferrospec_formats::snapshot::MachineId;

use super::{Capabilities, MachineSpec, Timings};
use crate::machine::Board;

/// The RAM bank the SE keeps at 0x8000.
///
/// The original sources disagree between 2 and 8 depending on the paging
/// path; the value the memory map actually exposes is 8, so that is what
/// every path here uses, kept as a named constant rather than re-derived.
pub const SE_RAM_AT_8000: u8 = 8;
/// The divergent value some SE paging paths carried historically.
pub const SE_RAM_AT_8000_ALT: u8 = 2;

const CONTENTION_TC: ContentionParams = ContentionParams {
    base: 14320,
    pattern: [6, 5, 4, 3, 2, 1, 0, 0],
    tstates_per_line: 224,
};

const CONTENTION_TS: ContentionParams = ContentionParams {
    base: 9168,
    pattern: [6, 5, 4, 3, 2, 1, 0, 0],
    tstates_per_line: 224,
};

const CONTENTION_SE: ContentionParams = ContentionParams {
    base: 14335,
    pattern: [6, 5, 4, 3, 2, 1, 0, 0],
    tstates_per_line: 224,
};

pub(crate) const TC2048: MachineSpec = MachineSpec {
    id: MachineId::Tc2048,
    name: "Timex TC2048",
    capabilities: Capabilities::MEMORY_TIMEX,
    timings: Timings {
        processor_speed: 3_500_000,
        tstates_per_frame: 69888,
        tstates_per_line: 224,
        interrupt_length: 32,
    },
    contention: Some(CONTENTION_TC),
    floating_bus: false,
    rom_banks: 1,
    ram_banks: 8,
};

pub(crate) const TC2068: MachineSpec = MachineSpec {
    id: MachineId::Tc2068,
    name: "Timex TC2068",
    ..TC2048
};

pub(crate) const TS2068: MachineSpec = MachineSpec {
    id: MachineId::Ts2068,
    name: "Timex TS2068",
    timings: Timings {
        processor_speed: 3_526_800,
        tstates_per_frame: 59736,
        tstates_per_line: 224,
        interrupt_length: 32,
    },
    contention: Some(CONTENTION_TS),
    ..TC2048
};

pub(crate) const SPECTRUM_SE: MachineSpec = MachineSpec {
    id: MachineId::SpectrumSe,
    name: "Spectrum SE",
    capabilities: Capabilities::MEMORY_128
        .union(Capabilities::MEMORY_TIMEX)
        .union(Capabilities::MEMORY_SE)
        .union(Capabilities::EVEN_M1),
    timings: Timings {
        processor_speed: 3_500_000,
        tstates_per_frame: 69888,
        tstates_per_line: 224,
        interrupt_length: 32,
    },
    contention: Some(CONTENTION_SE),
    floating_bus: false,
    rom_banks: 2,
    ram_banks: 16,
};

pub(crate) fn timex_write_f4(board: &mut Board, b: u8) {
    board.paging.last_f4 = b;
    board.update_memory_map();
}

pub(crate) fn timex_write_ff(board: &mut Board, b: u8) {
    board.paging.last_ff = b;
    board.update_memory_map();
}

/// The alternate bank a machine exposes through the SCLD: what backs a
/// switched-in chunk.
fn horizontal_source(board: &Board) -> PageSource {
    match board.spec.id {
        // no cartridge port wired to anything by default
        MachineId::Tc2048 => PageSource::None,
        _ if board.paging.last_ff & 0x80 != 0 => PageSource::Exrom,
        MachineId::Tc2068 | MachineId::Ts2068 => {
            if board.dock_inserted { PageSource::Dock } else { PageSource::None }
        }
        _ => PageSource::Dock,
    }
}

pub(crate) fn memory_map_timex(board: &mut Board) {
    // the home bank first
    let spec = board.spec;
    let contended = |bank| spec.bank_contended(bank);
    if spec.capabilities.contains(Capabilities::MEMORY_SE) {
        board.memory.map_16k(0x0000, MemoryPage::rom(board.paging.current_rom, 0));
        board.memory.map_16k(0x4000, MemoryPage {
            contended: contended(5),
            ..MemoryPage::ram(5, 0)
        });
        board.memory.map_16k(0x8000, MemoryPage::ram(SE_RAM_AT_8000, 0));
        let page = board.paging.current_page;
        board.memory.map_16k(0xc000, MemoryPage {
            contended: contended(page),
            ..MemoryPage::ram(page, 0)
        });
        board.memory.current_screen =
            if board.paging.last_7ffd & 0x08 != 0 { 7 } else { 5 };
    } else {
        board.memory.map_16k(0x0000, MemoryPage::rom(0, 0));
        board.memory.map_16k(0x4000, MemoryPage {
            contended: contended(5),
            ..MemoryPage::ram(5, 0)
        });
        board.memory.map_16k(0x8000, MemoryPage::ram(2, 0));
        board.memory.map_16k(0xc000, MemoryPage::ram(0, 0));
        board.memory.current_screen = 5;
    }

    // then the switched-in chunks on top
    let source = horizontal_source(board);
    for chunk in 0..8 {
        if board.paging.last_f4 & (1 << chunk) != 0 {
            let page = MemoryPage {
                source,
                page_num: chunk,
                writable: false,
                ..MemoryPage::UNMAPPED
            };
            board.memory.map_slot(chunk as usize, page);
        }
    }
}
