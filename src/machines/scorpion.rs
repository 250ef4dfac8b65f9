/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Scorpion ZS 256.
use ferrospec_core::memory::MemoryPage;
use ferrospec_formats::snapshot::MachineId;

use super::{Capabilities, MachineSpec, Timings};
use crate::machine::Board;
use crate::machines::spec128;

pub(crate) const SCORPION: MachineSpec = MachineSpec {
    id: MachineId::Scorpion,
    name: "Scorpion ZS 256",
    capabilities: Capabilities::MEMORY_128
        .union(Capabilities::MEMORY_SCORPION)
        .union(Capabilities::TRDOS),
    timings: Timings {
        processor_speed: 3_500_000,
        tstates_per_frame: 69888,
        tstates_per_line: 224,
        interrupt_length: 36,
    },
    contention: None,
    floating_bus: false,
    rom_banks: 3,
    ram_banks: 16,
};

pub(crate) fn scorpion_write_1ffd(board: &mut Board, b: u8) {
    if board.paging.locked {
        return;
    }
    board.paging.last_1ffd = b;
    board.update_memory_map();
}

pub(crate) fn memory_map_scorpion(board: &mut Board) {
    spec128::memory_map_128(board);
    let b = board.paging.last_1ffd;
    if b & 0x10 != 0 {
        // RAM pages 8-15 at 0xC000
        let page = (board.paging.current_page & 0x07) | 0x08;
        board.memory.map_16k(0xc000, MemoryPage::ram(page, 0));
    }
    if b & 0x02 != 0 {
        board.memory.map_16k(0x0000, MemoryPage::rom(2, 0));
    }
    if b & 0x01 != 0 {
        // the service RAM shadows the ROM
        board.memory.map_16k(0x0000, MemoryPage::ram(0, 0));
    }
}
