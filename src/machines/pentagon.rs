/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Pentagon 128, 512 and 1024 clones. No contention, a longer frame,
//! a built-in Beta 128, and progressively wilder RAM paging.
use ferrospec_formats::snapshot::MachineId;

use super::{Capabilities, MachineSpec, Timings};
use crate::machine::Board;
use crate::machines::spec128;

pub(crate) const PENTAGON: MachineSpec = MachineSpec {
    id: MachineId::Pentagon,
    name: "Pentagon 128K",
    capabilities: Capabilities::MEMORY_128.union(Capabilities::TRDOS),
    timings: Timings {
        processor_speed: 3_584_000,
        tstates_per_frame: 71680,
        tstates_per_line: 224,
        interrupt_length: 36,
    },
    contention: None,
    floating_bus: false,
    rom_banks: 2,
    ram_banks: 8,
};

pub(crate) const PENTAGON512: MachineSpec = MachineSpec {
    id: MachineId::Pentagon512,
    name: "Pentagon 512K",
    capabilities: Capabilities::MEMORY_128
        .union(Capabilities::TRDOS)
        .union(Capabilities::MEMORY_PENT512),
    ram_banks: 32,
    ..PENTAGON
};

pub(crate) const PENTAGON1024: MachineSpec = MachineSpec {
    id: MachineId::Pentagon1024,
    name: "Pentagon 1024K",
    capabilities: Capabilities::MEMORY_128
        .union(Capabilities::TRDOS)
        .union(Capabilities::MEMORY_PENT512)
        .union(Capabilities::MEMORY_PENT1024),
    ram_banks: 64,
    ..PENTAGON
};

/// 0x7FFD with the 512/1024 extended page bits folded in.
pub(crate) fn pentagon_write_7ffd(board: &mut Board, b: u8) {
    if board.paging.locked {
        return;
    }
    // with 0xEFF7 bit 2 set, a Pentagon 1024 pages like a plain 128
    let extended_off = board.spec.capabilities.contains(Capabilities::MEMORY_PENT1024)
        && board.paging.last_eff7 & 0x04 != 0;
    let mut page = b & 0x07;
    let mut lock = b & 0x20 != 0;
    if board.spec.capabilities.contains(Capabilities::MEMORY_PENT512) && !extended_off {
        page |= (b & 0xc0) >> 3;
        if board.spec.capabilities.contains(Capabilities::MEMORY_PENT1024) {
            // bit 5 becomes a page bit, so the lock moves to 0xEFF7
            page |= b & 0x20;
            lock = false;
        }
    }
    board.paging.last_7ffd = b;
    board.paging.current_page = page;
    board.paging.current_rom = (b >> 4) & 0x01;
    board.paging.locked = lock;
    board.update_memory_map();
}

/// Pentagon 1024 control port: bit 2 drops back to 128 paging, bit 3 maps
/// RAM 0 over the ROM.
pub(crate) fn pentagon1024_write_eff7(board: &mut Board, b: u8) {
    board.paging.last_eff7 = b;
    if b & 0x04 != 0 {
        // back to plain 128 paging: the extended bits drop out of the page
        board.paging.current_page = board.paging.last_7ffd & 0x07;
    }
    board.update_memory_map();
}

pub(crate) fn memory_map_pentagon(board: &mut Board) {
    spec128::memory_map_128(board);
    if board.spec.capabilities.contains(Capabilities::MEMORY_PENT1024)
        && board.paging.last_eff7 & 0x08 != 0
    {
        board.memory.map_16k(0x0000, ferrospec_core::memory::MemoryPage::ram(0, 0));
    }
}
