/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Copying machine state to and from [Snapshot] records, bit-exact in both
//! directions. The R7 split survives the round trip, and the drive model's
//! random generator is reseeded from the snapshot clock so replays stay
//! deterministic.
use ferrospec_core::memory::BANK_SIZE;
use ferrospec_formats::snapshot::Snapshot;

use crate::machine::Machine;
use crate::machines::Capabilities;

impl Machine {
    /// Captures the complete machine state.
    pub fn snapshot_to(&self) -> Snapshot {
        let cpu = &self.cpu;
        let board = &self.board;
        let mut snap = Snapshot::new(board.spec.id);

        snap.af = cpu.af();
        snap.bc = cpu.bc();
        snap.de = cpu.de();
        snap.hl = cpu.hl();
        snap.af_alt = cpu.af_alt();
        snap.bc_alt = cpu.bc_alt();
        snap.de_alt = cpu.de_alt();
        snap.hl_alt = cpu.hl_alt();
        snap.ix = cpu.ix();
        snap.iy = cpu.iy();
        snap.sp = cpu.sp;
        snap.pc = cpu.pc;
        snap.memptr = cpu.memptr;
        snap.i = cpu.i;
        snap.r = cpu.r as u8;
        snap.r7 = cpu.r7;
        snap.iff1 = cpu.iff1;
        snap.iff2 = cpu.iff2;
        snap.im = cpu.im;
        snap.halted = cpu.halted;
        snap.q = cpu.q;
        snap.interrupts_enabled_at = cpu.interrupts_enabled_at as i32;
        snap.tstates = board.tstates;

        snap.port_7ffd = board.paging.last_7ffd;
        snap.port_1ffd = board.paging.last_1ffd;
        snap.port_eff7 = board.paging.last_eff7;
        snap.port_f4 = board.paging.last_f4;
        snap.port_ff = board.paging.last_ff;
        snap.border = board.ula.border;

        for bank in 0..board.memory.ram_banks() {
            snap.ram_pages.push((bank as u8, board.memory.ram_bank(bank).to_vec()));
        }
        snap
    }

    /// Restores a snapshot taken from the same machine model.
    pub fn snapshot_from(&mut self, snap: &Snapshot) {
        let cpu = &mut self.cpu;
        cpu.set_af(snap.af);
        cpu.set_bc(snap.bc);
        cpu.set_de(snap.de);
        cpu.set_hl(snap.hl);
        cpu.set_af_alt(snap.af_alt);
        cpu.set_bc_alt(snap.bc_alt);
        cpu.set_de_alt(snap.de_alt);
        cpu.set_hl_alt(snap.hl_alt);
        cpu.set_ix(snap.ix);
        cpu.set_iy(snap.iy);
        cpu.sp = snap.sp;
        cpu.pc = snap.pc;
        cpu.memptr = snap.memptr;
        cpu.i = snap.i;
        cpu.r = snap.r as u16;
        cpu.r7 = snap.r7;
        cpu.iff1 = snap.iff1;
        cpu.iff2 = snap.iff2;
        cpu.im = snap.im;
        cpu.halted = snap.halted;
        cpu.q = snap.q;
        cpu.iff2_read = false;
        cpu.interrupts_enabled_at = snap.interrupts_enabled_at as i64;

        let board = &mut self.board;
        board.tstates = snap.tstates;
        board.paging.last_7ffd = snap.port_7ffd;
        board.paging.last_1ffd = snap.port_1ffd;
        board.paging.last_eff7 = snap.port_eff7;
        board.paging.last_f4 = snap.port_f4;
        board.paging.last_ff = snap.port_ff;
        board.paging.current_page = snap.port_7ffd & 0x07;
        board.paging.current_rom = (snap.port_7ffd >> 4) & 0x01;
        board.paging.locked = snap.port_7ffd & 0x20 != 0
            && !board.spec.capabilities.contains(Capabilities::MEMORY_PENT1024);
        board.paging.special = snap.port_1ffd & 0x01 != 0
            && board.spec.capabilities.contains(Capabilities::MEMORY_PLUS3);
        board.paging.romcs = false;
        board.ula.border = snap.border;

        for (bank, data) in &snap.ram_pages {
            let bank = *bank as usize;
            if bank < board.memory.ram_banks() && data.len() == BANK_SIZE {
                board.memory.ram_bank_mut(bank).copy_from_slice(data);
            }
        }
        board.update_memory_map();

        // replays must see the same weak bytes and track slip
        let seed = snap.tstates as u64;
        if let Some(beta) = board.beta.as_mut() {
            for unit in 0..crate::beta::BETA_NUM_DRIVES {
                beta.fdc.drive_mut(unit).reseed(seed + unit as u64);
            }
        }
        if let Some(upd) = board.upd.as_mut() {
            for unit in 0..upd.drive_count() {
                upd.drive_mut(unit).reseed(seed + unit as u64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use ferrospec_formats::snapshot::MachineId;

    #[test]
    fn snapshot_round_trips_the_processor_state() {
        let mut machine = Machine::new(MachineId::Spectrum48);
        machine.cpu.set_af(0x1234);
        machine.cpu.set_bc(0x5678);
        machine.cpu.set_ix(0xbeef);
        machine.cpu.pc = 0x8123;
        machine.cpu.sp = 0xfe00;
        machine.cpu.r = 0x55;
        machine.cpu.r7 = 0x80;
        machine.cpu.iff1 = true;
        machine.cpu.iff2 = true;
        machine.cpu.im = 1;
        machine.cpu.memptr = 0x4321;
        machine.cpu.q = 0xa8;
        machine.board.tstates = 12345;
        machine.poke(0x8000, 0x3e);

        let snap = machine.snapshot_to();
        let mut restored = Machine::new(MachineId::Spectrum48);
        restored.snapshot_from(&snap);

        assert_eq!(restored.cpu, machine.cpu);
        assert_eq!(restored.board.tstates, 12345);
        assert_eq!(restored.peek(0x8000), 0x3e);
    }

    #[test]
    fn snapshot_restores_128_paging() {
        let mut machine = Machine::new(MachineId::Spectrum128);
        machine.board.writeport_internal(0x7ffd, 0x17);
        let snap = machine.snapshot_to();

        let mut restored = Machine::new(MachineId::Spectrum128);
        restored.snapshot_from(&snap);
        assert_eq!(restored.board.paging.current_page, 7);
        assert_eq!(restored.board.paging.current_rom, 1);
        assert_eq!(restored.board.memory.current_screen, 5);
        assert_eq!(
            restored.board.memory.read_slot(6).page_num,
            7
        );
    }

    #[test]
    fn r7_split_is_preserved_bit_exact() {
        let mut machine = Machine::new(MachineId::Spectrum48);
        machine.cpu.r = 0x7a;
        machine.cpu.r7 = 0x80;
        let snap = machine.snapshot_to();
        assert_eq!(snap.r, 0x7a);
        assert_eq!(snap.r7, 0x80);

        let mut restored = Machine::new(MachineId::Spectrum48);
        restored.snapshot_from(&snap);
        assert_eq!(restored.cpu.r_register(), 0x80 | 0x7a & 0x7f);
    }
}
