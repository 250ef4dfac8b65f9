/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The flash-load trap's register-level contract.
use ferrospec::core::clock::EVENT_TYPE_NULL;
use ferrospec::core::z80::FLAG_C;
use ferrospec::formats::tape::{rom_block_parity, Tape, TapeBlock};
use ferrospec::machine::Machine;
use ferrospec::MachineId;

/// A 19-byte standard header block: flag, type, name, length, start,
/// 0x8000, parity.
fn header_block() -> Vec<u8> {
    let mut data = vec![0x00u8, 0x03];
    data.extend_from_slice(b"run       ");
    data.extend_from_slice(&[0x11, 0x00, 0x00, 0x80, 0x00, 0x80]);
    let parity = rom_block_parity(&data);
    data.push(parity);
    assert_eq!(data.len(), 19);
    data
}

/// Runs the machine for one instruction-ish step so the fetch gates run.
fn step(machine: &mut Machine) {
    let tstates = machine.board.tstates;
    machine.board.events.add(tstates + 1, EVENT_TYPE_NULL);
    machine.cpu.do_opcodes(&mut machine.board);
}

fn machine_at_ld_bytes(block: Vec<u8>) -> Machine {
    let mut machine = Machine::new(MachineId::Spectrum48);
    // a stand-in ROM whose LD/SA-BYTES return points hold HALT, so the
    // machine freezes right where the trap leaves it
    let mut rom = vec![0u8; 0x4000];
    rom[0x05e2] = 0x76;
    rom[0x053e] = 0x76;
    machine.load_rom(0, &rom).unwrap();

    let mut tape = Tape::new();
    tape.append(TapeBlock::Rom { pause_ms: 1000, data: block });
    machine.board.tape.insert(tape);

    // the LD-BYTES entry state: IX = target, DE = requested length,
    // A' = expected flag, F' carry = load (not verify)
    machine.cpu.pc = 0x0556;
    machine.cpu.set_ix(0x9000);
    machine.cpu.set_de(17);
    machine.cpu.a_alt = 0x00;
    machine.cpu.f_alt = FLAG_C;
    machine
}

#[test]
fn load_trap_register_contract() {
    let block = header_block();
    let payload: Vec<u8> = block[1..18].to_vec();
    let mut machine = machine_at_ld_bytes(block);
    step(&mut machine);

    // payload delivered to IX..IX+16
    for (i, b) in payload.iter().enumerate() {
        assert_eq!(machine.peek(0x9000 + i as u16), *b, "byte {}", i);
    }
    assert_eq!(machine.cpu.a, 0);
    assert_ne!(machine.cpu.f & FLAG_C, 0, "carry reports success");
    assert_eq!(machine.cpu.b, 0xb0);
    assert_eq!(machine.cpu.c, 1);
    assert_eq!(machine.cpu.de(), 0);
    assert_eq!(machine.cpu.ix(), 0x9000 + 17);
    // returned through the ROM's exit point
    assert_eq!(machine.cpu.pc, 0x05e2);
    assert_eq!(machine.cpu.a_alt, 0x01);
    assert_eq!(machine.cpu.f_alt, 0x45);
}

#[test]
fn verify_mode_checks_instead_of_writing() {
    let block = header_block();
    let payload: Vec<u8> = block[1..18].to_vec();
    let mut machine = machine_at_ld_bytes(block.clone());
    // verify: carry clear in F'
    machine.cpu.f_alt = 0;
    for (i, b) in payload.iter().enumerate() {
        machine.poke(0x9000 + i as u16, *b);
    }
    machine.poke(0xa000, 0x55);
    step(&mut machine);
    assert_ne!(machine.cpu.f & FLAG_C, 0, "matching data verifies");

    // now corrupt one byte and verify again
    let mut machine = machine_at_ld_bytes(block);
    machine.cpu.f_alt = 0;
    for (i, b) in payload.iter().enumerate() {
        machine.poke(0x9000 + i as u16, *b);
    }
    machine.poke(0x9005, !payload[5]);
    step(&mut machine);
    assert_eq!(machine.cpu.f & FLAG_C, 0, "mismatch clears carry");
    assert_eq!(machine.cpu.l, payload[5]);
}

#[test]
fn flag_byte_mismatch_fails_the_load() {
    let block = header_block();
    let mut machine = machine_at_ld_bytes(block);
    // expecting a data block (flag 0xff) but the tape holds a header
    machine.cpu.a_alt = 0xff;
    step(&mut machine);
    assert_eq!(machine.cpu.f & FLAG_C, 0);
    // nothing was written
    assert_eq!(machine.peek(0x9000), 0x00);
}

#[test]
fn non_rom_block_starts_real_playback_instead() {
    let mut machine = Machine::new(MachineId::Spectrum48);
    let mut tape = Tape::new();
    tape.append(TapeBlock::PureTone { pulse_length: 2168, count: 100 });
    machine.board.tape.insert(tape);
    machine.cpu.pc = 0x0556;
    machine.cpu.set_de(17);
    step(&mut machine);
    assert!(machine.board.tape.playing, "the deck takes over");
}

#[test]
fn save_trap_appends_a_rom_block() {
    let mut machine = machine_at_ld_bytes(header_block());
    machine.board.tape.insert(Tape::new());
    for i in 0..5u16 {
        machine.poke(0x9000 + i, 0x10 + i as u8);
    }
    machine.cpu.pc = 0x04d0;
    machine.cpu.set_ix(0x9000);
    machine.cpu.set_de(5);
    machine.cpu.a = 0xff;
    step(&mut machine);

    assert_eq!(machine.cpu.pc, 0x053e);
    let tape = machine.board.tape.tape();
    assert_eq!(tape.blocks().len(), 1);
    match &tape.blocks()[0] {
        TapeBlock::Rom { data, pause_ms } => {
            assert_eq!(*pause_ms, 1000);
            assert_eq!(data.len(), 7);
            assert_eq!(data[0], 0xff);
            assert_eq!(&data[1..6], &[0x10, 0x11, 0x12, 0x13, 0x14]);
            assert_eq!(data[6], rom_block_parity(&data[..6]));
        }
        other => panic!("unexpected block {:?}", other),
    }
}
