/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! RZX record/playback round trips against the live machine.
use ferrospec::core::contention::ULA_CONTENTION_SIZE;
use ferrospec::formats::rzx::{Rzx, RzxBlock};
use ferrospec::machine::Machine;
use ferrospec::MachineId;

/// IN A,(0xFE); JR -4: an endless polling loop.
const POLL_LOOP: [u8; 4] = [0xdb, 0xfe, 0x18, 0xfc];

fn machine_with_poll_loop() -> Machine {
    let mut machine = Machine::new(MachineId::Spectrum48);
    for (i, b) in POLL_LOOP.iter().enumerate() {
        machine.poke(0x8000 + i as u16, *b);
    }
    machine.cpu.pc = 0x8000;
    machine
}

#[test]
fn record_then_play_back_sixty_frames() {
    let mut machine = machine_with_poll_loop();
    machine.rzx_start_recording(true);

    let mut recorded_states = Vec::new();
    for _ in 0..60 {
        machine.run_frame();
        recorded_states.push(machine.snapshot_to());
    }
    let rzx = machine.rzx_stop_recording().expect("a finished recording");

    // a frame record exists for each frame, each with the INs it consumed
    let frames: usize = rzx.blocks().iter().map(RzxBlock::frame_count).sum();
    assert_eq!(frames, 60);
    for block in rzx.blocks() {
        if let RzxBlock::Input(input) = block {
            for frame in &input.frames {
                assert!(frame.instructions > 0);
                assert!(!frame.in_bytes.is_empty());
            }
        }
    }

    // the container survives serialisation
    let mut buffer = Vec::new();
    rzx.write_to(&mut buffer).unwrap();
    let reread = Rzx::read_from(&buffer[..]).unwrap();

    let mut replay = Machine::new(MachineId::Spectrum48);
    replay.rzx_start_playback(reread).unwrap();
    assert!(replay.board.rzx.playing);

    for (frame, recorded) in recorded_states.iter().enumerate() {
        replay.run_frame();
        let state = replay.snapshot_to();
        assert_eq!(state.af, recorded.af, "frame {}", frame);
        assert_eq!(state.bc, recorded.bc, "frame {}", frame);
        assert_eq!(state.de, recorded.de, "frame {}", frame);
        assert_eq!(state.hl, recorded.hl, "frame {}", frame);
        assert_eq!(state.pc, recorded.pc, "frame {}", frame);
        assert_eq!(state.sp, recorded.sp, "frame {}", frame);
        assert_eq!(state.r, recorded.r, "frame {}", frame);
        // tstates are not compared: RZX replay is instruction-exact, and
        // a frame's trailing fraction of an instruction is not recorded
    }
}

#[test]
fn playback_serves_recorded_in_bytes() {
    let mut machine = machine_with_poll_loop();
    // drive the EAR input high so recorded INs differ from the replay
    // machine's default
    machine.board.ula.ear_in = true;
    machine.rzx_start_recording(true);
    machine.run_frame();
    let rzx = machine.rzx_stop_recording().unwrap();

    let mut replay = Machine::new(MachineId::Spectrum48);
    // different live input, same recorded bytes
    replay.board.ula.ear_in = false;
    replay.rzx_start_playback(rzx).unwrap();
    replay.run_frame();
    // the replayed CPU saw the recorded 0xff, not a live 0xbf
    assert_eq!(replay.cpu.a, 0xff);
}

#[test]
fn autosaves_appear_every_250_frames() {
    let mut machine = machine_with_poll_loop();
    machine.rzx_start_recording(true);
    for _ in 0..260 {
        machine.run_frame();
    }
    let rzx = machine.rzx_stop_recording().unwrap();
    let autosnaps = rzx.blocks().iter().filter(|b| b.is_automatic_snap()).count();
    assert_eq!(autosnaps, 1);
}

#[test]
fn rollback_restores_the_autosnap_state() {
    let mut machine = machine_with_poll_loop();
    machine.rzx_start_recording(true);
    for _ in 0..260 {
        machine.run_frame();
    }
    let pc_before = machine.cpu.pc;
    machine.rzx_rollback().unwrap();
    // still recording, back at the autosnap
    assert!(machine.board.rzx.recording);
    assert!(machine.cpu.pc >= 0x8000 && machine.cpu.pc < 0x8004, "pc {:04x}", pc_before);
}

#[test]
fn runaway_frame_is_curtailed_by_the_sentinel() {
    // a hand-made recording whose single frame never ends
    let mut rzx = Rzx::new();
    let mut machine = machine_with_poll_loop();
    rzx.add_snap(machine.snapshot_to(), false);
    rzx.start_input(0);
    // far more fetches than a frame can hold, with IN bytes to match
    rzx.store_frame(0xfff0, &vec![0xff; 0x8000]).unwrap();

    machine.rzx_start_playback(rzx).unwrap();
    let mut reductions = 0;
    for _ in 0..200 {
        if !machine.board.rzx.playing {
            break;
        }
        let before = machine.board.tstates;
        machine.cpu.do_opcodes(&mut machine.board);
        machine.do_events();
        assert!(
            (machine.board.tstates as usize) < ULA_CONTENTION_SIZE,
            "tstates overran the contention table"
        );
        if machine.board.tstates < before {
            reductions += 1;
        }
    }
    assert!(reductions > 0, "the sentinel never folded the clock back");
}
