/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Debugger hook tests against the live machine.
use ferrospec::debugger::{
    AddressSpec, BinaryOp, BreakpointKind, BreakpointLife, BreakpointValue, Expression,
};
use ferrospec::machine::{FrameResult, Machine};
use ferrospec::MachineId;

fn machine_with_nop_loop() -> Machine {
    let mut machine = Machine::new(MachineId::Spectrum48);
    // JP 0x8000 at 0x8000
    machine.poke(0x8000, 0xc3);
    machine.poke(0x8001, 0x00);
    machine.poke(0x8002, 0x80);
    machine.cpu.pc = 0x8000;
    machine
}

#[test]
fn time_breakpoint_fires_at_its_tstate_every_frame() {
    let mut machine = machine_with_nop_loop();
    let board = &mut machine.board;
    let id = board.debugger.add_breakpoint(
        &mut board.events,
        BreakpointKind::Time,
        BreakpointValue::Time { tstates: 50_000 },
        BreakpointLife::Permanent,
        0,
        None,
    );

    assert_eq!(machine.run_frame(), FrameResult::DebuggerHalted);
    assert_eq!(machine.board.debugger.last_hit, Some(id));
    // the event fired at 50000; the CPU may overshoot by one instruction
    assert!(
        machine.board.tstates >= 50_000 && machine.board.tstates < 50_020,
        "halted at {}", machine.board.tstates
    );

    // resume to the end of the frame; the target persists into the next
    machine.board.debugger.resume();
    assert_eq!(machine.run_frame(), FrameResult::FrameDone);
    assert_eq!(machine.run_frame(), FrameResult::DebuggerHalted);
    assert_eq!(machine.board.debugger.last_hit, Some(id));
    assert!(machine.board.tstates >= 50_000 && machine.board.tstates < 50_020);
}

#[test]
fn execute_breakpoint_halts_at_the_address() {
    let mut machine = machine_with_nop_loop();
    machine.poke(0x8003, 0x00);
    let board = &mut machine.board;
    board.debugger.add_breakpoint(
        &mut board.events,
        BreakpointKind::Execute,
        BreakpointValue::Address(AddressSpec::Absolute(0x8000)),
        BreakpointLife::Permanent,
        0,
        None,
    );
    assert_eq!(machine.run_frame(), FrameResult::DebuggerHalted);
    assert_eq!(machine.cpu.pc, 0x8000);
}

#[test]
fn oneshot_breakpoints_remove_themselves() {
    let mut machine = machine_with_nop_loop();
    let board = &mut machine.board;
    board.debugger.add_breakpoint(
        &mut board.events,
        BreakpointKind::Execute,
        BreakpointValue::Address(AddressSpec::Absolute(0x8000)),
        BreakpointLife::Oneshot,
        0,
        None,
    );
    assert_eq!(machine.run_frame(), FrameResult::DebuggerHalted);
    assert!(machine.board.debugger.breakpoints().is_empty());
    machine.board.debugger.resume();
    assert_eq!(machine.run_frame(), FrameResult::FrameDone);
}

#[test]
fn ignore_counts_skip_hits() {
    let mut machine = machine_with_nop_loop();
    let board = &mut machine.board;
    board.debugger.add_breakpoint(
        &mut board.events,
        BreakpointKind::Execute,
        BreakpointValue::Address(AddressSpec::Absolute(0x8000)),
        BreakpointLife::Permanent,
        3,
        None,
    );
    assert_eq!(machine.run_frame(), FrameResult::DebuggerHalted);
    // three loop iterations were let through first
    assert!(machine.board.tstates >= 30);
}

#[test]
fn conditions_gate_the_halt() {
    let mut machine = machine_with_nop_loop();
    // halt the loop only once tstates pass 1000
    let condition = Expression::binary(
        BinaryOp::GreaterOrEqual,
        Expression::system("time", "tstates"),
        Expression::Integer(1000),
    );
    let board = &mut machine.board;
    board.debugger.add_breakpoint(
        &mut board.events,
        BreakpointKind::Execute,
        BreakpointValue::Address(AddressSpec::Absolute(0x8000)),
        BreakpointLife::Permanent,
        0,
        Some(condition),
    );
    assert_eq!(machine.run_frame(), FrameResult::DebuggerHalted);
    assert!(machine.board.tstates >= 1000);
}

#[test]
fn write_breakpoint_settles_at_the_next_fetch() {
    let mut machine = Machine::new(MachineId::Spectrum48);
    // LD (0x9000),A; JP 0x8000
    machine.poke(0x8000, 0x32);
    machine.poke(0x8001, 0x00);
    machine.poke(0x8002, 0x90);
    machine.poke(0x8003, 0xc3);
    machine.poke(0x8004, 0x00);
    machine.poke(0x8005, 0x80);
    machine.cpu.pc = 0x8000;

    let board = &mut machine.board;
    board.debugger.add_breakpoint(
        &mut board.events,
        BreakpointKind::Write,
        BreakpointValue::Address(AddressSpec::Absolute(0x9000)),
        BreakpointLife::Permanent,
        0,
        None,
    );
    assert_eq!(machine.run_frame(), FrameResult::DebuggerHalted);
    // the store happened, and the halt arrived at the following fetch
    assert_eq!(machine.cpu.pc, 0x8003);
}

#[test]
fn port_write_breakpoint_matches_through_the_mask() {
    let mut machine = Machine::new(MachineId::Spectrum48);
    // OUT (0xFE),A; JP 0x8000
    machine.poke(0x8000, 0xd3);
    machine.poke(0x8001, 0xfe);
    machine.poke(0x8002, 0xc3);
    machine.poke(0x8003, 0x00);
    machine.poke(0x8004, 0x80);
    machine.cpu.pc = 0x8000;

    let board = &mut machine.board;
    board.debugger.add_breakpoint(
        &mut board.events,
        BreakpointKind::PortWrite,
        BreakpointValue::Port { mask: 0x0001, port: 0x0000 },
        BreakpointLife::Permanent,
        0,
        None,
    );
    assert_eq!(machine.run_frame(), FrameResult::DebuggerHalted);
}
