/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The RZX input-recording container.
//!
//! An RZX session is a sequence of snapshot blocks and input-recording
//! blocks; each input block carries per-frame records of the instruction
//! count and the bytes consumed by IN instructions. This module owns the
//! container and its cursor; the emulation-side record/playback logic
//! lives with the machine.
use core::fmt;
use std::io::{self, Read, Write};

use ferrospec_core::clock::FTs;

use crate::snapshot::{Snapshot, SnapshotError};
use crate::{read_u16, read_u32, read_u8};

const SIGNATURE: &[u8; 4] = b"RZX!";
const VERSION_MAJOR: u8 = 0;
const VERSION_MINOR: u8 = 13;

const BLOCK_CREATOR: u8 = 0x10;
const BLOCK_SNAPSHOT: u8 = 0x30;
const BLOCK_INPUT: u8 = 0x80;

const SNAP_FLAG_EXTERNAL: u32 = 1;
const SNAP_FLAG_COMPRESSED: u32 = 2;
const INPUT_FLAG_PROTECTED: u32 = 1;
const INPUT_FLAG_COMPRESSED: u32 = 2;

/// `in_count` marking "same bytes as the previous frame".
const REPEAT_FRAME: u16 = 0xffff;

const CREATOR_NAME: &[u8] = b"FERROSPEC";
const SNAPSHOT_EXT: &[u8; 4] = b"fsn\0";

#[non_exhaustive]
#[derive(Debug)]
pub enum RzxError {
    BadSignature,
    /// Compressed blocks are recognised but not supported.
    Compressed,
    /// The snapshot lives in a separate file we cannot resolve.
    ExternalSnapshot,
    /// A frame asked for more IN bytes than were recorded.
    InputExhausted,
    /// A repeated frame with no predecessor, or data cut short.
    Malformed,
    /// `store_frame` without `start_input`.
    NoInputBlock,
    Snapshot(SnapshotError),
    Io(io::Error),
}

impl std::error::Error for RzxError {}

impl fmt::Display for RzxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RzxError::BadSignature => write!(f, "not an RZX file"),
            RzxError::Compressed => write!(f, "compressed RZX blocks are not supported"),
            RzxError::ExternalSnapshot => write!(f, "RZX refers to an external snapshot"),
            RzxError::InputExhausted => write!(f, "RZX frame ran out of recorded IN bytes"),
            RzxError::Malformed => write!(f, "malformed RZX data"),
            RzxError::NoInputBlock => write!(f, "no input recording block is open"),
            RzxError::Snapshot(err) => err.fmt(f),
            RzxError::Io(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for RzxError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => RzxError::Malformed,
            _ => RzxError::Io(err),
        }
    }
}

impl From<SnapshotError> for RzxError {
    fn from(err: SnapshotError) -> Self {
        RzxError::Snapshot(err)
    }
}

pub type Result<T> = core::result::Result<T, RzxError>;

/// One recorded frame.
#[derive(Clone, Debug, PartialEq)]
pub struct RzxFrame {
    /// R-register fetches executed during the frame.
    pub instructions: u16,
    /// The bytes served to IN instructions, in consumption order.
    pub in_bytes: Vec<u8>,
}

/// A run of recorded frames starting at a given frame timestamp.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct InputBlock {
    /// T-state counter at the start of the block's first frame.
    pub tstates: FTs,
    pub frames: Vec<RzxFrame>,
}

/// One block of the container.
#[derive(Clone, Debug, PartialEq)]
pub enum RzxBlock {
    Snapshot {
        snap: Box<Snapshot>,
        /// Created by the autosave machinery rather than the user.
        automatic: bool,
    },
    Input(InputBlock),
}

impl RzxBlock {
    pub fn is_automatic_snap(&self) -> bool {
        matches!(self, RzxBlock::Snapshot { automatic: true, .. })
    }

    pub fn frame_count(&self) -> usize {
        match self {
            RzxBlock::Input(block) => block.frames.len(),
            _ => 0,
        }
    }
}

/// A playback cursor: which block, frame and IN byte comes next.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Cursor {
    block: usize,
    frame: usize,
    in_byte: usize,
}

/// What [Rzx::playback_frame] found while advancing.
#[derive(Debug, PartialEq)]
pub struct FrameAdvance {
    pub finished: bool,
    /// A snapshot block sitting between the old and the new frame.
    pub snap: Option<Box<Snapshot>>,
}

/// An in-memory RZX session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rzx {
    blocks: Vec<RzxBlock>,
    cursor: Cursor,
    playing: bool,
}

impl Rzx {
    pub fn new() -> Self {
        Rzx::default()
    }

    pub fn blocks(&self) -> &[RzxBlock] {
        &self.blocks
    }

    pub fn remove_block(&mut self, index: usize) {
        self.blocks.remove(index);
    }

    /// Total recorded frames across all input blocks.
    pub fn frame_count(&self) -> usize {
        self.blocks.iter().map(RzxBlock::frame_count).sum()
    }

    pub fn add_snap(&mut self, snap: Snapshot, automatic: bool) {
        self.blocks.push(RzxBlock::Snapshot { snap: Box::new(snap), automatic });
    }

    /// Opens a new input block; subsequent [store_frame][Rzx::store_frame]
    /// calls append to it.
    pub fn start_input(&mut self, tstates: FTs) {
        self.blocks.push(RzxBlock::Input(InputBlock { tstates, frames: Vec::new() }));
    }

    pub fn store_frame(&mut self, instructions: u16, in_bytes: &[u8]) -> Result<()> {
        match self.blocks.last_mut() {
            Some(RzxBlock::Input(block)) => {
                block.frames.push(RzxFrame { instructions, in_bytes: in_bytes.to_vec() });
                Ok(())
            }
            _ => Err(RzxError::NoInputBlock),
        }
    }

    /// Positions the cursor at the first recorded frame and returns the
    /// snapshot to start from, if the recording carries one.
    pub fn start_playback(&mut self) -> Option<&Snapshot> {
        self.playing = true;
        let mut initial_snap: Option<usize> = None;
        for (index, block) in self.blocks.iter().enumerate() {
            match block {
                RzxBlock::Snapshot { .. } => initial_snap = Some(index),
                RzxBlock::Input(block) if !block.frames.is_empty() => {
                    self.cursor = Cursor { block: index, frame: 0, in_byte: 0 };
                    return initial_snap.map(move |i| match &self.blocks[i] {
                        RzxBlock::Snapshot { snap, .. } => &**snap,
                        _ => unreachable!(),
                    });
                }
                RzxBlock::Input(_) => {}
            }
        }
        self.playing = false;
        initial_snap.map(move |i| match &self.blocks[i] {
            RzxBlock::Snapshot { snap, .. } => &**snap,
            _ => unreachable!(),
        })
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// The current input block's starting T-state count.
    pub fn tstates(&self) -> FTs {
        match self.blocks.get(self.cursor.block) {
            Some(RzxBlock::Input(block)) => block.tstates,
            _ => 0,
        }
    }

    /// The current frame's instruction count.
    pub fn instructions(&self) -> u16 {
        self.current_frame().map(|f| f.instructions).unwrap_or(0)
    }

    fn current_frame(&self) -> Option<&RzxFrame> {
        match self.blocks.get(self.cursor.block) {
            Some(RzxBlock::Input(block)) => block.frames.get(self.cursor.frame),
            _ => None,
        }
    }

    /// Serves the next recorded IN byte of the current frame.
    pub fn playback_byte(&mut self) -> Result<u8> {
        let in_byte = self.cursor.in_byte;
        let frame = self.current_frame().ok_or(RzxError::InputExhausted)?;
        match frame.in_bytes.get(in_byte) {
            Some(&value) => {
                self.cursor.in_byte += 1;
                Ok(value)
            }
            None => Err(RzxError::InputExhausted),
        }
    }

    /// Moves to the next recorded frame, reporting any snapshot passed on
    /// the way and whether the recording has run out.
    pub fn playback_frame(&mut self) -> Result<FrameAdvance> {
        if !self.playing {
            return Ok(FrameAdvance { finished: true, snap: None });
        }
        self.cursor.frame += 1;
        self.cursor.in_byte = 0;

        let in_current = match self.blocks.get(self.cursor.block) {
            Some(RzxBlock::Input(block)) => self.cursor.frame < block.frames.len(),
            _ => false,
        };
        if in_current {
            return Ok(FrameAdvance { finished: false, snap: None });
        }

        let mut snap = None;
        let mut block = self.cursor.block + 1;
        while let Some(entry) = self.blocks.get(block) {
            match entry {
                RzxBlock::Snapshot { snap: s, .. } => snap = Some(s.clone()),
                RzxBlock::Input(input) if !input.frames.is_empty() => {
                    self.cursor = Cursor { block, frame: 0, in_byte: 0 };
                    return Ok(FrameAdvance { finished: false, snap });
                }
                RzxBlock::Input(_) => {}
            }
            block += 1;
        }
        self.playing = false;
        Ok(FrameAdvance { finished: true, snap })
    }

    /// Rewinds to the most recent snapshot, dropping everything after it.
    pub fn rollback(&mut self) -> Result<Snapshot> {
        let index = self.blocks.iter().rposition(|b| matches!(b, RzxBlock::Snapshot { .. }))
            .ok_or(RzxError::Malformed)?;
        self.rollback_to_index(index)
    }

    /// Rewinds to the `which`-th snapshot block (counting from zero).
    pub fn rollback_to(&mut self, which: usize) -> Result<Snapshot> {
        let index = self.blocks.iter().enumerate()
            .filter(|(_, b)| matches!(b, RzxBlock::Snapshot { .. }))
            .map(|(i, _)| i)
            .nth(which)
            .ok_or(RzxError::Malformed)?;
        self.rollback_to_index(index)
    }

    fn rollback_to_index(&mut self, index: usize) -> Result<Snapshot> {
        self.blocks.truncate(index + 1);
        match self.blocks.last() {
            Some(RzxBlock::Snapshot { snap, .. }) => Ok((**snap).clone()),
            _ => Err(RzxError::Malformed),
        }
    }

    // -- container I/O --

    pub fn write_to<W: Write>(&self, mut wr: W) -> io::Result<()> {
        wr.write_all(SIGNATURE)?;
        wr.write_all(&[VERSION_MAJOR, VERSION_MINOR])?;
        wr.write_all(&0u32.to_le_bytes())?;

        // creator block
        let mut name = [0u8; 20];
        name[..CREATOR_NAME.len()].copy_from_slice(CREATOR_NAME);
        wr.write_all(&[BLOCK_CREATOR])?;
        wr.write_all(&29u32.to_le_bytes())?;
        wr.write_all(&name)?;
        wr.write_all(&0u16.to_le_bytes())?;
        wr.write_all(&1u16.to_le_bytes())?;

        for block in &self.blocks {
            match block {
                RzxBlock::Snapshot { snap, .. } => {
                    let mut data = Vec::new();
                    snap.write_to(&mut data)?;
                    let length = 5 + 4 + 4 + 4 + data.len() as u32;
                    wr.write_all(&[BLOCK_SNAPSHOT])?;
                    wr.write_all(&length.to_le_bytes())?;
                    wr.write_all(&0u32.to_le_bytes())?;
                    wr.write_all(SNAPSHOT_EXT)?;
                    wr.write_all(&(data.len() as u32).to_le_bytes())?;
                    wr.write_all(&data)?;
                }
                RzxBlock::Input(input) => {
                    let frames_size: usize = input.frames.iter()
                        .map(|f| 4 + f.in_bytes.len())
                        .sum();
                    let length = 5 + 4 + 1 + 4 + 4 + frames_size as u32;
                    wr.write_all(&[BLOCK_INPUT])?;
                    wr.write_all(&length.to_le_bytes())?;
                    wr.write_all(&(input.frames.len() as u32).to_le_bytes())?;
                    wr.write_all(&[0u8])?;
                    wr.write_all(&input.tstates.to_le_bytes())?;
                    wr.write_all(&0u32.to_le_bytes())?;
                    for frame in &input.frames {
                        wr.write_all(&frame.instructions.to_le_bytes())?;
                        wr.write_all(&(frame.in_bytes.len() as u16).to_le_bytes())?;
                        wr.write_all(&frame.in_bytes)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(mut rd: R) -> Result<Self> {
        let mut signature = [0u8; 4];
        rd.read_exact(&mut signature)?;
        if &signature != SIGNATURE {
            return Err(RzxError::BadSignature);
        }
        let _major = read_u8(&mut rd)?;
        let _minor = read_u8(&mut rd)?;
        let _flags = read_u32(&mut rd)?;

        let mut rzx = Rzx::new();
        loop {
            let id = match read_u8(&mut rd) {
                Ok(id) => id,
                Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let length = read_u32(&mut rd)?;
            if length < 5 {
                return Err(RzxError::Malformed);
            }
            let body_len = (length - 5) as usize;
            match id {
                BLOCK_SNAPSHOT => {
                    let flags = read_u32(&mut rd)?;
                    if flags & SNAP_FLAG_EXTERNAL != 0 {
                        return Err(RzxError::ExternalSnapshot);
                    }
                    if flags & SNAP_FLAG_COMPRESSED != 0 {
                        return Err(RzxError::Compressed);
                    }
                    let mut ext = [0u8; 4];
                    rd.read_exact(&mut ext)?;
                    let _uncompressed = read_u32(&mut rd)?;
                    let mut data = vec![0u8; body_len - 12];
                    rd.read_exact(&mut data)?;
                    let snap = Snapshot::read_from(&data[..])?;
                    rzx.add_snap(snap, false);
                }
                BLOCK_INPUT => {
                    let frame_count = read_u32(&mut rd)?;
                    let _frame_size = read_u8(&mut rd)?;
                    let tstates = read_u32(&mut rd)?;
                    let flags = read_u32(&mut rd)?;
                    if flags & INPUT_FLAG_COMPRESSED != 0 {
                        return Err(RzxError::Compressed);
                    }
                    if flags & INPUT_FLAG_PROTECTED != 0 {
                        log::warn!("ignoring RZX competition-mode signature");
                    }
                    let mut input = InputBlock { tstates, frames: Vec::new() };
                    for _ in 0..frame_count {
                        let instructions = read_u16(&mut rd)?;
                        let in_count = read_u16(&mut rd)?;
                        let in_bytes = if in_count == REPEAT_FRAME {
                            // same bytes as the previous frame
                            input.frames.last()
                                .map(|f: &RzxFrame| f.in_bytes.clone())
                                .ok_or(RzxError::Malformed)?
                        } else {
                            let mut bytes = vec![0u8; in_count as usize];
                            rd.read_exact(&mut bytes)?;
                            bytes
                        };
                        input.frames.push(RzxFrame { instructions, in_bytes });
                    }
                    rzx.blocks.push(RzxBlock::Input(input));
                }
                _ => {
                    // creator, security and unknown blocks carry nothing we use
                    io::copy(&mut rd.by_ref().take(body_len as u64), &mut io::sink())?;
                }
            }
        }
        Ok(rzx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MachineId;

    fn sample_snapshot(pc: u16) -> Snapshot {
        let mut snap = Snapshot::new(MachineId::Spectrum48);
        snap.pc = pc;
        snap
    }

    fn sample_rzx() -> Rzx {
        let mut rzx = Rzx::new();
        rzx.add_snap(sample_snapshot(0x8000), false);
        rzx.start_input(1234);
        rzx.store_frame(100, &[0xbf, 0xfe]).unwrap();
        rzx.store_frame(200, &[]).unwrap();
        rzx.add_snap(sample_snapshot(0x9000), true);
        rzx.start_input(0);
        rzx.store_frame(300, &[0x1f]).unwrap();
        rzx
    }

    #[test]
    fn container_round_trips() {
        let rzx = sample_rzx();
        let mut buffer = Vec::new();
        rzx.write_to(&mut buffer).unwrap();
        let reread = Rzx::read_from(&buffer[..]).unwrap();
        assert_eq!(reread.frame_count(), 3);
        // the automatic marker is not part of the file format
        match (&reread.blocks()[2], &rzx.blocks()[2]) {
            (RzxBlock::Snapshot { snap: a, .. }, RzxBlock::Snapshot { snap: b, .. }) => {
                assert_eq!(a, b)
            }
            other => panic!("unexpected blocks: {:?}", other),
        }
    }

    #[test]
    fn playback_walks_frames_and_snapshots() {
        let mut rzx = sample_rzx();
        let snap = rzx.start_playback().expect("initial snapshot");
        assert_eq!(snap.pc, 0x8000);
        assert_eq!(rzx.tstates(), 1234);
        assert_eq!(rzx.instructions(), 100);
        assert_eq!(rzx.playback_byte().unwrap(), 0xbf);
        assert_eq!(rzx.playback_byte().unwrap(), 0xfe);
        assert!(matches!(rzx.playback_byte(), Err(RzxError::InputExhausted)));

        let advance = rzx.playback_frame().unwrap();
        assert!(!advance.finished);
        assert!(advance.snap.is_none());
        assert_eq!(rzx.instructions(), 200);

        let advance = rzx.playback_frame().unwrap();
        assert!(!advance.finished);
        assert_eq!(advance.snap.unwrap().pc, 0x9000);
        assert_eq!(rzx.instructions(), 300);

        let advance = rzx.playback_frame().unwrap();
        assert!(advance.finished);
    }

    #[test]
    fn repeated_frames_expand_on_read() {
        let mut buffer = Vec::new();
        sample_rzx().write_to(&mut buffer).unwrap();
        // append an input block with a repeated frame by hand
        buffer.push(0x80);
        let body: &[u8] = &[
            2, 0, 0, 0, // 2 frames
            0,          // variable size
            0, 0, 0, 0, // tstates
            0, 0, 0, 0, // flags
            10, 0, 1, 0, 0xaa, // frame 0: 10 fetches, one byte
            11, 0, 0xff, 0xff, // frame 1: repeat
        ];
        buffer.extend_from_slice(&((body.len() + 5) as u32).to_le_bytes());
        buffer.extend_from_slice(body);

        let rzx = Rzx::read_from(&buffer[..]).unwrap();
        match rzx.blocks().last().unwrap() {
            RzxBlock::Input(input) => {
                assert_eq!(input.frames[1].instructions, 11);
                assert_eq!(input.frames[1].in_bytes, vec![0xaa]);
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[test]
    fn rollback_truncates_to_the_last_snapshot() {
        let mut rzx = sample_rzx();
        let snap = rzx.rollback().unwrap();
        assert_eq!(snap.pc, 0x9000);
        assert_eq!(rzx.blocks().len(), 4);
        assert!(matches!(rzx.blocks().last(), Some(RzxBlock::Snapshot { .. })));
    }

    #[test]
    fn rollback_to_selects_by_snapshot_index() {
        let mut rzx = sample_rzx();
        let snap = rzx.rollback_to(0).unwrap();
        assert_eq!(snap.pc, 0x8000);
        assert_eq!(rzx.blocks().len(), 1);
    }

    #[test]
    fn compressed_blocks_are_rejected_cleanly() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"RZX!");
        buffer.extend_from_slice(&[0, 13]);
        buffer.extend_from_slice(&0u32.to_le_bytes());
        buffer.push(0x80);
        buffer.extend_from_slice(&18u32.to_le_bytes());
        buffer.extend_from_slice(&1u32.to_le_bytes());
        buffer.push(0);
        buffer.extend_from_slice(&0u32.to_le_bytes());
        buffer.extend_from_slice(&INPUT_FLAG_COMPRESSED.to_le_bytes());
        assert!(matches!(Rzx::read_from(&buffer[..]), Err(RzxError::Compressed)));
    }
}
