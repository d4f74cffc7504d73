//! Tests for stack walking over frame-pointer chains

mod common;

use common::*;
use sonde_core::types::RegisterId;
use sonde_core::unwind::{FrameStatus, StackWalker};

const TOP_FP: u64 = STACK_END - 0x100;
const CALLER_FP: u64 = STACK_END - 0x80;

/// Three frames: pc 0x401234, called from 0x401500, called from 0x401800.
fn process_with_chain() -> FakeProcess
{
    let mut process = FakeProcess::new();
    process.registers.set(RegisterId::Fp, TOP_FP).unwrap();
    process.poke(TOP_FP, &CALLER_FP.to_ne_bytes());
    process.poke(TOP_FP + 8, &0x40_1500u64.to_ne_bytes());
    process.poke(CALLER_FP, &0u64.to_ne_bytes());
    process.poke(CALLER_FP + 8, &0x40_1800u64.to_ne_bytes());
    process
}

#[test]
fn test_frame_pointer_chain_without_cfi()
{
    let process = process_with_chain();
    let walker = StackWalker::new(&process.layout, &process);
    let frames = walker.walk(&process.registers, 16).unwrap();

    let pcs: Vec<u64> = frames.iter().map(|frame| frame.pc.value()).collect();
    assert_eq!(pcs, vec![0x40_1234, 0x40_1500, 0x40_1800]);
    assert_eq!(frames[0].status, FrameStatus::Top);
    assert_eq!(frames[1].status, FrameStatus::FramePointer);
    assert_eq!(frames[1].sp.value(), TOP_FP + 16);
    assert_eq!(frames[2].sp.value(), CALLER_FP + 16);
    assert!(frames.iter().all(|frame| frame.image.as_deref() == Some("fake")));
    assert_eq!(frames.iter().map(|frame| frame.index).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn test_walk_respects_frame_limit()
{
    let process = process_with_chain();
    let frames = StackWalker::new(&process.layout, &process)
        .walk(&process.registers, 2)
        .unwrap();
    assert_eq!(frames.len(), 2);
}

#[test]
fn test_self_referencing_frame_pointer_terminates()
{
    let mut process = FakeProcess::new();
    process.registers.set(RegisterId::Fp, TOP_FP).unwrap();
    process.poke(TOP_FP, &TOP_FP.to_ne_bytes());
    process.poke(TOP_FP + 8, &0x40_1500u64.to_ne_bytes());

    let frames = StackWalker::new(&process.layout, &process)
        .walk(&process.registers, 64)
        .unwrap();
    assert_eq!(frames.len(), 2);
}

#[test]
fn test_unreadable_frame_pointer_ends_the_walk()
{
    let mut process = FakeProcess::new();
    process.registers.set(RegisterId::Fp, 0x10).unwrap();

    let frames = StackWalker::new(&process.layout, &process)
        .walk(&process.registers, 64)
        .unwrap();
    assert_eq!(frames.len(), 1);
}

#[test]
fn test_frame_display()
{
    let process = process_with_chain();
    let frames = StackWalker::new(&process.layout, &process)
        .walk(&process.registers, 1)
        .unwrap();

    let line = frames[0].to_string();
    assert!(line.starts_with("#0"), "{line}");
    assert!(line.contains("0x0000000000401234"), "{line}");
    assert!(line.contains("in ??"), "{line}");
    assert!(line.ends_with("(fake)"), "{line}");
}
