//! Memory-control SVC behavior: commits, frees, query coalescing, shared
//! blocks, and address translation.

mod common;

use common::{boot, SCRATCH};

use lotus_abi::layout::{FCRAM_PADDR, HEAP_VADDR, LINEAR_HEAP_VADDR, PAGE_SIZE, SHARED_MEMORY_VADDR};
use lotus_abi::mem::{MemoryOperation, MemoryPermission, MemoryState};
use lotus_abi::result::{
    ERR_INVALID_COMBINATION, ERR_INVALID_HANDLE, ERR_MISALIGNED_ADDRESS, ERR_MISALIGNED_SIZE,
};
use lotus_abi::svc;
use lotus_abi::CURRENT_PROCESS;

const RW: u32 = 3;

fn control_memory(
    ts: &mut common::TestSystem,
    addr0: u32,
    addr1: u32,
    size: u32,
    operation: u32,
    permissions: u32,
) {
    ts.svc_on(
        0,
        svc::CONTROL_MEMORY,
        &[(0, addr0), (1, addr1), (2, size), (3, operation), (4, permissions)],
    );
}

fn query_memory(ts: &mut common::TestSystem, addr: u32) -> (u32, u32, u32, u32) {
    ts.svc_on(0, svc::QUERY_MEMORY, &[(0, addr)]);
    ts.assert_success(0);
    (ts.reg(0, 1), ts.reg(0, 2), ts.reg(0, 3), ts.reg(0, 4))
}

#[test]
fn misaligned_arguments_are_rejected() {
    let mut ts = boot(1);

    control_memory(&mut ts, 0x1001, 0, PAGE_SIZE, MemoryOperation::COMMIT, RW);
    assert_eq!(ts.result(0), ERR_MISALIGNED_ADDRESS);

    control_memory(&mut ts, HEAP_VADDR, 0, 0x123, MemoryOperation::COMMIT, RW);
    assert_eq!(ts.result(0), ERR_MISALIGNED_SIZE);
}

#[test]
fn execute_permission_is_an_invalid_combination() {
    let mut ts = boot(1);
    control_memory(
        &mut ts,
        HEAP_VADDR + 0x10_0000,
        0,
        PAGE_SIZE,
        MemoryOperation::COMMIT,
        0x7, // rwx
    );
    assert_eq!(ts.result(0), ERR_INVALID_COMBINATION);
}

#[test]
fn commit_and_free_round_trip() {
    let mut ts = boot(1);
    let addr = HEAP_VADDR + 0x10_0000;

    control_memory(&mut ts, addr, 0, 2 * PAGE_SIZE, MemoryOperation::COMMIT, RW);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), addr);

    let (base, size, perm, state) = query_memory(&mut ts, addr + 0x800);
    assert_eq!(base, addr);
    assert_eq!(size, 2 * PAGE_SIZE);
    assert_eq!(perm, MemoryPermission::READ_WRITE.bits());
    assert_eq!(state, MemoryState::Continuous as u32);

    control_memory(&mut ts, addr, 0, 2 * PAGE_SIZE, MemoryOperation::FREE, 0);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), addr);

    let (_, _, _, state) = query_memory(&mut ts, addr);
    assert_eq!(state, MemoryState::Free as u32);
}

#[test]
fn query_coalesces_adjacent_commits() {
    let mut ts = boot(1);
    let addr = HEAP_VADDR + 0x20_0000;

    // Committed one page at a time; physical backing need not be adjacent.
    control_memory(&mut ts, addr, 0, PAGE_SIZE, MemoryOperation::COMMIT, RW);
    ts.assert_success(0);
    control_memory(&mut ts, addr + PAGE_SIZE, 0, PAGE_SIZE, MemoryOperation::COMMIT, RW);
    ts.assert_success(0);

    let a = query_memory(&mut ts, addr);
    let b = query_memory(&mut ts, addr + PAGE_SIZE + 0xFFF);
    assert_eq!(a, b);
    assert_eq!(a.0, addr);
    assert_eq!(a.1, 2 * PAGE_SIZE);

    // Page-info flags are always zero.
    assert_eq!(ts.reg(0, 5), 0);
}

#[test]
fn linear_commit_translates_to_physical() {
    let mut ts = boot(1);

    control_memory(
        &mut ts,
        0,
        0,
        PAGE_SIZE,
        MemoryOperation::COMMIT | MemoryOperation::LINEAR_FLAG,
        RW,
    );
    ts.assert_success(0);
    let va = ts.reg(0, 1);
    assert!(va >= LINEAR_HEAP_VADDR);

    ts.svc_on(0, svc::CONVERT_VA_TO_PA, &[(0, va)]);
    let pa = ts.reg(0, 0);
    assert_eq!(pa, FCRAM_PADDR + (va - LINEAR_HEAP_VADDR));

    // Unmapped addresses convert to zero.
    ts.svc_on(0, svc::CONVERT_VA_TO_PA, &[(0, 0x3F00_0000)]);
    assert_eq!(ts.reg(0, 0), 0);
}

#[test]
fn region_selector_is_ignored_with_a_warning() {
    let mut ts = boot(1);
    let addr = HEAP_VADDR + 0x30_0000;
    control_memory(
        &mut ts,
        addr,
        0,
        PAGE_SIZE,
        MemoryOperation::COMMIT | MemoryOperation::REGION_SYSTEM,
        RW,
    );
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), addr);
}

#[test]
fn shared_memory_block_lifecycle() {
    let mut ts = boot(1);

    // Execute permission is forbidden at creation.
    ts.svc_on(
        0,
        svc::CREATE_MEMORY_BLOCK,
        &[(0, 0), (1, PAGE_SIZE), (2, 0x7), (3, RW)],
    );
    assert_eq!(ts.result(0), ERR_INVALID_COMBINATION);

    ts.svc_on(
        0,
        svc::CREATE_MEMORY_BLOCK,
        &[(0, 0), (1, PAGE_SIZE), (2, RW), (3, RW)],
    );
    ts.assert_success(0);
    let block = ts.reg(0, 1);

    ts.svc_on(
        0,
        svc::MAP_MEMORY_BLOCK,
        &[(0, block), (1, SHARED_MEMORY_VADDR), (2, RW), (3, RW)],
    );
    ts.assert_success(0);

    let (base, size, _, state) = query_memory(&mut ts, SHARED_MEMORY_VADDR);
    assert_eq!(base, SHARED_MEMORY_VADDR);
    assert_eq!(size, PAGE_SIZE);
    assert_eq!(state, MemoryState::Shared as u32);

    // The mapping is writable guest memory.
    ts.write_guest_u32(SHARED_MEMORY_VADDR, 0x1234_5678);
    assert_eq!(ts.read_guest_u32(SHARED_MEMORY_VADDR), 0x1234_5678);

    ts.svc_on(0, svc::UNMAP_MEMORY_BLOCK, &[(0, block), (1, SHARED_MEMORY_VADDR)]);
    ts.assert_success(0);
    let (_, _, _, state) = query_memory(&mut ts, SHARED_MEMORY_VADDR);
    assert_eq!(state, MemoryState::Free as u32);
}

#[test]
fn misaligned_memory_block_size_is_rejected() {
    let mut ts = boot(1);
    ts.svc_on(
        0,
        svc::CREATE_MEMORY_BLOCK,
        &[(0, 0), (1, 0x123), (2, RW), (3, RW)],
    );
    assert_eq!(ts.result(0), ERR_MISALIGNED_SIZE);
}

#[test]
fn query_with_bad_process_handle_fails() {
    let mut ts = boot(1);
    ts.svc_on(0, svc::QUERY_PROCESS_MEMORY, &[(0, 0xDEAD), (1, SCRATCH)]);
    assert_eq!(ts.result(0), ERR_INVALID_HANDLE);

    ts.svc_on(0, svc::QUERY_PROCESS_MEMORY, &[(0, CURRENT_PROCESS), (1, SCRATCH)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), SCRATCH);
}

#[test]
fn map_process_memory_ex_mirrors_linear_memory() {
    let mut ts = boot(1);

    // Source: one linear page with recognizable contents.
    control_memory(
        &mut ts,
        0,
        0,
        PAGE_SIZE,
        MemoryOperation::COMMIT | MemoryOperation::LINEAR_FLAG,
        RW,
    );
    ts.assert_success(0);
    let src = ts.reg(0, 1);
    ts.write_guest_u32(src, 0xA5A5_0001);

    let dst = 0x3000_0000;
    ts.svc_on(
        0,
        svc::MAP_PROCESS_MEMORY_EX,
        &[
            (0, CURRENT_PROCESS),
            (1, dst),
            (2, CURRENT_PROCESS),
            (3, src),
            (4, 0x800), // rounded up to a page
        ],
    );
    ts.assert_success(0);

    // Same backing, visible through both windows.
    assert_eq!(ts.read_guest_u32(dst), 0xA5A5_0001);
    ts.write_guest_u32(dst, 0xA5A5_0002);
    assert_eq!(ts.read_guest_u32(src), 0xA5A5_0002);

    let (_, _, perm, _) = query_memory(&mut ts, dst);
    assert_eq!(perm, MemoryPermission::READ_WRITE_EXECUTE.bits());

    ts.svc_on(
        0,
        svc::UNMAP_PROCESS_MEMORY_EX,
        &[(0, CURRENT_PROCESS), (1, dst), (2, PAGE_SIZE)],
    );
    ts.assert_success(0);
    let (_, _, _, state) = query_memory(&mut ts, dst);
    assert_eq!(state, MemoryState::Free as u32);
}

#[test]
fn instruction_cache_invalidation_reaches_the_core() {
    let mut ts = boot(1);

    ts.svc_on(
        0,
        svc::INVALIDATE_INSTRUCTION_CACHE_RANGE,
        &[(0, SCRATCH), (1, PAGE_SIZE)],
    );
    ts.assert_success(0);
    ts.svc_on(0, svc::INVALIDATE_ENTIRE_INSTRUCTION_CACHE, &[]);
    ts.assert_success(0);

    assert_eq!(ts.system.core(0).icache_range_invalidations(), 1);
    assert_eq!(ts.system.core(0).icache_full_invalidations(), 1);
}
