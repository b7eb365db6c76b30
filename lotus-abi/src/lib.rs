//! Shared ABI definitions between the HLE kernel and guest code.
//!
//! This crate contains the values both sides must agree on: result-code
//! encoding, memory permissions and states, the guest address-space layout,
//! IPC command-buffer encoding, and the SVC numbering.

#![cfg_attr(not(test), no_std)]

pub mod ipc;
pub mod layout;
pub mod mem;
pub mod result;
pub mod svc;

/// Opaque token for a kernel object, scoped to a process's handle table.
pub type Handle = u32;

/// Pseudo-handle resolving to the calling thread.
pub const CURRENT_THREAD: Handle = 0xFFFF_8000;

/// Pseudo-handle resolving to the calling process.
pub const CURRENT_PROCESS: Handle = 0xFFFF_8001;

/// Highest (numerically lowest) thread priority a guest may request.
pub const THREAD_PRIO_HIGHEST: u32 = 0;

/// Lowest thread priority; `CreateThread` rejects anything beyond it.
pub const THREAD_PRIO_LOWEST: u32 = 63;

/// Default priority for application main threads.
pub const THREAD_PRIO_DEFAULT: u32 = 48;

/// Processor-id argument meaning "the process's ideal processor".
pub const PROCESSOR_ID_DEFAULT: i32 = -2;

/// Processor-id argument meaning "any core".
pub const PROCESSOR_ID_ALL: i32 = -1;

/// Event and timer reset behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    /// Signal is consumed by the first acquire.
    OneShot = 0,
    /// Signal stays set until explicitly cleared.
    Sticky = 1,
    /// Signal wakes current waiters, then clears itself.
    Pulse = 2,
}

impl ResetType {
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::OneShot),
            1 => Some(Self::Sticky),
            2 => Some(Self::Pulse),
            _ => None,
        }
    }
}

/// Operations accepted by `ArbitrateAddress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationType {
    Signal = 0,
    WaitIfLessThan = 1,
    DecrementAndWaitIfLessThan = 2,
    WaitIfLessThanWithTimeout = 3,
    DecrementAndWaitIfLessThanWithTimeout = 4,
}

impl ArbitrationType {
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Signal),
            1 => Some(Self::WaitIfLessThan),
            2 => Some(Self::DecrementAndWaitIfLessThan),
            3 => Some(Self::WaitIfLessThanWithTimeout),
            4 => Some(Self::DecrementAndWaitIfLessThanWithTimeout),
            _ => None,
        }
    }

    /// Whether this operation arms a wake-after-delay timeout.
    pub const fn has_timeout(self) -> bool {
        matches!(
            self,
            Self::WaitIfLessThanWithTimeout | Self::DecrementAndWaitIfLessThanWithTimeout
        )
    }
}

/// Resource-limit categories, indexed by the names the guest passes to the
/// `GetResourceLimit*Values` SVCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimitType {
    Priority = 0,
    Commit = 1,
    Thread = 2,
    Event = 3,
    Mutex = 4,
    Semaphore = 5,
    Timer = 6,
    SharedMemory = 7,
    AddressArbiter = 8,
    CpuTime = 9,
}

impl ResourceLimitType {
    pub const COUNT: usize = 10;

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Priority),
            1 => Some(Self::Commit),
            2 => Some(Self::Thread),
            3 => Some(Self::Event),
            4 => Some(Self::Mutex),
            5 => Some(Self::Semaphore),
            6 => Some(Self::Timer),
            7 => Some(Self::SharedMemory),
            8 => Some(Self::AddressArbiter),
            9 => Some(Self::CpuTime),
            _ => None,
        }
    }
}
