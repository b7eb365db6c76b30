//! High-level emulation of the handheld kernel's supervisor-call interface.
//!
//! Nothing here runs the real kernel's code; the crate reimplements its
//! observable semantics — handle tables, wait objects, IPC, thread
//! scheduling hooks, virtual-memory operations, resource limits — on top of
//! the host emulator runtime. The CPU cores trap software interrupts into
//! [`System::call_svc`] (or [`system::call_svc`] under the global kernel
//! lock for multi-core embedders); everything else follows from there.

pub mod config;
pub mod cpu;
pub mod handle;
pub mod ipc;
pub mod kernel;
pub mod memory;
pub mod object;
pub mod objects;
pub mod process;
pub mod resource_limit;
pub mod svc;
pub mod system;
pub mod thread;
pub mod timing;
mod wake;

pub use config::Config;
pub use system::{call_svc, EmuStatus, SharedSystem, System};

/// Outcome of a kernel operation surfaced to the guest.
pub type SvcResult<T> = Result<T, lotus_abi::result::ResultCode>;
