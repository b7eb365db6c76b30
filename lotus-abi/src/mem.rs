//! Memory permissions, states, and the `ControlMemory` operation encoding.

use bitflags::bitflags;

bitflags! {
    /// Access permissions for a virtual memory area.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryPermission: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXECUTE = 4;
        /// "Don't care" marker used by shared-memory creation.
        const DONT_CARE = 0x1000_0000;
    }
}

impl MemoryPermission {
    pub const NONE: Self = Self::empty();
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);
    pub const READ_EXECUTE: Self = Self::READ.union(Self::EXECUTE);
    pub const READ_WRITE_EXECUTE: Self =
        Self::READ.union(Self::WRITE).union(Self::EXECUTE);
}

/// Memory-info state reported by `QueryMemory` and carried by each VMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MemoryState {
    Free = 0,
    Reserved = 1,
    Io = 2,
    Static = 3,
    Code = 4,
    Private = 5,
    Shared = 6,
    Continuous = 7,
    Aliased = 8,
    Alias = 9,
    AliasCode = 10,
    Locked = 11,
}

/// `ControlMemory` operation word: a base operation in the low byte, an
/// optional region selector nibble, and the linear-allocation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperation(pub u32);

impl MemoryOperation {
    pub const FREE: u32 = 1;
    pub const RESERVE: u32 = 2;
    pub const COMMIT: u32 = 3;
    pub const MAP: u32 = 4;
    pub const UNMAP: u32 = 5;
    pub const PROTECT: u32 = 6;

    pub const OPERATION_MASK: u32 = 0xFF;
    pub const REGION_MASK: u32 = 0xF00;
    pub const LINEAR_FLAG: u32 = 0x10000;

    pub const REGION_APP: u32 = 0x100;
    pub const REGION_SYSTEM: u32 = 0x200;
    pub const REGION_BASE: u32 = 0x300;

    pub const fn operation(self) -> u32 {
        self.0 & Self::OPERATION_MASK
    }

    pub const fn region(self) -> u32 {
        self.0 & Self::REGION_MASK
    }

    pub const fn is_linear(self) -> bool {
        self.0 & Self::LINEAR_FLAG != 0
    }
}

/// Region-block descriptor returned by `QueryMemory` in a register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub base_address: u32,
    pub size: u32,
    pub permission: u32,
    pub state: u32,
}

/// Second register block returned by `QueryMemory`; `flags` is always zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub flags: u32,
}

/// Physical memory regions backing guest allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionName {
    Application = 1,
    System = 2,
    Base = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_word_decodes() {
        let op = MemoryOperation(MemoryOperation::COMMIT | MemoryOperation::LINEAR_FLAG);
        assert_eq!(op.operation(), MemoryOperation::COMMIT);
        assert!(op.is_linear());
        assert_eq!(op.region(), 0);

        let op = MemoryOperation(MemoryOperation::FREE | MemoryOperation::REGION_SYSTEM);
        assert_eq!(op.operation(), MemoryOperation::FREE);
        assert_eq!(op.region(), MemoryOperation::REGION_SYSTEM);
        assert!(!op.is_linear());
    }

    #[test]
    fn permissions_compose() {
        assert_eq!(
            MemoryPermission::READ_WRITE,
            MemoryPermission::READ | MemoryPermission::WRITE
        );
        assert!(MemoryPermission::READ_WRITE_EXECUTE.contains(MemoryPermission::EXECUTE));
    }
}
