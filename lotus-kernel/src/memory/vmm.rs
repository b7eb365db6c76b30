//! Virtual memory areas and the per-process VM manager.
//!
//! The manager keeps an ordered map from base address to VMA. The VMAs are
//! non-overlapping, page-aligned, and tile the whole user address range;
//! unmapped space is represented by `Free` areas rather than gaps.

use std::collections::BTreeMap;

use lotus_abi::layout::{is_page_aligned, USER_SPACE_END};
use lotus_abi::mem::{MemoryInfo, MemoryPermission, MemoryState};
use lotus_abi::result::{
    ERR_INVALID_ADDRESS, ERR_INVALID_ADDRESS_STATE, ERR_MISALIGNED_ADDRESS, ERR_MISALIGNED_SIZE,
};

use crate::SvcResult;

/// What a VMA resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Nothing; only `Free` areas carry this.
    None,
    /// A window into FCRAM at the given byte offset.
    Memory { fcram_offset: u32 },
}

/// One contiguous virtual mapping.
#[derive(Debug, Clone)]
pub struct Vma {
    pub base: u32,
    pub size: u32,
    pub state: MemoryState,
    pub permissions: MemoryPermission,
    pub backing: Backing,
}

impl Vma {
    fn free(base: u32, size: u32) -> Self {
        Vma {
            base,
            size,
            state: MemoryState::Free,
            permissions: MemoryPermission::NONE,
            backing: Backing::None,
        }
    }

    pub fn end(&self) -> u32 {
        self.base + self.size
    }

    /// Whether `other` can be folded into `self` when adjacent.
    fn mergeable_with(&self, other: &Vma) -> bool {
        if self.state != other.state || self.permissions != other.permissions {
            return false;
        }
        match (self.backing, other.backing) {
            (Backing::None, Backing::None) => true,
            (Backing::Memory { fcram_offset: a }, Backing::Memory { fcram_offset: b }) => {
                a + self.size == b
            }
            _ => false,
        }
    }
}

pub struct VmManager {
    vmas: BTreeMap<u32, Vma>,
}

impl VmManager {
    pub fn new() -> Self {
        let mut vmas = BTreeMap::new();
        vmas.insert(0, Vma::free(0, USER_SPACE_END));
        VmManager { vmas }
    }

    /// The VMA containing `addr`, if `addr` is inside the managed range.
    pub fn find_vma(&self, addr: u32) -> Option<&Vma> {
        let (_, vma) = self.vmas.range(..=addr).next_back()?;
        if addr < vma.end() {
            Some(vma)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.vmas.values()
    }

    /// Validate a `[base, base+size)` range argument.
    fn check_range(base: u32, size: u32) -> SvcResult<u32> {
        if !is_page_aligned(base) {
            return Err(ERR_MISALIGNED_ADDRESS);
        }
        if !is_page_aligned(size) || size == 0 {
            return Err(ERR_MISALIGNED_SIZE);
        }
        let end = base.checked_add(size).ok_or(ERR_INVALID_ADDRESS)?;
        if end > USER_SPACE_END {
            return Err(ERR_INVALID_ADDRESS);
        }
        Ok(end)
    }

    /// Split the VMA containing `addr` so that `addr` becomes a boundary.
    fn split_at(&mut self, addr: u32) {
        let Some((&base, vma)) = self.vmas.range(..=addr).next_back() else {
            return;
        };
        if addr <= base || addr >= vma.end() {
            return;
        }
        let mut left = self.vmas.remove(&base).unwrap();
        let delta = addr - base;
        let mut right = left.clone();
        left.size = delta;
        right.base = addr;
        right.size -= delta;
        if let Backing::Memory { fcram_offset } = right.backing {
            right.backing = Backing::Memory {
                fcram_offset: fcram_offset + delta,
            };
        }
        self.vmas.insert(base, left);
        self.vmas.insert(addr, right);
    }

    /// Make `base` and `base + size` VMA boundaries.
    fn carve(&mut self, base: u32, size: u32) {
        self.split_at(base);
        self.split_at(base + size);
    }

    /// Fold together neighbours of the area starting at `base` that became
    /// identical after an update.
    fn merge_around(&mut self, base: u32) {
        // Merge with the previous area first, then walk forward.
        let mut cursor = match self.vmas.range(..base).next_back() {
            Some((&prev, _)) => prev,
            None => base,
        };
        loop {
            let Some(current) = self.vmas.get(&cursor).cloned() else {
                break;
            };
            let next_base = current.end();
            let Some(next) = self.vmas.get(&next_base).cloned() else {
                break;
            };
            if current.mergeable_with(&next) {
                self.vmas.remove(&next_base);
                let entry = self.vmas.get_mut(&cursor).unwrap();
                entry.size += next.size;
                // Stay on the grown area; it may merge again.
            } else if next_base > base {
                break;
            } else {
                cursor = next_base;
            }
        }
    }

    /// Map FCRAM backing into `[base, base+size)`, which must be free.
    pub fn map_backing_memory(
        &mut self,
        base: u32,
        fcram_offset: u32,
        size: u32,
        state: MemoryState,
        permissions: MemoryPermission,
    ) -> SvcResult<()> {
        Self::check_range(base, size)?;
        self.carve(base, size);
        let free = self
            .vmas
            .range(base..base + size)
            .all(|(_, vma)| vma.state == MemoryState::Free);
        if !free {
            return Err(ERR_INVALID_ADDRESS_STATE);
        }
        let covered: Vec<u32> = self.vmas.range(base..base + size).map(|(&b, _)| b).collect();
        for b in covered {
            self.vmas.remove(&b);
        }
        self.vmas.insert(
            base,
            Vma {
                base,
                size,
                state,
                permissions,
                backing: Backing::Memory { fcram_offset },
            },
        );
        self.merge_around(base);
        Ok(())
    }

    /// Return `[base, base+size)` to the free state.
    pub fn unmap_range(&mut self, base: u32, size: u32) -> SvcResult<()> {
        Self::check_range(base, size)?;
        self.carve(base, size);
        let covered: Vec<u32> = self.vmas.range(base..base + size).map(|(&b, _)| b).collect();
        for b in covered {
            let vma = self.vmas.get_mut(&b).unwrap();
            *vma = Vma::free(vma.base, vma.size);
        }
        self.merge_around(base);
        Ok(())
    }

    /// Change the permissions of every mapped VMA in the range.
    pub fn reprotect_range(
        &mut self,
        base: u32,
        size: u32,
        permissions: MemoryPermission,
    ) -> SvcResult<()> {
        Self::check_range(base, size)?;
        self.carve(base, size);
        let mapped = self
            .vmas
            .range(base..base + size)
            .all(|(_, vma)| vma.state != MemoryState::Free);
        if !mapped {
            return Err(ERR_INVALID_ADDRESS_STATE);
        }
        let covered: Vec<u32> = self.vmas.range(base..base + size).map(|(&b, _)| b).collect();
        for b in covered {
            self.vmas.get_mut(&b).unwrap().permissions = permissions;
        }
        self.merge_around(base);
        Ok(())
    }

    /// Change the state tag of every mapped VMA in the range.
    pub fn set_state_range(
        &mut self,
        base: u32,
        size: u32,
        state: MemoryState,
    ) -> SvcResult<()> {
        Self::check_range(base, size)?;
        self.carve(base, size);
        let mapped = self
            .vmas
            .range(base..base + size)
            .all(|(_, vma)| vma.state != MemoryState::Free);
        if !mapped {
            return Err(ERR_INVALID_ADDRESS_STATE);
        }
        let covered: Vec<u32> = self.vmas.range(base..base + size).map(|(&b, _)| b).collect();
        for b in covered {
            self.vmas.get_mut(&b).unwrap().state = state;
        }
        self.merge_around(base);
        Ok(())
    }

    /// Whether the whole range is mapped with exactly `state`.
    pub fn range_has_state(&self, base: u32, size: u32, state: MemoryState) -> bool {
        let Some(end) = base.checked_add(size) else {
            return false;
        };
        let mut cursor = base;
        while cursor < end {
            let Some(vma) = self.find_vma(cursor) else {
                return false;
            };
            if vma.state != state {
                return false;
            }
            cursor = vma.end();
        }
        true
    }

    /// Translate `addr` to an FCRAM offset, with the number of contiguous
    /// bytes that share the translation.
    pub fn translate(&self, addr: u32) -> Option<(u32, u32)> {
        let vma = self.find_vma(addr)?;
        match vma.backing {
            Backing::Memory { fcram_offset } => {
                Some((fcram_offset + (addr - vma.base), vma.end() - addr))
            }
            Backing::None => None,
        }
    }

    /// The memory-info block for `addr`: the containing VMA coalesced with
    /// every neighbour sharing its permissions and state, regardless of
    /// physical backing.
    pub fn query(&self, addr: u32) -> Option<MemoryInfo> {
        let vma = self.find_vma(addr)?;
        let permissions = vma.permissions;
        let state = vma.state;

        let mut base = vma.base;
        for (_, prev) in self.vmas.range(..vma.base).rev() {
            if prev.permissions == permissions && prev.state == state {
                base = prev.base;
            } else {
                break;
            }
        }

        let mut end = vma.end();
        for (_, next) in self.vmas.range(vma.end()..) {
            if next.permissions == permissions && next.state == state {
                end = next.end();
            } else {
                break;
            }
        }

        Some(MemoryInfo {
            base_address: base,
            size: end - base,
            permission: permissions.bits(),
            state: state as u32,
        })
    }

    /// First free gap of at least `size` bytes within `[lower, upper)`.
    pub fn find_free_area(&self, lower: u32, upper: u32, size: u32) -> Option<u32> {
        for (_, vma) in self.vmas.range(..upper) {
            if vma.state != MemoryState::Free {
                continue;
            }
            let start = vma.base.max(lower);
            if start + size <= vma.end().min(upper) {
                return Some(start);
            }
        }
        None
    }
}

impl Default for VmManager {
    fn default() -> Self {
        VmManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotus_abi::layout::PAGE_SIZE;

    const RW: MemoryPermission = MemoryPermission::READ_WRITE;

    #[test]
    fn initial_map_is_one_free_area() {
        let vm = VmManager::new();
        let vma = vm.find_vma(0x1234).unwrap();
        assert_eq!(vma.base, 0);
        assert_eq!(vma.size, USER_SPACE_END);
        assert_eq!(vma.state, MemoryState::Free);
    }

    #[test]
    fn map_splits_and_unmap_merges_back() {
        let mut vm = VmManager::new();
        vm.map_backing_memory(0x0800_0000, 0, PAGE_SIZE, MemoryState::Continuous, RW)
            .unwrap();
        assert_eq!(vm.iter().count(), 3);

        let vma = vm.find_vma(0x0800_0000).unwrap();
        assert_eq!(vma.state, MemoryState::Continuous);

        vm.unmap_range(0x0800_0000, PAGE_SIZE).unwrap();
        assert_eq!(vm.iter().count(), 1);
    }

    #[test]
    fn adjacent_contiguous_mappings_merge() {
        let mut vm = VmManager::new();
        vm.map_backing_memory(0x0800_0000, 0, PAGE_SIZE, MemoryState::Continuous, RW)
            .unwrap();
        vm.map_backing_memory(0x0800_1000, PAGE_SIZE, PAGE_SIZE, MemoryState::Continuous, RW)
            .unwrap();
        let vma = vm.find_vma(0x0800_0000).unwrap();
        assert_eq!(vma.size, 2 * PAGE_SIZE);
    }

    #[test]
    fn query_coalesces_across_distinct_backings() {
        let mut vm = VmManager::new();
        // Two adjacent pages with non-contiguous physical backing.
        vm.map_backing_memory(0x0800_0000, 0x10000, PAGE_SIZE, MemoryState::Continuous, RW)
            .unwrap();
        vm.map_backing_memory(0x0800_1000, 0x30000, PAGE_SIZE, MemoryState::Continuous, RW)
            .unwrap();
        // Distinct backing keeps the pages as separate VMAs.
        assert_eq!(vm.iter().count(), 4);

        let info = vm.query(0x0800_0800).unwrap();
        assert_eq!(info.base_address, 0x0800_0000);
        assert_eq!(info.size, 2 * PAGE_SIZE);
        let info2 = vm.query(0x0800_1FFF).unwrap();
        assert_eq!(info, info2);
    }

    #[test]
    fn reprotect_requires_mapped_range() {
        let mut vm = VmManager::new();
        assert!(vm.reprotect_range(0x0800_0000, PAGE_SIZE, RW).is_err());

        vm.map_backing_memory(0x0800_0000, 0, PAGE_SIZE, MemoryState::Continuous, RW)
            .unwrap();
        vm.reprotect_range(0x0800_0000, PAGE_SIZE, MemoryPermission::READ)
            .unwrap();
        assert_eq!(
            vm.find_vma(0x0800_0000).unwrap().permissions,
            MemoryPermission::READ
        );
    }

    #[test]
    fn misaligned_arguments_are_rejected() {
        let mut vm = VmManager::new();
        assert_eq!(
            vm.unmap_range(0x0800_0001, PAGE_SIZE).unwrap_err(),
            ERR_MISALIGNED_ADDRESS
        );
        assert_eq!(
            vm.unmap_range(0x0800_0000, 0x123).unwrap_err(),
            ERR_MISALIGNED_SIZE
        );
    }
}
