//! Per-process resource limits.

use spinning_top::Spinlock;

use lotus_abi::layout::REGION_APPLICATION_SIZE;
use lotus_abi::ResourceLimitType;

struct Values {
    current: [i64; ResourceLimitType::COUNT],
    max: [i64; ResourceLimitType::COUNT],
}

/// Caps on named resources, shared by every process created from the same
/// limit set.
pub struct ResourceLimit {
    pub name: String,
    values: Spinlock<Values>,
}

impl ResourceLimit {
    pub fn new(name: String) -> Self {
        ResourceLimit {
            name,
            values: Spinlock::new(Values {
                current: [0; ResourceLimitType::COUNT],
                max: [0; ResourceLimitType::COUNT],
            }),
        }
    }

    /// The limit set applications run under.
    pub fn application_defaults() -> Self {
        let limit = ResourceLimit::new("applications".into());
        {
            let mut v = limit.values.lock();
            v.max[ResourceLimitType::Priority as usize] = 24;
            v.max[ResourceLimitType::Commit as usize] = REGION_APPLICATION_SIZE as i64;
            v.max[ResourceLimitType::Thread as usize] = 32;
            v.max[ResourceLimitType::Event as usize] = 32;
            v.max[ResourceLimitType::Mutex as usize] = 32;
            v.max[ResourceLimitType::Semaphore as usize] = 8;
            v.max[ResourceLimitType::Timer as usize] = 8;
            v.max[ResourceLimitType::SharedMemory as usize] = 16;
            v.max[ResourceLimitType::AddressArbiter as usize] = 2;
        }
        limit
    }

    /// The cap for a resource name; unknown names read as zero.
    pub fn max_value(&self, name: u32) -> i64 {
        match ResourceLimitType::from_u32(name) {
            Some(t) => self.values.lock().max[t as usize],
            None => 0,
        }
    }

    /// The current usage for a resource name; unknown names read as zero.
    pub fn current_value(&self, name: u32) -> i64 {
        match ResourceLimitType::from_u32(name) {
            Some(t) => self.values.lock().current[t as usize],
            None => 0,
        }
    }

    pub fn set_max_value(&self, kind: ResourceLimitType, value: i64) {
        self.values.lock().max[kind as usize] = value;
    }

    pub fn set_current_value(&self, kind: ResourceLimitType, value: i64) {
        self.values.lock().current[kind as usize] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cap_priority() {
        let limit = ResourceLimit::application_defaults();
        assert_eq!(limit.max_value(ResourceLimitType::Priority as u32), 24);
        assert_eq!(limit.current_value(ResourceLimitType::Priority as u32), 0);
        // Unknown names read as zero rather than failing.
        assert_eq!(limit.max_value(0x7FFF_FFFF), 0);
    }
}
