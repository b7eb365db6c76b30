//! Address arbiters: guest-futex style waits keyed on a memory word.

use std::sync::Arc;

use log::error;

use lotus_abi::result::{ERR_INVALID_ENUM_VALUE, RESULT_SUCCESS};
use lotus_abi::ArbitrationType;

use crate::object::{Object, WaiterList, WaitObject};
use crate::system::System;
use crate::thread::{Thread, ThreadStatus};
use crate::wake;
use crate::SvcResult;

pub struct AddressArbiter {
    pub name: String,
    waiters: WaiterList,
}

impl AddressArbiter {
    pub fn new(name: String) -> Self {
        AddressArbiter {
            name,
            waiters: WaiterList::new(),
        }
    }

    pub fn arbitrate(
        this: &Arc<AddressArbiter>,
        system: &mut System,
        thread: &Arc<Thread>,
        arbitration_type: u32,
        address: u32,
        value: i32,
        nanoseconds: i64,
    ) -> SvcResult<()> {
        let Some(arbitration_type) = ArbitrationType::from_u32(arbitration_type) else {
            error!("unknown arbitration type {arbitration_type}");
            return Err(ERR_INVALID_ENUM_VALUE);
        };

        match arbitration_type {
            ArbitrationType::Signal => {
                // Earliest-parked waiters on this address win; a negative
                // count wakes everyone.
                let waiting: Vec<Arc<Thread>> = this
                    .waiters
                    .snapshot()
                    .into_iter()
                    .filter(|t| {
                        t.status() == ThreadStatus::WaitArb && t.arb_wait_address() == address
                    })
                    .collect();
                let count = if value < 0 {
                    waiting.len()
                } else {
                    waiting.len().min(value as usize)
                };
                for waiter in waiting.into_iter().take(count) {
                    waiter.set_wait_synchronization_result(RESULT_SUCCESS);
                    wake::resume_from_wait(system, &waiter, wake::WakeReason::Signal, None);
                }
            }

            ArbitrationType::WaitIfLessThan
            | ArbitrationType::WaitIfLessThanWithTimeout
            | ArbitrationType::DecrementAndWaitIfLessThan
            | ArbitrationType::DecrementAndWaitIfLessThanWithTimeout => {
                let process = system.current_process().expect("no current process");
                let memory_value = system.memory.read_u32(&process, address)? as i32;
                let decrement = matches!(
                    arbitration_type,
                    ArbitrationType::DecrementAndWaitIfLessThan
                        | ArbitrationType::DecrementAndWaitIfLessThanWithTimeout
                );
                if memory_value < value {
                    if decrement {
                        system
                            .memory
                            .write_u32(&process, address, (memory_value - 1) as u32)?;
                    }
                    thread.set_status(ThreadStatus::WaitArb);
                    thread.set_arb_wait_address(address);
                    thread.set_wait_objects(vec![Object::AddressArbiter(this.clone())]);
                    this.waiters.add(thread.clone());
                    if arbitration_type.has_timeout() {
                        wake::wake_after_delay(system, thread, nanoseconds);
                    }
                }
            }
        }

        Ok(())
    }
}

impl WaitObject for AddressArbiter {
    /// Arbiter waits complete only through `Signal` or a timeout; the
    /// generic ready scan never picks them up.
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        true
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {}

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}
