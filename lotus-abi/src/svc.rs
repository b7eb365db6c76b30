//! SVC numbers implemented by the HLE kernel.
//!
//! The dispatch table spans 0x00..=0xB3; numbers absent here are reserved
//! slots that log and return control to the guest untouched.

pub const CONTROL_MEMORY: u32 = 0x01;
pub const QUERY_MEMORY: u32 = 0x02;
pub const EXIT_PROCESS: u32 = 0x03;
pub const CREATE_THREAD: u32 = 0x08;
pub const EXIT_THREAD: u32 = 0x09;
pub const SLEEP_THREAD: u32 = 0x0A;
pub const GET_THREAD_PRIORITY: u32 = 0x0B;
pub const SET_THREAD_PRIORITY: u32 = 0x0C;
pub const CREATE_MUTEX: u32 = 0x13;
pub const RELEASE_MUTEX: u32 = 0x14;
pub const CREATE_SEMAPHORE: u32 = 0x15;
pub const RELEASE_SEMAPHORE: u32 = 0x16;
pub const CREATE_EVENT: u32 = 0x17;
pub const SIGNAL_EVENT: u32 = 0x18;
pub const CLEAR_EVENT: u32 = 0x19;
pub const CREATE_TIMER: u32 = 0x1A;
pub const SET_TIMER: u32 = 0x1B;
pub const CANCEL_TIMER: u32 = 0x1C;
pub const CLEAR_TIMER: u32 = 0x1D;
pub const CREATE_MEMORY_BLOCK: u32 = 0x1E;
pub const MAP_MEMORY_BLOCK: u32 = 0x1F;
pub const UNMAP_MEMORY_BLOCK: u32 = 0x20;
pub const CREATE_ADDRESS_ARBITER: u32 = 0x21;
pub const ARBITRATE_ADDRESS: u32 = 0x22;
pub const CLOSE_HANDLE: u32 = 0x23;
pub const WAIT_SYNCHRONIZATION_1: u32 = 0x24;
pub const WAIT_SYNCHRONIZATION_N: u32 = 0x25;
pub const DUPLICATE_HANDLE: u32 = 0x27;
pub const GET_SYSTEM_TICK: u32 = 0x28;
pub const GET_HANDLE_INFO: u32 = 0x29;
pub const GET_SYSTEM_INFO: u32 = 0x2A;
pub const GET_PROCESS_INFO: u32 = 0x2B;
pub const GET_THREAD_INFO: u32 = 0x2C;
pub const CONNECT_TO_PORT: u32 = 0x2D;
pub const SEND_SYNC_REQUEST: u32 = 0x32;
pub const OPEN_PROCESS: u32 = 0x33;
pub const OPEN_THREAD: u32 = 0x34;
pub const GET_PROCESS_ID: u32 = 0x35;
pub const GET_PROCESS_ID_OF_THREAD: u32 = 0x36;
pub const GET_THREAD_ID: u32 = 0x37;
pub const GET_RESOURCE_LIMIT: u32 = 0x38;
pub const GET_RESOURCE_LIMIT_LIMIT_VALUES: u32 = 0x39;
pub const GET_RESOURCE_LIMIT_CURRENT_VALUES: u32 = 0x3A;
pub const BREAK: u32 = 0x3C;
pub const OUTPUT_DEBUG_STRING: u32 = 0x3D;
pub const CREATE_PORT: u32 = 0x47;
pub const CREATE_SESSION_TO_PORT: u32 = 0x48;
pub const CREATE_SESSION: u32 = 0x49;
pub const ACCEPT_SESSION: u32 = 0x4A;
pub const REPLY_AND_RECEIVE: u32 = 0x4F;
pub const GET_PROCESS_LIST: u32 = 0x65;
pub const KERNEL_SET_STATE: u32 = 0x7C;
pub const QUERY_PROCESS_MEMORY: u32 = 0x7D;
pub const CONVERT_VA_TO_PA: u32 = 0x90;
pub const INVALIDATE_INSTRUCTION_CACHE_RANGE: u32 = 0x93;
pub const INVALIDATE_ENTIRE_INSTRUCTION_CACHE: u32 = 0x94;
pub const MAP_PROCESS_MEMORY_EX: u32 = 0xA0;
pub const UNMAP_PROCESS_MEMORY_EX: u32 = 0xA1;
pub const CONTROL_PROCESS: u32 = 0xB3;
