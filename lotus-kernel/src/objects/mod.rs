//! Kernel objects reachable through handles.

mod address_arbiter;
mod event;
mod mutex;
mod port;
mod semaphore;
mod session;
mod shared_memory;
mod timer;

pub use address_arbiter::AddressArbiter;
pub use event::Event;
pub use mutex::Mutex;
pub use port::{ClientPort, ServerPort};
pub use semaphore::Semaphore;
pub use session::{ClientSession, MappedBufferContext, ServerSession, Session};
pub use shared_memory::SharedMemory;
pub use timer::Timer;
