//! The polymorphic kernel-object model.
//!
//! Handle tables store a tagged sum over the object variants. Objects a
//! thread can park on expose the `WaitObject` capability; acquisition is
//! dispatched through `Object` so implementations that need to retain the
//! strong reference (mutexes) can get at it.

use std::sync::Arc;

use spinning_top::Spinlock;

use crate::objects::{
    AddressArbiter, ClientPort, ClientSession, Event, Mutex, Semaphore, ServerPort,
    ServerSession, SharedMemory, Timer,
};
use crate::process::Process;
use crate::resource_limit::ResourceLimit;
use crate::thread::Thread;

/// Discriminant of a kernel-object variant, used for typed handle queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Process,
    Thread,
    Event,
    Mutex,
    Semaphore,
    Timer,
    AddressArbiter,
    SharedMemory,
    ServerPort,
    ClientPort,
    ServerSession,
    ClientSession,
    ResourceLimit,
}

/// FIFO list of threads parked on a wait object.
#[derive(Default)]
pub struct WaiterList(Spinlock<Vec<Arc<Thread>>>);

impl WaiterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `thread` unless it is already listed.
    pub fn add(&self, thread: Arc<Thread>) {
        let mut list = self.0.lock();
        if !list.iter().any(|t| Arc::ptr_eq(t, &thread)) {
            list.push(thread);
        }
    }

    pub fn remove(&self, thread: &Arc<Thread>) {
        self.0.lock().retain(|t| !Arc::ptr_eq(t, thread));
    }

    /// Waiters in arrival order.
    pub fn snapshot(&self) -> Vec<Arc<Thread>> {
        self.0.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Capability shared by every object a thread can park on.
pub trait WaitObject: Send + Sync {
    /// Whether `thread` must park before acquiring the object.
    fn should_wait(&self, thread: &Arc<Thread>) -> bool;

    /// Advance the object's state for a successful wait. `as_object` is the
    /// tagged reference the waiter parked on, for implementations that keep
    /// a strong back reference.
    fn acquire(&self, thread: &Arc<Thread>, as_object: &Object);

    fn waiters(&self) -> &WaiterList;

    fn add_waiting_thread(&self, thread: Arc<Thread>, _as_object: &Object) {
        self.waiters().add(thread);
    }

    fn remove_waiting_thread(&self, thread: &Arc<Thread>) {
        self.waiters().remove(thread);
    }
}

/// A reference-counted kernel object of any variant.
#[derive(Clone)]
pub enum Object {
    Process(Arc<Process>),
    Thread(Arc<Thread>),
    Event(Arc<Event>),
    Mutex(Arc<Mutex>),
    Semaphore(Arc<Semaphore>),
    Timer(Arc<Timer>),
    AddressArbiter(Arc<AddressArbiter>),
    SharedMemory(Arc<SharedMemory>),
    ServerPort(Arc<ServerPort>),
    ClientPort(Arc<ClientPort>),
    ServerSession(Arc<ServerSession>),
    ClientSession(Arc<ClientSession>),
    ResourceLimit(Arc<ResourceLimit>),
}

impl core::fmt::Debug for Object {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Object::{:?}", self.kind())
    }
}

impl Object {
    pub fn kind(&self) -> HandleKind {
        match self {
            Object::Process(_) => HandleKind::Process,
            Object::Thread(_) => HandleKind::Thread,
            Object::Event(_) => HandleKind::Event,
            Object::Mutex(_) => HandleKind::Mutex,
            Object::Semaphore(_) => HandleKind::Semaphore,
            Object::Timer(_) => HandleKind::Timer,
            Object::AddressArbiter(_) => HandleKind::AddressArbiter,
            Object::SharedMemory(_) => HandleKind::SharedMemory,
            Object::ServerPort(_) => HandleKind::ServerPort,
            Object::ClientPort(_) => HandleKind::ClientPort,
            Object::ServerSession(_) => HandleKind::ServerSession,
            Object::ClientSession(_) => HandleKind::ClientSession,
            Object::ResourceLimit(_) => HandleKind::ResourceLimit,
        }
    }

    /// The wait capability, for the variants that have one.
    pub fn wait_object(&self) -> Option<&dyn WaitObject> {
        match self {
            Object::Process(o) => Some(o.as_ref()),
            Object::Thread(o) => Some(o.as_ref()),
            Object::Event(o) => Some(o.as_ref()),
            Object::Mutex(o) => Some(o.as_ref()),
            Object::Semaphore(o) => Some(o.as_ref()),
            Object::Timer(o) => Some(o.as_ref()),
            Object::AddressArbiter(o) => Some(o.as_ref()),
            Object::ServerPort(o) => Some(o.as_ref()),
            Object::ServerSession(o) => Some(o.as_ref()),
            Object::ClientSession(o) => Some(o.as_ref()),
            Object::SharedMemory(_) | Object::ClientPort(_) | Object::ResourceLimit(_) => None,
        }
    }

    pub fn should_wait(&self, thread: &Arc<Thread>) -> bool {
        self.wait_object()
            .map(|w| w.should_wait(thread))
            .unwrap_or(false)
    }

    pub fn acquire(&self, thread: &Arc<Thread>) {
        if let Some(w) = self.wait_object() {
            w.acquire(thread, self);
        }
    }

    pub fn add_waiting_thread(&self, thread: Arc<Thread>) {
        if let Some(w) = self.wait_object() {
            w.add_waiting_thread(thread, self);
        }
    }

    pub fn remove_waiting_thread(&self, thread: &Arc<Thread>) {
        if let Some(w) = self.wait_object() {
            w.remove_waiting_thread(thread);
        }
    }

    /// Identity comparison: same variant, same allocation.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Process(a), Object::Process(b)) => Arc::ptr_eq(a, b),
            (Object::Thread(a), Object::Thread(b)) => Arc::ptr_eq(a, b),
            (Object::Event(a), Object::Event(b)) => Arc::ptr_eq(a, b),
            (Object::Mutex(a), Object::Mutex(b)) => Arc::ptr_eq(a, b),
            (Object::Semaphore(a), Object::Semaphore(b)) => Arc::ptr_eq(a, b),
            (Object::Timer(a), Object::Timer(b)) => Arc::ptr_eq(a, b),
            (Object::AddressArbiter(a), Object::AddressArbiter(b)) => Arc::ptr_eq(a, b),
            (Object::SharedMemory(a), Object::SharedMemory(b)) => Arc::ptr_eq(a, b),
            (Object::ServerPort(a), Object::ServerPort(b)) => Arc::ptr_eq(a, b),
            (Object::ClientPort(a), Object::ClientPort(b)) => Arc::ptr_eq(a, b),
            (Object::ServerSession(a), Object::ServerSession(b)) => Arc::ptr_eq(a, b),
            (Object::ClientSession(a), Object::ClientSession(b)) => Arc::ptr_eq(a, b),
            (Object::ResourceLimit(a), Object::ResourceLimit(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Reference count of the underlying allocation.
    pub fn strong_count(&self) -> usize {
        match self {
            Object::Process(o) => Arc::strong_count(o),
            Object::Thread(o) => Arc::strong_count(o),
            Object::Event(o) => Arc::strong_count(o),
            Object::Mutex(o) => Arc::strong_count(o),
            Object::Semaphore(o) => Arc::strong_count(o),
            Object::Timer(o) => Arc::strong_count(o),
            Object::AddressArbiter(o) => Arc::strong_count(o),
            Object::SharedMemory(o) => Arc::strong_count(o),
            Object::ServerPort(o) => Arc::strong_count(o),
            Object::ClientPort(o) => Arc::strong_count(o),
            Object::ServerSession(o) => Arc::strong_count(o),
            Object::ClientSession(o) => Arc::strong_count(o),
            Object::ResourceLimit(o) => Arc::strong_count(o),
        }
    }

    pub fn as_process(&self) -> Option<&Arc<Process>> {
        match self {
            Object::Process(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&Arc<Thread>> {
        match self {
            Object::Thread(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Arc<Event>> {
        match self {
            Object::Event(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_mutex(&self) -> Option<&Arc<Mutex>> {
        match self {
            Object::Mutex(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_semaphore(&self) -> Option<&Arc<Semaphore>> {
        match self {
            Object::Semaphore(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_timer(&self) -> Option<&Arc<Timer>> {
        match self {
            Object::Timer(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_address_arbiter(&self) -> Option<&Arc<AddressArbiter>> {
        match self {
            Object::AddressArbiter(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_shared_memory(&self) -> Option<&Arc<SharedMemory>> {
        match self {
            Object::SharedMemory(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_server_port(&self) -> Option<&Arc<ServerPort>> {
        match self {
            Object::ServerPort(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_client_port(&self) -> Option<&Arc<ClientPort>> {
        match self {
            Object::ClientPort(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_server_session(&self) -> Option<&Arc<ServerSession>> {
        match self {
            Object::ServerSession(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_client_session(&self) -> Option<&Arc<ClientSession>> {
        match self {
            Object::ClientSession(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_resource_limit(&self) -> Option<&Arc<ResourceLimit>> {
        match self {
            Object::ResourceLimit(o) => Some(o),
            _ => None,
        }
    }
}
