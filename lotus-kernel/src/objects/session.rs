//! Session pairs: the client and server halves of an IPC connection.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use spinning_top::Spinlock;

use lotus_abi::result::ERR_SESSION_CLOSED_BY_REMOTE;

use crate::object::{Object, WaiterList, WaitObject};
use crate::objects::ClientPort;
use crate::system::System;
use crate::thread::{Thread, ThreadStatus};
use crate::wake;
use crate::SvcResult;

/// Bookkeeping for an in-flight mapped buffer, unmapped at reply time.
#[derive(Debug, Clone, Copy)]
pub struct MappedBufferContext {
    pub source_address: u32,
    pub target_address: u32,
    pub size: u32,
}

struct SessionState {
    client_alive: bool,
    server_alive: bool,
    server: Weak<ServerSession>,
    port: Option<Weak<ClientPort>>,
}

/// The shared parent linking the two session halves.
pub struct Session {
    state: Spinlock<SessionState>,
}

impl Session {
    /// Build a connected client/server session pair.
    pub fn new_pair(
        name: &str,
        port: Option<Weak<ClientPort>>,
    ) -> (Arc<ServerSession>, Arc<ClientSession>) {
        let parent = Arc::new(Session {
            state: Spinlock::new(SessionState {
                client_alive: true,
                server_alive: true,
                server: Weak::new(),
                port,
            }),
        });
        let server = Arc::new(ServerSession {
            name: format!("{name}:server"),
            parent: parent.clone(),
            state: Spinlock::new(ServerSessionState {
                pending_requesting_threads: VecDeque::new(),
                currently_handling: None,
                mapped_buffer_context: Vec::new(),
            }),
            waiters: WaiterList::new(),
        });
        let client = Arc::new(ClientSession {
            name: format!("{name}:client"),
            parent: parent.clone(),
            waiters: WaiterList::new(),
        });
        parent.state.lock().server = Arc::downgrade(&server);
        (server, client)
    }

    pub fn client_alive(&self) -> bool {
        self.state.lock().client_alive
    }

    pub fn server_alive(&self) -> bool {
        self.state.lock().server_alive
    }

    pub fn server(&self) -> Option<Arc<ServerSession>> {
        self.state.lock().server.upgrade()
    }

    fn port(&self) -> Option<Arc<ClientPort>> {
        self.state.lock().port.as_ref()?.upgrade()
    }
}

struct ServerSessionState {
    /// Client threads whose requests have not been picked up yet, FIFO.
    pending_requesting_threads: VecDeque<Arc<Thread>>,
    /// The client thread whose request is being handled; non-empty exactly
    /// while that client is parked awaiting the reply.
    currently_handling: Option<Arc<Thread>>,
    mapped_buffer_context: Vec<MappedBufferContext>,
}

pub struct ServerSession {
    pub name: String,
    pub parent: Arc<Session>,
    state: Spinlock<ServerSessionState>,
    waiters: WaiterList,
}

impl ServerSession {
    pub fn currently_handling(&self) -> Option<Arc<Thread>> {
        self.state.lock().currently_handling.clone()
    }

    pub fn take_currently_handling(&self) -> Option<Arc<Thread>> {
        self.state.lock().currently_handling.take()
    }

    pub fn pending_request_count(&self) -> usize {
        self.state.lock().pending_requesting_threads.len()
    }

    pub fn push_mapped_buffer_context(&self, context: MappedBufferContext) {
        self.state.lock().mapped_buffer_context.push(context);
    }

    pub fn drain_mapped_buffer_context(&self) -> Vec<MappedBufferContext> {
        std::mem::take(&mut self.state.lock().mapped_buffer_context)
    }

    /// Final client handle went away: unblock anything parked on receive.
    pub fn on_client_disconnected(this: &Arc<ServerSession>, system: &mut System) {
        if let Some(port) = this.parent.port() {
            port.connection_closed();
        }
        wake::resume_ready_waiters(system, &Object::ServerSession(this.clone()));
    }

    /// Final server handle went away: fail every parked client.
    pub fn on_server_closed(this: &Arc<ServerSession>, system: &mut System) {
        this.parent.state.lock().server_alive = false;
        let clients = {
            let mut state = this.state.lock();
            let mut clients: Vec<Arc<Thread>> =
                state.pending_requesting_threads.drain(..).collect();
            if let Some(current) = state.currently_handling.take() {
                clients.push(current);
            }
            clients
        };
        for client in clients {
            if client.status() == ThreadStatus::WaitIpc {
                client.set_wait_synchronization_result(ERR_SESSION_CLOSED_BY_REMOTE);
                wake::resume_from_wait(system, &client, wake::WakeReason::Signal, None);
            }
        }
    }
}

impl WaitObject for ServerSession {
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        // A dead client makes the session ready so receives can observe the
        // closure instead of blocking forever.
        if !self.parent.client_alive() {
            return false;
        }
        self.state.lock().pending_requesting_threads.is_empty()
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {
        let mut state = self.state.lock();
        if !self.parent.client_alive() {
            return;
        }
        debug_assert!(
            state.currently_handling.is_none(),
            "server session acquired while already handling a request"
        );
        state.currently_handling = state.pending_requesting_threads.pop_front();
    }

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}

pub struct ClientSession {
    pub name: String,
    pub parent: Arc<Session>,
    waiters: WaiterList,
}

impl ClientSession {
    /// Queue the calling thread's request on the server side and park it
    /// until the reply arrives.
    pub fn send_sync_request(
        this: &Arc<ClientSession>,
        system: &mut System,
        thread: &Arc<Thread>,
    ) -> SvcResult<()> {
        let server = this.parent.server().ok_or(ERR_SESSION_CLOSED_BY_REMOTE)?;
        if !this.parent.server_alive() {
            return Err(ERR_SESSION_CLOSED_BY_REMOTE);
        }
        server
            .state
            .lock()
            .pending_requesting_threads
            .push_back(thread.clone());
        thread.set_status(ThreadStatus::WaitIpc);
        wake::resume_ready_waiters(system, &Object::ServerSession(server));
        Ok(())
    }

    /// Final client handle went away.
    pub fn on_all_handles_closed(this: &Arc<ClientSession>, system: &mut System) {
        this.parent.state.lock().client_alive = false;
        if let Some(server) = this.parent.server() {
            ServerSession::on_client_disconnected(&server, system);
        }
    }
}

impl WaitObject for ClientSession {
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        self.parent.server_alive()
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {}

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}
