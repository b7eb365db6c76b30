//! Port pairs: the rendezvous objects behind service connections.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use spinning_top::Spinlock;

use lotus_abi::result::{
    ERR_MAX_CONNECTIONS_REACHED, ERR_NO_PENDING_SESSIONS, ERR_SESSION_CLOSED_BY_REMOTE,
};

use crate::object::{Object, WaiterList, WaitObject};
use crate::objects::session::Session;
use crate::objects::{ClientSession, ServerSession};
use crate::system::System;
use crate::thread::Thread;
use crate::wake;
use crate::SvcResult;

pub struct ServerPort {
    pub name: String,
    pending_sessions: Spinlock<VecDeque<Arc<ServerSession>>>,
    waiters: WaiterList,
}

impl ServerPort {
    pub fn new(name: String) -> Self {
        ServerPort {
            name,
            pending_sessions: Spinlock::new(VecDeque::new()),
            waiters: WaiterList::new(),
        }
    }

    /// Take the oldest connection that has not been accepted yet.
    pub fn accept(&self) -> SvcResult<Arc<ServerSession>> {
        self.pending_sessions
            .lock()
            .pop_front()
            .ok_or(ERR_NO_PENDING_SESSIONS)
    }

    pub fn pending_session_count(&self) -> usize {
        self.pending_sessions.lock().len()
    }
}

impl WaitObject for ServerPort {
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        self.pending_sessions.lock().is_empty()
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {}

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}

pub struct ClientPort {
    pub name: String,
    pub max_sessions: u32,
    server_port: Weak<ServerPort>,
    active_sessions: Spinlock<u32>,
}

impl ClientPort {
    /// Build a connected port pair.
    pub fn new_pair(name: &str, max_sessions: u32) -> (Arc<ServerPort>, Arc<ClientPort>) {
        let server = Arc::new(ServerPort::new(format!("{name}:server")));
        let client = Arc::new(ClientPort {
            name: format!("{name}:client"),
            max_sessions,
            server_port: Arc::downgrade(&server),
            active_sessions: Spinlock::new(0),
        });
        (server, client)
    }

    /// Open a new session through the port, waking any accepter.
    pub fn connect(this: &Arc<ClientPort>, system: &mut System) -> SvcResult<Arc<ClientSession>> {
        let server_port = this
            .server_port
            .upgrade()
            .ok_or(ERR_SESSION_CLOSED_BY_REMOTE)?;
        {
            let mut active = this.active_sessions.lock();
            if *active >= this.max_sessions {
                return Err(ERR_MAX_CONNECTIONS_REACHED);
            }
            *active += 1;
        }
        let (server_session, client_session) =
            Session::new_pair(&this.name, Some(Arc::downgrade(this)));
        server_port
            .pending_sessions
            .lock()
            .push_back(server_session);
        wake::resume_ready_waiters(system, &Object::ServerPort(server_port));
        Ok(client_session)
    }

    /// A session opened through this port went away.
    pub fn connection_closed(&self) {
        let mut active = self.active_sessions.lock();
        *active = active.saturating_sub(1);
    }
}
